/// processway: persistence tier of a business-process execution engine
///
/// Entity managers over a unit-of-work SQLite session, with the runtime needed to drive
/// them: an agenda navigating JSON process definitions, timers and an async job executor.

// Core configuration and setup
pub mod config;
pub mod error;

// Unit-of-work session, named statements and schema
pub mod persistence;

// Persistent entity types
pub mod entities;

// Engine lifecycle events and the dispatcher
pub mod event;

// History levels and the history manager
pub mod history;

// Process definitions: types, storage and the hot-reload registry
pub mod definition;

// Per-entity managers borrowing a command context
pub mod managers;

// Commands, agenda, timers and the job executor
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::{EngineError, EngineResult};
pub use runtime::{JobExecutor, ProcessEngine};
pub use server::start_server;
