/// Persistence layer
///
/// Generic object-relational plumbing every entity manager sits on:
/// - `Entity`/`EntityKind`: what is persisted and where
/// - `Statement`: named selects evaluated in SQL and in memory
/// - `DbSqlSession`: the per-command unit-of-work cache
/// - `schema`: pool setup and table creation

pub mod entity;
pub mod schema;
pub mod session;
pub mod statement;

pub(crate) use entity::impl_entity;
pub use entity::{new_id, Entity, EntityKind};
pub use session::{DbSqlSession, FlushSummary};
pub use statement::{Order, Predicate, Statement};
