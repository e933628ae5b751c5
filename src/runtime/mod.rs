/// Process runtime
///
/// Commands, the agenda that navigates process definitions, the timer calendar and the
/// async job executor with its background acquisition service.

pub mod agenda;
pub mod calendar;
pub mod clock;
pub mod context;

// Service facade over commands
pub mod engine;

// Job handlers and the job executor
pub mod executor;

// Background acquisition driven by tokio-cron-scheduler
pub mod scheduler;

pub use agenda::{Agenda, AgendaOperation};
pub use calendar::{IsoDuration, RepeatExpression, TimerDeclaration};
pub use clock::EngineClock;
pub use context::CommandContext;
pub use engine::{ProcessEngine, StartedProcessInstance, TaskFilter};
pub use executor::{JobExecutor, JobHandler};
pub use scheduler::JobAcquisitionService;
