/// Process definition layer
///
/// Handles definition documents, their SQLite storage and the hot-reload registry of
/// compiled definitions the runtime navigates.

pub mod registry;
pub mod storage;
pub mod types;

pub use registry::{CompiledDefinition, DefinitionRegistry};
pub use storage::{DefinitionMetadata, DefinitionStorage};
pub use types::{Activity, ActivityType, DeploymentRequest, ProcessDefinition, SequenceFlow};
