// Workflow state - persisted phase document and its transitions
pub mod checkpoint;
pub mod phase;
pub mod state;

pub use checkpoint::StateFile;
pub use phase::{resume_point_for, PhaseStateMachine, ResumePoint, SharedPhaseMachine, StatusReport};
pub use state::{ArtifactCategory, FileRegistry, Phase, PhaseRecord, SceneRoster};
