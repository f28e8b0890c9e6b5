pub mod config;
pub mod context;
mod orchestrator;
mod types;

pub use config::RegistrationConfig;
pub use context::{CancelToken, JobContext};
pub use orchestrator::{JobSnapshot, RegistrationEngine, RegistrationInputs, RegistrationResult};
pub use types::{JobState, NoOpReporter, ProgressReporter, RegistrationStage};
