use crate::consts::{STATUS_DONE, STATUS_LINEAR, STATUS_NONLINEAR};

/// Registration stage, used for status text and progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationStage {
    Linear,
    Nonlinear,
    Done,
}

impl RegistrationStage {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Linear => STATUS_LINEAR,
            Self::Nonlinear => STATUS_NONLINEAR,
            Self::Done => STATUS_DONE,
        }
    }
}

impl std::fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// Lifecycle of a registration job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Idle,
    LinearRunning,
    NonlinearRunning,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::LinearRunning | Self::NonlinearRunning)
    }

    /// Done, cancelled or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::LinearRunning => write!(f, "Linear registration running"),
            Self::NonlinearRunning => write!(f, "Nonlinear registration running"),
            Self::Done => write!(f, "Done"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Thread-safe progress reporting for long-running registration work.
///
/// Implementors can use this to drive progress bars, logging, or an external
/// cancel button. All methods have default no-op implementations, so a
/// headless caller can pass [`NoOpReporter`].
pub trait ProgressReporter: Send + Sync {
    /// `current` of `total` work items are complete.
    fn report_progress(&self, _current: usize, _total: usize) {}

    /// Polled at iteration boundaries alongside the job's own cancel flag.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// The job moved to a new stage.
    fn set_status_text(&self, _text: &str) {}
}

/// Progress reporter that ignores everything.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
