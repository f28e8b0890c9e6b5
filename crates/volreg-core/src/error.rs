use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolregError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} volume is empty")]
    EmptyVolume(&'static str),

    #[error("Invalid voxel size: {0:?}")]
    InvalidVoxelSize([f32; 3]),

    #[error("Geometry mismatch: expected {expected:?}, got {actual:?}")]
    GeometryMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("A registration job is already running")]
    JobRunning,

    #[error("Registration result not available: {0}")]
    NotReady(&'static str),

    #[error("Invalid NIfTI file: {0}")]
    InvalidNifti(String),

    #[error("Invalid mapping file: {0}")]
    InvalidMapping(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registration worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, VolregError>;
