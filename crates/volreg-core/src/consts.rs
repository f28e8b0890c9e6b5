/// Minimum voxel count to use slab-level Rayon parallelism.
pub const PARALLEL_VOXEL_THRESHOLD: usize = 32_768;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// The template is coarsened while the subject voxel size exceeds the
/// template voxel size by this ratio.
pub const TEMPLATE_DOWNSAMPLE_RATIO: f32 = 1.5;

/// The subject is coarsened while its voxel size times this ratio does not
/// exceed the template voxel size.
pub const SUBJECT_DOWNSAMPLE_RATIO: f32 = 2.0;

/// A volume counts as a label map when all values are integers and it holds
/// at most this many distinct values.
pub const LABEL_MAX_DISTINCT_VALUES: usize = 128;

/// Number of histogram bins for mutual information.
pub const MI_HISTOGRAM_BINS: usize = 24;

/// Number of histogram bins for Otsu's thresholding.
pub const OTSU_HISTOGRAM_BINS: usize = 256;

/// Linear registration coarsens both images until the largest dimension is
/// at most this size before the coarse-to-fine search starts.
pub const LINEAR_PYRAMID_MAX_DIM: usize = 32;

/// Upper bound on local-search sweeps per pyramid level.
pub const LINEAR_MAX_ITERATIONS: usize = 200;

/// Precision of the coarse linear pass (fraction of each parameter range).
pub const LINEAR_COARSE_PRECISION: f32 = 0.01;

/// Precision of the tightening linear pass.
pub const LINEAR_FINE_PRECISION: f32 = 0.001;

/// Nonlinear registration stops building coarser levels below this size.
pub const NONLINEAR_MIN_DIM: usize = 16;

/// Largest per-iteration displacement update, in voxels.
pub const NONLINEAR_MAX_STEP: f32 = 0.5;

/// Default controller polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Status label while the linear stage runs.
pub const STATUS_LINEAR: &str = "linear registration";

/// Status label while the nonlinear stage runs.
pub const STATUS_NONLINEAR: &str = "nonlinear registration";

/// Status label after a successful run.
pub const STATUS_DONE: &str = "registration done";

/// Job-wide progress is reported as a position out of this total.
pub const PROGRESS_TOTAL: usize = 1000;

/// End of the linear stage's share of [`PROGRESS_TOTAL`].
pub const PROGRESS_LINEAR_END: usize = 300;
