pub mod linear;
pub mod metric;
pub mod nonlinear;
pub mod resolution;
pub mod series;

pub use linear::{run_linear_stage, LinearOptions, LinearResult};
pub use metric::{CostType, SimilarityMetric};
pub use nonlinear::{run_nonlinear_stage, NonlinearInputs, NonlinearParams};
pub use resolution::{match_resolution, MatchedPair};
pub use series::{coregister_rigid, motion_correct, MotionCorrection};
