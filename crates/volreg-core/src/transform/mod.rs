pub mod affine;
pub mod resample;

pub use affine::{AffineParams, AffineTransform, Anchor, RegType, Space, TransformMatrix};
pub use resample::resample;
