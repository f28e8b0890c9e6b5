use std::collections::HashSet;

use ndarray::Array3;

use crate::consts::LABEL_MAX_DISTINCT_VALUES;
use crate::interpolation::Interpolation;

/// True for a segmentation-like volume: every value is an integer and there
/// are at most [`LABEL_MAX_DISTINCT_VALUES`] of them.
pub fn is_label_image(data: &Array3<f32>) -> bool {
    if data.is_empty() {
        return false;
    }
    let mut seen = HashSet::new();
    for &v in data.iter() {
        if !v.is_finite() || v.fract() != 0.0 {
            return false;
        }
        seen.insert(v as i64);
        if seen.len() > LABEL_MAX_DISTINCT_VALUES {
            return false;
        }
    }
    true
}

/// Interpolation to use for `data`: nearest for label images, `requested`
/// otherwise.
pub fn select_interpolation(data: &Array3<f32>, requested: Interpolation) -> Interpolation {
    if is_label_image(data) {
        Interpolation::Nearest
    } else {
        requested
    }
}
