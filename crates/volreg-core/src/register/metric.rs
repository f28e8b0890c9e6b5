//! Similarity metrics for linear registration.
//!
//! A metric compares the fixed image with the moving image sampled through a
//! voxel transform. Lower cost is better. Evaluation is split into per-slab
//! partials computed in parallel and reduced in slab order, so the cost of
//! a given transform is bit-identical between runs.

use ndarray::Array3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{EPSILON, MI_HISTOGRAM_BINS, PARALLEL_VOXEL_THRESHOLD};
use crate::interpolation::trilinear_sample;
use crate::transform::TransformMatrix;

/// Cost function choice for linear registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostType {
    #[default]
    MutualInformation,
    Correlation,
    /// No search: the subject is placed into template space at the origin.
    Skip,
}

impl CostType {
    /// Metric implementing this cost, `None` for [`CostType::Skip`].
    pub fn metric(&self) -> Option<Box<dyn SimilarityMetric>> {
        match self {
            Self::MutualInformation => Some(Box::new(MutualInformation::default())),
            Self::Correlation => Some(Box::new(Correlation)),
            Self::Skip => None,
        }
    }
}

impl std::fmt::Display for CostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MutualInformation => write!(f, "Mutual information"),
            Self::Correlation => write!(f, "Correlation"),
            Self::Skip => write!(f, "Skip"),
        }
    }
}

/// A cost over `fixed` and `moving ∘ matrix`; lower is better.
pub trait SimilarityMetric: Send + Sync {
    fn cost(&self, fixed: &Array3<f32>, moving: &Array3<f32>, matrix: &TransformMatrix) -> f64;
}

/// Visit every fixed voxel whose mapped position falls inside `moving`,
/// accumulating per x-slab into `P`, then fold the slabs in order.
fn reduce_slabs<P, F, G>(
    fixed: &Array3<f32>,
    moving: &Array3<f32>,
    matrix: &TransformMatrix,
    init: G,
    visit: F,
) -> Vec<P>
where
    P: Send,
    G: Fn() -> P + Send + Sync,
    F: Fn(&mut P, f32, f32) + Send + Sync,
{
    let (nx, ny, nz) = fixed.dim();
    let slab = |x: usize| {
        let mut partial = init();
        for y in 0..ny {
            for z in 0..nz {
                let pos = matrix.apply([x as f32, y as f32, z as f32]);
                if let Some(m) = trilinear_sample(moving, pos) {
                    visit(&mut partial, fixed[[x, y, z]], m);
                }
            }
        }
        partial
    };
    if fixed.len() >= PARALLEL_VOXEL_THRESHOLD {
        (0..nx).into_par_iter().map(slab).collect()
    } else {
        (0..nx).map(slab).collect()
    }
}

/// Negative Pearson correlation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Correlation;

#[derive(Clone, Copy, Default)]
struct Moments {
    n: f64,
    sa: f64,
    sb: f64,
    saa: f64,
    sbb: f64,
    sab: f64,
}

impl SimilarityMetric for Correlation {
    fn cost(&self, fixed: &Array3<f32>, moving: &Array3<f32>, matrix: &TransformMatrix) -> f64 {
        let slabs = reduce_slabs(fixed, moving, matrix, Moments::default, |m, a, b| {
            let (a, b) = (a as f64, b as f64);
            m.n += 1.0;
            m.sa += a;
            m.sb += b;
            m.saa += a * a;
            m.sbb += b * b;
            m.sab += a * b;
        });
        let mut t = Moments::default();
        for s in &slabs {
            t.n += s.n;
            t.sa += s.sa;
            t.sb += s.sb;
            t.saa += s.saa;
            t.sbb += s.sbb;
            t.sab += s.sab;
        }
        if t.n < 2.0 {
            return 0.0;
        }
        let cov = t.sab - t.sa * t.sb / t.n;
        let va = t.saa - t.sa * t.sa / t.n;
        let vb = t.sbb - t.sb * t.sb / t.n;
        let denom = (va * vb).sqrt();
        if !denom.is_finite() || denom <= EPSILON as f64 {
            return 0.0;
        }
        -(cov / denom)
    }
}

/// Negative mutual information of a joint histogram. Intensities are
/// expected in `[0, 1]`; values outside are clamped into the end bins.
#[derive(Clone, Copy, Debug)]
pub struct MutualInformation {
    pub bins: usize,
}

impl Default for MutualInformation {
    fn default() -> Self {
        Self {
            bins: MI_HISTOGRAM_BINS,
        }
    }
}

impl MutualInformation {
    #[inline]
    fn bin(&self, v: f32) -> usize {
        let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        ((v * self.bins as f32) as usize).min(self.bins - 1)
    }
}

impl SimilarityMetric for MutualInformation {
    fn cost(&self, fixed: &Array3<f32>, moving: &Array3<f32>, matrix: &TransformMatrix) -> f64 {
        let bins = self.bins.max(2);
        let this = Self { bins };
        let slabs = reduce_slabs(
            fixed,
            moving,
            matrix,
            || vec![0u32; bins * bins],
            |hist, a, b| hist[this.bin(a) * bins + this.bin(b)] += 1,
        );
        let mut joint = vec![0u64; bins * bins];
        for s in &slabs {
            for (j, &c) in joint.iter_mut().zip(s.iter()) {
                *j += c as u64;
            }
        }
        let total: u64 = joint.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let total = total as f64;
        let mut pa = vec![0.0f64; bins];
        let mut pb = vec![0.0f64; bins];
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j] as f64 / total;
                pa[i] += p;
                pb[j] += p;
            }
        }
        let mut mi = 0.0f64;
        for i in 0..bins {
            for j in 0..bins {
                let c = joint[i * bins + j];
                if c == 0 {
                    continue;
                }
                let p = c as f64 / total;
                mi += p * (p / (pa[i] * pb[j])).ln();
            }
        }
        -mi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn pattern() -> Array3<f32> {
        Array3::from_shape_fn((12, 10, 8), |(x, y, z)| {
            (((x * x * 7 + x * y + y * 13 + z * z * 3) % 17) as f32) / 16.0
        })
    }

    fn shifted(dx: f32) -> TransformMatrix {
        TransformMatrix {
            shift: Vector3::new(dx, 0.0, 0.0),
            ..TransformMatrix::identity()
        }
    }

    #[test]
    fn test_correlation_prefers_alignment() {
        let a = pattern();
        let aligned = Correlation.cost(&a, &a, &TransformMatrix::identity());
        let off = Correlation.cost(&a, &a, &shifted(1.0));
        assert!((aligned + 1.0).abs() < 1e-6);
        assert!(off > aligned);
    }

    #[test]
    fn test_mutual_information_prefers_alignment() {
        let a = pattern();
        let mi = MutualInformation::default();
        let aligned = mi.cost(&a, &a, &TransformMatrix::identity());
        let off = mi.cost(&a, &a, &shifted(1.0));
        assert!(aligned < off);
    }

    #[test]
    fn test_no_overlap_costs_zero() {
        let a = pattern();
        assert_eq!(Correlation.cost(&a, &a, &shifted(100.0)), 0.0);
        assert_eq!(MutualInformation::default().cost(&a, &a, &shifted(100.0)), 0.0);
    }

    #[test]
    fn test_skip_has_no_metric() {
        assert!(CostType::Skip.metric().is_none());
        assert!(CostType::Correlation.metric().is_some());
    }
}
