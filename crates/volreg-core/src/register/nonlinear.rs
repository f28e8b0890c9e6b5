//! Demons-style deformable registration.
//!
//! The solver works coarse to fine. Each level starts from the upsampled
//! field of the level below it and runs a fixed number of iterations. An
//! iteration computes a per-voxel force from the intensity residual and the
//! warped subject's gradient, composes it into the field, then smooths and
//! shrinks the field.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{EPSILON, NONLINEAR_MAX_STEP, NONLINEAR_MIN_DIM};
use crate::error::{Result, VolregError};
use crate::field::DisplacementField;
use crate::filters::edge::{edge_map, gradient, mean_filter_vec};
use crate::filters::intensity::normalize;
use crate::pipeline::context::JobContext;
use crate::pyramid::downsample_array;
use crate::volume::{build_array, Geometry, Vec3, Volume};

/// Parameters of the deformable solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinearParams {
    /// Number of halvings below the working template geometry at which the
    /// field is solved.
    pub resolution: usize,
    /// Diffusion weight in `[0, 1]` applied after every update.
    pub smoothness: f32,
    /// Pull toward the zero field after every update.
    pub constraint: f32,
    /// Iterations per pyramid level.
    pub iterations: usize,
}

impl Default for NonlinearParams {
    fn default() -> Self {
        Self {
            resolution: 1,
            smoothness: 0.3,
            constraint: 0.1,
            iterations: 32,
        }
    }
}

/// Images driving the solver, all on the template grid.
pub struct NonlinearInputs<'a> {
    pub template: &'a Volume,
    pub template2: Option<&'a Volume>,
    /// Subject after the linear stage.
    pub subject: &'a Volume,
    pub subject2: Option<&'a Volume>,
}

/// A fixed/moving pair solved jointly with the others.
type Channel = (Array3<f32>, Array3<f32>);

fn prepared(data: &Array3<f32>) -> Array3<f32> {
    let mut out = data.clone();
    normalize(&mut out, 1.0);
    out
}

/// Pick the channels to solve on. Edge mode wins over dual mode; dual mode
/// needs both secondary images with exactly the primary geometry.
fn select_channels(inputs: &NonlinearInputs<'_>, edge: bool) -> Vec<Channel> {
    let (t, s) = (inputs.template, inputs.subject);
    if edge {
        debug!("Nonlinear registration on edge maps");
        return vec![(prepared(&edge_map(&t.data)), prepared(&edge_map(&s.data)))];
    }
    match (inputs.template2, inputs.subject2) {
        (Some(t2), Some(s2)) if t2.geometry() == t.geometry() && s2.geometry() == s.geometry() => {
            debug!("Nonlinear registration on two channels");
            vec![
                (prepared(&t.data), prepared(&s.data)),
                (prepared(&t2.data), prepared(&s2.data)),
            ]
        }
        (t2, s2) => {
            if t2.is_some() || s2.is_some() {
                warn!("Secondary channel geometry does not match, using single channel");
            }
            vec![(prepared(&t.data), prepared(&s.data))]
        }
    }
}

/// Averaged demons force `r·∇w / (|∇w|² + r²)`, capped and smoothed.
fn demons_force(channels: &[Channel], field: &DisplacementField) -> DisplacementField {
    let geometry = field.geometry();
    let weight = 1.0 / channels.len().max(1) as f32;
    let per_channel: Vec<(&Array3<f32>, Array3<f32>, Array3<Vec3>)> = channels
        .iter()
        .map(|(fixed, moving)| {
            let warped = field.warp(moving);
            let grad = gradient(&warped);
            (fixed, warped, grad)
        })
        .collect();

    let raw = build_array(geometry, |x, y, z| {
        let mut f = [0.0f32; 3];
        for (fixed, warped, grad) in &per_channel {
            let r = fixed[[x, y, z]] - warped[[x, y, z]];
            let g = grad[[x, y, z]];
            let denom = g[0] * g[0] + g[1] * g[1] + g[2] * g[2] + r * r;
            if denom > EPSILON {
                let k = r / denom * weight;
                f[0] += k * g[0];
                f[1] += k * g[1];
                f[2] += k * g[2];
            }
        }
        let len = (f[0] * f[0] + f[1] * f[1] + f[2] * f[2]).sqrt();
        if len > NONLINEAR_MAX_STEP {
            let s = NONLINEAR_MAX_STEP / len;
            [f[0] * s, f[1] * s, f[2] * s]
        } else {
            f
        }
    });
    DisplacementField::from_array(mean_filter_vec(&raw))
}

fn regularize(field: DisplacementField, params: &NonlinearParams) -> DisplacementField {
    let s = params.smoothness.clamp(0.0, 1.0);
    let shrink = (1.0 - params.constraint.clamp(0.0, 1.0) * 0.05).max(0.0);
    let smooth = mean_filter_vec(&field.data);
    let mut data = field.data;
    ndarray::Zip::from(&mut data).and(&smooth).for_each(|v, m| {
        for i in 0..3 {
            v[i] = ((1.0 - s) * v[i] + s * m[i]) * shrink;
        }
    });
    DisplacementField::from_array(data)
}

/// Number of pyramid levels `solve` visits for `geometry`.
fn solve_levels(geometry: Geometry) -> usize {
    let mut levels = 1;
    let mut g = geometry;
    while g.min_dim() >= 2 * NONLINEAR_MIN_DIM {
        g = g.downsampled();
        levels += 1;
    }
    levels
}

/// Iterations completed across all levels of one solve.
struct SolveProgress {
    done: usize,
    total: usize,
}

fn solve(
    channels: &[Channel],
    params: &NonlinearParams,
    ctx: &JobContext,
    progress: &mut SolveProgress,
) -> Result<DisplacementField> {
    let geometry = Geometry::of(&channels[0].0);
    let mut field = if geometry.min_dim() >= 2 * NONLINEAR_MIN_DIM {
        let coarse: Vec<Channel> = channels
            .iter()
            .map(|(f, m)| (downsample_array(f), downsample_array(m)))
            .collect();
        solve(&coarse, params, ctx, progress)?.upsample(geometry)
    } else {
        DisplacementField::zeros(geometry)
    };

    for iteration in 0..params.iterations {
        if ctx.is_cancelled() {
            debug!(iteration, %geometry, "Nonlinear level cancelled");
            return Ok(field);
        }
        let force = demons_force(channels, &field);
        field = regularize(field.compose(&force)?, params);
        progress.done += 1;
        ctx.report_stage_progress(progress.done, progress.total);
    }
    debug!(%geometry, max_displacement = field.max_magnitude(), "Nonlinear level complete");
    Ok(field)
}

/// Solve for the displacement field from template toward the linearly
/// resampled subject. The field lives `params.resolution` halvings below the
/// template geometry. A cancelled run returns the partial field; callers
/// check the context before using it.
pub fn run_nonlinear_stage(
    inputs: &NonlinearInputs<'_>,
    params: &NonlinearParams,
    edge: bool,
    ctx: &JobContext,
) -> Result<DisplacementField> {
    if inputs.template.is_empty() {
        return Err(VolregError::EmptyVolume("template"));
    }
    if inputs.subject.geometry() != inputs.template.geometry() {
        return Err(VolregError::GeometryMismatch {
            expected: inputs.template.geometry().dims(),
            actual: inputs.subject.geometry().dims(),
        });
    }

    let mut channels = select_channels(inputs, edge);
    for _ in 0..params.resolution {
        channels = channels
            .iter()
            .map(|(f, m)| (downsample_array(f), downsample_array(m)))
            .collect();
    }

    let mut progress = SolveProgress {
        done: 0,
        total: params.iterations * solve_levels(Geometry::of(&channels[0].0)),
    };
    let field = solve(&channels, params, ctx, &mut progress)?;
    if ctx.is_cancelled() {
        return Ok(field);
    }
    info!(
        geometry = %field.geometry(),
        channels = channels.len(),
        max_displacement = field.max_magnitude(),
        min_jacobian = field.min_jacobian(),
        "Nonlinear registration complete"
    );
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VoxelSize;

    fn blob(n: usize, cx: f32) -> Volume {
        let data = Array3::from_shape_fn((n, n, n), |(x, y, z)| {
            let c = (n as f32 - 1.0) / 2.0;
            let d = (x as f32 - cx).powi(2) + (y as f32 - c).powi(2) + (z as f32 - c).powi(2);
            (-d / 18.0).exp()
        });
        Volume::new(data, VoxelSize::default())
    }

    #[test]
    fn test_field_geometry_follows_resolution() {
        let t = blob(20, 9.5);
        let s = blob(20, 9.5);
        let inputs = NonlinearInputs {
            template: &t,
            template2: None,
            subject: &s,
            subject2: None,
        };
        let params = NonlinearParams {
            iterations: 2,
            ..NonlinearParams::default()
        };
        let field = run_nonlinear_stage(&inputs, &params, false, &JobContext::default()).unwrap();
        assert_eq!(field.geometry(), Geometry::new(10, 10, 10));
    }

    #[test]
    fn test_moves_toward_subject() {
        let t = blob(20, 9.5);
        let s = blob(20, 10.5);
        let inputs = NonlinearInputs {
            template: &t,
            template2: None,
            subject: &s,
            subject2: None,
        };
        let params = NonlinearParams {
            resolution: 0,
            iterations: 20,
            ..NonlinearParams::default()
        };
        let field = run_nonlinear_stage(&inputs, &params, false, &JobContext::default()).unwrap();
        // Template voxels left of the peak read further right in the subject.
        assert!(field.data[[7, 10, 10]][0] > 0.0);
    }

    #[test]
    fn test_dual_channel_needs_matching_geometry() {
        let t = blob(12, 5.5);
        let s = blob(12, 5.5);
        let odd = blob(10, 4.5);
        let matched = NonlinearInputs {
            template: &t,
            template2: Some(&t),
            subject: &s,
            subject2: Some(&s),
        };
        assert_eq!(select_channels(&matched, false).len(), 2);
        assert_eq!(select_channels(&matched, true).len(), 1);
        let mismatched = NonlinearInputs {
            template: &t,
            template2: Some(&t),
            subject: &s,
            subject2: Some(&odd),
        };
        assert_eq!(select_channels(&mismatched, false).len(), 1);
    }

    #[test]
    fn test_cancelled_context_returns_zero_field() {
        let t = blob(12, 5.5);
        let s = blob(12, 6.5);
        let ctx = JobContext::default();
        ctx.cancel.cancel();
        let inputs = NonlinearInputs {
            template: &t,
            template2: None,
            subject: &s,
            subject2: None,
        };
        let field = run_nonlinear_stage(&inputs, &NonlinearParams::default(), false, &ctx).unwrap();
        assert_eq!(field.max_magnitude(), 0.0);
    }

    #[test]
    fn test_progress_accumulates_across_levels() {
        use crate::pipeline::{CancelToken, ProgressReporter};
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        struct Positions(Mutex<Vec<usize>>);
        impl ProgressReporter for Positions {
            fn report_progress(&self, current: usize, _total: usize) {
                self.0.lock().unwrap().push(current);
            }
        }

        assert_eq!(solve_levels(Geometry::new(32, 32, 32)), 2);
        assert_eq!(solve_levels(Geometry::new(31, 64, 64)), 1);

        let t = blob(32, 15.5);
        let s = blob(32, 16.5);
        let inputs = NonlinearInputs {
            template: &t,
            template2: None,
            subject: &s,
            subject2: None,
        };
        let params = NonlinearParams {
            resolution: 0,
            iterations: 3,
            ..NonlinearParams::default()
        };
        let positions = Arc::new(Positions::default());
        let ctx = JobContext::new(CancelToken::new(), positions.clone()).in_span(0..600);
        run_nonlinear_stage(&inputs, &params, false, &ctx).unwrap();

        // Two levels of three iterations each, one report per iteration.
        let seen = positions.0.lock().unwrap().clone();
        assert_eq!(seen, vec![100, 200, 300, 400, 500, 600]);
    }
}
