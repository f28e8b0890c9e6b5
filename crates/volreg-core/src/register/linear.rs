use std::f32::consts::FRAC_PI_4;

use tracing::{debug, info};

use crate::consts::{
    LINEAR_COARSE_PRECISION, LINEAR_FINE_PRECISION, LINEAR_MAX_ITERATIONS, LINEAR_PYRAMID_MAX_DIM,
};
use crate::error::{Result, VolregError};
use crate::filters::intensity::{correlation, normalize};
use crate::interpolation::Interpolation;
use crate::pipeline::context::JobContext;
use crate::pyramid::downsample;
use crate::register::metric::{CostType, SimilarityMetric};
use crate::transform::{resample, AffineParams, AffineTransform, Anchor, RegType, Space};
use crate::volume::{Vec3, Volume, VoxelSize};

/// Width of the parameter search window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    /// Wide window for an unknown initial pose.
    Large,
    /// Tight window around a previous estimate.
    Narrow,
}

impl Bound {
    /// Half-width of the window for each of the 12 parameters, given the
    /// template field of view in millimeters.
    pub fn ranges(&self, fov: Vec3) -> [f32; 12] {
        let (t, r, s, sh) = match self {
            Self::Large => (0.5, FRAC_PI_4, 0.5, 0.3),
            Self::Narrow => (0.05, 0.1, 0.1, 0.05),
        };
        [
            fov[0] * t, fov[1] * t, fov[2] * t,
            r, r, r,
            s, s, s,
            sh, sh, sh,
        ]
    }
}

/// One optimization pass: a window and the fraction of it at which the
/// search stops refining.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchPass {
    pub bound: Bound,
    pub precision: f32,
}

/// Wide search followed by a tight refinement.
pub const TWO_PASS: [SearchPass; 2] = [
    SearchPass {
        bound: Bound::Large,
        precision: LINEAR_COARSE_PRECISION,
    },
    SearchPass {
        bound: Bound::Narrow,
        precision: LINEAR_FINE_PRECISION,
    },
];

/// What to estimate and how to score it.
pub struct LinearSearch<'a> {
    pub reg_type: RegType,
    pub metric: &'a dyn SimilarityMetric,
    /// Average the forward cost with the cost of the inverse mapping.
    pub bidirectional: bool,
}

impl LinearSearch<'_> {
    fn evaluate(&self, params: &AffineParams, template: &Volume, subject: &Volume) -> f64 {
        let transform = AffineTransform::new(
            *params,
            self.reg_type,
            Anchor::Center,
            Space::of(template),
            Space::of(subject),
        );
        let forward = self
            .metric
            .cost(&template.data, &subject.data, transform.matrix());
        if self.bidirectional {
            if let Some(inverse) = transform.inverse() {
                let backward = self.metric.cost(&subject.data, &template.data, inverse);
                return 0.5 * (forward + backward);
            }
        }
        forward
    }
}

/// Intensity-weighted center of mass in voxel coordinates.
fn center_of_mass(volume: &Volume) -> Option<Vec3> {
    let mut acc = [0.0f64; 3];
    let mut mass = 0.0f64;
    for ((x, y, z), &v) in volume.data.indexed_iter() {
        if v.is_finite() && v > 0.0 {
            let w = v as f64;
            acc[0] += w * x as f64;
            acc[1] += w * y as f64;
            acc[2] += w * z as f64;
            mass += w;
        }
    }
    if mass <= 0.0 {
        return None;
    }
    Some([
        (acc[0] / mass) as f32,
        (acc[1] / mass) as f32,
        (acc[2] / mass) as f32,
    ])
}

/// Translation that lines up the two centers of mass.
pub fn center_of_mass_init(template: &Volume, subject: &Volume) -> AffineParams {
    let (Some(ct), Some(cs)) = (center_of_mass(template), center_of_mass(subject)) else {
        return AffineParams::default();
    };
    let (gt, gs) = (template.geometry().center(), subject.geometry().center());
    let (vt, vs) = (template.voxel_size.as_array(), subject.voxel_size.as_array());
    let mut translation = [0.0; 3];
    for i in 0..3 {
        translation[i] = vs[i] * (cs[i] - gs[i]) - vt[i] * (ct[i] - gt[i]);
    }
    AffineParams {
        translation,
        ..AffineParams::default()
    }
}

/// Volumes coarsened until the largest dimension fits the search pyramid.
fn chain(volume: &Volume) -> Vec<Volume> {
    let mut levels = vec![volume.clone()];
    while let Some(last) = levels.last() {
        let geometry = last.geometry();
        if geometry.max_dim() <= LINEAR_PYRAMID_MAX_DIM {
            break;
        }
        let next = downsample(last);
        if next.geometry() == geometry {
            break;
        }
        levels.push(next);
    }
    levels
}

/// Template/subject pairs ordered coarse to fine.
fn search_levels(template: &Volume, subject: &Volume) -> Vec<(Volume, Volume)> {
    let t = chain(template);
    let s = chain(subject);
    let depth = t.len().max(s.len());
    (0..depth)
        .rev()
        .map(|i| (t[i.min(t.len() - 1)].clone(), s[i.min(s.len() - 1)].clone()))
        .collect()
}

fn working_copy(volume: &Volume) -> Volume {
    let mut v = volume.clone();
    v.data.mapv_inplace(|x| if x.is_finite() { x.max(0.0) } else { 0.0 });
    normalize(&mut v.data, 1.0);
    v
}

/// Coordinate local search within `center ± ranges`. Each sweep tries a
/// step up then down on every active parameter and keeps the first
/// improvement; a sweep without improvement halves all steps.
#[allow(clippy::too_many_arguments)]
fn local_search(
    search: &LinearSearch<'_>,
    template: &Volume,
    subject: &Volume,
    start: AffineParams,
    center: &[f32; 12],
    ranges: &[f32; 12],
    initial_fraction: f32,
    precision: f32,
    ctx: &JobContext,
) -> AffineParams {
    let active = search.reg_type.dof();
    let mut p = start.to_vector();
    let lower: Vec<f32> = (0..12).map(|i| center[i] - ranges[i]).collect();
    let upper: Vec<f32> = (0..12).map(|i| center[i] + ranges[i]).collect();
    let mut steps: Vec<f32> = ranges
        .iter()
        .map(|r| r * initial_fraction.max(2.0 * precision))
        .collect();
    let mut best = search.evaluate(&AffineParams::from_vector(&p), template, subject);

    for iteration in 0..LINEAR_MAX_ITERATIONS {
        if ctx.is_cancelled() {
            debug!(iteration, "Linear search cancelled");
            break;
        }
        let mut improved = false;
        'params: for i in 0..active {
            for dir in [1.0f32, -1.0] {
                let mut candidate = p;
                candidate[i] = (p[i] + dir * steps[i]).clamp(lower[i], upper[i]);
                if (6..9).contains(&i) {
                    candidate[i] = candidate[i].max(0.1);
                }
                if candidate[i] == p[i] {
                    continue;
                }
                let cost = search.evaluate(&AffineParams::from_vector(&candidate), template, subject);
                if cost < best {
                    best = cost;
                    p = candidate;
                    improved = true;
                    break 'params;
                }
            }
        }
        if !improved {
            for s in steps.iter_mut() {
                *s *= 0.5;
            }
            if (0..active).all(|i| steps[i] < precision * ranges[i]) {
                debug!(iteration, cost = best, "Linear search converged");
                break;
            }
        }
    }
    AffineParams::from_vector(&p)
}

/// Estimate the transform from template voxels to subject voxels.
///
/// `init` seeds the search; without one the translation starts from the
/// centers of mass. Every pass runs coarse to fine over an internal pyramid
/// and re-centers its window on the previous pass's result.
pub fn estimate_transform(
    template: &Volume,
    subject: &Volume,
    search: &LinearSearch<'_>,
    passes: &[SearchPass],
    init: Option<AffineParams>,
    ctx: &JobContext,
) -> AffineTransform {
    let template_work = working_copy(template);
    let subject_work = working_copy(subject);
    let levels = search_levels(&template_work, &subject_work);
    let fov = {
        let g = template.geometry().dims();
        let vs = template.voxel_size.as_array();
        [g[0] as f32 * vs[0], g[1] as f32 * vs[1], g[2] as f32 * vs[2]]
    };

    let mut params = init
        .unwrap_or_else(|| center_of_mass_init(&template_work, &subject_work))
        .restricted(search.reg_type);

    let steps = passes.len() * levels.len();
    for (pass_index, pass) in passes.iter().enumerate() {
        let center = params.to_vector();
        let ranges = pass.bound.ranges(fov);
        for (level, (t, s)) in levels.iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            let fraction = 0.25 / (1u32 << level.min(16)) as f32;
            params = local_search(search, t, s, params, &center, &ranges, fraction, pass.precision, ctx);
            debug!(
                pass = pass_index,
                level,
                geometry = %t.geometry(),
                "Linear level complete"
            );
            ctx.report_stage_progress(pass_index * levels.len() + level + 1, steps);
        }
    }

    AffineTransform::new(
        params,
        search.reg_type,
        Anchor::Center,
        Space::of(template),
        Space::of(subject),
    )
}

/// Subject voxel size rescaled so the in-plane field of view matches the
/// template's area.
pub fn adjusted_subject_voxel_size(template: &Volume, subject: &Volume) -> Result<VoxelSize> {
    if subject.is_empty() {
        return Err(VolregError::EmptyVolume("subject"));
    }
    let (tg, sg) = (template.geometry(), subject.geometry());
    let (tv, sv) = (template.voxel_size, subject.voxel_size);
    let ratio = (tg.plane_size() as f64 * tv.x() as f64 * tv.y() as f64)
        / (sg.plane_size() as f64 * sv.x() as f64 * sv.y() as f64);
    VoxelSize::try_from(sv.as_array().map(|v| v * ratio.sqrt() as f32))
}

/// Settings of the linear stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearOptions {
    pub reg_type: RegType,
    pub cost: CostType,
    pub bidirectional: bool,
}

/// Output of the linear stage, all in template voxel space.
#[derive(Clone, Debug)]
pub struct LinearResult {
    pub transform: AffineTransform,
    pub resampled: Volume,
    pub resampled2: Option<Volume>,
    /// Correlation of the resampled subject with the template.
    pub correlation: f32,
}

/// Run the linear stage: rescale the subject voxel size, estimate the
/// transform (or place the subject at the origin for [`CostType::Skip`]) and
/// resample the subject, plus a same-shaped secondary channel, into
/// template space.
pub fn run_linear_stage(
    template: &Volume,
    subject: &Volume,
    subject2: Option<&Volume>,
    options: &LinearOptions,
    ctx: &JobContext,
) -> Result<LinearResult> {
    if template.is_empty() {
        return Err(VolregError::EmptyVolume("template"));
    }
    let subject = Volume::new(
        subject.data.clone(),
        adjusted_subject_voxel_size(template, subject)?,
    );
    let from = Space::of(template);
    let to = Space::of(&subject);

    let transform = match options.cost.metric() {
        None => AffineTransform::identity_placement(from, to),
        Some(metric) => {
            let search = LinearSearch {
                reg_type: options.reg_type,
                metric: metric.as_ref(),
                bidirectional: options.bidirectional,
            };
            estimate_transform(template, &subject, &search, &TWO_PASS, None, ctx)
        }
    };

    ctx.report_stage_progress(1, 1);

    let resampled = resample(&subject, from, transform.matrix(), Interpolation::Cubic);
    let resampled2 = subject2
        .filter(|s2| s2.geometry() == subject.geometry())
        .map(|s2| resample(s2, from, transform.matrix(), Interpolation::Cubic));
    let r = correlation(&resampled.data, &template.data)?;
    info!(
        cost = %options.cost,
        reg_type = %options.reg_type,
        correlation = r,
        "Linear registration complete"
    );

    Ok(LinearResult {
        transform,
        resampled,
        resampled2,
        correlation: r,
    })
}
