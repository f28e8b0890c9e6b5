//! Registration of image series and auxiliary images into a reference frame.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::info;

use crate::error::{Result, VolregError};
use crate::filters::edge::sobel_magnitude;
use crate::filters::intensity::normalize;
use crate::interpolation::Interpolation;
use crate::pipeline::context::JobContext;
use crate::register::linear::{estimate_transform, Bound, LinearSearch, SearchPass};
use crate::register::metric::{Correlation, MutualInformation};
use crate::transform::{resample, AffineParams, AffineTransform, RegType, Space};
use crate::volume::Volume;

/// Initial x translation (mm) that nudges the search off the identity.
const MOTION_INIT_TRANSLATION: f32 = 0.05;

const MOTION_PASSES: [SearchPass; 2] = [
    SearchPass {
        bound: Bound::Narrow,
        precision: 0.01,
    },
    SearchPass {
        bound: Bound::Narrow,
        precision: 0.001,
    },
];

const COREGISTER_PASSES: [SearchPass; 2] = [
    SearchPass {
        bound: Bound::Large,
        precision: 0.1,
    },
    SearchPass {
        bound: Bound::Large,
        precision: 0.01,
    },
];

/// Per-volume transforms into the first volume's frame, and the volumes
/// resampled with them.
#[derive(Clone, Debug)]
pub struct MotionCorrection {
    pub transforms: Vec<AffineTransform>,
    pub corrected: Vec<Volume>,
}

fn edge_normalized(volume: &Volume) -> Volume {
    let mut data = sobel_magnitude(&volume.data);
    normalize(&mut data, 1.0);
    Volume::new(data, volume.voxel_size)
}

/// Register every volume of `series` to the first one with an affine
/// correlation search on Sobel-filtered images.
///
/// Volumes run in parallel. Volumes not reached before cancellation keep an
/// identity transform and are returned unchanged.
pub fn motion_correct(series: &[Volume], ctx: &JobContext) -> Result<MotionCorrection> {
    let Some(reference) = series.first() else {
        return Err(VolregError::EmptyVolume("series"));
    };
    if reference.is_empty() {
        return Err(VolregError::EmptyVolume("reference"));
    }
    for v in series {
        if v.geometry() != reference.geometry() {
            return Err(VolregError::GeometryMismatch {
                expected: reference.geometry().dims(),
                actual: v.geometry().dims(),
            });
        }
    }

    let space = Space::of(reference);
    let fixed = edge_normalized(reference);
    let metric = Correlation;
    let search = LinearSearch {
        reg_type: RegType::Affine,
        metric: &metric,
        bidirectional: false,
    };
    let init = AffineParams {
        translation: [MOTION_INIT_TRANSLATION, 0.0, 0.0],
        ..AffineParams::default()
    };
    let total = series.len();
    let done = AtomicUsize::new(1);
    ctx.report_progress(1, total);

    let results: Vec<(AffineTransform, Volume)> = series
        .par_iter()
        .enumerate()
        .map(|(i, volume)| {
            let identity = AffineTransform::identity(space, space);
            if i == 0 || ctx.is_cancelled() {
                return (identity, volume.clone());
            }
            let moving = edge_normalized(volume);
            let transform = estimate_transform(&fixed, &moving, &search, &MOTION_PASSES, Some(init), ctx);
            let corrected = resample(volume, space, transform.matrix(), Interpolation::Cubic);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            ctx.report_progress(n, total);
            (transform, corrected)
        })
        .collect();

    info!(volumes = total, "Motion correction complete");
    let (transforms, corrected) = results.into_iter().unzip();
    Ok(MotionCorrection {
        transforms,
        corrected,
    })
}

/// Rigid mutual-information registration of `moving` onto `reference`.
///
/// Images already on the reference grid are taken as co-registered and get
/// the identity.
pub fn coregister_rigid(reference: &Volume, moving: &Volume, ctx: &JobContext) -> Result<AffineTransform> {
    if reference.is_empty() {
        return Err(VolregError::EmptyVolume("reference"));
    }
    if moving.is_empty() {
        return Err(VolregError::EmptyVolume("moving"));
    }
    if moving.geometry() == reference.geometry() {
        return Ok(AffineTransform::identity(Space::of(reference), Space::of(moving)));
    }
    let metric = MutualInformation::default();
    let search = LinearSearch {
        reg_type: RegType::Rigid,
        metric: &metric,
        bidirectional: false,
    };
    let transform = estimate_transform(reference, moving, &search, &COREGISTER_PASSES, None, ctx);
    info!(params = ?transform.params, "Rigid co-registration complete");
    Ok(transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Geometry, VoxelSize};

    #[test]
    fn test_empty_series_rejected() {
        assert!(motion_correct(&[], &JobContext::default()).is_err());
    }

    #[test]
    fn test_series_geometry_must_match() {
        let a = Volume::zeros(Geometry::new(4, 4, 4), VoxelSize::default());
        let b = Volume::zeros(Geometry::new(4, 4, 5), VoxelSize::default());
        assert!(matches!(
            motion_correct(&[a, b], &JobContext::default()),
            Err(VolregError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_same_grid_is_identity() {
        let a = Volume::new(ndarray::Array3::from_elem((5, 5, 5), 1.0), VoxelSize::default());
        let t = coregister_rigid(&a, &a, &JobContext::default()).unwrap();
        assert_eq!(t.map_voxel([1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }
}
