use tracing::debug;

use crate::consts::{SUBJECT_DOWNSAMPLE_RATIO, TEMPLATE_DOWNSAMPLE_RATIO};
use crate::pyramid::downsample;
use crate::volume::Volume;

/// Volumes brought to comparable working resolutions.
#[derive(Clone, Debug)]
pub struct MatchedPair {
    pub template: Volume,
    pub template2: Option<Volume>,
    pub subject: Volume,
    pub subject2: Option<Volume>,
    pub template_downsamplings: usize,
    pub subject_downsamplings: usize,
}

/// Downsample one side, with its secondary channel, while `keep_going`
/// holds and the grid still shrinks.
fn coarsen_while(
    primary: &mut Volume,
    secondary: &mut Option<Volume>,
    mut keep_going: impl FnMut(&Volume) -> bool,
) -> usize {
    let mut steps = 0;
    while keep_going(primary) {
        let next = downsample(primary);
        if next.geometry() == primary.geometry() {
            break;
        }
        *primary = next;
        if let Some(s) = secondary.as_mut() {
            *s = downsample(s);
        }
        steps += 1;
    }
    steps
}

/// Coarsen whichever side is much finer than the other.
///
/// The template is halved while the subject voxel is more than 1.5 times
/// larger; the subject is halved while its voxel is at most half the
/// template's. The thresholds differ on purpose, so a pair that is within a
/// factor of two is left alone on the subject side.
pub fn match_resolution(
    template: &Volume,
    template2: Option<&Volume>,
    subject: &Volume,
    subject2: Option<&Volume>,
) -> MatchedPair {
    let mut t = template.clone();
    let mut t2 = template2.cloned();
    let mut s = subject.clone();
    let mut s2 = subject2.cloned();

    let subject_vs = s.voxel_size.x();
    let template_downsamplings = coarsen_while(&mut t, &mut t2, |t| {
        subject_vs > t.voxel_size.x() * TEMPLATE_DOWNSAMPLE_RATIO
    });
    let template_vs = t.voxel_size.x();
    let subject_downsamplings = coarsen_while(&mut s, &mut s2, |s| {
        s.voxel_size.x() * SUBJECT_DOWNSAMPLE_RATIO <= template_vs
    });

    debug!(
        template = %t.geometry(),
        template_vs = %t.voxel_size,
        subject = %s.geometry(),
        subject_vs = %s.voxel_size,
        template_downsamplings,
        subject_downsamplings,
        "Matched working resolution"
    );

    MatchedPair {
        template: t,
        template2: t2,
        subject: s,
        subject2: s2,
        template_downsamplings,
        subject_downsamplings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Geometry, VoxelSize};

    fn vol(n: usize, vs: f32) -> Volume {
        Volume::zeros(Geometry::new(n, n, n), VoxelSize::isotropic(vs).unwrap())
    }

    #[test]
    fn test_equal_resolution_untouched() {
        let m = match_resolution(&vol(8, 1.0), None, &vol(8, 1.0), None);
        assert_eq!(m.template_downsamplings, 0);
        assert_eq!(m.subject_downsamplings, 0);
    }

    #[test]
    fn test_coarse_subject_coarsens_template() {
        let m = match_resolution(&vol(32, 1.0), Some(&vol(32, 1.0)), &vol(8, 4.0), None);
        assert_eq!(m.template_downsamplings, 2);
        assert_eq!(m.template.geometry(), Geometry::new(8, 8, 8));
        assert_eq!(m.template2.map(|t| t.geometry()), Some(Geometry::new(8, 8, 8)));
        assert_eq!(m.subject_downsamplings, 0);
    }

    #[test]
    fn test_single_voxel_stops() {
        let m = match_resolution(&vol(1, 1.0), None, &vol(4, 100.0), None);
        assert_eq!(m.template_downsamplings, 0);
        assert_eq!(m.template.geometry(), Geometry::new(1, 1, 1));
    }
}
