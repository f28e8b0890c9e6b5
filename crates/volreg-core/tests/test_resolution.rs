mod common;

use volreg_core::register::match_resolution;
use volreg_core::volume::{Geometry, Volume, VoxelSize};

fn cube(n: usize, vs: f32) -> Volume {
    Volume::zeros(Geometry::new(n, n, n), VoxelSize::isotropic(vs).unwrap())
}

#[test]
fn test_fine_subject_is_downsampled_once() {
    let template = cube(64, 2.0);
    let subject = cube(128, 1.0);
    let matched = match_resolution(&template, None, &subject, None);
    assert_eq!(matched.template_downsamplings, 0);
    assert_eq!(matched.subject_downsamplings, 1);
    assert_eq!(matched.template.geometry(), Geometry::new(64, 64, 64));
    assert_eq!(matched.subject.geometry(), Geometry::new(64, 64, 64));
    assert_eq!(matched.subject.voxel_size.x(), 2.0);
}

#[test]
fn test_secondary_channels_follow_primary() {
    let template = cube(32, 1.0);
    let subject = cube(8, 4.0);
    let subject2 = cube(8, 4.0);
    let matched = match_resolution(&template, Some(&template), &subject, Some(&subject2));
    assert_eq!(matched.template_downsamplings, 2);
    assert_eq!(matched.template2.unwrap().geometry(), Geometry::new(8, 8, 8));
    assert_eq!(matched.subject2.unwrap().geometry(), Geometry::new(8, 8, 8));
}

#[test]
fn test_within_factor_two_left_alone() {
    let matched = match_resolution(&cube(16, 1.0), None, &cube(12, 1.4), None);
    assert_eq!(matched.template_downsamplings, 0);
    assert_eq!(matched.subject_downsamplings, 0);
}
