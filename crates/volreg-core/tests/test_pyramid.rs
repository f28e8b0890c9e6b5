mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array3;

use volreg_core::field::DisplacementField;
use volreg_core::pyramid::{downsample, upsample, PyramidLevels};
use volreg_core::volume::{Geometry, Volume, VoxelSize};

// ---------------------------------------------------------------------------
// Volume round trips
// ---------------------------------------------------------------------------

#[test]
fn test_round_trip_preserves_odd_geometry() {
    for dims in [(7, 9, 11), (1, 5, 3), (16, 17, 2), (33, 33, 33)] {
        let geometry = Geometry::new(dims.0, dims.1, dims.2);
        let v = common::texture(geometry);
        let back = upsample(&downsample(&v), geometry);
        assert_eq!(back.geometry(), geometry, "dims {dims:?}");
    }
}

#[test]
fn test_downsample_doubles_voxel_size() {
    let v = Volume::zeros(Geometry::new(8, 8, 8), VoxelSize::new(1.0, 1.5, 2.0).unwrap());
    let d = downsample(&v);
    assert_eq!(d.geometry(), Geometry::new(4, 4, 4));
    assert_eq!(d.voxel_size.as_array(), [2.0, 3.0, 4.0]);
}

#[test]
fn test_smooth_volume_survives_round_trip() {
    let v = common::centered_blob(21, 5.0);
    let back = upsample(&downsample(&v), v.geometry());
    let worst = back
        .data
        .iter()
        .zip(v.data.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(worst < 0.1, "worst difference {worst}");
}

// ---------------------------------------------------------------------------
// Field transfer
// ---------------------------------------------------------------------------

#[test]
fn test_field_promotion_scales_per_level() {
    let full = Geometry::new(31, 30, 29);
    let levels = PyramidLevels::build(full, 3);
    let coarse = levels.coarsest().unwrap();
    let field = DisplacementField::from_array(Array3::from_elem(coarse.shape(), [0.5, -0.25, 0.0]));
    let promoted = field.promote(&levels).unwrap();
    assert_eq!(promoted.geometry(), full);
    let v = promoted.data[[15, 15, 14]];
    assert_abs_diff_eq!(v[0], 4.0, epsilon = 1e-4);
    assert_abs_diff_eq!(v[1], -2.0, epsilon = 1e-4);
}

#[test]
fn test_levels_between_matches_build() {
    let full = Geometry::new(64, 48, 40);
    let built = PyramidLevels::build(full, 2);
    let between = PyramidLevels::between(full, built.coarsest().unwrap()).unwrap();
    assert_eq!(built, between);
}
