use crate::interpolation::{sample, Interpolation};
use crate::transform::affine::{Space, TransformMatrix};
use crate::volume::{build_array, Volume};

/// Resample `source` into `target`: every target voxel `v` reads the source
/// at `matrix.apply(v)`.
pub fn resample(source: &Volume, target: Space, matrix: &TransformMatrix, method: Interpolation) -> Volume {
    let data = build_array(target.geometry, |x, y, z| {
        sample(&source.data, matrix.apply([x as f32, y as f32, z as f32]), method)
    });
    Volume::new(data, target.voxel_size)
}
