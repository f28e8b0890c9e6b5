#![allow(dead_code)]

use ndarray::Array3;

use volreg_core::volume::{Geometry, Volume, VoxelSize};

/// Smooth Gaussian blob centered at `center` (voxel coordinates).
pub fn blob(geometry: Geometry, center: [f32; 3], sigma: f32, voxel_size: f32) -> Volume {
    let s2 = 2.0 * sigma * sigma;
    let data = Array3::from_shape_fn(geometry.shape(), |(x, y, z)| {
        let d = (x as f32 - center[0]).powi(2)
            + (y as f32 - center[1]).powi(2)
            + (z as f32 - center[2]).powi(2);
        (-d / s2).exp()
    });
    Volume::new(data, VoxelSize::isotropic(voxel_size).unwrap())
}

/// Blob in the middle of a cube of side `n`.
pub fn centered_blob(n: usize, sigma: f32) -> Volume {
    let c = (n as f32 - 1.0) / 2.0;
    blob(Geometry::new(n, n, n), [c, c, c], sigma, 1.0)
}

/// Two blobs of different brightness, so the volume has no rotational
/// symmetry.
pub fn two_blobs(n: usize, offset: [f32; 3]) -> Volume {
    let c = (n as f32 - 1.0) / 2.0;
    let g = Geometry::new(n, n, n);
    let a = blob(g, [c - 3.0 + offset[0], c + offset[1], c + offset[2]], 2.5, 1.0);
    let b = blob(g, [c + 4.0 + offset[0], c + 2.0 + offset[1], c + offset[2]], 2.0, 1.0);
    Volume::new(&a.data + &(b.data * 0.5), a.voxel_size)
}

/// Two blobs placed in millimeters around the grid center, so grids of
/// different resolution covering the same field of view hold the same
/// anatomy.
pub fn phantom(n: usize, voxel_size: f32) -> Volume {
    let c = (n as f32 - 1.0) / 2.0;
    let gauss = |p: [f32; 3], q: [f32; 3], sigma: f32| {
        let d = (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2);
        (-d / (2.0 * sigma * sigma)).exp()
    };
    let data = Array3::from_shape_fn((n, n, n), |(x, y, z)| {
        let p = [x, y, z].map(|i| (i as f32 - c) * voxel_size);
        gauss(p, [-8.0, 0.0, 0.0], 7.0) + 0.5 * gauss(p, [10.0, 6.0, 0.0], 5.0)
    });
    Volume::new(data, VoxelSize::isotropic(voxel_size).unwrap())
}

/// Binary sphere mask.
pub fn sphere_mask(n: usize, radius: f32) -> Volume {
    let c = (n as f32 - 1.0) / 2.0;
    let data = Array3::from_shape_fn((n, n, n), |(x, y, z)| {
        let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2) + (z as f32 - c).powi(2)).sqrt();
        if d <= radius {
            1.0
        } else {
            0.0
        }
    });
    Volume::new(data, VoxelSize::default())
}

/// Deterministic pseudo-random texture in `[0, 1)`.
pub fn texture(geometry: Geometry) -> Volume {
    let data = Array3::from_shape_fn(geometry.shape(), |(x, y, z)| {
        let h = (x * 73_856_093) ^ (y * 19_349_663) ^ (z * 83_492_791);
        (h % 1000) as f32 / 1000.0
    });
    Volume::new(data, VoxelSize::default())
}
