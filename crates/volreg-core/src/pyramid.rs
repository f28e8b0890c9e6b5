//! Coarse-to-fine volume pyramids.
//!
//! Downsampling averages 2x2x2 blocks with edge padding, so odd dimensions
//! keep their last slab. Upsampling expands toward an exact target geometry
//! rather than doubling, since a pyramid built from an arbitrary size does
//! not land on powers of two.

use ndarray::Array3;

use crate::error::{Result, VolregError};
use crate::interpolation::trilinear_sample_clamped;
use crate::volume::{build_array, Geometry, Volume, VoxelValue};

/// Halve each dimension by averaging 2x2x2 blocks. Indices past the edge
/// clamp to the last voxel.
pub fn downsample_array<T: VoxelValue>(data: &Array3<T>) -> Array3<T> {
    let geometry = Geometry::of(data);
    if geometry.is_empty() {
        return data.clone();
    }
    let (nx, ny, nz) = data.dim();
    build_array(geometry.downsampled(), |x, y, z| {
        let xs = [2 * x, (2 * x + 1).min(nx - 1)];
        let ys = [2 * y, (2 * y + 1).min(ny - 1)];
        let zs = [2 * z, (2 * z + 1).min(nz - 1)];
        let mut acc = T::default();
        for &sx in &xs {
            for &sy in &ys {
                for &sz in &zs {
                    acc = acc.weighted_add(data[[sx, sy, sz]], 0.125);
                }
            }
        }
        acc
    })
}

/// Expand an array to exactly `target`, interpolating trilinearly. Fine
/// voxel `i` sits at coarse coordinate `(i - 0.5) / 2`.
pub fn upsample_array<T: VoxelValue>(data: &Array3<T>, target: Geometry) -> Array3<T> {
    let source = Geometry::of(data);
    if source.is_empty() {
        return Array3::from_elem(target.shape(), T::default());
    }
    let ratio = [
        axis_ratio(source.nx, target.nx),
        axis_ratio(source.ny, target.ny),
        axis_ratio(source.nz, target.nz),
    ];
    build_array(target, |x, y, z| {
        let pos = [
            (x as f32 + 0.5) * ratio[0] - 0.5,
            (y as f32 + 0.5) * ratio[1] - 0.5,
            (z as f32 + 0.5) * ratio[2] - 0.5,
        ];
        trilinear_sample_clamped(data, pos)
    })
}

/// Coarse-per-fine spacing along one axis. Exactly one half when the source
/// is the padded downsampling of the target, so odd edges line up.
fn axis_ratio(source: usize, target: usize) -> f32 {
    if source == target.div_ceil(2) {
        0.5
    } else {
        source as f32 / target.max(1) as f32
    }
}

/// Downsample a volume once; voxel size doubles.
pub fn downsample(volume: &Volume) -> Volume {
    Volume::new(downsample_array(&volume.data), volume.voxel_size.scaled(2.0))
}

/// Upsample a volume to `target`; voxel size halves.
pub fn upsample(volume: &Volume, target: Geometry) -> Volume {
    Volume::new(
        upsample_array(&volume.data, target),
        volume.voxel_size.scaled(0.5),
    )
}

/// One step of a pyramid: the finer geometry that a coarser level unwinds
/// into, and the factor that carries voxel-unit magnitudes across the step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PyramidLevel {
    pub geometry: Geometry,
    pub scale: f32,
}

/// Ordered pyramid steps, finest first. Built once before a coarse-to-fine
/// loop and consumed in reverse; data is only usable at the finest
/// geometry after every level has been unwound.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PyramidLevels {
    levels: Vec<PyramidLevel>,
}

impl PyramidLevels {
    /// Levels produced by downsampling `full` `count` times.
    pub fn build(full: Geometry, count: usize) -> Self {
        let mut levels = Vec::with_capacity(count);
        let mut current = full;
        for _ in 0..count {
            levels.push(PyramidLevel {
                geometry: current,
                scale: 2.0,
            });
            current = current.downsampled();
        }
        Self { levels }
    }

    /// Levels that take `full` down to `coarse` by repeated downsampling.
    pub fn between(full: Geometry, coarse: Geometry) -> Result<Self> {
        let mut levels = Vec::new();
        let mut current = full;
        while current != coarse {
            let next = current.downsampled();
            if next == current || next.size() < coarse.size() {
                return Err(VolregError::GeometryMismatch {
                    expected: full.dims(),
                    actual: coarse.dims(),
                });
            }
            levels.push(PyramidLevel {
                geometry: current,
                scale: 2.0,
            });
            current = next;
        }
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Finest geometry, or `None` for an empty sequence.
    pub fn finest(&self) -> Option<Geometry> {
        self.levels.first().map(|l| l.geometry)
    }

    /// Coarsest geometry reached after all downsampling steps.
    pub fn coarsest(&self) -> Option<Geometry> {
        self.levels.last().map(|l| l.geometry.downsampled())
    }

    /// Steps in unwinding order: coarsest first.
    pub fn unwind(&self) -> impl Iterator<Item = &PyramidLevel> {
        self.levels.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VoxelSize;

    #[test]
    fn test_downsample_averages_blocks() {
        let data = Array3::from_shape_fn((2, 2, 2), |(x, y, z)| (x + y + z) as f32);
        let out = downsample_array(&data);
        assert_eq!(out.dim(), (1, 1, 1));
        assert!((out[[0, 0, 0]] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_odd_edge_is_padded() {
        let mut data = Array3::<f32>::zeros((3, 1, 1));
        data[[2, 0, 0]] = 4.0;
        let out = downsample_array(&data);
        assert_eq!(out.dim(), (2, 1, 1));
        assert!((out[[1, 0, 0]] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_survives_round_trip() {
        let v = Volume::new(Array3::from_elem((9, 6, 5), 2.5), VoxelSize::default());
        let back = upsample(&downsample(&v), v.geometry());
        assert_eq!(back.geometry(), v.geometry());
        assert!(back.data.iter().all(|&x| (x - 2.5).abs() < 1e-5));
        assert_eq!(back.voxel_size, v.voxel_size);
    }

    #[test]
    fn test_levels_between() {
        let full = Geometry::new(65, 64, 33);
        let coarse = full.downsampled().downsampled();
        let levels = PyramidLevels::between(full, coarse).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels.finest(), Some(full));
        assert_eq!(levels.coarsest(), Some(coarse));
        let order: Vec<Geometry> = levels.unwind().map(|l| l.geometry).collect();
        assert_eq!(order, vec![full.downsampled(), full]);
    }

    #[test]
    fn test_levels_between_unreachable() {
        let full = Geometry::new(16, 16, 16);
        assert!(PyramidLevels::between(full, Geometry::new(5, 5, 5)).is_err());
        assert!(PyramidLevels::between(full, full).unwrap().is_empty());
    }
}
