use nalgebra::Matrix4;
use ndarray::Array3;

use crate::error::{Result, VolregError};
use crate::field::displacement::DisplacementField;
use crate::filters::label::select_interpolation;
use crate::interpolation::{sample, Interpolation};
use crate::transform::AffineTransform;
use crate::volume::{build_array, Geometry, Vec3, Volume, VoxelSize};

/// Final template-to-subject correspondence at full template resolution.
///
/// Each template voxel holds the subject voxel coordinate it reads from.
/// The mapping is immutable once built, so warping is repeatable and safe to
/// share across threads.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeMapping {
    data: Array3<Vec3>,
    voxel_size: VoxelSize,
    world: Matrix4<f32>,
}

impl CompositeMapping {
    pub fn new(data: Array3<Vec3>, voxel_size: VoxelSize, world: Matrix4<f32>) -> Self {
        Self {
            data,
            voxel_size,
            world,
        }
    }

    /// Every voxel maps onto itself.
    pub fn identity(geometry: Geometry, voxel_size: VoxelSize) -> Self {
        let data = build_array(geometry, |x, y, z| [x as f32, y as f32, z as f32]);
        Self::new(data, voxel_size, voxel_size.to_world())
    }

    /// Compose the linear transform with a displacement field defined on the
    /// transform's template grid.
    pub fn from_field(field: &DisplacementField, transform: &AffineTransform, world: Matrix4<f32>) -> Result<Self> {
        if field.geometry() != transform.from.geometry {
            return Err(VolregError::GeometryMismatch {
                expected: transform.from.geometry.dims(),
                actual: field.geometry().dims(),
            });
        }
        Ok(Self::new(
            field.to_mapping(transform.matrix()),
            transform.from.voxel_size,
            world,
        ))
    }

    /// Mapping of the linear transform alone.
    pub fn from_affine(transform: &AffineTransform, world: Matrix4<f32>) -> Self {
        let matrix = transform.matrix();
        let data = build_array(transform.from.geometry, |x, y, z| {
            matrix.apply([x as f32, y as f32, z as f32])
        });
        Self::new(data, transform.from.voxel_size, world)
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::of(&self.data)
    }

    pub fn voxel_size(&self) -> VoxelSize {
        self.voxel_size
    }

    /// Template voxel-to-world matrix.
    pub fn world(&self) -> &Matrix4<f32> {
        &self.world
    }

    pub fn data(&self) -> &Array3<Vec3> {
        &self.data
    }

    /// Sample `volume` through the mapping with exactly `method`.
    pub fn apply(&self, volume: &Volume, method: Interpolation) -> Volume {
        let data = build_array(self.geometry(), |x, y, z| {
            sample(&volume.data, self.data[[x, y, z]], method)
        });
        Volume::new(data, self.voxel_size)
    }

    /// Warp `volume` into template space. Label images are always sampled
    /// with nearest neighbor regardless of `requested`.
    pub fn warp(&self, volume: &Volume, requested: Interpolation) -> Volume {
        self.apply(volume, select_interpolation(&volume.data, requested))
    }
}
