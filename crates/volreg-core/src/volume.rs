use nalgebra::{Matrix4, Vector4};
use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

use crate::consts::PARALLEL_VOXEL_THRESHOLD;
use crate::error::{Result, VolregError};

/// A 3D vector in voxel units.
pub type Vec3 = [f32; 3];

/// Voxel grid dimensions, indexed `[[x, y, z]]` in every array of the crate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl Geometry {
    pub const fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    pub fn of<T>(data: &Array3<T>) -> Self {
        let (nx, ny, nz) = data.dim();
        Self { nx, ny, nz }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn size(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Voxel count of one axial (x-y) plane.
    pub fn plane_size(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn min_dim(&self) -> usize {
        self.nx.min(self.ny).min(self.nz)
    }

    pub fn max_dim(&self) -> usize {
        self.nx.max(self.ny).max(self.nz)
    }

    /// Geometry after one padded 2x downsampling step.
    pub fn downsampled(&self) -> Self {
        Self::new(
            self.nx.div_ceil(2),
            self.ny.div_ceil(2),
            self.nz.div_ceil(2),
        )
    }

    /// Center of the grid in voxel coordinates.
    pub fn center(&self) -> Vec3 {
        [
            self.nx.saturating_sub(1) as f32 * 0.5,
            self.ny.saturating_sub(1) as f32 * 0.5,
            self.nz.saturating_sub(1) as f32 * 0.5,
        ]
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.nx, self.ny, self.nz)
    }
}

/// Physical voxel size in millimeters. Components are strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoxelSize([f32; 3]);

impl VoxelSize {
    pub fn new(x: f32, y: f32, z: f32) -> Result<Self> {
        Self::try_from([x, y, z])
    }

    pub fn isotropic(size: f32) -> Result<Self> {
        Self::new(size, size, size)
    }

    pub fn x(&self) -> f32 {
        self.0[0]
    }

    pub fn y(&self) -> f32 {
        self.0[1]
    }

    pub fn z(&self) -> f32 {
        self.0[2]
    }

    pub fn as_array(&self) -> [f32; 3] {
        self.0
    }

    /// Scaling-only voxel-to-world matrix, used when a file carries no
    /// orientation.
    pub fn to_world(&self) -> Matrix4<f32> {
        Matrix4::from_diagonal(&Vector4::new(self.0[0], self.0[1], self.0[2], 1.0))
    }

    /// Multiply every component by a positive factor.
    pub fn scaled(&self, factor: f32) -> Self {
        debug_assert!(factor > 0.0);
        Self([self.0[0] * factor, self.0[1] * factor, self.0[2] * factor])
    }
}

impl Default for VoxelSize {
    fn default() -> Self {
        Self([1.0; 3])
    }
}

impl TryFrom<[f32; 3]> for VoxelSize {
    type Error = VolregError;

    fn try_from(value: [f32; 3]) -> Result<Self> {
        if value.iter().all(|v| v.is_finite() && *v > 0.0) {
            Ok(Self(value))
        } else {
            Err(VolregError::InvalidVoxelSize(value))
        }
    }
}

impl std::fmt::Display for VoxelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}x{:.3}x{:.3} mm", self.0[0], self.0[1], self.0[2])
    }
}

/// A dense scalar volume with its physical sampling.
#[derive(Clone, Debug)]
pub struct Volume {
    pub data: Array3<f32>,
    pub voxel_size: VoxelSize,
}

impl Volume {
    pub fn new(data: Array3<f32>, voxel_size: VoxelSize) -> Self {
        Self { data, voxel_size }
    }

    /// Placeholder for a volume that has not been loaded.
    pub fn empty() -> Self {
        Self::new(Array3::zeros((0, 0, 0)), VoxelSize::default())
    }

    pub fn zeros(geometry: Geometry, voxel_size: VoxelSize) -> Self {
        Self::new(Array3::zeros(geometry.shape()), voxel_size)
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::of(&self.data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value range `(min, max)` over finite voxels, `None` if there are none.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Values that can be averaged and interpolated voxel-wise.
pub trait VoxelValue: Copy + Default + Send + Sync + 'static {
    /// `self + other * weight`
    fn weighted_add(self, other: Self, weight: f32) -> Self;

    fn scale(self, factor: f32) -> Self;
}

impl VoxelValue for f32 {
    #[inline]
    fn weighted_add(self, other: Self, weight: f32) -> Self {
        self + other * weight
    }

    #[inline]
    fn scale(self, factor: f32) -> Self {
        self * factor
    }
}

impl VoxelValue for Vec3 {
    #[inline]
    fn weighted_add(self, other: Self, weight: f32) -> Self {
        [
            self[0] + other[0] * weight,
            self[1] + other[1] * weight,
            self[2] + other[2] * weight,
        ]
    }

    #[inline]
    fn scale(self, factor: f32) -> Self {
        [self[0] * factor, self[1] * factor, self[2] * factor]
    }
}

/// Build an array by evaluating `f(x, y, z)` at every voxel, in parallel for
/// large grids.
pub fn build_array<T, F>(geometry: Geometry, f: F) -> Array3<T>
where
    T: VoxelValue,
    F: Fn(usize, usize, usize) -> T + Send + Sync,
{
    let mut out = Array3::from_elem(geometry.shape(), T::default());
    if geometry.size() >= PARALLEL_VOXEL_THRESHOLD {
        Zip::indexed(&mut out).par_for_each(|(x, y, z), v| *v = f(x, y, z));
    } else {
        Zip::indexed(&mut out).for_each(|(x, y, z), v| *v = f(x, y, z));
    }
    out
}
