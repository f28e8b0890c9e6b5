use ndarray::Array3;

use crate::error::{Result, VolregError};
use crate::interpolation::{trilinear_sample, trilinear_sample_clamped};
use crate::pyramid::{downsample_array, upsample_array, PyramidLevels};
use crate::transform::TransformMatrix;
use crate::volume::{build_array, Geometry, Vec3, VoxelValue};

/// Dense voxel-space displacement from template toward subject.
///
/// Vectors are in voxel units of the field's own geometry: halving the grid
/// halves them and every upsampling step doubles them.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplacementField {
    pub data: Array3<Vec3>,
}

impl DisplacementField {
    pub fn zeros(geometry: Geometry) -> Self {
        Self {
            data: Array3::from_elem(geometry.shape(), [0.0; 3]),
        }
    }

    pub fn from_array(data: Array3<Vec3>) -> Self {
        Self { data }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::of(&self.data)
    }

    pub fn scale(&mut self, factor: f32) {
        self.data.mapv_inplace(|v| v.scale(factor));
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            data: self.data.mapv(|v| v.scale(factor)),
        }
    }

    /// Coarsen by one pyramid step.
    pub fn downsample(&self) -> Self {
        let mut out = Self::from_array(downsample_array(&self.data));
        out.scale(0.5);
        out
    }

    /// Expand to exactly `target`, one pyramid step up.
    pub fn upsample(&self, target: Geometry) -> Self {
        let mut out = Self::from_array(upsample_array(&self.data, target));
        out.scale(2.0);
        out
    }

    /// Carry the field up through `levels`, coarsest step first.
    pub fn promote(&self, levels: &PyramidLevels) -> Result<Self> {
        if let Some(coarsest) = levels.coarsest() {
            if coarsest != self.geometry() {
                return Err(VolregError::GeometryMismatch {
                    expected: coarsest.dims(),
                    actual: self.geometry().dims(),
                });
            }
        }
        let mut field = self.clone();
        for level in levels.unwind() {
            let mut up = Self::from_array(upsample_array(&field.data, level.geometry));
            up.scale(level.scale);
            field = up;
        }
        Ok(field)
    }

    /// `out(x) = delta(x) + self(x + delta(x))`: apply `delta` first, then
    /// this field.
    pub fn compose(&self, delta: &DisplacementField) -> Result<Self> {
        if delta.geometry() != self.geometry() {
            return Err(VolregError::GeometryMismatch {
                expected: self.geometry().dims(),
                actual: delta.geometry().dims(),
            });
        }
        let data = build_array(self.geometry(), |x, y, z| {
            let d = delta.data[[x, y, z]];
            let pos = [x as f32 + d[0], y as f32 + d[1], z as f32 + d[2]];
            let base = trilinear_sample_clamped(&self.data, pos);
            [d[0] + base[0], d[1] + base[1], d[2] + base[2]]
        });
        Ok(Self { data })
    }

    /// `out(x) = moving(x + d(x))` with trilinear sampling, zero outside.
    pub fn warp(&self, moving: &Array3<f32>) -> Array3<f32> {
        build_array(self.geometry(), |x, y, z| {
            let d = self.data[[x, y, z]];
            let pos = [x as f32 + d[0], y as f32 + d[1], z as f32 + d[2]];
            trilinear_sample(moving, pos).unwrap_or(0.0)
        })
    }

    /// Largest displacement length in voxels.
    pub fn max_magnitude(&self) -> f32 {
        self.data
            .iter()
            .map(|v| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
            .fold(0.0, f32::max)
    }

    /// Smallest Jacobian determinant of `x + d(x)`. Values at or below zero
    /// mean the field folds.
    pub fn min_jacobian(&self) -> f32 {
        let (nx, ny, nz) = self.data.dim();
        if nx == 0 || ny == 0 || nz == 0 {
            return 1.0;
        }
        let jac = build_array(self.geometry(), |x, y, z| {
            let dx = axis_derivative(&self.data, [x, y, z], 0);
            let dy = axis_derivative(&self.data, [x, y, z], 1);
            let dz = axis_derivative(&self.data, [x, y, z], 2);
            // Columns are d/dx, d/dy, d/dz of the mapped position.
            let m = nalgebra::Matrix3::new(
                1.0 + dx[0], dy[0], dz[0],
                dx[1], 1.0 + dy[1], dz[1],
                dx[2], dy[2], 1.0 + dz[2],
            );
            m.determinant()
        });
        jac.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// Absolute subject coordinates `T(x + d(x))` for every template voxel.
    pub fn to_mapping(&self, matrix: &TransformMatrix) -> Array3<Vec3> {
        build_array(self.geometry(), |x, y, z| {
            let d = self.data[[x, y, z]];
            matrix.apply([x as f32 + d[0], y as f32 + d[1], z as f32 + d[2]])
        })
    }
}

/// Central difference along `axis`, one-sided at the borders.
fn axis_derivative(data: &Array3<Vec3>, idx: [usize; 3], axis: usize) -> Vec3 {
    let n = data.shape()[axis];
    if n < 2 {
        return [0.0; 3];
    }
    let mut lo = idx;
    let mut hi = idx;
    lo[axis] = idx[axis].saturating_sub(1);
    hi[axis] = (idx[axis] + 1).min(n - 1);
    let span = (hi[axis] - lo[axis]) as f32;
    let a = data[lo];
    let b = data[hi];
    [(b[0] - a[0]) / span, (b[1] - a[1]) / span, (b[2] - a[2]) / span]
}
