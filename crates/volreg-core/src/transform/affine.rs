use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::volume::{Geometry, Vec3, Volume, VoxelSize};

/// Degrees of freedom of a linear registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegType {
    /// Translation and rotation only (6 parameters).
    Rigid,
    /// Translation, rotation, scaling and shear (12 parameters).
    #[default]
    Affine,
}

impl RegType {
    /// Number of leading entries of [`AffineParams::to_vector`] that vary.
    pub fn dof(&self) -> usize {
        match self {
            Self::Rigid => 6,
            Self::Affine => 12,
        }
    }
}

impl std::fmt::Display for RegType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rigid => write!(f, "Rigid"),
            Self::Affine => write!(f, "Affine"),
        }
    }
}

/// Physical-space affine parameters.
///
/// Translation is in millimeters, rotation in radians applied as
/// `Rz * Ry * Rx`, scaling is multiplicative and shear is the upper
/// triangle `[xy, xz, yz]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineParams {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub scaling: Vec3,
    pub shear: Vec3,
}

impl Default for AffineParams {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0; 3],
            scaling: [1.0; 3],
            shear: [0.0; 3],
        }
    }
}

impl AffineParams {
    pub fn to_vector(&self) -> [f32; 12] {
        let mut v = [0.0; 12];
        v[0..3].copy_from_slice(&self.translation);
        v[3..6].copy_from_slice(&self.rotation);
        v[6..9].copy_from_slice(&self.scaling);
        v[9..12].copy_from_slice(&self.shear);
        v
    }

    pub fn from_vector(v: &[f32; 12]) -> Self {
        Self {
            translation: [v[0], v[1], v[2]],
            rotation: [v[3], v[4], v[5]],
            scaling: [v[6], v[7], v[8]],
            shear: [v[9], v[10], v[11]],
        }
    }

    /// Drop the parameters `reg_type` does not estimate.
    pub fn restricted(mut self, reg_type: RegType) -> Self {
        if reg_type == RegType::Rigid {
            self.scaling = [1.0; 3];
            self.shear = [0.0; 3];
        }
        self
    }

    /// The 3x3 part mapping template millimeters to subject millimeters.
    pub fn linear_part(&self) -> Matrix3<f32> {
        let r = Rotation3::from_euler_angles(self.rotation[0], self.rotation[1], self.rotation[2]);
        let [a, b, c] = self.shear;
        let shear = Matrix3::new(1.0, a, b, 0.0, 1.0, c, 0.0, 0.0, 1.0);
        let scale = Matrix3::from_diagonal(&Vector3::from(self.scaling));
        r.matrix() * shear * scale
    }
}

/// The grid a transform reads from or writes to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Space {
    pub geometry: Geometry,
    pub voxel_size: VoxelSize,
}

impl Space {
    pub fn new(geometry: Geometry, voxel_size: VoxelSize) -> Self {
        Self { geometry, voxel_size }
    }

    pub fn of(volume: &Volume) -> Self {
        Self::new(volume.geometry(), volume.voxel_size)
    }

    /// Voxel coordinates of the rotation anchor.
    fn anchor(&self, anchor: Anchor) -> Vector3<f32> {
        match anchor {
            Anchor::Center => Vector3::from(self.geometry.center()),
            Anchor::Origin => Vector3::zeros(),
        }
    }

    fn scale_matrix(&self) -> Matrix3<f32> {
        Matrix3::from_diagonal(&Vector3::from(self.voxel_size.as_array()))
    }
}

/// Where the physical frame of each space is rooted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Anchor {
    /// Grid centers coincide at zero parameters.
    #[default]
    Center,
    /// Voxel `(0, 0, 0)` of both grids coincides at zero parameters.
    Origin,
}

/// Voxel-to-voxel affine map `v' = linear * v + shift`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformMatrix {
    pub linear: Matrix3<f32>,
    pub shift: Vector3<f32>,
}

impl TransformMatrix {
    pub fn identity() -> Self {
        Self {
            linear: Matrix3::identity(),
            shift: Vector3::zeros(),
        }
    }

    #[inline]
    pub fn apply(&self, v: Vec3) -> Vec3 {
        let out = self.linear * Vector3::from(v) + self.shift;
        [out.x, out.y, out.z]
    }

    pub fn inverse(&self) -> Option<Self> {
        let linear = self.linear.try_inverse()?;
        Some(Self {
            linear,
            shift: -(linear * self.shift),
        })
    }

    pub fn to_homogeneous(&self) -> Matrix4<f32> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.linear);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.shift);
        m
    }

    pub fn from_homogeneous(m: &Matrix4<f32>) -> Self {
        Self {
            linear: m.fixed_view::<3, 3>(0, 0).into_owned(),
            shift: m.fixed_view::<3, 1>(0, 3).into_owned(),
        }
    }
}

/// Linear transform estimated between two spaces.
///
/// The voxel matrix is derived from `params` and the two spaces. Moving the
/// transform to other grids goes through [`AffineTransform::rederive`], which
/// rebuilds the matrix from the parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineTransform {
    pub params: AffineParams,
    pub reg_type: RegType,
    pub anchor: Anchor,
    pub from: Space,
    pub to: Space,
    matrix: TransformMatrix,
    inverse: Option<TransformMatrix>,
}

impl AffineTransform {
    pub fn new(params: AffineParams, reg_type: RegType, anchor: Anchor, from: Space, to: Space) -> Self {
        let params = params.restricted(reg_type);
        let matrix = voxel_matrix(&params, anchor, &from, &to);
        let inverse = matrix.inverse();
        Self {
            params,
            reg_type,
            anchor,
            from,
            to,
            matrix,
            inverse,
        }
    }

    /// Centered identity between two spaces.
    pub fn identity(from: Space, to: Space) -> Self {
        Self::new(AffineParams::default(), RegType::Rigid, Anchor::Center, from, to)
    }

    /// Maps template voxel `(i, j, k)` onto subject voxel `(i, j, k)`.
    pub fn identity_placement(from: Space, to: Space) -> Self {
        let f = from.voxel_size.as_array();
        let t = to.voxel_size.as_array();
        let params = AffineParams {
            scaling: [t[0] / f[0], t[1] / f[1], t[2] / f[2]],
            ..AffineParams::default()
        };
        Self::new(params, RegType::Affine, Anchor::Origin, from, to)
    }

    /// The same physical transform between different grids.
    pub fn rederive(&self, from: Space, to: Space) -> Self {
        Self::new(self.params, self.reg_type, self.anchor, from, to)
    }

    /// Template voxel to subject voxel.
    pub fn matrix(&self) -> &TransformMatrix {
        &self.matrix
    }

    /// Subject voxel to template voxel; `None` for a singular transform.
    pub fn inverse(&self) -> Option<&TransformMatrix> {
        self.inverse.as_ref()
    }

    #[inline]
    pub fn map_voxel(&self, v: Vec3) -> Vec3 {
        self.matrix.apply(v)
    }
}

fn voxel_matrix(params: &AffineParams, anchor: Anchor, from: &Space, to: &Space) -> TransformMatrix {
    let d_from = from.scale_matrix();
    let d_to_inv = Matrix3::from_diagonal(&Vector3::from(
        to.voxel_size.as_array().map(|s| 1.0 / s),
    ));
    let linear = d_to_inv * params.linear_part() * d_from;
    let shift = to.anchor(anchor) + d_to_inv * Vector3::from(params.translation)
        - linear * from.anchor(anchor);
    TransformMatrix { linear, shift }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn space(n: usize, vs: f32) -> Space {
        Space::new(Geometry::new(n, n, n), VoxelSize::isotropic(vs).unwrap())
    }

    #[test]
    fn test_identity_maps_centers() {
        let t = AffineTransform::identity(space(11, 1.0), space(21, 0.5));
        let c = t.map_voxel([5.0, 5.0, 5.0]);
        assert_abs_diff_eq!(c[0], 10.0, epsilon = 1e-5);
        let p = t.map_voxel([6.0, 5.0, 5.0]);
        assert_abs_diff_eq!(p[0], 12.0, epsilon = 1e-5);
    }

    #[test]
    fn test_identity_placement_is_voxel_identity() {
        let t = AffineTransform::identity_placement(space(8, 2.0), space(16, 1.0));
        let p = t.map_voxel([3.0, 1.0, 7.0]);
        assert_abs_diff_eq!(p[0], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p[1], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p[2], 7.0, epsilon = 1e-5);
    }

    #[test]
    fn test_inverse_round_trip() {
        let params = AffineParams {
            translation: [2.0, -1.0, 0.5],
            rotation: [0.1, -0.2, 0.3],
            scaling: [1.1, 0.9, 1.0],
            shear: [0.05, 0.0, -0.02],
        };
        let t = AffineTransform::new(params, RegType::Affine, Anchor::Center, space(10, 1.0), space(12, 1.5));
        let inv = t.inverse().unwrap();
        let v = [1.0, 4.0, 7.0];
        let back = inv.apply(t.map_voxel(v));
        for i in 0..3 {
            assert_abs_diff_eq!(back[i], v[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_rigid_drops_scaling() {
        let params = AffineParams {
            scaling: [2.0, 2.0, 2.0],
            ..AffineParams::default()
        };
        let t = AffineTransform::new(params, RegType::Rigid, Anchor::Center, space(8, 1.0), space(8, 1.0));
        assert_eq!(t.params.scaling, [1.0; 3]);
    }

    #[test]
    fn test_rederive_preserves_physical_mapping() {
        let params = AffineParams {
            translation: [4.0, 0.0, 0.0],
            ..AffineParams::default()
        };
        let coarse = AffineTransform::new(params, RegType::Rigid, Anchor::Center, space(9, 2.0), space(9, 2.0));
        let fine = coarse.rederive(space(17, 1.0), space(17, 1.0));
        // 4 mm is two coarse voxels and four fine voxels.
        assert_abs_diff_eq!(coarse.map_voxel([4.0, 4.0, 4.0])[0], 6.0, epsilon = 1e-5);
        assert_abs_diff_eq!(fine.map_voxel([8.0, 8.0, 8.0])[0], 12.0, epsilon = 1e-5);
    }

    #[test]
    fn test_homogeneous_round_trip() {
        let t = AffineTransform::identity(space(4, 1.0), space(6, 1.0));
        let m = t.matrix().to_homogeneous();
        assert_eq!(TransformMatrix::from_homogeneous(&m), *t.matrix());
        assert_eq!(m[(3, 3)], 1.0);
    }
}
