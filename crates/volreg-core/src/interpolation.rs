//! Voxel sampling at fractional coordinates.
//!
//! Positions are voxel coordinates `[x, y, z]`. A sample outside the grid
//! returns zero for the scalar samplers; the `_clamped` variants clamp to
//! the border instead, which is what field transfer between levels needs.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::volume::{Vec3, VoxelValue};

/// Tolerance for positions that land a rounding error outside the grid.
const BOUNDARY_TOLERANCE: f32 = 1e-4;

/// Interpolation policy used when resampling a volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    Linear,
    #[default]
    Cubic,
}

impl std::fmt::Display for Interpolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "Nearest"),
            Self::Linear => write!(f, "Linear"),
            Self::Cubic => write!(f, "Cubic"),
        }
    }
}

/// Sample a scalar volume with the given interpolation.
#[inline]
pub fn sample(data: &Array3<f32>, pos: Vec3, method: Interpolation) -> f32 {
    match method {
        Interpolation::Nearest => nearest_sample(data, pos).unwrap_or(0.0),
        Interpolation::Linear => trilinear_sample(data, pos).unwrap_or(0.0),
        Interpolation::Cubic => cubic_sample(data, pos),
    }
}

/// Nearest-neighbor sample, `None` outside the grid.
#[inline]
pub fn nearest_sample<T: VoxelValue>(data: &Array3<T>, pos: Vec3) -> Option<T> {
    let (nx, ny, nz) = data.dim();
    let x = nearest_index(pos[0], nx)?;
    let y = nearest_index(pos[1], ny)?;
    let z = nearest_index(pos[2], nz)?;
    Some(data[[x, y, z]])
}

#[inline]
fn nearest_index(p: f32, n: usize) -> Option<usize> {
    let r = p.round();
    if r >= 0.0 && r < n as f32 {
        Some(r as usize)
    } else {
        None
    }
}

/// Bracketing indices and fraction along one axis; `None` outside the grid.
#[inline]
fn axis_interval(p: f32, n: usize) -> Option<(usize, usize, f32)> {
    if n == 0 {
        return None;
    }
    let max = (n - 1) as f32;
    if !(p >= -BOUNDARY_TOLERANCE && p <= max + BOUNDARY_TOLERANCE) {
        return None;
    }
    Some(clamped_interval(p, n))
}

#[inline]
fn clamped_interval(p: f32, n: usize) -> (usize, usize, f32) {
    let max = n.saturating_sub(1) as f32;
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, max) };
    let i0 = p.floor() as usize;
    let i1 = (i0 + 1).min(n.saturating_sub(1));
    (i0, i1, p - i0 as f32)
}

#[inline]
fn blend<T: VoxelValue>(data: &Array3<T>, ix: (usize, usize, f32), iy: (usize, usize, f32), iz: (usize, usize, f32)) -> T {
    let (x0, x1, fx) = ix;
    let (y0, y1, fy) = iy;
    let (z0, z1, fz) = iz;
    let mut acc = T::default();
    for (x, wx) in [(x0, 1.0 - fx), (x1, fx)] {
        for (y, wy) in [(y0, 1.0 - fy), (y1, fy)] {
            for (z, wz) in [(z0, 1.0 - fz), (z1, fz)] {
                let w = wx * wy * wz;
                if w != 0.0 {
                    acc = acc.weighted_add(data[[x, y, z]], w);
                }
            }
        }
    }
    acc
}

/// Trilinear sample, `None` outside the grid.
#[inline]
pub fn trilinear_sample<T: VoxelValue>(data: &Array3<T>, pos: Vec3) -> Option<T> {
    let (nx, ny, nz) = data.dim();
    let ix = axis_interval(pos[0], nx)?;
    let iy = axis_interval(pos[1], ny)?;
    let iz = axis_interval(pos[2], nz)?;
    Some(blend(data, ix, iy, iz))
}

/// Trilinear sample with the position clamped onto the grid.
#[inline]
pub fn trilinear_sample_clamped<T: VoxelValue>(data: &Array3<T>, pos: Vec3) -> T {
    let (nx, ny, nz) = data.dim();
    if nx == 0 || ny == 0 || nz == 0 {
        return T::default();
    }
    blend(
        data,
        clamped_interval(pos[0], nx),
        clamped_interval(pos[1], ny),
        clamped_interval(pos[2], nz),
    )
}

/// Catmull-Rom weights for the four taps around a fraction `t`.
#[inline]
fn cubic_weights(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

#[inline]
fn cubic_taps(i0: usize, n: usize) -> [usize; 4] {
    let last = n - 1;
    [
        i0.saturating_sub(1),
        i0,
        (i0 + 1).min(last),
        (i0 + 2).min(last),
    ]
}

/// Tricubic (Catmull-Rom) sample, zero outside the grid. Exact at integer
/// positions.
pub fn cubic_sample(data: &Array3<f32>, pos: Vec3) -> f32 {
    let (nx, ny, nz) = data.dim();
    let (Some((x0, _, fx)), Some((y0, _, fy)), Some((z0, _, fz))) = (
        axis_interval(pos[0], nx),
        axis_interval(pos[1], ny),
        axis_interval(pos[2], nz),
    ) else {
        return 0.0;
    };

    let (wx, wy, wz) = (cubic_weights(fx), cubic_weights(fy), cubic_weights(fz));
    let (tx, ty, tz) = (cubic_taps(x0, nx), cubic_taps(y0, ny), cubic_taps(z0, nz));

    let mut sum = 0.0f32;
    for (i, &x) in tx.iter().enumerate() {
        if wx[i] == 0.0 {
            continue;
        }
        for (j, &y) in ty.iter().enumerate() {
            let wxy = wx[i] * wy[j];
            if wxy == 0.0 {
                continue;
            }
            for (k, &z) in tz.iter().enumerate() {
                sum += data[[x, y, z]] * wxy * wz[k];
            }
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp() -> Array3<f32> {
        Array3::from_shape_fn((4, 4, 4), |(x, y, z)| (x + 2 * y + 3 * z) as f32)
    }

    #[test]
    fn test_linear_midpoint() {
        let data = ramp();
        let v = trilinear_sample(&data, [1.5, 1.0, 1.0]).unwrap();
        assert_abs_diff_eq!(v, 1.5 + 2.0 + 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_outside_is_zero() {
        let data = ramp();
        assert_eq!(sample(&data, [-1.0, 0.0, 0.0], Interpolation::Linear), 0.0);
        assert_eq!(sample(&data, [0.0, 4.0, 0.0], Interpolation::Cubic), 0.0);
        assert_eq!(sample(&data, [0.0, 0.0, 3.6], Interpolation::Nearest), 0.0);
    }

    #[test]
    fn test_cubic_exact_on_grid() {
        let data = ramp();
        for &(x, y, z) in &[(0, 0, 0), (1, 2, 3), (3, 3, 3)] {
            let v = cubic_sample(&data, [x as f32, y as f32, z as f32]);
            assert_abs_diff_eq!(v, data[[x, y, z]], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_clamped_sample_on_vectors() {
        let field = Array3::from_elem((2, 2, 2), [1.0f32, 2.0, 3.0]);
        let v = trilinear_sample_clamped(&field, [5.0, -3.0, 0.5]);
        assert_abs_diff_eq!(v[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[2], 3.0, epsilon = 1e-6);
    }
}
