//! Gradient filters for edge-based registration.

use ndarray::Array3;

use crate::volume::{build_array, Geometry, Vec3};

#[inline]
fn clamp_index(i: usize, offset: isize, n: usize) -> usize {
    (i as isize + offset).clamp(0, n as isize - 1) as usize
}

/// 3D Sobel gradient magnitude with clamped borders.
///
/// Each axis derivative is `[-1, 0, 1]` along the axis and `[1, 2, 1]`
/// smoothing along the other two.
pub fn sobel_magnitude(data: &Array3<f32>) -> Array3<f32> {
    let geometry = Geometry::of(data);
    if geometry.is_empty() {
        return data.clone();
    }
    let (nx, ny, nz) = data.dim();
    const SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];
    build_array(geometry, |x, y, z| {
        let mut g = [0.0f32; 3];
        for (a, &wa) in SMOOTH.iter().enumerate() {
            for (b, &wb) in SMOOTH.iter().enumerate() {
                let (oa, ob) = (a as isize - 1, b as isize - 1);
                let w = wa * wb;
                // d/dx
                let ys = clamp_index(y, oa, ny);
                let zs = clamp_index(z, ob, nz);
                g[0] += w * (data[[clamp_index(x, 1, nx), ys, zs]] - data[[clamp_index(x, -1, nx), ys, zs]]);
                // d/dy
                let xs = clamp_index(x, oa, nx);
                g[1] += w * (data[[xs, clamp_index(y, 1, ny), zs]] - data[[xs, clamp_index(y, -1, ny), zs]]);
                // d/dz
                let ys = clamp_index(y, ob, ny);
                g[2] += w * (data[[xs, ys, clamp_index(z, 1, nz)]] - data[[xs, ys, clamp_index(z, -1, nz)]]);
            }
        }
        (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt()
    })
}

/// 3x3x3 box mean with clamped borders.
pub fn mean_filter(data: &Array3<f32>) -> Array3<f32> {
    let geometry = Geometry::of(data);
    if geometry.is_empty() {
        return data.clone();
    }
    let (nx, ny, nz) = data.dim();
    build_array(geometry, |x, y, z| {
        let mut sum = 0.0f32;
        for dx in -1..=1 {
            let xs = clamp_index(x, dx, nx);
            for dy in -1..=1 {
                let ys = clamp_index(y, dy, ny);
                for dz in -1..=1 {
                    sum += data[[xs, ys, clamp_index(z, dz, nz)]];
                }
            }
        }
        sum / 27.0
    })
}

/// 3x3x3 box mean of a vector field.
pub fn mean_filter_vec(data: &Array3<Vec3>) -> Array3<Vec3> {
    let geometry = Geometry::of(data);
    if geometry.is_empty() {
        return data.clone();
    }
    let (nx, ny, nz) = data.dim();
    build_array(geometry, |x, y, z| {
        let mut sum = [0.0f32; 3];
        for dx in -1..=1 {
            let xs = clamp_index(x, dx, nx);
            for dy in -1..=1 {
                let ys = clamp_index(y, dy, ny);
                for dz in -1..=1 {
                    let v = data[[xs, ys, clamp_index(z, dz, nz)]];
                    sum[0] += v[0];
                    sum[1] += v[1];
                    sum[2] += v[2];
                }
            }
        }
        [sum[0] / 27.0, sum[1] / 27.0, sum[2] / 27.0]
    })
}

/// Central-difference gradient, one-sided at the borders.
pub fn gradient(data: &Array3<f32>) -> Array3<Vec3> {
    let geometry = Geometry::of(data);
    let (nx, ny, nz) = data.dim();
    build_array(geometry, |x, y, z| {
        let diff = |lo: [usize; 3], hi: [usize; 3], span: usize| {
            if span == 0 {
                0.0
            } else {
                (data[hi] - data[lo]) / span as f32
            }
        };
        let (x0, x1) = (x.saturating_sub(1), (x + 1).min(nx - 1));
        let (y0, y1) = (y.saturating_sub(1), (y + 1).min(ny - 1));
        let (z0, z1) = (z.saturating_sub(1), (z + 1).min(nz - 1));
        [
            diff([x0, y, z], [x1, y, z], x1 - x0),
            diff([x, y0, z], [x, y1, z], y1 - y0),
            diff([x, y, z0], [x, y, z1], z1 - z0),
        ]
    })
}

/// Sobel magnitude followed by the mean filter, the preprocessing used for
/// edge-based registration.
pub fn edge_map(data: &Array3<f32>) -> Array3<f32> {
    mean_filter(&sobel_magnitude(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sobel_flat_is_zero() {
        let data = Array3::from_elem((5, 5, 5), 3.0);
        assert!(sobel_magnitude(&data).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_sobel_responds_to_step() {
        let data = Array3::from_shape_fn((6, 5, 5), |(x, _, _)| if x < 3 { 0.0 } else { 1.0 });
        let s = sobel_magnitude(&data);
        assert!(s[[2, 2, 2]] > 0.0);
        assert_eq!(s[[0, 2, 2]], 0.0);
    }

    #[test]
    fn test_gradient_of_ramp() {
        let data = Array3::from_shape_fn((5, 4, 3), |(x, y, _)| 2.0 * x as f32 - y as f32);
        let g = gradient(&data);
        assert_abs_diff_eq!(g[[2, 1, 1]][0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[[0, 1, 1]][0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[[2, 3, 1]][1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[[2, 1, 1]][2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mean_filter_preserves_constant() {
        let data = Array3::from_elem((3, 4, 5), 1.5);
        assert!(mean_filter(&data).iter().all(|&v| (v - 1.5).abs() < 1e-6));
    }
}
