use ndarray::{Array3, Zip};

use crate::consts::{EPSILON, OTSU_HISTOGRAM_BINS};
use crate::error::{Result, VolregError};
use crate::volume::Geometry;

/// Scale `data` so its maximum equals `upper`. Volumes without a positive
/// maximum are left untouched.
pub fn normalize(data: &mut Array3<f32>, upper: f32) {
    let max = data
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if max > EPSILON {
        let factor = upper / max;
        data.mapv_inplace(|v| if v.is_finite() { v * factor } else { 0.0 });
    }
}

/// Mean and standard deviation over all voxels.
pub fn mean_stddev(data: &Array3<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn check_geometry(a: &Array3<f32>, b: &Array3<f32>) -> Result<()> {
    let (ga, gb) = (Geometry::of(a), Geometry::of(b));
    if ga != gb {
        return Err(VolregError::GeometryMismatch {
            expected: ga.dims(),
            actual: gb.dims(),
        });
    }
    Ok(())
}

/// Pearson correlation of two equally shaped volumes. Zero when either is
/// constant.
pub fn correlation(a: &Array3<f32>, b: &Array3<f32>) -> Result<f32> {
    check_geometry(a, b)?;
    let (ma, _) = mean_stddev(a);
    let (mb, _) = mean_stddev(b);
    let (mut sab, mut saa, mut sbb) = (0.0f64, 0.0f64, 0.0f64);
    Zip::from(a).and(b).for_each(|&x, &y| {
        let dx = x as f64 - ma;
        let dy = y as f64 - mb;
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    });
    let denom = (saa * sbb).sqrt();
    if denom <= EPSILON as f64 || !denom.is_finite() {
        return Ok(0.0);
    }
    Ok((sab / denom) as f32)
}

/// Map subject intensities linearly so their mean and spread match the
/// template's.
pub fn match_intensity(subject: &mut Array3<f32>, template: &Array3<f32>) -> Result<()> {
    check_geometry(template, subject)?;
    let (ms, ss) = mean_stddev(subject);
    let (mt, st) = mean_stddev(template);
    if ss <= EPSILON as f64 {
        return Ok(());
    }
    let gain = st / ss;
    subject.mapv_inplace(|v| ((v as f64 - ms) * gain + mt) as f32);
    Ok(())
}

/// Otsu threshold over the volume's own value range.
pub fn otsu_threshold(data: &Array3<f32>) -> f32 {
    let Some((lo, hi)) = data
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f32, f32)>, v| match acc {
            None => Some((v, v)),
            Some((a, b)) => Some((a.min(v), b.max(v))),
        })
    else {
        return 0.0;
    };
    let range = hi - lo;
    if range <= EPSILON {
        return lo;
    }

    let bins = OTSU_HISTOGRAM_BINS;
    let mut histogram = vec![0u64; bins];
    for &v in data.iter().filter(|v| v.is_finite()) {
        let t = (v - lo) / range;
        let bin = ((t * (bins - 1) as f32) as usize).min(bins - 1);
        histogram[bin] += 1;
    }

    let total: f64 = histogram.iter().sum::<u64>() as f64;
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;
    let mut best_variance = 0.0f64;
    let mut best_bin = 0usize;
    for (i, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between > best_variance {
            best_variance = between;
            best_bin = i;
        }
    }

    lo + (best_bin as f32 + 0.5) / bins as f32 * range
}

/// Subtract the Otsu threshold, clamp at zero and renormalize to 1.
pub fn remove_background(data: &mut Array3<f32>) {
    let threshold = otsu_threshold(data);
    data.mapv_inplace(|v| (v - threshold).max(0.0));
    normalize(data, 1.0);
}
