//! Small statistics helpers shared across the analysis modules.

use ndarray::ArrayView1;
use ndarray_stats::errors::QuantileError;
use noisy_float::prelude::n64;

/// Return the median. Sorts its argument in place.
///
/// Values must be finite; ordering is total through `n64`.
pub fn median_mut(xs: &mut [f64]) -> Result<f64, QuantileError> {
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    xs.sort_unstable_by_key(|&v| n64(v));
    Ok(if xs.len() % 2 == 0 {
        (xs[xs.len() / 2] + xs[xs.len() / 2 - 1]) / 2.0
    } else {
        xs[xs.len() / 2]
    })
}

/// Sum skipping NaN entries; zero when nothing remains.
pub fn nan_sum(values: ArrayView1<'_, f64>) -> f64 {
    values.iter().filter(|v| !v.is_nan()).sum()
}

/// Mean skipping NaN entries; NaN when nothing remains.
pub fn nan_mean(values: ArrayView1<'_, f64>) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Population variance skipping NaN entries; NaN when nothing remains.
pub fn nan_var(values: ArrayView1<'_, f64>) -> f64 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if !v.is_nan() {
            sum += (v - mean) * (v - mean);
            n += 1;
        }
    }
    sum / n as f64
}
