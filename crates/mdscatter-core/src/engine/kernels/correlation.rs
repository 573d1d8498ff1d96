use super::fft::{fft, ifft};
use super::lanes;
use crate::engine::error::AnalysisError;
use nalgebra::Vector3;
use num_complex::Complex64;

/// Time correlation `C(k) = <conj(x(t)) y(t+k)>` by the fast correlation algorithm.
///
/// Both signals are zero-padded to `2n`, transformed, multiplied as `conj(X)·Y`, and
/// transformed back; lag `k` is divided by its `n - k` contributing pairs. Without `y`
/// this is the autocorrelation of `x`.
///
/// # Errors
///
/// Returns [`AnalysisError::ShapeMismatch`] if `y` is not as long as `x`.
pub fn correlation_complex(
    x: &[Complex64],
    y: Option<&[Complex64]>,
) -> Result<Vec<Complex64>, AnalysisError> {
    let n = x.len();
    if let Some(y) = y {
        AnalysisError::check_len("correlation partner", n, y.len())?;
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let padded = |signal: &[Complex64]| {
        let mut buffer = Vec::with_capacity(2 * n);
        buffer.extend_from_slice(signal);
        buffer.resize(2 * n, Complex64::new(0.0, 0.0));
        fft(&mut buffer);
        buffer
    };
    let fx = padded(x);
    let mut product = match y {
        Some(y) => {
            let fy = padded(y);
            fx.iter().zip(&fy).map(|(a, b)| a.conj() * b).collect::<Vec<_>>()
        }
        None => fx.iter().map(|a| a.conj() * a).collect(),
    };
    ifft(&mut product);
    product.truncate(n);
    for (k, value) in product.iter_mut().enumerate() {
        *value /= (n - k) as f64;
    }
    Ok(product)
}

/// Real-valued [`correlation_complex`].
pub fn correlation(x: &[f64], y: Option<&[f64]>) -> Result<Vec<f64>, AnalysisError> {
    let to_complex = |s: &[f64]| s.iter().map(|&v| Complex64::new(v, 0.0)).collect::<Vec<_>>();
    let x = to_complex(x);
    let y = y.map(to_complex);
    Ok(correlation_complex(&x, y.as_deref())?
        .into_iter()
        .map(|c| c.re)
        .collect())
}

/// [`correlation`] of every lane of a row-major array along `axis`.
///
/// The result keeps the shape of `x`. `sum_over_axis` then sums it over one axis, or
/// `average` averages it over one; both name axes of `x` and are mutually exclusive.
///
/// # Errors
///
/// Returns [`AnalysisError::ShapeMismatch`] if `x` or `y` does not fill `shape`, and
/// [`AnalysisError::InvalidInput`] for an axis out of range or when both reductions are
/// requested.
pub fn correlation_along(
    x: &[f64],
    y: Option<&[f64]>,
    shape: &[usize],
    axis: usize,
    sum_over_axis: Option<usize>,
    average: Option<usize>,
) -> Result<(Vec<f64>, Vec<usize>), AnalysisError> {
    let reduction = match (sum_over_axis, average) {
        (Some(_), Some(_)) => {
            return Err(AnalysisError::InvalidInput(
                "sum_over_axis and average cannot be combined".to_string(),
            ));
        }
        (Some(axis), None) => Some((axis, false)),
        (None, Some(axis)) => Some((axis, true)),
        (None, None) => None,
    };
    let xs = lanes::gather(x, shape, axis)?;
    let ys = y.map(|y| lanes::gather(y, shape, axis)).transpose()?;
    let correlated = xs
        .iter()
        .enumerate()
        .map(|(l, lane)| correlation(lane, ys.as_ref().map(|ys| ys[l].as_slice())))
        .collect::<Result<Vec<_>, _>>()?;
    let (data, shape) = lanes::scatter(correlated, shape, axis)?;
    match reduction {
        Some((axis, average)) => lanes::reduce(&data, &shape, axis, average),
        None => Ok((data, shape)),
    }
}

/// Correlation of vector series along time, summed over the three components.
pub fn vector_correlation(
    x: &[Vector3<f64>],
    y: Option<&[Vector3<f64>]>,
) -> Result<Vec<f64>, AnalysisError> {
    if let Some(y) = y {
        AnalysisError::check_len("correlation partner", x.len(), y.len())?;
    }
    let flatten = |series: &[Vector3<f64>]| -> Vec<f64> {
        series.iter().flat_map(|v| v.iter().copied()).collect()
    };
    let xs = flatten(x);
    let ys = y.map(flatten);
    let (total, _) = correlation_along(&xs, ys.as_deref(), &[x.len(), 3], 0, Some(1), None)?;
    Ok(total)
}

/// Mean square displacement `<|r(t+k) - r(t)|²>` of one trajectory, for every lag.
///
/// The squared-position sums are accumulated from both ends of the series and the
/// cross term comes from [`vector_correlation`], giving O(n log n) overall.
pub fn mean_square_displacement(series: &[Vector3<f64>]) -> Result<Vec<f64>, AnalysisError> {
    let n = series.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let dsq: Vec<f64> = series.iter().map(|r| r.norm_squared()).collect();
    let sum_sq = 2.0 * dsq.iter().sum::<f64>();

    let mut msd = Vec::with_capacity(n);
    let (mut head, mut tail) = (0.0, 0.0);
    for k in 0..n {
        if k > 0 {
            head += dsq[k - 1];
            tail += dsq[n - k];
        }
        msd.push((sum_sq - head - tail) / (n - k) as f64);
    }
    let cross = vector_correlation(series, None)?;
    for (value, c) in msd.iter_mut().zip(cross) {
        *value -= 2.0 * c;
    }
    Ok(msd)
}
