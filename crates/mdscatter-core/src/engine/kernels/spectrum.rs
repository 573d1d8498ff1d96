use super::fft::{fft, fftshift, ifftshift};
use super::lanes;
use crate::engine::error::AnalysisError;
use num_complex::Complex64;
use std::f64::consts::PI;
use std::str::FromStr;

/// Which half of the frequency axis [`get_spectrum`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FftMode {
    /// The full, centered axis of `2n - 1` frequencies.
    #[default]
    Fft,
    /// Only the `n` non-negative frequencies.
    Rfft,
}

impl FromStr for FftMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fft" => Ok(Self::Fft),
            "rfft" => Ok(Self::Rfft),
            _ => Err(format!("Unknown FFT mode: '{}'", s)),
        }
    }
}

/// Spectrum of a time signal sampled from lag zero, broadened by a resolution window.
///
/// The signal is mirrored about its first sample into `2n - 1` points, multiplied by
/// `window / window[n - 1]` when a window is given, transformed with a centered FFT and
/// scaled by `0.5 · dt / π`. The real part is returned.
///
/// # Arguments
///
/// * `signal` - Samples at lags `0, dt, 2·dt, ...`.
/// * `window` - Time window of a resolution kernel, `2n - 1` points centered on lag zero.
/// * `dt` - Sampling step in ps.
/// * `mode` - Full axis or non-negative half.
///
/// # Errors
///
/// Returns [`AnalysisError::ShapeMismatch`] if the window length is not `2n - 1`, and
/// [`AnalysisError::InvalidInput`] if the window vanishes at lag zero.
pub fn get_spectrum(
    signal: &[f64],
    window: Option<&[f64]>,
    dt: f64,
    mode: FftMode,
) -> Result<Vec<f64>, AnalysisError> {
    let n = signal.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let m = 2 * n - 1;
    let mut symmetric: Vec<f64> = signal[1..].iter().rev().chain(signal).copied().collect();

    if let Some(window) = window {
        AnalysisError::check_len("resolution time window", m, window.len())?;
        let center = window[n - 1];
        if center == 0.0 {
            return Err(AnalysisError::InvalidInput(
                "resolution window is zero at lag zero".to_string(),
            ));
        }
        for (value, w) in symmetric.iter_mut().zip(window) {
            *value *= w / center;
        }
    }

    let mut buffer: Vec<Complex64> = ifftshift(&symmetric)
        .into_iter()
        .map(|v| Complex64::new(v, 0.0))
        .collect();
    fft(&mut buffer);
    let prefactor = 0.5 * dt / PI;
    let spectrum: Vec<f64> = fftshift(&buffer).iter().map(|c| c.re * prefactor).collect();

    Ok(match mode {
        FftMode::Fft => spectrum,
        FftMode::Rfft => spectrum[n - 1..].to_vec(),
    })
}

/// [`get_spectrum`] of every lane of a row-major array along `axis`.
///
/// Returns the spectra and their shape: `shape` with `axis` resized to `2n - 1`, or to
/// `n` in [`FftMode::Rfft`].
///
/// # Errors
///
/// As [`get_spectrum`], plus [`AnalysisError::ShapeMismatch`] if `signal` does not fill
/// `shape` and [`AnalysisError::InvalidInput`] for an axis out of range.
pub fn get_spectrum_along(
    signal: &[f64],
    shape: &[usize],
    axis: usize,
    window: Option<&[f64]>,
    dt: f64,
    mode: FftMode,
) -> Result<(Vec<f64>, Vec<usize>), AnalysisError> {
    let spectra = lanes::gather(signal, shape, axis)?
        .iter()
        .map(|lane| get_spectrum(lane, window, dt, mode))
        .collect::<Result<Vec<_>, _>>()?;
    lanes::scatter(spectra, shape, axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kernels::fft::angular_frequencies;
    use crate::engine::resolution::InstrumentResolution;

    fn full_width_at_half_maximum(values: &[f64], step: f64) -> f64 {
        let (peak, max) = values
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best });
        let half = max / 2.0;
        let crossing = |mut i: usize, forward: bool| -> f64 {
            loop {
                let next = if forward { i + 1 } else { i - 1 };
                if values[next] < half {
                    let fraction = (values[i] - half) / (values[i] - values[next]);
                    return i as f64 + if forward { fraction } else { -fraction };
                }
                i = next;
            }
        };
        (crossing(peak, true) - crossing(peak, false)) * step
    }

    #[test]
    fn spectrum_is_even_in_frequency() {
        let signal: Vec<f64> = (0..50).map(|i| (-(i as f64) / 12.0).exp() * (0.7 * i as f64).cos()).collect();
        let spectrum = get_spectrum(&signal, None, 0.1, FftMode::Fft).unwrap();
        assert_eq!(spectrum.len(), 99);
        let scale = spectrum.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        for (a, b) in spectrum.iter().zip(spectrum.iter().rev()) {
            assert!((a - b).abs() <= 1e-12 * scale);
        }
    }

    #[test]
    fn half_spectrum_starts_at_zero_frequency() {
        let signal = [1.0, 0.5, 0.25, 0.125];
        let full = get_spectrum(&signal, None, 1.0, FftMode::Fft).unwrap();
        let half = get_spectrum(&signal, None, 1.0, FftMode::Rfft).unwrap();
        assert_eq!(half.len(), 4);
        assert_eq!(half[..], full[3..]);
        let expected_zero = (1.0 + 2.0 * (0.5 + 0.25 + 0.125)) * 0.5 / PI;
        assert!((half[0] - expected_zero).abs() < 1e-12);
    }

    #[test]
    fn gaussian_resolution_sets_the_line_width() {
        let (n, dt, sigma) = (1024, 0.01, 2.0);
        let omegas = angular_frequencies(n, dt);
        let d_omega = omegas[1] - omegas[0];
        let kernel = InstrumentResolution::Gaussian { mu: 0.0, sigma }
            .set_kernel(&omegas, dt)
            .unwrap();
        let constant = vec![1.0; n];
        let spectrum = get_spectrum(&constant, Some(&kernel.time_window), dt, FftMode::Fft).unwrap();
        let fwhm = full_width_at_half_maximum(&spectrum, d_omega);
        let expected = 2.0 * (2.0 * 2f64.ln()).sqrt() * sigma;
        assert!((fwhm - expected).abs() < d_omega, "{fwhm} vs {expected}");
    }

    #[test]
    fn spectra_along_time_match_each_lane() {
        // Three steps (rows) by two q shells (columns): time runs along axis 0.
        let shell_a = [1.0, 0.5, 0.25];
        let shell_b = [1.0, -0.2, 0.1];
        let grid: Vec<f64> = (0..3).flat_map(|t| [shell_a[t], shell_b[t]]).collect();
        let (spectra, shape) = get_spectrum_along(&grid, &[3, 2], 0, None, 0.5, FftMode::Fft).unwrap();
        assert_eq!(shape, vec![5, 2]);
        let a = get_spectrum(&shell_a, None, 0.5, FftMode::Fft).unwrap();
        let b = get_spectrum(&shell_b, None, 0.5, FftMode::Fft).unwrap();
        for w in 0..5 {
            assert_eq!(spectra[2 * w], a[w]);
            assert_eq!(spectra[2 * w + 1], b[w]);
        }

        let (half, shape) = get_spectrum_along(&grid, &[3, 2], 0, None, 0.5, FftMode::Rfft).unwrap();
        assert_eq!(shape, vec![3, 2]);
        assert_eq!(half[0], a[2]);
    }

    #[test]
    fn window_length_is_checked() {
        let signal = [1.0, 0.0, 0.0];
        assert!(matches!(
            get_spectrum(&signal, Some(&[1.0; 3]), 1.0, FftMode::Fft),
            Err(AnalysisError::ShapeMismatch { expected: 5, found: 3, .. })
        ));
        assert!(get_spectrum(&signal, Some(&[1.0, 1.0, 0.0, 1.0, 1.0]), 1.0, FftMode::Fft).is_err());
    }
}
