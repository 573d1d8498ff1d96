use num_complex::Complex64;
use rustfft::FftPlanner;

/// Forward transform in place, unnormalized.
pub fn fft(buffer: &mut [Complex64]) {
    if buffer.is_empty() {
        return;
    }
    FftPlanner::new()
        .plan_fft_forward(buffer.len())
        .process(buffer);
}

/// Inverse transform in place, normalized by `1/n`.
pub fn ifft(buffer: &mut [Complex64]) {
    if buffer.is_empty() {
        return;
    }
    FftPlanner::new()
        .plan_fft_inverse(buffer.len())
        .process(buffer);
    let scale = 1.0 / buffer.len() as f64;
    for value in buffer.iter_mut() {
        *value *= scale;
    }
}

/// Moves the zero-frequency entry to the center.
pub fn fftshift<T: Clone>(values: &[T]) -> Vec<T> {
    let n = values.len();
    let mut shifted = values.to_vec();
    shifted.rotate_right(n / 2);
    shifted
}

/// Inverse of [`fftshift`]; differs from it for odd lengths.
pub fn ifftshift<T: Clone>(values: &[T]) -> Vec<T> {
    let n = values.len();
    let mut shifted = values.to_vec();
    shifted.rotate_left(n / 2);
    shifted
}

/// Sample frequencies of an `n`-point transform with spacing `d`, in cycles per unit.
pub fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * d);
    (0..n)
        .map(|i| {
            let k = if i < n.div_ceil(2) {
                i as f64
            } else {
                i as f64 - n as f64
            };
            k * scale
        })
        .collect()
}

/// Centered angular-frequency grid (rad per time unit) matching a symmetrized signal of
/// `2 * n_frames - 1` points sampled every `dt`.
pub fn angular_frequencies(n_frames: usize, dt: f64) -> Vec<f64> {
    let n = (2 * n_frames).saturating_sub(1);
    fftshift(&fftfreq(n, dt))
        .into_iter()
        .map(|f| 2.0 * std::f64::consts::PI * f)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts_match_the_usual_convention() {
        assert_eq!(fftshift(&[0, 1, 2, 3, 4]), vec![3, 4, 0, 1, 2]);
        assert_eq!(ifftshift(&[3, 4, 0, 1, 2]), vec![0, 1, 2, 3, 4]);
        assert_eq!(fftshift(&[0, 1, 2, 3]), vec![2, 3, 0, 1]);
    }

    #[test]
    fn frequencies_wrap_to_negative_values() {
        assert_eq!(fftfreq(5, 0.5), vec![0.0, 0.4, 0.8, -0.8, -0.4]);
        assert_eq!(fftfreq(4, 1.0), vec![0.0, 0.25, -0.5, -0.25]);
    }

    #[test]
    fn angular_grid_is_centered_on_zero() {
        let omegas = angular_frequencies(4, 0.1);
        assert_eq!(omegas.len(), 7);
        assert_eq!(omegas[3], 0.0);
        assert!((omegas[4] + omegas[2]).abs() < 1e-12);
        assert!(omegas.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn inverse_undoes_forward() {
        let original: Vec<Complex64> = (0..7).map(|i| Complex64::new(i as f64, -(i as f64) / 2.0)).collect();
        let mut buffer = original.clone();
        fft(&mut buffer);
        ifft(&mut buffer);
        for (a, b) in buffer.iter().zip(&original) {
            assert!((a - b).norm() < 1e-12);
        }
    }
}
