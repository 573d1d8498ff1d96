use super::error::AnalysisError;
use super::kernels::fft::{fftshift, ifft};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Instrument line shapes in angular frequency (rad/ps).
///
/// `sigma` is the standard deviation for the Gaussian, the half width at half maximum
/// for the Lorentzian, and the half base width for the triangular and square shapes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstrumentResolution {
    #[default]
    Ideal,
    Gaussian {
        mu: f64,
        sigma: f64,
    },
    Lorentzian {
        mu: f64,
        sigma: f64,
    },
    Triangular {
        mu: f64,
        sigma: f64,
    },
    Square {
        mu: f64,
        sigma: f64,
    },
    PseudoVoigt {
        eta: f64,
        mu_lorentzian: f64,
        sigma_lorentzian: f64,
        mu_gaussian: f64,
        sigma_gaussian: f64,
    },
}

/// Dual windows of a resolution on one frequency grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionKernel {
    /// Line shape on the grid, with unit integral (except for [`InstrumentResolution::Ideal`]).
    pub omega_window: Vec<f64>,
    /// `fftshift(|ifft(omega_window)| / dt)`, lag zero at the center.
    pub time_window: Vec<f64>,
}

fn gaussian(omega: f64, mu: f64, sigma: f64) -> f64 {
    (-0.5 * ((omega - mu) / sigma).powi(2)).exp() / (sigma * (2.0 * PI).sqrt())
}

fn lorentzian(omega: f64, mu: f64, sigma: f64) -> f64 {
    (sigma / PI) / ((omega - mu).powi(2) + sigma * sigma)
}

impl InstrumentResolution {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ideal => "ideal",
            Self::Gaussian { .. } => "gaussian",
            Self::Lorentzian { .. } => "lorentzian",
            Self::Triangular { .. } => "triangular",
            Self::Square { .. } => "square",
            Self::PseudoVoigt { .. } => "pseudo_voigt",
        }
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        let widths: &[f64] = match self {
            Self::Ideal => &[],
            Self::Gaussian { sigma, .. }
            | Self::Lorentzian { sigma, .. }
            | Self::Triangular { sigma, .. }
            | Self::Square { sigma, .. } => std::slice::from_ref(sigma),
            Self::PseudoVoigt {
                eta,
                sigma_lorentzian,
                sigma_gaussian,
                ..
            } => {
                if !(0.0..=1.0).contains(eta) {
                    return Err(AnalysisError::InvalidInput(format!(
                        "pseudo-Voigt mixing {eta} is outside [0, 1]"
                    )));
                }
                return if *sigma_lorentzian > 0.0 && *sigma_gaussian > 0.0 {
                    Ok(())
                } else {
                    Err(AnalysisError::InvalidInput(
                        "pseudo-Voigt widths must be positive".to_string(),
                    ))
                };
            }
        };
        match widths.iter().find(|w| !(**w > 0.0)) {
            Some(w) => Err(AnalysisError::InvalidInput(format!(
                "{} resolution width must be positive, got {w}",
                self.name()
            ))),
            None => Ok(()),
        }
    }

    fn line_shape(&self, omega: f64) -> f64 {
        match *self {
            Self::Ideal => 0.0,
            Self::Gaussian { mu, sigma } => gaussian(omega, mu, sigma),
            Self::Lorentzian { mu, sigma } => lorentzian(omega, mu, sigma),
            Self::Triangular { mu, sigma } => {
                let x = (omega - mu).abs();
                if x < sigma { (1.0 - x / sigma) / sigma } else { 0.0 }
            }
            Self::Square { mu, sigma } => {
                if (omega - mu).abs() < sigma { 0.5 / sigma } else { 0.0 }
            }
            Self::PseudoVoigt {
                eta,
                mu_lorentzian,
                sigma_lorentzian,
                mu_gaussian,
                sigma_gaussian,
            } => {
                eta * lorentzian(omega, mu_lorentzian, sigma_lorentzian)
                    + (1.0 - eta) * gaussian(omega, mu_gaussian, sigma_gaussian)
            }
        }
    }

    /// Evaluates the line shape on a uniform, centered frequency grid.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidInput`] for fewer than two grid points, a
    /// non-positive width, or a shape that misses every grid point.
    pub fn set_kernel(&self, omegas: &[f64], dt: f64) -> Result<ResolutionKernel, AnalysisError> {
        if omegas.len() < 2 {
            return Err(AnalysisError::InvalidInput(
                "a resolution kernel needs at least two frequencies".to_string(),
            ));
        }
        self.validate()?;
        let n = omegas.len();

        if let Self::Ideal = self {
            let mut omega_window = vec![0.0; n];
            omega_window[n / 2] = 1.0;
            return Ok(ResolutionKernel {
                omega_window,
                time_window: vec![1.0; n],
            });
        }

        let d_omega = omegas[1] - omegas[0];
        let mut omega_window: Vec<f64> = omegas.iter().map(|&w| self.line_shape(w)).collect();
        let integral = omega_window.iter().sum::<f64>() * d_omega;
        if !(integral > 0.0) {
            return Err(AnalysisError::InvalidInput(format!(
                "{} resolution is narrower than the frequency step {d_omega}",
                self.name()
            )));
        }
        omega_window.iter_mut().for_each(|w| *w /= integral);

        let mut buffer: Vec<Complex64> = omega_window.iter().map(|&w| Complex64::new(w, 0.0)).collect();
        ifft(&mut buffer);
        let magnitudes: Vec<f64> = buffer.iter().map(|c| c.norm() / dt).collect();
        Ok(ResolutionKernel {
            omega_window,
            time_window: fftshift(&magnitudes),
        })
    }
}
