//! Scattering-vector generators.
//!
//! A generator turns a list of target moduli ("shells") into sets of vectors. Lattice
//! generators draw integer `hkl` combinations of the reciprocal cell and need a
//! periodic configuration; directional generators draw continuous directions and work
//! for any system. All of them poll a [`CancelToken`] after each shell.

mod directional;
mod lattice;

use crate::core::geometry::unit_cell::UnitCell;
use crate::engine::cancel::CancelToken;
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QVectorsError {
    #[error("No shell received any q vector")]
    EmptyShells,

    #[error("Axis {0} has zero length")]
    ZeroAxis(String),

    #[error("Generator '{0}' needs a periodic unit cell")]
    NotPeriodic(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Inclusive range of shell moduli in nm⁻¹.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShellRange {
    pub first: f64,
    pub last: f64,
    pub step: f64,
}

impl ShellRange {
    pub fn single(q: f64) -> Self {
        Self {
            first: q,
            last: q,
            step: 1.0,
        }
    }

    pub fn values(&self) -> Result<Vec<f64>, QVectorsError> {
        if !(self.step > 0.0) {
            return Err(QVectorsError::InvalidParameter {
                name: "shells",
                reason: format!("step must be positive, got {}", self.step),
            });
        }
        if self.first < 0.0 {
            return Err(QVectorsError::InvalidParameter {
                name: "shells",
                reason: format!("shells start at a negative modulus {}", self.first),
            });
        }
        if self.last < self.first {
            return Err(QVectorsError::EmptyShells);
        }
        let count = ((self.last - self.first) / self.step + 1e-9).floor() as usize + 1;
        Ok((0..count).map(|i| self.first + i as f64 * self.step).collect())
    }
}

/// Inclusive integer range used by the grid generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub first: i32,
    pub last: i32,
    #[serde(default = "unit_step")]
    pub step: i32,
}

fn unit_step() -> i32 {
    1
}

impl IntRange {
    pub fn values(&self, name: &'static str) -> Result<Vec<i32>, QVectorsError> {
        if self.step <= 0 || self.last < self.first {
            return Err(QVectorsError::InvalidParameter {
                name,
                reason: format!("empty range {}..={} step {}", self.first, self.last, self.step),
            });
        }
        Ok((self.first..=self.last).step_by(self.step as usize).collect())
    }
}

/// Parameters shared by the shell-based generators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShellSampling {
    pub shells: ShellRange,
    pub n_vectors: usize,
    #[serde(default)]
    pub width: f64,
    /// `0` draws a fresh seed from the operating system.
    #[serde(default)]
    pub seed: u64,
}

impl ShellSampling {
    fn validate(&self) -> Result<Vec<f64>, QVectorsError> {
        if self.n_vectors == 0 {
            return Err(QVectorsError::InvalidParameter {
                name: "n_vectors",
                reason: "at least one vector per shell is required".to_string(),
            });
        }
        if !(self.width >= 0.0) {
            return Err(QVectorsError::InvalidParameter {
                name: "width",
                reason: format!("width must be non-negative, got {}", self.width),
            });
        }
        self.shells.values()
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            0 => StdRng::from_entropy(),
            seed => StdRng::seed_from_u64(seed),
        }
    }

    #[inline]
    fn accepts(&self, q: f64, modulus: f64) -> bool {
        (modulus - q).abs() <= self.width / 2.0 + 1e-12
    }
}

/// The vectors generated for one target modulus.
#[derive(Debug, Clone, PartialEq)]
pub struct QShell {
    pub q: f64,
    pub vectors: Vec<Vector3<f64>>,
    /// Integer reciprocal-lattice indices, lattice generators only.
    pub hkls: Option<Vec<[i32; 3]>>,
}

impl QShell {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Shells in increasing order of their target modulus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QVectorSet {
    pub shells: Vec<QShell>,
    /// `false` when generation stopped early on cancellation.
    pub complete: bool,
}

impl QVectorSet {
    pub fn q_values(&self) -> Vec<f64> {
        self.shells.iter().map(|s| s.q).collect()
    }

    pub fn total_vectors(&self) -> usize {
        self.shells.iter().map(QShell::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }
}

/// Tracks shell emission and cancellation for a running generator.
pub(crate) struct ShellCollector<'a> {
    set: QVectorSet,
    cancel: Option<&'a CancelToken>,
}

impl<'a> ShellCollector<'a> {
    pub(crate) fn new(cancel: Option<&'a CancelToken>) -> Self {
        Self {
            set: QVectorSet {
                shells: Vec::new(),
                complete: true,
            },
            cancel,
        }
    }

    /// Stores a shell, dropping empty ones. Returns `false` once the caller must stop.
    pub(crate) fn push(&mut self, shell: QShell) -> bool {
        if shell.is_empty() {
            tracing::warn!(q = shell.q, "No q vector found for shell; skipping it");
        } else {
            self.set.shells.push(shell);
        }
        if self.cancel.is_some_and(CancelToken::is_stopped) {
            self.set.complete = false;
            return false;
        }
        true
    }

    pub(crate) fn finish(self) -> Result<QVectorSet, QVectorsError> {
        if self.set.complete && self.set.shells.is_empty() {
            return Err(QVectorsError::EmptyShells);
        }
        Ok(self.set)
    }
}

/// A configured generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QVectors {
    SphericalLattice {
        #[serde(flatten)]
        sampling: ShellSampling,
    },
    CircularLattice {
        #[serde(flatten)]
        sampling: ShellSampling,
        axis_1: [i32; 3],
        axis_2: [i32; 3],
    },
    LinearLattice {
        #[serde(flatten)]
        sampling: ShellSampling,
        axis: [i32; 3],
    },
    GridLattice {
        hrange: IntRange,
        krange: IntRange,
        lrange: IntRange,
        qstep: f64,
    },
    Spherical {
        #[serde(flatten)]
        sampling: ShellSampling,
    },
    Circular {
        #[serde(flatten)]
        sampling: ShellSampling,
        axis_1: [f64; 3],
        axis_2: [f64; 3],
    },
    Linear {
        #[serde(flatten)]
        sampling: ShellSampling,
        axis: [f64; 3],
    },
}

impl QVectors {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SphericalLattice { .. } => "spherical_lattice",
            Self::CircularLattice { .. } => "circular_lattice",
            Self::LinearLattice { .. } => "linear_lattice",
            Self::GridLattice { .. } => "grid_lattice",
            Self::Spherical { .. } => "spherical",
            Self::Circular { .. } => "circular",
            Self::Linear { .. } => "linear",
        }
    }

    pub fn is_lattice(&self) -> bool {
        matches!(
            self,
            Self::SphericalLattice { .. }
                | Self::CircularLattice { .. }
                | Self::LinearLattice { .. }
                | Self::GridLattice { .. }
        )
    }

    /// Generates the vectors.
    ///
    /// `cell` is the reference cell for lattice generators and is ignored otherwise. A
    /// cancelled run returns the shells produced so far with `complete == false`.
    #[instrument(skip_all, name = "generate_q_vectors", fields(generator = self.name()))]
    pub fn generate(
        &self,
        cell: Option<&UnitCell>,
        cancel: Option<&CancelToken>,
    ) -> Result<QVectorSet, QVectorsError> {
        let reciprocal = || {
            cell.map(UnitCell::reciprocal_basis)
                .ok_or(QVectorsError::NotPeriodic(self.name()))
        };
        let set = match self {
            Self::SphericalLattice { sampling } => {
                lattice::spherical(sampling, &reciprocal()?, cancel)?
            }
            Self::CircularLattice {
                sampling,
                axis_1,
                axis_2,
            } => lattice::circular(sampling, &reciprocal()?, *axis_1, *axis_2, cancel)?,
            Self::LinearLattice { sampling, axis } => {
                lattice::linear(sampling, &reciprocal()?, *axis, cancel)?
            }
            Self::GridLattice {
                hrange,
                krange,
                lrange,
                qstep,
            } => lattice::grid(&reciprocal()?, [hrange, krange, lrange], *qstep, cancel)?,
            Self::Spherical { sampling } => directional::spherical(sampling, cancel)?,
            Self::Circular {
                sampling,
                axis_1,
                axis_2,
            } => directional::circular(sampling, *axis_1, *axis_2, cancel)?,
            Self::Linear { sampling, axis } => directional::linear(sampling, *axis, cancel)?,
        };
        info!(
            shells = set.shells.len(),
            vectors = set.total_vectors(),
            complete = set.complete,
            "Generated q vectors"
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_ranges_include_their_last_value() {
        let shells = ShellRange {
            first: 1.0,
            last: 2.0,
            step: 0.1,
        };
        let values = shells.values().unwrap();
        assert_eq!(values.len(), 11);
        assert!((values[10] - 2.0).abs() < 1e-12);
        assert_eq!(ShellRange::single(3.0).values().unwrap(), vec![3.0]);
        assert!(
            ShellRange {
                first: 1.0,
                last: 2.0,
                step: 0.0
            }
            .values()
            .is_err()
        );
    }

    #[test]
    fn generators_deserialize_from_tagged_tables() {
        let table: toml::Table = toml::from_str(
            r#"
            kind = "spherical"
            shells = { first = 1.0, last = 1.0, step = 1.0 }
            n_vectors = 500
            seed = 42
            "#,
        )
        .unwrap();
        let generator: QVectors = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(
            generator,
            QVectors::Spherical {
                sampling: ShellSampling {
                    shells: ShellRange::single(1.0),
                    n_vectors: 500,
                    width: 0.0,
                    seed: 42,
                }
            }
        );
        assert!(!generator.is_lattice());
    }

    #[test]
    fn lattice_generators_need_a_cell() {
        let generator = QVectors::SphericalLattice {
            sampling: ShellSampling {
                shells: ShellRange::single(1.0),
                n_vectors: 10,
                width: 0.1,
                seed: 1,
            },
        };
        assert_eq!(
            generator.generate(None, None),
            Err(QVectorsError::NotPeriodic("spherical_lattice"))
        );
    }
}
