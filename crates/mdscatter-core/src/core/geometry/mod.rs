//! Periodic cells, per-frame configurations and mass-weighted geometry.

pub mod configuration;
pub mod inertia;
pub mod unit_cell;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Unit cell is degenerate (volume {volume:e} nm^3)")]
    DegenerateCell { volume: f64 },

    #[error("Configuration is not periodic")]
    NotPeriodic,

    #[error("Expected {expected} atoms, found {found}")]
    AtomCountMismatch { expected: usize, found: usize },

    #[error("Variable '{name}' has {found} rows, expected {expected}")]
    VariableLength {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Atom index {index} is out of range for {n_atoms} atoms")]
    AtomIndexOutOfRange { index: usize, n_atoms: usize },

    #[error("Selection has zero total mass")]
    ZeroMass,
}
