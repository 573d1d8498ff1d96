use super::TrajectoryError;
use crate::core::geometry::unit_cell::UnitCell;
use crate::core::models::system::ChemicalSystem;
use nalgebra::Vector3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse step {step}: {reason}")]
    Parse { step: usize, reason: String },

    #[error("Step {step} has {found} atoms, expected {expected}")]
    AtomCount {
        step: usize,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
}

/// What an importer knows once its source file has been scanned.
#[derive(Debug, Clone)]
pub struct ImportHeader {
    pub chemical_system: ChemicalSystem,
    pub n_steps: usize,
    /// Cell declared once for the whole file. Steps without a cell of their own fall back to it.
    pub unit_cell: Option<UnitCell>,
    pub velocities: bool,
}

/// One step as read from a third-party file, in nm and ps.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedStep {
    pub time: f64,
    pub unit_cell: Option<UnitCell>,
    pub coordinates: Vec<Vector3<f64>>,
    pub velocities: Option<Vec<Vector3<f64>>>,
}

/// A converter from a third-party MD format.
///
/// Implementations emit coordinates in nm and times in ps; any unit conversion is
/// theirs to perform.
pub trait TrajectoryImporter {
    fn initialize(&mut self) -> Result<ImportHeader, ImportError>;

    fn read_step(&mut self, index: usize) -> Result<ImportedStep, ImportError>;

    fn close(&mut self) -> Result<(), ImportError> {
        Ok(())
    }
}
