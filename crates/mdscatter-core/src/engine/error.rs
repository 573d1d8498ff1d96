use super::configurators::ConfigurationError;
use super::output::OutputError;
use super::qvectors::QVectorsError;
use crate::core::database::DatabaseError;
use crate::core::geometry::GeometryError;
use crate::core::io::TrajectoryError;
use crate::core::io::importer::ImportError;
use crate::core::models::ChemicalEntityError;
use crate::core::selection::AtomSelectionParserError;
use crate::core::units::UnitError;
use thiserror::Error;

/// Invalid kernel inputs or analysis preconditions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Shape mismatch for {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Analysis '{analysis}' requires a periodic trajectory")]
    NotPeriodic { analysis: &'static str },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AnalysisError {
    pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), Self> {
        if expected != found {
            return Err(Self::ShapeMismatch {
                what,
                expected,
                found,
            });
        }
        Ok(())
    }
}

/// The single error type surfaced by the job runtime.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown analysis '{0}'")]
    UnknownJob(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),

    #[error(transparent)]
    Selection(#[from] AtomSelectionParserError),

    #[error(transparent)]
    QVectors(#[from] QVectorsError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    ChemicalEntity(#[from] ChemicalEntityError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Step {index} failed: {source}")]
    Step {
        index: usize,
        #[source]
        source: Box<JobError>,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
