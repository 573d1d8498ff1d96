//! Trajectory file input and output.
//!
//! Trajectories are stored in a single keyed container file: a fixed preamble, a
//! `bincode` header carrying the `/chemical_system` tables and the frame layout, then one
//! fixed-size little-endian record per frame. Fixed-size records give O(1) access to any
//! frame and to any atom within a frame. The [`writer`] produces such files, the
//! [`importer`] trait describes third-party converters that feed it.

pub mod container;
pub mod importer;
pub mod writer;

pub use crate::core::models::serialization::CorruptedFileError;

use crate::core::geometry::GeometryError;
use crate::core::units::UnitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{path}' is not a trajectory file")]
    BadMagic { path: String },

    #[error("Cannot decode the header of '{path}': {source}")]
    Header {
        path: String,
        #[source]
        source: bincode::Error,
    },

    #[error(transparent)]
    Corrupted(#[from] CorruptedFileError),

    #[error("Frame index {index} is out of range for {n_frames} frames")]
    FrameOutOfRange { index: usize, n_frames: usize },

    #[error("Atom index {index} is out of range for {n_atoms} atoms")]
    AtomOutOfRange { index: usize, n_atoms: usize },

    #[error("Malformed frame {index}: {reason}")]
    MalformedFrame { index: usize, reason: String },

    #[error("The trajectory has no '{0}' data")]
    MissingVariable(String),

    #[error("Trajectory '{path}' already holds the declared {n_frames} frames")]
    WriterFull { path: String, n_frames: usize },

    #[error("The chemical system has no active configuration")]
    MissingConfiguration,

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl TrajectoryError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}
