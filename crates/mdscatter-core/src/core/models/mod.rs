//! # Core Models Module
//!
//! This module contains the data structures used to describe the chemistry of a
//! trajectory: atoms, the composite entities built from them (clusters, molecules,
//! residues, nucleotides, chains, proteins) and the [`ChemicalSystem`](system::ChemicalSystem)
//! that owns them with dense atom indices and a canonical bond table.
//!
//! ## Key Components
//!
//! - [`atom`] - Individual atoms with element symbol, name, groups and chain-connection flags
//! - [`entity`] - Owned entity trees built by users or instantiated from the molecule database
//! - [`system`] - The indexed system: flattened entity arena, atoms, bonds, active configuration
//! - [`serialization`] - Table encoding of a system, as stored in trajectory files
//! - [`topology`] - Canonical bonds
//! - [`ids`] - Arena keys for entities
//!
//! ## Usage
//!
//! ```ignore
//! use mdscatter::core::models::{entity::{ChemicalEntity, Molecule}, system::ChemicalSystem};
//!
//! let mut system = ChemicalSystem::new("box of water");
//! for i in 0..10 {
//!     let water = Molecule::from_database(&molecules, "WAT", &format!("water{i}"))?;
//!     system.add_chemical_entity(ChemicalEntity::Molecule(water))?;
//! }
//! ```

pub mod atom;
pub mod entity;
pub mod ids;
pub mod serialization;
pub mod system;
pub mod topology;

use crate::core::geometry::GeometryError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChemicalEntityError {
    #[error("Invalid chemical entity: {0}")]
    InvalidChemicalEntity(String),

    #[error("Invalid peptide chain '{chain}': {reason}")]
    InvalidPeptideChain { chain: String, reason: String },

    #[error("Invalid nucleotide chain '{chain}': {reason}")]
    InvalidNucleotideChain { chain: String, reason: String },

    #[error("No atom named '{name}' in {entity}")]
    UnknownAtom { entity: String, name: String },

    #[error("Inconsistent atom names for {entity}: {reason}")]
    InconsistentAtomNames { entity: String, reason: String },

    #[error("Atom index {index} is out of range for {n_atoms} atoms")]
    AtomIndexOutOfRange { index: usize, n_atoms: usize },

    #[error("Unknown atom symbol '{0}'")]
    UnknownSymbol(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Cannot rebuild system: {0}")]
    Rebuild(String),

    #[error("Configuration does not match the system: {0}")]
    Geometry(#[from] GeometryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_errors_convert_and_clone() {
        let err: ChemicalEntityError = GeometryError::AtomCountMismatch {
            expected: 3,
            found: 2,
        }
        .into();
        assert_eq!(err.clone(), err);
        assert_eq!(
            err.to_string(),
            "Configuration does not match the system: Expected 3 atoms, found 2"
        );
    }
}
