//! # Core Module
//!
//! This module provides the fundamental building blocks shared by every analysis:
//! the molecular model, per-frame coordinates and the trajectory container.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atoms, composite entities and the indexed `ChemicalSystem`
//! - **Reference Data** ([`database`]) - Element properties and molecule/residue/nucleotide templates
//! - **Geometry** ([`geometry`]) - Unit cells, configurations in real and box space, inertia
//! - **Atom Selection** ([`selection`]) - The selection expression language and its selectors
//! - **Trajectories** ([`io`], [`trajectory`]) - Container format, writer, importer interface and reader
//! - **Units** ([`units`]) - Unit parsing, conversion and energy equivalences

pub mod database;
pub mod geometry;
pub mod io;
pub mod models;
pub mod selection;
pub mod trajectory;
pub mod units;
