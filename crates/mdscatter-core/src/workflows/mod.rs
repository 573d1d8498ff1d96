//! # Workflows Module
//!
//! This module provides the complete analyses that turn a stored trajectory into
//! scattering and structural observables, plus the driver that converts third-party
//! trajectories into the native container.
//!
//! ## Overview
//!
//! Workflows are the top-level entry points for users of mdscatter. Each analysis
//! declares its parameters, validates them against the shared environment, and runs
//! through the job runtime, which handles scheduling, cancellation, progress reporting
//! and writing the results.
//!
//! ## Architecture
//!
//! - **Analyses** ([`analyses`]) - Structural (pair distribution, density profile,
//!   area per molecule, eccentricity, solvent accessible surface, spatial density) and
//!   dynamical (mean square displacement, density of states, incoherent structure
//!   factor) observables.
//! - **Registry** ([`registry`]) - Builds analyses by name and exposes their settings.
//! - **Import** ([`import`]) - Drives a `TrajectoryImporter` into a new trajectory file.

pub mod analyses;
pub mod import;
pub mod registry;
