//! # mdscatter Core Library
//!
//! A high-performance library for computing neutron-scattering observables (pair
//! distribution functions, dynamic structure factors, density profiles, solvent
//! accessible surfaces, ...) from molecular-dynamics trajectories.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a clear separation of concerns,
//! making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains the data models (`ChemicalSystem`, `Configuration`,
//!   `UnitCell`), the element and molecule databases, the atom selection language, the unit
//!   manager, and the trajectory container I/O.
//!
//! - **[`engine`]: The Logic Core.** This layer hosts the numerical kernels (PBC distance
//!   histograms, solvent accessible surface, FCA correlations, resolution-broadened spectra),
//!   the Q-vector generators, the instrument resolutions, the declarative configurator system,
//!   the job runtime, and the typed output containers.
//!
//! - **[`workflows`]: The Public API.** This is the highest-level, user-facing layer. It ties the
//!   `engine` and `core` together into complete analyses (e.g. `PairDistributionFunction`,
//!   `DynamicIncoherentStructureFactor`) and a registry that builds them by name.

pub mod core;
pub mod engine;
pub mod workflows;
