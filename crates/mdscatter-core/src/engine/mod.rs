//! # Engine Module
//!
//! This module implements the analysis machinery shared by every workflow: numerical
//! kernels, scattering-vector generation, instrument resolution, typed parameters, the
//! job runtime and the result containers.
//!
//! ## Overview
//!
//! An analysis declares its parameters as [`configurators::Setting`]s, which
//! [`configurators::Configurable`] validates and resolves against the shared
//! [`environment::Environment`]. The [`job`] runtime then drives the analysis through
//! initialize, per-frame steps (optionally on a worker pool), serial combination and
//! finalization, and writes the [`output`] variables in the requested formats.
//!
//! ## Architecture
//!
//! - **Kernels** ([`kernels`]) - PBC distance histograms, solvent accessible surface, spatial
//!   density grids, FFT correlations and resolution-broadened spectra
//! - **Q Vectors** ([`qvectors`]) - Lattice and directional scattering-vector generators
//! - **Resolution** ([`resolution`]) - Instrument resolution kernels in frequency and time
//! - **Parameters** ([`configurators`]) - Declarative settings with dependency resolution
//! - **Runtime** ([`job`], [`cancel`], [`progress`]) - Job scheduling, cooperative
//!   cancellation and progress events
//! - **Results** ([`output`]) - Named, axis-tagged variables and their file formats
//! - **Context** ([`environment`]) - Read-only databases and defaults injected into jobs
//! - **Error Handling** ([`error`]) - Analysis errors and the aggregated job error

pub mod cancel;
pub mod configurators;
pub mod environment;
pub mod error;
pub mod job;
pub mod kernels;
pub mod output;
pub mod progress;
pub mod qvectors;
pub mod resolution;
