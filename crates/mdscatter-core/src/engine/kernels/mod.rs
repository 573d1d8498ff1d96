//! Numerical kernels shared by the analyses.
//!
//! Kernels take plain slices, validate their shapes and report problems as
//! [`AnalysisError`](crate::engine::error::AnalysisError). They never read trajectories
//! themselves; the calling analysis decides which frames and atoms to feed them.

pub mod correlation;
pub mod distance_histogram;
pub mod fft;
pub mod lanes;
pub mod sas;
pub mod spatial_density;
pub mod spectrum;
