//! Concrete analyses, each a [`Job`](crate::engine::job::Job) over a trajectory.
//!
//! Every analysis exposes `settings()`, the table of parameters it accepts, and
//! `new(parameters, env)`, which validates those parameters into a ready-to-run job.

pub mod area_per_molecule;
pub mod density_of_states;
pub mod density_profile;
pub mod dynamic_incoherent_structure_factor;
pub mod eccentricity;
pub mod mean_square_displacement;
pub mod pair_distribution_function;
pub mod solvent_accessible_surface;
pub mod spatial_density;

#[cfg(test)]
pub(crate) mod testing;

pub use area_per_molecule::AreaPerMolecule;
pub use density_of_states::DensityOfStates;
pub use density_profile::DensityProfile;
pub use dynamic_incoherent_structure_factor::DynamicIncoherentStructureFactor;
pub use eccentricity::Eccentricity;
pub use mean_square_displacement::MeanSquareDisplacement;
pub use pair_distribution_function::PairDistributionFunction;
pub use solvent_accessible_surface::SolventAccessibleSurface;
pub use spatial_density::SpatialDensity;

use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{AtomSelectionValue, Setting, SettingKind};
use crate::engine::error::AnalysisError;
use std::collections::BTreeMap;

pub(crate) const TRAJECTORY: &str = "trajectory";
pub(crate) const FRAMES: &str = "frames";
pub(crate) const ATOM_SELECTION: &str = "atom_selection";
pub(crate) const ATOM_TRANSMUTATION: &str = "atom_transmutation";
pub(crate) const WEIGHTS: &str = "weights";
pub(crate) const OUTPUT_FILES: &str = "output_files";
pub(crate) const RUNNING_MODE: &str = "running_mode";

/// `trajectory` and `frames`.
pub(crate) fn trajectory_settings() -> Vec<Setting> {
    vec![
        Setting::new(TRAJECTORY, SettingKind::Trajectory).help("Trajectory file to analyse"),
        Setting::new(FRAMES, SettingKind::Frames { trajectory: TRAJECTORY })
            .help("Frames to analyse, last exclusive"),
    ]
}

/// `atom_selection`, an optional `atom_transmutation` and `weights`.
pub(crate) fn selection_settings(default_weights: &str) -> Vec<Setting> {
    vec![
        Setting::new(ATOM_SELECTION, SettingKind::AtomSelection { trajectory: TRAJECTORY })
            .help("Atoms to analyse"),
        Setting::new(
            ATOM_TRANSMUTATION,
            SettingKind::AtomTransmutation {
                selection: ATOM_SELECTION,
            },
        )
        .optional()
        .help("Selected atoms to analyse as another element"),
        Setting::new(
            WEIGHTS,
            SettingKind::Weights {
                selection: ATOM_SELECTION,
                transmutation: Some(ATOM_TRANSMUTATION),
            },
        )
        .default_value(default_weights)
        .help("Element property weighting the partial results"),
    ]
}

/// `output_files` and `running_mode`.
pub(crate) fn output_settings() -> Vec<Setting> {
    vec![
        Setting::new(OUTPUT_FILES, SettingKind::OutputFiles)
            .optional()
            .help("Output root and formats; nothing is written without it"),
        Setting::new(RUNNING_MODE, SettingKind::RunningMode).help("Single or multi-threaded"),
    ]
}

pub(crate) fn element_counts(selection: &AtomSelectionValue) -> BTreeMap<String, usize> {
    selection
        .groups()
        .into_iter()
        .map(|(element, atoms)| (element, atoms.len()))
        .collect()
}

pub(crate) fn require_periodic(trajectory: &Trajectory, analysis: &'static str) -> Result<(), AnalysisError> {
    if trajectory.is_periodic() {
        Ok(())
    } else {
        Err(AnalysisError::NotPeriodic { analysis })
    }
}

/// `Σ_e w_e · partial_e` over equally long series.
pub(crate) fn weighted_sum<'a>(
    partials: impl IntoIterator<Item = (&'a str, &'a [f64])>,
    weights: &BTreeMap<String, f64>,
    len: usize,
) -> Vec<f64> {
    let mut total = vec![0.0; len];
    for (element, values) in partials {
        let weight = weights.get(element).copied().unwrap_or(0.0);
        for (t, v) in total.iter_mut().zip(values) {
            *t += weight * v;
        }
    }
    total
}
