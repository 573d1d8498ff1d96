use super::{
    ATOM_SELECTION, ATOM_TRANSMUTATION, FRAMES, TRAJECTORY, WEIGHTS, element_counts, output_settings,
    require_periodic, selection_settings, trajectory_settings, weighted_sum,
};
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, ConfigurationError, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::{AnalysisError, JobError};
use crate::engine::job::Job;
use crate::engine::output::{OutputData, OutputVariable};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

const NAME: &str = "DensityProfile";
const AXES: &[&str] = &["a", "b", "c"];

/// Histogram of atom positions along one cell vector, per element.
///
/// Positions are binned in fractional coordinates, so a fluctuating cell keeps the
/// same number of bins; the `r` axis uses the average cell length.
pub struct DensityProfile {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: Vec<usize>,
    axis: usize,
    dr: f64,
    n_bins: usize,
    /// Element and its atoms, alphabetical.
    groups: Vec<(String, Vec<usize>)>,
    weights: BTreeMap<String, f64>,
    axis_length_sum: f64,
    output: OutputData,
}

/// Counts of one frame, one row per element group.
pub struct FrameProfile {
    axis_length: f64,
    counts: Vec<Vec<f64>>,
}

impl DensityProfile {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend(selection_settings("equal"));
        settings.extend([
            Setting::new("axis", SettingKind::SingleChoice { choices: AXES })
                .default_value("c")
                .help("Cell vector along which the profile is taken"),
            Setting::new(
                "dr",
                SettingKind::Float {
                    unit: Some("nm"),
                    min: Some(0.0),
                    max: None,
                },
            )
            .default_value(0.01)
            .help("Bin width"),
        ]);
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?.indices.clone();
        let selection = configuration.transmuted_selection(ATOM_SELECTION, ATOM_TRANSMUTATION)?;
        let weights = configuration.weights(WEIGHTS)?.normalized(&element_counts(&selection));
        let axis = match configuration.choice("axis")?.as_str() {
            "a" => 0,
            "b" => 1,
            _ => 2,
        };
        let dr = *configuration.float("dr")?;
        if dr <= 0.0 {
            return Err(ConfigurationError::InvalidValue {
                name: "dr".to_string(),
                reason: "the bin width must be positive".to_string(),
            }
            .into());
        }
        Ok(Self {
            trajectory,
            frames,
            axis,
            dr,
            n_bins: 0,
            groups: selection.groups().into_iter().collect(),
            weights,
            axis_length_sum: 0.0,
            output: OutputData::new(),
            configuration,
        })
    }

    fn profile_name(element: &str) -> String {
        format!("dp_{element}")
    }
}

impl Job for DensityProfile {
    type Payload = FrameProfile;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        require_periodic(&self.trajectory, NAME)?;
        let cell = self
            .trajectory
            .unit_cell(self.frames[0])?
            .ok_or(AnalysisError::NotPeriodic { analysis: NAME })?;
        let length = cell.lengths()[self.axis];
        self.n_bins = ((length / self.dr).round() as usize).max(1);
        debug!(n_bins = self.n_bins, length, "Binning the profile axis");

        let n = self.n_bins;
        self.output
            .add(OutputVariable::line("r", vec![0.0; n]).units("nm"))?;
        for (element, _) in &self.groups {
            self.output.add(
                OutputVariable::line(Self::profile_name(element), vec![0.0; n])
                    .axis(&["r"])
                    .partial_result(),
            )?;
        }
        self.output.add(
            OutputVariable::line("dp_total", vec![0.0; n])
                .axis(&["r"])
                .main_result(),
        )?;
        Ok(self.frames.len())
    }

    #[instrument(skip(self), name = "density_profile_step")]
    fn run_step(&self, index: usize) -> Result<FrameProfile, JobError> {
        let configuration = self.trajectory.configuration(self.frames[index])?;
        let axis_length = configuration
            .unit_cell()
            .ok_or(AnalysisError::NotPeriodic { analysis: NAME })?
            .lengths()[self.axis];
        let fractional = configuration.to_box_coordinates()?;
        let n = self.n_bins;
        let counts = self
            .groups
            .iter()
            .map(|(_, atoms)| {
                let mut histogram = vec![0.0; n];
                for &atom in atoms {
                    let f = (fractional[atom][self.axis] + 0.5).rem_euclid(1.0);
                    histogram[((f * n as f64) as usize).min(n - 1)] += 1.0;
                }
                histogram
            })
            .collect();
        Ok(FrameProfile {
            axis_length,
            counts,
        })
    }

    fn combine(&mut self, _index: usize, payload: FrameProfile) -> Result<(), JobError> {
        self.axis_length_sum += payload.axis_length;
        for ((element, _), counts) in self.groups.iter().zip(payload.counts) {
            let data = self.output.data_mut(&Self::profile_name(element))?;
            for (total, count) in data.iter_mut().zip(counts) {
                *total += count;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        let n = self.n_bins;
        let width = self.axis_length_sum / self.frames.len() as f64 / n as f64;
        self.output
            .set_data("r", (0..n).map(|i| (i as f64 + 0.5) * width).collect())?;

        let partials: Vec<(String, Vec<f64>)> = self
            .groups
            .iter()
            .map(|(element, _)| {
                let name = Self::profile_name(element);
                let data = self.output.get(&name).map(|v| v.data.clone()).unwrap_or_default();
                (element.clone(), data)
            })
            .collect();
        let total = weighted_sum(
            partials.iter().map(|(e, d)| (e.as_str(), d.as_slice())),
            &self.weights,
            n,
        );
        self.output.set_data("dp_total", total)?;
        Ok(())
    }

    fn output(&self) -> &OutputData {
        &self.output
    }

    fn take_output(&mut self) -> OutputData {
        std::mem::take(&mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{assert_close, env, frame, parameters, write_trajectory};
    use super::*;
    use crate::core::geometry::unit_cell::UnitCell;
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::ChemicalEntity;
    use crate::core::models::system::ChemicalSystem;
    use crate::engine::job::run_job;
    use crate::engine::progress::ProgressReporter;
    use nalgebra::Vector3;
    use tempfile::tempdir;

    #[test]
    fn two_hydrogens_give_two_peaks() {
        let env = env();
        let dir = tempdir().unwrap();
        let mut system = ChemicalSystem::new("h2 slab");
        for _ in 0..2 {
            system.add_chemical_entity(ChemicalEntity::Atom(Atom::new("H"))).unwrap();
        }
        let cell = UnitCell::orthorhombic(3.0, 3.0, 4.0).unwrap();
        let n_steps = 4;
        let frames: Vec<_> = (0..n_steps)
            .map(|t| {
                frame(
                    t as f64,
                    Some(&cell),
                    vec![Vector3::new(0.3, 0.2, -1.0), Vector3::new(-0.4, 1.1, 1.0)],
                )
            })
            .collect();
        let path = write_trajectory(dir.path(), "slab.mdt", &system, &frames);

        let mut job = DensityProfile::new(&parameters(&path, "axis = 'c'\ndr = 0.01"), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let output = outcome.output();

        let r = &output.get("r").unwrap().data;
        assert_eq!(r.len(), 400);
        assert_close(r[0], 0.005, 1e-12);
        assert!(r[399] < 4.0);

        let dp = &output.get("dp_H").unwrap().data;
        assert_eq!(dp.iter().sum::<f64>(), 2.0 * n_steps as f64);
        assert_eq!(dp[100], n_steps as f64);
        assert_eq!(dp[300], n_steps as f64);
        assert_close(r[100], 1.005, 1e-9);
        assert_close(r[300], 3.005, 1e-9);
        assert_eq!(&output.get("dp_total").unwrap().data, dp);
    }
}
