use super::{
    ATOM_SELECTION, ATOM_TRANSMUTATION, FRAMES, TRAJECTORY, WEIGHTS, element_counts, output_settings,
    selection_settings, trajectory_settings, weighted_sum,
};
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, FramesValue, Setting};
use crate::engine::environment::Environment;
use crate::engine::error::JobError;
use crate::engine::job::Job;
use crate::engine::kernels::correlation::mean_square_displacement;
use crate::engine::output::{OutputData, OutputVariable};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

const NAME: &str = "MeanSquareDisplacement";

/// Mean square displacement of the selected atoms, averaged per element.
///
/// One step per atom: its unwrapped trajectory over the selected frames goes through the
/// FFT-based MSD kernel.
pub struct MeanSquareDisplacement {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: FramesValue,
    atoms: Vec<usize>,
    symbols: Vec<String>,
    counts: BTreeMap<String, usize>,
    weights: BTreeMap<String, f64>,
    output: OutputData,
}

impl MeanSquareDisplacement {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend(selection_settings("equal"));
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?.clone();
        let selection = configuration.transmuted_selection(ATOM_SELECTION, ATOM_TRANSMUTATION)?;
        let counts = element_counts(&selection);
        let weights = configuration.weights(WEIGHTS)?.normalized(&counts);
        Ok(Self {
            trajectory,
            frames,
            atoms: selection.indices,
            symbols: selection.symbols,
            counts,
            weights,
            output: OutputData::new(),
            configuration,
        })
    }
}

impl Job for MeanSquareDisplacement {
    type Payload = Vec<f64>;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        let n = self.frames.len();
        let lags = (0..n).map(|k| k as f64 * self.frames.time_step).collect();
        self.output.add(OutputVariable::line("time", lags).units("ps"))?;
        for element in self.counts.keys() {
            self.output.add(
                OutputVariable::line(format!("msd_{element}"), vec![0.0; n])
                    .axis(&["time"])
                    .units("nm2")
                    .partial_result(),
            )?;
        }
        self.output.add(
            OutputVariable::line("msd_total", vec![0.0; n])
                .axis(&["time"])
                .units("nm2")
                .main_result(),
        )?;
        Ok(self.atoms.len())
    }

    #[instrument(skip(self), name = "msd_step")]
    fn run_step(&self, index: usize) -> Result<Vec<f64>, JobError> {
        let series = self
            .trajectory
            .read_unwrapped_trajectory(self.atoms[index], &self.frames.indices)?;
        Ok(mean_square_displacement(&series)?)
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), JobError> {
        let data = self.output.data_mut(&format!("msd_{}", self.symbols[index]))?;
        for (total, value) in data.iter_mut().zip(payload) {
            *total += value;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        let n = self.frames.len();
        let mut partials = Vec::with_capacity(self.counts.len());
        for (element, &count) in &self.counts {
            let data = self.output.data_mut(&format!("msd_{element}"))?;
            data.iter_mut().for_each(|v| *v /= count as f64);
            partials.push((element.clone(), data.to_vec()));
        }
        let total = weighted_sum(
            partials.iter().map(|(e, d)| (e.as_str(), d.as_slice())),
            &self.weights,
            n,
        );
        self.output.set_data("msd_total", total)?;
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

    fn single_atom(symbol: &str) -> ChemicalSystem {
        let mut system = ChemicalSystem::new("drift");
        system.add_chemical_entity(ChemicalEntity::Atom(Atom::new(symbol))).unwrap();
        system
    }

    #[test]
    fn constant_velocity_gives_quadratic_msd() {
        let env = env();
        let dir = tempdir().unwrap();
        let frames: Vec<_> = (0..40)
            .map(|i| frame(i as f64, None, vec![Vector3::new(i as f64 * 0.1, 0.0, 0.0)]))
            .collect();
        let path = write_trajectory(dir.path(), "drift.mdt", &single_atom("Ar"), &frames);

        let mut job = MeanSquareDisplacement::new(&parameters(&path, ""), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let msd = &outcome.output().get("msd_total").unwrap().data;
        assert_eq!(msd.len(), 40);
        for (k, value) in msd.iter().enumerate() {
            assert_close(*value, (0.1 * k as f64).powi(2), 1e-9);
        }
        assert_eq!(outcome.output().get("time").unwrap().data[3], 3.0);
    }

    #[test]
    fn periodic_jumps_are_removed_before_averaging() {
        let env = env();
        let dir = tempdir().unwrap();
        let cell = UnitCell::cubic(1.0).unwrap();
        let frames: Vec<_> = (0..10)
            .map(|i| {
                let x = (0.3 * i as f64 + 0.5).rem_euclid(1.0) - 0.5;
                frame(i as f64, Some(&cell), vec![Vector3::new(x, 0.0, 0.0)])
            })
            .collect();
        let path = write_trajectory(dir.path(), "wrapped.mdt", &single_atom("Ar"), &frames);

        let mut job = MeanSquareDisplacement::new(&parameters(&path, ""), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let msd = &outcome.output().get("msd_Ar").unwrap().data;
        assert_close(msd[4], (0.3f64 * 4.0).powi(2), 1e-9);
    }
}
