use super::{
    ATOM_SELECTION, ATOM_TRANSMUTATION, FRAMES, TRAJECTORY, WEIGHTS, element_counts, output_settings,
    selection_settings, trajectory_settings, weighted_sum,
};
use crate::core::io::container::Dataset;
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, FramesValue, ResolutionValue, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::{AnalysisError, JobError};
use crate::engine::job::Job;
use crate::engine::kernels::correlation::vector_correlation;
use crate::engine::kernels::spectrum::{FftMode, get_spectrum};
use crate::engine::output::{OutputData, OutputVariable};
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{instrument, warn};

const NAME: &str = "DensityOfStates";
const RESOLUTION: &str = "instrument_resolution";

/// Velocity autocorrelation functions and their resolution-broadened spectra.
///
/// Stored velocities are used when the trajectory has them; otherwise they are derived
/// from the unwrapped positions by finite differences.
pub struct DensityOfStates {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: FramesValue,
    resolution: ResolutionValue,
    atoms: Vec<usize>,
    symbols: Vec<String>,
    counts: BTreeMap<String, usize>,
    weights: BTreeMap<String, f64>,
    stored_velocities: bool,
    output: OutputData,
}

/// Central differences inside the series, one-sided at both ends.
fn differentiate(positions: &[Vector3<f64>], dt: f64) -> Vec<Vector3<f64>> {
    let n = positions.len();
    (0..n)
        .map(|i| match i {
            0 => (positions[1] - positions[0]) / dt,
            i if i == n - 1 => (positions[n - 1] - positions[n - 2]) / dt,
            i => (positions[i + 1] - positions[i - 1]) / (2.0 * dt),
        })
        .collect()
}

impl DensityOfStates {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.push(
            Setting::new(RESOLUTION, SettingKind::InstrumentResolution { frames: FRAMES })
                .help("Instrument line shape; ideal by default"),
        );
        settings.extend(selection_settings("equal"));
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?.clone();
        let resolution = configuration.resolution(RESOLUTION)?.clone();
        let selection = configuration.transmuted_selection(ATOM_SELECTION, ATOM_TRANSMUTATION)?;
        let counts = element_counts(&selection);
        let weights = configuration.weights(WEIGHTS)?.normalized(&counts);
        let stored_velocities = trajectory.layout().velocities;
        Ok(Self {
            trajectory,
            frames,
            resolution,
            atoms: selection.indices,
            symbols: selection.symbols,
            counts,
            weights,
            stored_velocities,
            output: OutputData::new(),
            configuration,
        })
    }

    fn spectrum(&self, signal: &[f64]) -> Result<Vec<f64>, AnalysisError> {
        get_spectrum(
            signal,
            Some(&self.resolution.kernel.time_window),
            self.frames.time_step,
            FftMode::Fft,
        )
    }
}

impl Job for DensityOfStates {
    type Payload = Vec<f64>;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        let n = self.frames.len();
        if n < 2 {
            return Err(AnalysisError::InvalidInput(format!("{NAME} needs at least two frames")).into());
        }
        if !self.stored_velocities {
            warn!("Trajectory has no velocities; differentiating the positions");
        }
        let n_omegas = self.resolution.omegas.len();
        let lags = (0..n).map(|k| k as f64 * self.frames.time_step).collect();
        self.output.add(OutputVariable::line("time", lags).units("ps"))?;
        self.output
            .add(OutputVariable::line("omega", self.resolution.omegas.clone()).units("rad/ps"))?;
        self.output.add(
            OutputVariable::line("time_window", self.resolution.kernel.time_window[n - 1..].to_vec())
                .axis(&["time"]),
        )?;
        self.output.add(
            OutputVariable::line("omega_window", self.resolution.kernel.omega_window.clone())
                .axis(&["omega"]),
        )?;
        let labels = self.counts.keys().cloned().chain(std::iter::once("total".to_string()));
        for label in labels.collect::<Vec<_>>() {
            let main = label == "total";
            let vacf = OutputVariable::line(format!("vacf_{label}"), vec![0.0; n])
                .axis(&["time"])
                .units("nm2/ps2");
            let dos = OutputVariable::line(format!("dos_{label}"), vec![0.0; n_omegas])
                .axis(&["omega"])
                .units("nm2/ps");
            if main {
                self.output.add(vacf.main_result())?;
                self.output.add(dos.main_result())?;
            } else {
                self.output.add(vacf.partial_result())?;
                self.output.add(dos.partial_result())?;
            }
        }
        Ok(self.atoms.len())
    }

    #[instrument(skip(self), name = "dos_step")]
    fn run_step(&self, index: usize) -> Result<Vec<f64>, JobError> {
        let atom = self.atoms[index];
        let velocities = if self.stored_velocities {
            self.trajectory
                .read_atomic_trajectory(atom, &self.frames.indices, Dataset::Velocities)?
        } else {
            let positions = self
                .trajectory
                .read_unwrapped_trajectory(atom, &self.frames.indices)?;
            differentiate(&positions, self.frames.time_step)
        };
        Ok(vector_correlation(&velocities, None)?)
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), JobError> {
        let data = self.output.data_mut(&format!("vacf_{}", self.symbols[index]))?;
        for (total, value) in data.iter_mut().zip(payload) {
            *total += value;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        let n = self.frames.len();
        let mut partials = Vec::with_capacity(self.counts.len());
        for (element, &count) in &self.counts {
            let data = self.output.data_mut(&format!("vacf_{element}"))?;
            data.iter_mut().for_each(|v| *v /= count as f64);
            partials.push((element.clone(), data.to_vec()));
        }
        let total = weighted_sum(
            partials.iter().map(|(e, d)| (e.as_str(), d.as_slice())),
            &self.weights,
            n,
        );
        partials.push(("total".to_string(), total.clone()));
        self.output.set_data("vacf_total", total)?;

        for (label, vacf) in partials {
            let dos = self.spectrum(&vacf)?;
            self.output.set_data(&format!("dos_{label}"), dos)?;
        }
        Ok(())
    }

    fn output(&self) -> &OutputData {
        &self.output
    }

    fn take_output(&mut self) -> OutputData {
        std::mem::take(&mut self.output)
    }
}
