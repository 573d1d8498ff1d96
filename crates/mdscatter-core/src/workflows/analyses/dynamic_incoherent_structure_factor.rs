use super::{
    ATOM_SELECTION, ATOM_TRANSMUTATION, FRAMES, TRAJECTORY, WEIGHTS, element_counts, output_settings,
    selection_settings, trajectory_settings, weighted_sum,
};
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{
    Configurable, FramesValue, QVectorsValue, ResolutionValue, Setting, SettingKind,
};
use crate::engine::environment::Environment;
use crate::engine::error::JobError;
use crate::engine::job::Job;
use crate::engine::kernels::correlation::correlation_complex;
use crate::engine::kernels::spectrum::{FftMode, get_spectrum_along};
use crate::engine::output::{OutputData, OutputVariable};
use num_complex::Complex64;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

const NAME: &str = "DynamicIncoherentStructureFactor";
const Q_VECTORS: &str = "q_vectors";
const RESOLUTION: &str = "instrument_resolution";

/// Self intermediate scattering function `F(q, t)` and its spectrum `S(q, ω)`.
///
/// For each atom and shell, `exp(i q·r(t))` is autocorrelated for every q vector of the
/// shell and the real parts are averaged over the shell. Partial results are averaged
/// per element and combined with the configured weights, incoherent scattering lengths
/// squared by default.
pub struct DynamicIncoherentStructureFactor {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: FramesValue,
    q_vectors: QVectorsValue,
    resolution: ResolutionValue,
    atoms: Vec<usize>,
    symbols: Vec<String>,
    counts: BTreeMap<String, usize>,
    weights: BTreeMap<String, f64>,
    output: OutputData,
}

impl DynamicIncoherentStructureFactor {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend([
            Setting::new(Q_VECTORS, SettingKind::QVectors { trajectory: TRAJECTORY })
                .help("Q vector generator table"),
            Setting::new(RESOLUTION, SettingKind::InstrumentResolution { frames: FRAMES })
                .help("Instrument line shape; ideal by default"),
        ]);
        settings.extend(selection_settings("b_incoherent2"));
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?.clone();
        let q_vectors = configuration.q_vectors(Q_VECTORS)?.clone();
        let resolution = configuration.resolution(RESOLUTION)?.clone();
        let selection = configuration.transmuted_selection(ATOM_SELECTION, ATOM_TRANSMUTATION)?;
        let counts = element_counts(&selection);
        let weights = configuration.weights(WEIGHTS)?.normalized(&counts);
        Ok(Self {
            trajectory,
            frames,
            q_vectors,
            resolution,
            atoms: selection.indices,
            symbols: selection.symbols,
            counts,
            weights,
            output: OutputData::new(),
            configuration,
        })
    }

    fn n_shells(&self) -> usize {
        self.q_vectors.set.shells.len()
    }

    fn labels(&self) -> Vec<String> {
        self.counts
            .keys()
            .cloned()
            .chain(std::iter::once("total".to_string()))
            .collect()
    }
}

impl Job for DynamicIncoherentStructureFactor {
    /// `F(q, t)` of one atom, shells by lags, row-major.
    type Payload = Vec<f64>;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        let (n_q, n_t) = (self.n_shells(), self.frames.len());
        let n_omega = self.resolution.omegas.len();
        self.output
            .add(OutputVariable::line("q", self.q_vectors.set.q_values()).units("1/nm"))?;
        let lags = (0..n_t).map(|k| k as f64 * self.frames.time_step).collect();
        self.output.add(OutputVariable::line("time", lags).units("ps"))?;
        self.output
            .add(OutputVariable::line("omega", self.resolution.omegas.clone()).units("rad/ps"))?;
        self.output.add(
            OutputVariable::line("time_window", self.resolution.kernel.time_window[n_t - 1..].to_vec())
                .axis(&["time"]),
        )?;
        self.output.add(
            OutputVariable::line("omega_window", self.resolution.kernel.omega_window.clone())
                .axis(&["omega"]),
        )?;
        for label in self.labels() {
            let total = label == "total";
            let mut f = OutputVariable::surface(format!("f(q,t)_{label}"), [n_q, n_t], vec![0.0; n_q * n_t])
                .axis(&["q", "time"]);
            let mut s = OutputVariable::surface(
                format!("s(q,f)_{label}"),
                [n_q, n_omega],
                vec![0.0; n_q * n_omega],
            )
            .axis(&["q", "omega"]);
            if total {
                f = f.main_result();
                s = s.main_result();
            } else {
                f = f.partial_result();
                s = s.partial_result();
            }
            self.output.add(f)?;
            self.output.add(s)?;
        }
        debug!(
            shells = n_q,
            vectors = self.q_vectors.set.total_vectors(),
            atoms = self.atoms.len(),
            "Allocated scattering functions"
        );
        Ok(self.atoms.len())
    }

    #[instrument(skip(self), name = "disf_step")]
    fn run_step(&self, index: usize) -> Result<Vec<f64>, JobError> {
        let series = self
            .trajectory
            .read_unwrapped_trajectory(self.atoms[index], &self.frames.indices)?;
        let n_t = series.len();
        let mut result = Vec::with_capacity(self.n_shells() * n_t);
        for shell in &self.q_vectors.set.shells {
            let mut average = vec![0.0; n_t];
            for q in &shell.vectors {
                let phases: Vec<Complex64> = series
                    .iter()
                    .map(|r| Complex64::from_polar(1.0, q.dot(r)))
                    .collect();
                for (a, c) in average.iter_mut().zip(correlation_complex(&phases, None)?) {
                    *a += c.re;
                }
            }
            let n_vectors = shell.vectors.len().max(1) as f64;
            result.extend(average.into_iter().map(|a| a / n_vectors));
        }
        Ok(result)
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), JobError> {
        let data = self.output.data_mut(&format!("f(q,t)_{}", self.symbols[index]))?;
        for (total, value) in data.iter_mut().zip(payload) {
            *total += value;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        let (n_q, n_t) = (self.n_shells(), self.frames.len());
        let mut partials = Vec::with_capacity(self.counts.len() + 1);
        for (element, &count) in &self.counts {
            let data = self.output.data_mut(&format!("f(q,t)_{element}"))?;
            data.iter_mut().for_each(|v| *v /= count as f64);
            partials.push((element.clone(), data.to_vec()));
        }
        let total = weighted_sum(
            partials.iter().map(|(e, d)| (e.as_str(), d.as_slice())),
            &self.weights,
            n_q * n_t,
        );
        self.output.set_data("f(q,t)_total", total.clone())?;
        partials.push(("total".to_string(), total));

        let window = &self.resolution.kernel.time_window;
        for (label, f) in partials {
            let (s, _) = get_spectrum_along(
                &f,
                &[n_q, n_t],
                1,
                Some(window),
                self.frames.time_step,
                FftMode::Fft,
            )?;
            self.output.set_data(&format!("s(q,f)_{label}"), s)?;
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

#[cfg(test)]
mod tests {
    use super::super::testing::{assert_close, env, frame, parameters, write_trajectory};
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::ChemicalEntity;
    use crate::core::models::system::ChemicalSystem;
    use crate::engine::job::run_job;
    use crate::engine::progress::ProgressReporter;
    use nalgebra::Vector3;
    use tempfile::tempdir;

    const Q_TABLE: &str = "q_vectors = { kind = 'spherical', shells = { first = 5.0, last = 10.0, step = 5.0 }, n_vectors = 20, width = 0.0, seed = 7 }";

    fn system(symbols: &[&str]) -> ChemicalSystem {
        let mut system = ChemicalSystem::new("atoms");
        for symbol in symbols {
            system.add_chemical_entity(ChemicalEntity::Atom(Atom::new(*symbol))).unwrap();
        }
        system
    }

    #[test]
    fn immobile_atoms_keep_full_correlation() {
        let env = env();
        let dir = tempdir().unwrap();
        let frames: Vec<_> = (0..8)
            .map(|i| frame(0.1 * i as f64, None, vec![Vector3::new(0.2, 0.1, 0.0), Vector3::zeros()]))
            .collect();
        let path = write_trajectory(dir.path(), "still.mdt", &system(&["H", "O"]), &frames);

        let mut job = DynamicIncoherentStructureFactor::new(&parameters(&path, Q_TABLE), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let output = outcome.output();

        assert_eq!(output.get("q").unwrap().data, vec![5.0, 10.0]);
        let f = output.get("f(q,t)_total").unwrap();
        assert_eq!(f.shape, vec![2, 8]);
        f.data.iter().for_each(|v| assert_close(*v, 1.0, 1e-9));
        let s = output.get("s(q,f)_H").unwrap();
        assert_eq!(s.shape, vec![2, 15]);
    }

    #[test]
    fn moving_atoms_decorrelate() {
        let env = env();
        let dir = tempdir().unwrap();
        let frames: Vec<_> = (0..8)
            .map(|i| frame(0.1 * i as f64, None, vec![Vector3::new(0.05 * i as f64, 0.0, 0.0)]))
            .collect();
        let path = write_trajectory(dir.path(), "moving.mdt", &system(&["H"]), &frames);

        let mut job = DynamicIncoherentStructureFactor::new(&parameters(&path, Q_TABLE), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let f = &outcome.output().get("f(q,t)_H").unwrap().data;
        assert_close(f[0], 1.0, 1e-12);
        assert!(f[3] < 1.0);
    }
}
