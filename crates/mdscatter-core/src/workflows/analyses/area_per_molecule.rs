use super::{FRAMES, TRAJECTORY, output_settings, require_periodic, trajectory_settings};
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::{AnalysisError, JobError};
use crate::engine::job::Job;
use crate::engine::output::{OutputData, OutputVariable};
use std::sync::Arc;
use tracing::{debug, instrument};

const NAME: &str = "AreaPerMolecule";
const AXES: &[&str] = &["ab", "bc", "ac"];

/// Area of a cell face divided by the number of molecules of one kind, per frame.
pub struct AreaPerMolecule {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: Vec<usize>,
    times: Vec<f64>,
    /// Indices into the cell vectors spanning the face.
    face: [usize; 2],
    n_molecules: usize,
    output: OutputData,
}

impl AreaPerMolecule {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend([
            Setting::new("axis", SettingKind::SingleChoice { choices: AXES })
                .default_value("ab")
                .help("Cell face whose area is divided"),
            Setting::new("name", SettingKind::MoleculeSelection { trajectory: TRAJECTORY })
                .help("Name of the molecules counted"),
        ]);
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?;
        let face = match configuration.choice("axis")?.as_str() {
            "bc" => [1, 2],
            "ac" => [0, 2],
            _ => [0, 1],
        };
        let n_molecules = configuration.molecules("name")?.molecules.len();
        Ok(Self {
            trajectory,
            frames: frames.indices.clone(),
            times: frames.times.clone(),
            face,
            n_molecules,
            output: OutputData::new(),
            configuration,
        })
    }
}

impl Job for AreaPerMolecule {
    type Payload = f64;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        require_periodic(&self.trajectory, NAME)?;
        let n = self.frames.len();
        self.output.add(OutputVariable::line("time", self.times.clone()).units("ps"))?;
        self.output.add(
            OutputVariable::line("area_per_molecule", vec![0.0; n])
                .axis(&["time"])
                .units("nm2")
                .main_result(),
        )?;
        debug!(molecules = self.n_molecules, frames = n, "Counting molecules per face");
        Ok(n)
    }

    #[instrument(skip(self), name = "area_per_molecule_step")]
    fn run_step(&self, index: usize) -> Result<f64, JobError> {
        let frame = self.frames[index];
        let cell = self
            .trajectory
            .unit_cell(frame)?
            .ok_or(AnalysisError::NotPeriodic { analysis: NAME })?;
        let vectors = [cell.a(), cell.b(), cell.c()];
        let area = vectors[self.face[0]].cross(&vectors[self.face[1]]).norm();
        Ok(area / self.n_molecules as f64)
    }

    fn combine(&mut self, index: usize, payload: f64) -> Result<(), JobError> {
        self.output.data_mut("area_per_molecule")?[index] = payload;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        Ok(())
    }

    fn output(&self) -> &OutputData {
        &self.output
    }

    fn take_output(&mut self) -> OutputData {
        std::mem::take(&mut self.output)
    }
}
