use super::{ATOM_SELECTION, FRAMES, TRAJECTORY, output_settings, trajectory_settings};
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::JobError;
use crate::engine::job::Job;
use crate::engine::kernels::sas::{solvent_accessible_surface, sphere_points};
use crate::engine::output::{OutputData, OutputVariable};
use nalgebra::Vector3;
use std::sync::Arc;
use tracing::instrument;

const NAME: &str = "SolventAccessibleSurface";

/// Accessible surface area of the selected atoms, per frame.
///
/// Every atom of the system occludes with its van der Waals radius; periodic frames are
/// made continuous first so that molecules split by the cell boundary stay whole.
pub struct SolventAccessibleSurface {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: Vec<usize>,
    times: Vec<f64>,
    selected: Vec<usize>,
    radii: Vec<f64>,
    points: Vec<Vector3<f64>>,
    probe: f64,
    output: OutputData,
}

impl SolventAccessibleSurface {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend([
            Setting::new(ATOM_SELECTION, SettingKind::AtomSelection { trajectory: TRAJECTORY })
                .help("Atoms whose surface is measured"),
            Setting::new(
                "n_sphere_points",
                SettingKind::Integer {
                    min: Some(1),
                    max: None,
                },
            )
            .default_value(1000)
            .help("Sample points per atomic sphere"),
            Setting::new(
                "probe_radius",
                SettingKind::Float {
                    unit: Some("nm"),
                    min: Some(0.0),
                    max: None,
                },
            )
            .default_value(0.14)
            .help("Radius of the solvent probe"),
        ]);
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?;
        let selected = configuration.atom_selection(ATOM_SELECTION)?.indices.clone();
        let radii = trajectory
            .chemical_system()
            .atoms()
            .iter()
            .map(|atom| env.elements.property(&atom.symbol, "vdw_radius"))
            .collect::<Result<Vec<_>, _>>()?;
        let n_points = *configuration.integer("n_sphere_points")? as usize;
        let probe = *configuration.float("probe_radius")?;
        Ok(Self {
            frames: frames.indices.clone(),
            times: frames.times.clone(),
            trajectory,
            selected,
            radii,
            points: sphere_points(n_points),
            probe,
            output: OutputData::new(),
            configuration,
        })
    }
}

impl Job for SolventAccessibleSurface {
    type Payload = f64;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        let n = self.frames.len();
        self.output.add(OutputVariable::line("time", self.times.clone()).units("ps"))?;
        self.output.add(
            OutputVariable::line("sas", vec![0.0; n])
                .axis(&["time"])
                .units("nm2")
                .main_result(),
        )?;
        Ok(n)
    }

    #[instrument(skip(self), name = "sas_step")]
    fn run_step(&self, index: usize) -> Result<f64, JobError> {
        let configuration = self
            .trajectory
            .configuration(self.frames[index])?
            .continuous_configuration(self.trajectory.chemical_system())?;
        let result = solvent_accessible_surface(
            configuration.coordinates(),
            &self.radii,
            &self.points,
            &self.selected,
            self.probe,
        )?;
        Ok(result.surface_area())
    }

    fn combine(&mut self, index: usize, payload: f64) -> Result<(), JobError> {
        self.output.data_mut("sas")?[index] = payload;
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

#[cfg(test)]
mod tests {
    use super::super::testing::{assert_close, env, frame, parameters, write_trajectory};
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::ChemicalEntity;
    use crate::core::models::system::ChemicalSystem;
    use crate::engine::job::run_job;
    use crate::engine::progress::ProgressReporter;
    use std::f64::consts::PI;
    use tempfile::tempdir;

    fn argon(positions: &[Vector3<f64>]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let mut system = ChemicalSystem::new("argon");
        for _ in positions {
            system.add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar"))).unwrap();
        }
        let frames = vec![frame(0.0, None, positions.to_vec()), frame(1.0, None, positions.to_vec())];
        let path = write_trajectory(dir.path(), "ar.mdt", &system, &frames);
        (dir, path)
    }

    #[test]
    fn isolated_atom_exposes_its_whole_sphere() {
        let env = env();
        let (_dir, path) = argon(&[Vector3::zeros()]);
        let mut job = SolventAccessibleSurface::new(&parameters(&path, "n_sphere_points = 200"), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let radius = env.elements.property("Ar", "vdw_radius").unwrap() + 0.14;
        let sas = &outcome.output().get("sas").unwrap().data;
        sas.iter().for_each(|a| assert_close(*a, 4.0 * PI * radius * radius, 1e-9));
    }

    #[test]
    fn a_close_neighbour_hides_part_of_the_surface() {
        let env = env();
        let (_dir, path) = argon(&[Vector3::zeros(), Vector3::new(0.3, 0.0, 0.0)]);
        let body = "atom_selection = 'atom_index,0'\nn_sphere_points = 500";
        let mut job = SolventAccessibleSurface::new(&parameters(&path, body), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let radius = env.elements.property("Ar", "vdw_radius").unwrap() + 0.14;
        let sas = outcome.output().get("sas").unwrap().data[0];
        assert!(sas > 0.0 && sas < 4.0 * PI * radius * radius);
    }
}
