use super::{ATOM_SELECTION, FRAMES, TRAJECTORY, output_settings, trajectory_settings};
use crate::core::geometry::inertia::principal_axes;
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::JobError;
use crate::engine::job::Job;
use crate::engine::output::{OutputData, OutputVariable};
use nalgebra::Matrix3;
use std::sync::Arc;
use tracing::instrument;

const NAME: &str = "Eccentricity";

/// Tensor components written as `moments_<ij>`.
const COMPONENTS: [(&str, usize, usize); 6] = [
    ("xx", 0, 0),
    ("yy", 1, 1),
    ("zz", 2, 2),
    ("xy", 0, 1),
    ("xz", 0, 2),
    ("yz", 1, 2),
];

/// Shape of the selected atoms from their inertia tensor, per frame.
///
/// With principal moments `I1 <= I2 <= I3`, the eccentricity is `1 - I1 / mean(I)` and
/// the ratio of moments is `I1 / I3`: a sphere gives 0 and 1, a rod gives 1 and 0.
pub struct Eccentricity {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: Vec<usize>,
    times: Vec<f64>,
    selected: Vec<usize>,
    masses: Vec<f64>,
    output: OutputData,
}

impl Eccentricity {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.push(
            Setting::new(ATOM_SELECTION, SettingKind::AtomSelection { trajectory: TRAJECTORY })
                .help("Atoms whose shape is measured"),
        );
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?;
        let selected = configuration.atom_selection(ATOM_SELECTION)?.indices.clone();
        let masses = trajectory.chemical_system().masses(&env.elements)?;
        Ok(Self {
            frames: frames.indices.clone(),
            times: frames.times.clone(),
            trajectory,
            selected,
            masses,
            output: OutputData::new(),
            configuration,
        })
    }
}

/// Per-frame result: eccentricity, ratio of moments and the inertia tensor.
pub struct FrameShape {
    eccentricity: f64,
    ratio: f64,
    tensor: Matrix3<f64>,
}

impl Job for Eccentricity {
    type Payload = FrameShape;

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
            OutputVariable::line("eccentricity", vec![0.0; n])
                .axis(&["time"])
                .main_result(),
        )?;
        self.output.add(
            OutputVariable::line("ratio_of_moments", vec![0.0; n])
                .axis(&["time"])
                .main_result(),
        )?;
        for (component, _, _) in COMPONENTS {
            self.output.add(
                OutputVariable::line(format!("moments_{component}"), vec![0.0; n])
                    .axis(&["time"])
                    .units("uma nm2")
                    .partial_result(),
            )?;
        }
        Ok(n)
    }

    #[instrument(skip(self), name = "eccentricity_step")]
    fn run_step(&self, index: usize) -> Result<FrameShape, JobError> {
        let system = self.trajectory.chemical_system();
        let configuration = self
            .trajectory
            .configuration(self.frames[index])?
            .continuous_configuration(system)?;
        let (_, tensor) = system.inertia(&configuration, &self.selected, &self.masses)?;
        let moments = principal_axes(&tensor).moments;
        let mean = moments.mean();
        let (eccentricity, ratio) = if mean > 0.0 && moments[2] > 0.0 {
            (1.0 - moments[0] / mean, moments[0] / moments[2])
        } else {
            (0.0, 1.0)
        };
        Ok(FrameShape {
            eccentricity,
            ratio,
            tensor,
        })
    }

    fn combine(&mut self, index: usize, payload: FrameShape) -> Result<(), JobError> {
        self.output.data_mut("eccentricity")?[index] = payload.eccentricity;
        self.output.data_mut("ratio_of_moments")?[index] = payload.ratio;
        for (component, i, j) in COMPONENTS {
            self.output.data_mut(&format!("moments_{component}"))?[index] = payload.tensor[(i, j)];
        }
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
    use crate::core::geometry::unit_cell::UnitCell;
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::{AtomCluster, ChemicalEntity};
    use crate::core::models::system::ChemicalSystem;
    use crate::engine::job::run_job;
    use crate::engine::progress::ProgressReporter;
    use nalgebra::Vector3;
    use tempfile::tempdir;

    fn cluster(positions: Vec<Vector3<f64>>, cell: Option<&UnitCell>) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let atoms = positions.iter().map(|_| Atom::new("C")).collect();
        let bonds = (1..positions.len()).map(|i| [0, i]).collect();
        let mut system = ChemicalSystem::new("shape");
        system
            .add_chemical_entity(ChemicalEntity::AtomCluster(AtomCluster::new("blob", atoms, bonds).unwrap()))
            .unwrap();
        let path = write_trajectory(dir.path(), "shape.mdt", &system, &[frame(0.0, cell, positions)]);
        (dir, path)
    }

    #[test]
    fn octahedron_is_spherical() {
        let env = env();
        let mut positions = vec![Vector3::zeros()];
        for axis in 0..3 {
            for sign in [-1.0, 1.0] {
                let mut p = Vector3::zeros();
                p[axis] = 0.15 * sign;
                positions.push(p);
            }
        }
        let (_dir, path) = cluster(positions, None);
        let mut job = Eccentricity::new(&parameters(&path, ""), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let output = outcome.output();
        assert_close(output.get("eccentricity").unwrap().data[0], 0.0, 1e-9);
        assert_close(output.get("ratio_of_moments").unwrap().data[0], 1.0, 1e-9);
        assert_close(output.get("moments_xy").unwrap().data[0], 0.0, 1e-12);
    }

    #[test]
    fn rod_split_by_the_cell_is_made_whole() {
        let env = env();
        let cell = UnitCell::cubic(1.0).unwrap();
        let positions = vec![Vector3::new(0.45, 0.0, 0.0), Vector3::new(-0.45, 0.0, 0.0)];
        let (_dir, path) = cluster(positions, Some(&cell));
        let mut job = Eccentricity::new(&parameters(&path, ""), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let output = outcome.output();
        assert_close(output.get("eccentricity").unwrap().data[0], 1.0, 1e-9);
        assert_close(output.get("ratio_of_moments").unwrap().data[0], 0.0, 1e-9);
        let mass = env.elements.property("C", "atomic_weight").unwrap();
        assert_close(output.get("moments_yy").unwrap().data[0], 2.0 * mass * 0.05 * 0.05, 1e-9);
    }
}
