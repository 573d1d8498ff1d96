use super::{ATOM_SELECTION, FRAMES, TRAJECTORY, output_settings, trajectory_settings};
use crate::core::geometry::unit_cell::UnitCell;
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, ConfigurationError, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::JobError;
use crate::engine::job::Job;
use crate::engine::kernels::spatial_density::{LocalFrame, SpatialGrid, local_extent};
use crate::engine::output::{OutputData, OutputVariable};
use nalgebra::Vector3;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const NAME: &str = "SpatialDensity";
const BASIS: &str = "basis_selection";

/// Number density of the selected atoms around reference molecules, in the local frame
/// of each molecule.
///
/// The grid is sized by a first pass over every selected frame, so no target falls outside it.
pub struct SpatialDensity {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: Vec<usize>,
    targets: Vec<usize>,
    triples: Vec<[usize; 3]>,
    resolution: f64,
    /// Half-width of the grid, fixed by `initialize`.
    extent: f64,
    grid: Option<SpatialGrid>,
    output: OutputData,
}

/// `position` brought next to `origin` through the minimum image, if periodic.
fn nearest_image(origin: &Vector3<f64>, position: &Vector3<f64>, cell: Option<&UnitCell>) -> Vector3<f64> {
    match cell {
        Some(cell) => origin + cell.minimum_image(&(position - origin)),
        None => *position,
    }
}

impl SpatialDensity {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend([
            Setting::new(ATOM_SELECTION, SettingKind::AtomSelection { trajectory: TRAJECTORY })
                .help("Atoms whose density is mapped"),
            Setting::new(BASIS, SettingKind::BasisSelection { trajectory: TRAJECTORY })
                .help("Reference molecule and the atoms defining its local frame"),
            Setting::new(
                "spatial_resolution",
                SettingKind::Float {
                    unit: Some("nm"),
                    min: Some(0.0),
                    max: None,
                },
            )
            .default_value(0.1)
            .help("Edge of a grid cell"),
        ]);
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?.indices.clone();
        let targets = configuration.atom_selection(ATOM_SELECTION)?.indices.clone();
        let triples = configuration.basis(BASIS)?.triples.clone();
        let resolution = *configuration.float("spatial_resolution")?;
        if resolution <= 0.0 {
            return Err(ConfigurationError::InvalidValue {
                name: "spatial_resolution".to_string(),
                reason: "the grid resolution must be positive".to_string(),
            }
            .into());
        }
        Ok(Self {
            trajectory,
            frames,
            targets,
            triples,
            resolution,
            extent: 0.0,
            grid: None,
            output: OutputData::new(),
            configuration,
        })
    }

    /// Target positions of one frame expressed in every local frame, skipping the frame's
    /// own atoms.
    fn local_positions(
        &self,
        coordinates: &[Vector3<f64>],
        cell: Option<&UnitCell>,
    ) -> Result<Vec<Vector3<f64>>, JobError> {
        let mut local = Vec::with_capacity(self.triples.len() * self.targets.len());
        for triple in &self.triples {
            let origin = coordinates[triple[0]];
            let frame = LocalFrame::from_triple(
                origin,
                nearest_image(&origin, &coordinates[triple[1]], cell),
                nearest_image(&origin, &coordinates[triple[2]], cell),
            )?;
            local.extend(
                self.targets
                    .iter()
                    .filter(|&&t| !triple.contains(&t))
                    .map(|&t| frame.to_local(&nearest_image(&origin, &coordinates[t], cell))),
            );
        }
        Ok(local)
    }
}

impl Job for SpatialDensity {
    type Payload = SpatialGrid;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        let mut largest: f64 = 0.0;
        for &frame in &self.frames {
            let configuration = self.trajectory.configuration(frame)?;
            let local = self.local_positions(configuration.coordinates(), configuration.unit_cell())?;
            largest = largest.max(local_extent(&Vector3::zeros(), &local));
        }
        let extent = largest + self.resolution;
        let grid = SpatialGrid::centered(extent, self.resolution)?;
        let shape = grid.shape();
        debug!(?shape, extent, "Sized the spatial grid");

        let [x, y, z] = grid.axes();
        self.output.add(OutputVariable::line("x", x).units("nm"))?;
        self.output.add(OutputVariable::line("y", y).units("nm"))?;
        self.output.add(OutputVariable::line("z", z).units("nm"))?;
        self.output.add(
            OutputVariable::volume("spatial_density", shape, vec![0.0; grid.counts().len()])
                .axis(&["x", "y", "z"])
                .units("nm^-3")
                .main_result(),
        )?;
        self.extent = extent;
        self.grid = Some(grid);
        Ok(self.frames.len())
    }

    #[instrument(skip(self), name = "spatial_density_step")]
    fn run_step(&self, index: usize) -> Result<SpatialGrid, JobError> {
        let mut grid = SpatialGrid::centered(self.extent, self.resolution)?;
        let configuration = self.trajectory.configuration(self.frames[index])?;
        let dropped = self
            .local_positions(configuration.coordinates(), configuration.unit_cell())?
            .iter()
            .filter(|position| !grid.accumulate(position))
            .count();
        if dropped > 0 {
            warn!(frame = self.frames[index], dropped, "Targets fell outside the spatial grid");
        }
        Ok(grid)
    }

    fn combine(&mut self, _index: usize, payload: SpatialGrid) -> Result<(), JobError> {
        match self.grid.as_mut() {
            Some(grid) => Ok(grid.merge(&payload)?),
            None => Err(JobError::Internal("spatial grid used before initialize".to_string())),
        }
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        let grid = self
            .grid
            .as_ref()
            .ok_or_else(|| JobError::Internal("spatial grid used before initialize".to_string()))?;
        let samples = (self.frames.len() * self.triples.len()).max(1) as f64;
        let cell_volume = grid.resolution().powi(3);
        let density = grid
            .counts()
            .iter()
            .map(|c| c / (samples * cell_volume))
            .collect();
        self.output.set_data("spatial_density", density)?;
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
    use super::super::testing::{assert_close, env, frame, parameters, waters, write_trajectory};
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::ChemicalEntity;
    use crate::engine::job::run_job;
    use crate::engine::progress::ProgressReporter;
    use tempfile::tempdir;

    #[test]
    fn a_fixed_neighbour_lands_in_one_cell() {
        let env = env();
        let dir = tempdir().unwrap();
        let mut system = waters(&env, 1);
        system.add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar"))).unwrap();
        let coordinates = vec![
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(1.1, 1.0, 1.0),
            Vector3::new(1.0, 1.1, 1.0),
            Vector3::new(1.33, 1.0, 1.0),
        ];
        let frames: Vec<_> = (0..3).map(|t| frame(t as f64, None, coordinates.clone())).collect();
        let path = write_trajectory(dir.path(), "probe.mdt", &system, &frames);

        let body = "atom_selection = 'element,Ar'\n\
                    basis_selection = { molecule = 'WAT', origin = 'OW', x_axis = 'HW1', y_axis = 'HW2' }\n\
                    spatial_resolution = 0.1";
        let mut job = SpatialDensity::new(&parameters(&path, body), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let output = outcome.output();

        let density = &output.get("spatial_density").unwrap().data;
        let occupied: Vec<_> = density.iter().filter(|d| **d > 0.0).collect();
        assert_eq!(occupied.len(), 1);
        assert_close(density.iter().sum::<f64>() * 0.001, 1.0, 1e-9);

        let x = &output.get("x").unwrap().data;
        let (flat, _) = density.iter().enumerate().find(|(_, d)| **d > 0.0).unwrap();
        let shape = &output.get("spatial_density").unwrap().shape;
        let ix = flat / (shape[1] * shape[2]);
        assert!((x[ix] - 0.33).abs() <= 0.05 + 1e-12);
    }

    #[test]
    fn targets_moving_outward_after_the_first_frame_are_counted() {
        let env = env();
        let dir = tempdir().unwrap();
        let mut system = waters(&env, 1);
        system.add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar"))).unwrap();
        let water = [
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(1.1, 1.0, 1.0),
            Vector3::new(1.0, 1.1, 1.0),
        ];
        let frames: Vec<_> = [1.33, 3.0]
            .iter()
            .enumerate()
            .map(|(t, &x)| {
                let mut coordinates = water.to_vec();
                coordinates.push(Vector3::new(x, 1.0, 1.0));
                frame(t as f64, None, coordinates)
            })
            .collect();
        let path = write_trajectory(dir.path(), "drift.mdt", &system, &frames);

        let body = "atom_selection = 'element,Ar'\n\
                    basis_selection = { molecule = 'WAT', origin = 'OW', x_axis = 'HW1', y_axis = 'HW2' }\n\
                    spatial_resolution = 0.1";
        let mut job = SpatialDensity::new(&parameters(&path, body), &env).unwrap();
        let outcome = run_job(&mut job, None, &ProgressReporter::new()).unwrap();
        let output = outcome.output();

        let density = &output.get("spatial_density").unwrap().data;
        assert_eq!(density.iter().filter(|d| **d > 0.0).count(), 2);
        assert_close(density.iter().sum::<f64>() * 0.001, 1.0, 1e-9);
        let x = &output.get("x").unwrap().data;
        assert!(x.last().copied().unwrap() >= 2.0);
    }
}
