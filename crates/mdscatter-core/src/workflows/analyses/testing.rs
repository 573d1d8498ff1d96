use crate::core::geometry::unit_cell::UnitCell;
use crate::core::io::container::FrameRecord;
use crate::core::io::writer::{FrameContents, TrajectoryWriter};
use crate::core::models::entity::{ChemicalEntity, Molecule};
use crate::core::models::system::ChemicalSystem;
use crate::engine::environment::Environment;
use nalgebra::Vector3;
use std::path::{Path, PathBuf};

pub(crate) fn env() -> Environment {
    Environment::builtin().unwrap()
}

/// `n` water molecules from the built-in templates.
pub(crate) fn waters(env: &Environment, n: usize) -> ChemicalSystem {
    let mut system = ChemicalSystem::new("water box");
    for i in 0..n {
        let molecule = Molecule::from_database(&env.molecules, "WAT", format!("WAT{i}")).unwrap();
        system.add_chemical_entity(ChemicalEntity::Molecule(molecule)).unwrap();
    }
    system
}

pub(crate) fn frame(time: f64, cell: Option<&UnitCell>, coordinates: Vec<Vector3<f64>>) -> FrameRecord {
    FrameRecord {
        time,
        unit_cell: cell.map(UnitCell::to_rows),
        coordinates,
        velocities: None,
        forces: None,
    }
}

/// Writes `frames` to `dir/name`, storing whatever datasets the first frame carries.
pub(crate) fn write_trajectory(
    dir: &Path,
    name: &str,
    system: &ChemicalSystem,
    frames: &[FrameRecord],
) -> PathBuf {
    let path = dir.join(name);
    let contents = FrameContents {
        periodic: frames[0].unit_cell.is_some(),
        velocities: frames[0].velocities.is_some(),
        forces: frames[0].forces.is_some(),
    };
    let mut writer = TrajectoryWriter::create(&path, system, frames.len(), contents).unwrap();
    for record in frames {
        writer.append(record).unwrap();
    }
    writer.close().unwrap();
    path
}

/// Parses `body` after a `trajectory = '<path>'` line.
pub(crate) fn parameters(trajectory: &Path, body: &str) -> toml::Table {
    let path = trajectory.to_string_lossy().replace('\\', "/");
    toml::from_str(&format!("trajectory = '{path}'\n{body}")).unwrap()
}

pub(crate) fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}
