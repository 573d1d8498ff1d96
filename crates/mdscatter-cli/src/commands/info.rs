use crate::cli::InfoArgs;
use crate::error::Result;
use mdscatter::core::database::molecules::MoleculeDatabase;
use mdscatter::core::trajectory::Trajectory;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::info;

pub fn run(args: InfoArgs) -> Result<()> {
    info!("Opening trajectory {:?}", &args.trajectory);
    let molecules = MoleculeDatabase::builtin()?;
    let trajectory = Trajectory::open(&args.trajectory, &molecules)?;
    print!("{}", summarize(&trajectory));
    Ok(())
}

fn summarize(trajectory: &Trajectory) -> String {
    let system = trajectory.chemical_system();
    let mut text = String::new();
    let _ = writeln!(text, "System:     {}", system.name());
    let _ = writeln!(text, "Frames:     {}", trajectory.len());
    let _ = writeln!(text, "Atoms:      {}", system.total_number_of_atoms());
    let _ = writeln!(
        text,
        "Periodic:   {}",
        if trajectory.is_periodic() { "yes" } else { "no" }
    );
    match (trajectory.times().first(), trajectory.times().last()) {
        (Some(first), Some(last)) => {
            let _ = writeln!(text, "Time span:  {first} - {last} ps");
        }
        _ => {
            let _ = writeln!(text, "Time span:  empty");
        }
    }

    let mut census: BTreeMap<String, usize> = BTreeMap::new();
    for id in system.top_level_entities() {
        if let Some(entity) = system.entity(*id) {
            *census.entry(format!("{:?}", entity.kind())).or_default() += 1;
        }
    }
    let _ = writeln!(text, "Entities:");
    for (kind, count) in census {
        let _ = writeln!(text, "  {kind:<16} {count}");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdscatter::core::geometry::unit_cell::UnitCell;
    use mdscatter::core::io::container::FrameRecord;
    use mdscatter::core::io::writer::{FrameContents, TrajectoryWriter};
    use mdscatter::core::models::atom::Atom;
    use mdscatter::core::models::entity::{ChemicalEntity, Molecule};
    use mdscatter::core::models::system::ChemicalSystem;
    use nalgebra::Vector3;
    use tempfile::tempdir;

    #[test]
    fn summary_reports_frames_cell_and_census() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixture.mdt");
        let molecules = MoleculeDatabase::builtin().unwrap();
        let mut system = ChemicalSystem::new("mixture");
        for i in 0..2 {
            let water = Molecule::from_database(&molecules, "WAT", format!("WAT{i}")).unwrap();
            system.add_chemical_entity(ChemicalEntity::Molecule(water)).unwrap();
        }
        system.add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar"))).unwrap();

        let contents = FrameContents {
            periodic: true,
            velocities: false,
            forces: false,
        };
        let cell = UnitCell::cubic(2.0).unwrap();
        let mut writer = TrajectoryWriter::create(&path, &system, 3, contents).unwrap();
        for i in 0..3 {
            writer
                .append(&FrameRecord {
                    time: 0.5 * i as f64,
                    unit_cell: Some(cell.to_rows()),
                    coordinates: vec![Vector3::zeros(); 7],
                    velocities: None,
                    forces: None,
                })
                .unwrap();
        }
        writer.close().unwrap();

        let trajectory = Trajectory::open(&path, &molecules).unwrap();
        let text = summarize(&trajectory);
        assert!(text.contains("Frames:     3"));
        assert!(text.contains("Atoms:      7"));
        assert!(text.contains("Periodic:   yes"));
        assert!(text.contains("Time span:  0 - 1 ps"));
        assert!(text.lines().any(|l| l.trim_start().starts_with("Molecule") && l.ends_with(" 2")));
        assert!(text.lines().any(|l| l.trim_start().starts_with("Atom ") && l.ends_with(" 1")));
    }
}
