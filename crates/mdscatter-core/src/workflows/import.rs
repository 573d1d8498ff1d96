use crate::core::geometry::unit_cell::UnitCell;
use crate::core::io::container::FrameRecord;
use crate::core::io::importer::{ImportError, ImportHeader, ImportedStep, TrajectoryImporter};
use crate::core::io::writer::{FrameContents, TrajectoryWriter};
use crate::engine::cancel::CancelToken;
use crate::engine::error::JobError;
use crate::engine::progress::ProgressReporter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// What an import produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub path: PathBuf,
    pub frames_written: usize,
    pub n_steps: usize,
    pub cancelled: bool,
}

/// Converts every step of `importer` into a new trajectory at `path`.
///
/// The trajectory is periodic when the header declares a cell or the first step carries
/// one. Steps of a periodic trajectory without their own cell reuse the header cell.
/// Cancellation is polled between steps; a cancelled import still closes the writer so
/// the file holds every step read so far. The importer is closed whether or not the
/// conversion succeeds.
///
/// # Errors
///
/// Returns [`JobError::Import`] when the importer fails and [`JobError::Trajectory`] when
/// the file cannot be written, including when a periodic step has no cell to fall back on.
/// A conversion error takes precedence over an error from closing the importer.
#[instrument(skip_all, name = "import_trajectory", fields(path = %path.as_ref().display()))]
pub fn import_trajectory(
    importer: &mut impl TrajectoryImporter,
    path: impl AsRef<Path>,
    cancel: Option<&CancelToken>,
    reporter: &ProgressReporter,
) -> Result<ImportSummary, JobError> {
    let path = path.as_ref();
    reporter.start_stage("Import");
    let converted = convert_steps(importer, path, cancel, reporter);
    let closed = importer.close();
    if let Err(err) = &closed {
        warn!(error = %err, "Importer did not close cleanly");
    }
    let summary = converted?;
    closed?;
    reporter.finish_stage();
    info!(
        frames_written = summary.frames_written,
        cancelled = summary.cancelled,
        "Import finished"
    );
    Ok(summary)
}

fn convert_steps(
    importer: &mut impl TrajectoryImporter,
    path: &Path,
    cancel: Option<&CancelToken>,
    reporter: &ProgressReporter,
) -> Result<ImportSummary, JobError> {
    let header = importer.initialize()?;
    info!(
        n_steps = header.n_steps,
        n_atoms = header.chemical_system.total_number_of_atoms(),
        "Scanned source trajectory"
    );
    if header.n_steps == 0 {
        return Err(ImportError::Parse {
            step: 0,
            reason: "the source holds no steps".to_string(),
        }
        .into());
    }

    let first = importer.read_step(0)?;
    let contents = FrameContents {
        periodic: header.unit_cell.is_some() || first.unit_cell.is_some(),
        velocities: header.velocities && first.velocities.is_some(),
        forces: false,
    };
    debug!(?contents, "Chose the frame layout");
    let mut writer = TrajectoryWriter::create(path, &header.chemical_system, header.n_steps, contents)?;

    let mut frames = reporter.frame_loop(header.n_steps);
    let mut cancelled = false;
    let mut step = Some(first);
    for index in 0..header.n_steps {
        if index > 0 && cancel.is_some_and(CancelToken::is_stopped) {
            warn!(index, "Import cancelled; closing the partial trajectory");
            cancelled = true;
            break;
        }
        let current = match step.take() {
            Some(current) => current,
            None => importer.read_step(index)?,
        };
        writer.append(&record(current, &header, contents, index))?;
        frames.frame_done();
    }
    drop(frames);

    let frames_written = writer.close()?;
    Ok(ImportSummary {
        path: path.to_path_buf(),
        frames_written,
        n_steps: header.n_steps,
        cancelled,
    })
}

fn record(step: ImportedStep, header: &ImportHeader, contents: FrameContents, index: usize) -> FrameRecord {
    let unit_cell = if contents.periodic {
        step.unit_cell
            .or_else(|| {
                warn!(index, "Step has no cell; using the header cell");
                header.unit_cell
            })
            .as_ref()
            .map(UnitCell::to_rows)
    } else {
        None
    };
    FrameRecord {
        time: step.time,
        unit_cell,
        coordinates: step.coordinates,
        velocities: step.velocities.filter(|_| contents.velocities),
        forces: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::molecules::MoleculeDatabase;
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::ChemicalEntity;
    use crate::core::models::system::ChemicalSystem;
    use crate::core::trajectory::Trajectory;
    use crate::engine::progress::Progress;
    use nalgebra::Vector3;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Two argon atoms drifting along x. Steps listed in `cells` carry their own box.
    struct ScriptedImporter {
        n_steps: usize,
        header_cell: Option<UnitCell>,
        cells: Vec<usize>,
        cancel_after: Option<(usize, CancelToken)>,
        failing_at: Option<usize>,
        closed: bool,
    }

    impl ScriptedImporter {
        fn new(n_steps: usize) -> Self {
            Self {
                n_steps,
                header_cell: None,
                cells: Vec::new(),
                cancel_after: None,
                failing_at: None,
                closed: false,
            }
        }
    }

    impl TrajectoryImporter for ScriptedImporter {
        fn initialize(&mut self) -> Result<ImportHeader, ImportError> {
            let mut system = ChemicalSystem::new("argon");
            for _ in 0..2 {
                system
                    .add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar")))
                    .map_err(|e| ImportError::Parse {
                        step: 0,
                        reason: e.to_string(),
                    })?;
            }
            Ok(ImportHeader {
                chemical_system: system,
                n_steps: self.n_steps,
                unit_cell: self.header_cell,
                velocities: false,
            })
        }

        fn read_step(&mut self, index: usize) -> Result<ImportedStep, ImportError> {
            if let Some((at, token)) = &self.cancel_after {
                if *at == index {
                    token.cancel();
                }
            }
            if self.failing_at == Some(index) {
                return Err(ImportError::Parse {
                    step: index,
                    reason: "unexpected end of record".to_string(),
                });
            }
            let x = 0.1 * index as f64;
            let unit_cell = self
                .cells
                .contains(&index)
                .then(|| UnitCell::cubic(3.0 + index as f64))
                .transpose()
                .map_err(|e| ImportError::Parse {
                    step: index,
                    reason: e.to_string(),
                })?;
            Ok(ImportedStep {
                time: 0.5 * index as f64,
                unit_cell,
                coordinates: vec![Vector3::new(x, 0.0, 0.0), Vector3::new(x, 1.0, 0.0)],
                velocities: None,
            })
        }

        fn close(&mut self) -> Result<(), ImportError> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn imports_every_step() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("argon.mdt");
        let events = Mutex::new(0usize);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if matches!(event, Progress::FrameDone) {
                *events.lock().unwrap() += 1;
            }
        }));
        let mut importer = ScriptedImporter::new(5);
        let summary = import_trajectory(&mut importer, &path, None, &reporter).unwrap();
        drop(reporter);

        assert_eq!(summary.frames_written, 5);
        assert!(!summary.cancelled);
        assert!(importer.closed);
        assert_eq!(events.into_inner().unwrap(), 5);

        let trajectory = Trajectory::open(&path, &MoleculeDatabase::builtin().unwrap()).unwrap();
        assert_eq!(trajectory.len(), 5);
        assert!(!trajectory.is_periodic());
        let last = trajectory.configuration(4).unwrap();
        assert!((last.coordinates()[0].x - 0.4).abs() < 1e-12);
    }

    #[test]
    fn steps_without_a_cell_reuse_the_header_cell() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("npt.mdt");
        let mut importer = ScriptedImporter::new(3);
        importer.header_cell = Some(UnitCell::cubic(2.0).unwrap());
        importer.cells = vec![1];
        import_trajectory(&mut importer, &path, None, &ProgressReporter::new()).unwrap();

        let trajectory = Trajectory::open(&path, &MoleculeDatabase::builtin().unwrap()).unwrap();
        assert!(trajectory.is_periodic());
        let volumes: Vec<f64> = (0..3)
            .map(|i| trajectory.unit_cell(i).unwrap().unwrap().volume())
            .collect();
        assert!((volumes[0] - 8.0).abs() < 1e-9);
        assert!((volumes[1] - 64.0).abs() < 1e-9);
        assert!((volumes[2] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn cancelled_import_leaves_a_shorter_readable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.mdt");
        let token = CancelToken::new();
        let mut importer = ScriptedImporter::new(10);
        importer.cancel_after = Some((3, token.clone()));
        let summary =
            import_trajectory(&mut importer, &path, Some(&token), &ProgressReporter::new()).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.frames_written, 4);
        assert!(importer.closed);
        assert_eq!(Trajectory::open(&path, &MoleculeDatabase::builtin().unwrap()).unwrap().len(), 4);
    }

    #[test]
    fn empty_source_is_rejected() {
        let dir = tempdir().unwrap();
        let mut importer = ScriptedImporter::new(0);
        let result = import_trajectory(
            &mut importer,
            dir.path().join("empty.mdt"),
            None,
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(JobError::Import(ImportError::Parse { .. }))));
        assert!(importer.closed);
    }

    #[test]
    fn source_failing_mid_stream_is_still_closed() {
        let dir = tempdir().unwrap();
        let mut importer = ScriptedImporter::new(6);
        importer.failing_at = Some(3);
        let result = import_trajectory(
            &mut importer,
            dir.path().join("broken.mdt"),
            None,
            &ProgressReporter::new(),
        );
        assert!(matches!(
            result,
            Err(JobError::Import(ImportError::Parse { step: 3, .. }))
        ));
        assert!(importer.closed);
    }

    #[test]
    fn source_failing_on_the_first_step_is_still_closed() {
        let dir = tempdir().unwrap();
        let mut importer = ScriptedImporter::new(2);
        importer.failing_at = Some(0);
        let result = import_trajectory(
            &mut importer,
            dir.path().join("broken.mdt"),
            None,
            &ProgressReporter::new(),
        );
        assert!(result.is_err());
        assert!(importer.closed);
    }
}
