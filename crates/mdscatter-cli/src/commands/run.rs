use crate::cli::RunArgs;
use crate::config::JobFile;
use crate::data::DataManager;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use mdscatter::engine::job::JobOutcome;
use mdscatter::engine::progress::ProgressReporter;
use mdscatter::workflows::registry;
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    run_with_progress(args, CliProgressHandler::new())
}

fn run_with_progress(args: RunArgs, progress_handler: CliProgressHandler) -> Result<()> {
    let mut job_file = JobFile::from_file(&args.job)?;
    if let Some(threads) = args.threads {
        info!("Overriding the running mode with {} worker(s).", threads);
        job_file.override_workers(threads)?;
    }

    info!("Initializing data manager...");
    let data_manager = DataManager::new(args.data_dir)?;
    let env = data_manager.environment(&job_file.environment)?;

    info!("Configuring analysis '{}'...", job_file.job.name);
    let mut analysis = registry::build(&job_file.job.name, &job_file.parameters, &env)?;

    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    println!("Running {}...", analysis.analysis_name());
    let outcome = analysis.execute(None, &reporter)?;

    match outcome {
        JobOutcome::Completed { output, written } => {
            info!("Analysis produced {} variable(s).", output.len());
            if written.is_empty() {
                warn!("No output_files configured; results were not written.");
                println!("Warning: no output_files configured, results were not written.");
            }
            for path in written {
                println!("✓ Results written to: {}", path.display());
            }
        }
        JobOutcome::Cancelled {
            completed_steps, ..
        } => {
            warn!("Analysis cancelled after {} step(s).", completed_steps);
            println!("Analysis cancelled after {} step(s); nothing was written.", completed_steps);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use mdscatter::core::io::container::FrameRecord;
    use mdscatter::core::io::writer::{FrameContents, TrajectoryWriter};
    use mdscatter::core::models::atom::Atom;
    use mdscatter::core::models::entity::ChemicalEntity;
    use mdscatter::core::models::system::ChemicalSystem;
    use mdscatter::engine::error::JobError;
    use nalgebra::Vector3;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn argon_trajectory(dir: &Path) -> PathBuf {
        let path = dir.join("argon.mdt");
        let mut system = ChemicalSystem::new("argon");
        system
            .add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar")))
            .unwrap();
        let contents = FrameContents {
            periodic: false,
            velocities: false,
            forces: false,
        };
        let mut writer = TrajectoryWriter::create(&path, &system, 5, contents).unwrap();
        for i in 0..5 {
            writer
                .append(&FrameRecord {
                    time: i as f64,
                    unit_cell: None,
                    coordinates: vec![Vector3::new(0.1 * i as f64, 0.0, 0.0)],
                    velocities: None,
                    forces: None,
                })
                .unwrap();
        }
        writer.close().unwrap();
        path
    }

    fn args(job: PathBuf, threads: Option<usize>, data_dir: &Path) -> RunArgs {
        RunArgs {
            job,
            threads,
            data_dir: Some(data_dir.to_path_buf()),
        }
    }

    #[test]
    fn runs_a_job_file_and_writes_the_results() {
        let dir = tempdir().unwrap();
        argon_trajectory(dir.path());
        let root = dir.path().join("out").join("msd");
        let job = dir.path().join("msd.toml");
        fs::write(
            &job,
            format!(
                "[job]\nname = \"MeanSquareDisplacement\"\n\n[parameters]\ntrajectory = \"argon.mdt\"\noutput_files = {{ root = '{}', formats = [\"TextFormat\"] }}\n",
                root.to_string_lossy().replace('\\', "/")
            ),
        )
        .unwrap();

        run_with_progress(args(job, Some(2), dir.path()), CliProgressHandler::hidden()).unwrap();
        let written: Vec<_> = fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert!(!written.is_empty());
    }

    #[test]
    fn unknown_analysis_is_reported() {
        let dir = tempdir().unwrap();
        let job = dir.path().join("bad.toml");
        fs::write(&job, "[job]\nname = \"Nope\"\n").unwrap();
        let result = run_with_progress(args(job, None, dir.path()), CliProgressHandler::hidden());
        assert!(matches!(result, Err(CliError::Job(JobError::UnknownJob(_)))));
    }

    #[test]
    fn missing_job_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let result = run_with_progress(
            args(dir.path().join("absent.toml"), None, dir.path()),
            CliProgressHandler::hidden(),
        );
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
