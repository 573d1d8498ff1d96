use mdscatter::core::database::DatabaseError;
use mdscatter::core::io::TrajectoryError;
use mdscatter::engine::error::JobError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Analysis failed: {0}")]
    Job(#[from] JobError),

    #[error("Cannot read trajectory: {0}")]
    Trajectory(#[from] TrajectoryError),

    #[error("Invalid database overlay: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed job file '{}': {source}", path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_errors_name_the_failing_stage() {
        let err: CliError = JobError::UnknownJob("Nope".to_string()).into();
        let text = err.to_string();
        assert!(text.starts_with("Analysis failed: "), "{text}");
        assert!(text.contains("Nope"), "{text}");
    }

    #[test]
    fn parsing_errors_carry_the_file_path() {
        let err = CliError::FileParsing {
            path: PathBuf::from("jobs/pdf.toml"),
            source: anyhow::anyhow!("expected `]`"),
        };
        assert_eq!(err.to_string(), "Malformed job file 'jobs/pdf.toml': expected `]`");
        assert!(std::error::Error::source(&err).is_some());
    }
}
