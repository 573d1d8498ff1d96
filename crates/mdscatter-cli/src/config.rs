use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parameters holding paths that are resolved against the job file's directory.
const PATH_PARAMETERS: [&str; 1] = ["trajectory"];

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct JobSection {
    pub name: String,
}

/// Optional overlays for the element and molecule tables.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    pub elements: Option<PathBuf>,
    pub molecules: Option<PathBuf>,
}

/// A parsed job file.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub job: JobSection,
    #[serde(default)]
    pub parameters: toml::Table,
    #[serde(default)]
    pub environment: EnvironmentSection,
}

impl JobFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading job file from: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut job = Self::parse(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if let Some(base) = path.parent() {
            job.resolve_relative_paths(base);
        }
        Ok(job)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Makes relative input paths relative to `base` instead of the working directory.
    ///
    /// Output roots stay relative to the working directory.
    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |path: &Path| -> PathBuf {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        for name in PATH_PARAMETERS {
            if let Some(toml::Value::String(value)) = self.parameters.get_mut(name) {
                *value = resolve(Path::new(value.as_str())).to_string_lossy().to_string();
            }
        }
        self.environment.elements = self.environment.elements.as_deref().map(resolve);
        self.environment.molecules = self.environment.molecules.as_deref().map(resolve);
    }

    /// Replaces the running mode with `threads` workers.
    pub fn override_workers(&mut self, threads: usize) -> Result<()> {
        let mode = match threads {
            0 => {
                return Err(CliError::Argument(
                    "the number of threads must be at least 1".to_string(),
                ));
            }
            1 => toml::Value::String("monoprocessor".to_string()),
            n => {
                let mut table = toml::Table::new();
                table.insert("mode".to_string(), "multiprocessor".into());
                table.insert("workers".to_string(), toml::Value::Integer(n as i64));
                toml::Value::Table(table)
            }
        };
        self.parameters.insert("running_mode".to_string(), mode);
        Ok(())
    }
}
