use crate::config::EnvironmentSection;
use crate::error::{CliError, Result};
use directories::ProjectDirs;
use mdscatter::engine::environment::{Environment, EnvironmentBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ELEMENTS_FILE: &str = "elements.csv";
const MOLECULES_FILE: &str = "molecules.toml";

/// Locates user table overlays and builds the analysis environment.
#[derive(Debug)]
pub struct DataManager {
    base_path: PathBuf,
}

impl DataManager {
    /// Uses `custom` when given, the platform data directory otherwise.
    pub fn new(custom: Option<PathBuf>) -> Result<Self> {
        let base_path = match custom {
            Some(path) => path,
            None => Self::get_default_data_path()?,
        };
        debug!("DataManager initialized with path: {:?}", &base_path);
        Ok(Self { base_path })
    }

    pub fn get_data_path(&self) -> &Path {
        &self.base_path
    }

    /// The environment for a job: overlays named in the job file win over those found
    /// in the data directory.
    pub fn environment(&self, section: &EnvironmentSection) -> Result<Environment> {
        let mut builder = EnvironmentBuilder::new();
        if let Some(path) = self.overlay(section.elements.as_ref(), ELEMENTS_FILE) {
            info!("Using element table overlay {:?}", &path);
            builder = builder.elements_overlay(path);
        }
        if let Some(path) = self.overlay(section.molecules.as_ref(), MOLECULES_FILE) {
            info!("Using molecule table overlay {:?}", &path);
            builder = builder.molecules_overlay(path);
        }
        Ok(builder.build()?)
    }

    fn overlay(&self, explicit: Option<&PathBuf>, file_name: &str) -> Option<PathBuf> {
        explicit.cloned().or_else(|| {
            let candidate = self.base_path.join(file_name);
            candidate.is_file().then_some(candidate)
        })
    }

    fn get_default_data_path() -> Result<PathBuf> {
        ProjectDirs::from("edu", "caltech", "mdscatter")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                CliError::Config("Could not determine default data directory path.".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "symbol,name,atomic_number,atomic_weight,covalent_radius,vdw_radius,b_coherent,b_incoherent,xs_coherent,xs_incoherent,xs_absorption\n";

    #[test]
    fn empty_data_directory_gives_the_builtin_tables() {
        let dir = tempdir().unwrap();
        let manager = DataManager::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(manager.get_data_path(), dir.path());
        let env = manager.environment(&EnvironmentSection::default()).unwrap();
        assert!(env.elements.contains("Ar"));
        assert!(!env.elements.contains("Xx"));
    }

    #[test]
    fn overlays_in_the_data_directory_are_picked_up() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(ELEMENTS_FILE),
            format!("{HEADER}Xx,exotium,120,300.0,0.2,0.3,1.0,0.0,0.1,0.0,0.0\n"),
        )
        .unwrap();
        let manager = DataManager::new(Some(dir.path().to_path_buf())).unwrap();
        let env = manager.environment(&EnvironmentSection::default()).unwrap();
        assert_eq!(env.elements.property("Xx", "mass").unwrap(), 300.0);
    }

    #[test]
    fn job_file_overlays_take_precedence() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(ELEMENTS_FILE),
            format!("{HEADER}Xx,exotium,120,300.0,0.2,0.3,1.0,0.0,0.1,0.0,0.0\n"),
        )
        .unwrap();
        let explicit = dir.path().join("job_elements.csv");
        fs::write(
            &explicit,
            format!("{HEADER}Xx,exotium,120,150.0,0.2,0.3,1.0,0.0,0.1,0.0,0.0\n"),
        )
        .unwrap();
        let manager = DataManager::new(Some(dir.path().to_path_buf())).unwrap();
        let section = EnvironmentSection {
            elements: Some(explicit),
            molecules: None,
        };
        let env = manager.environment(&section).unwrap();
        assert_eq!(env.elements.property("Xx", "mass").unwrap(), 150.0);
    }

    #[test]
    fn missing_explicit_overlay_is_an_error() {
        let dir = tempdir().unwrap();
        let manager = DataManager::new(Some(dir.path().to_path_buf())).unwrap();
        let section = EnvironmentSection {
            elements: Some(dir.path().join("absent.csv")),
            molecules: None,
        };
        assert!(matches!(manager.environment(&section), Err(CliError::Database(_))));
    }
}
