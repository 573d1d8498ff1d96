use super::job::RunningMode;
use crate::core::database::DatabaseError;
use crate::core::database::elements::ElementDatabase;
use crate::core::database::molecules::MoleculeDatabase;
use crate::core::units::UnitManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Shared, read-only context handed to configurators and jobs.
///
/// Built once at start-up from the embedded tables, optionally overlaid with user
/// tables, and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Environment {
    pub elements: Arc<ElementDatabase>,
    pub molecules: Arc<MoleculeDatabase>,
    pub units: Arc<UnitManager>,
    pub running_mode: RunningMode,
}

impl Environment {
    /// An environment over the built-in tables only.
    pub fn builtin() -> Result<Self, DatabaseError> {
        EnvironmentBuilder::new().build()
    }
}

#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    elements_overlay: Option<PathBuf>,
    molecules_overlay: Option<PathBuf>,
    running_mode: Option<RunningMode>,
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A CSV element table whose records replace or extend the built-in ones.
    pub fn elements_overlay(mut self, path: PathBuf) -> Self {
        self.elements_overlay = Some(path);
        self
    }

    /// A TOML template table merged over the built-in molecules, residues and nucleotides.
    pub fn molecules_overlay(mut self, path: PathBuf) -> Self {
        self.molecules_overlay = Some(path);
        self
    }

    pub fn running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = Some(mode);
        self
    }

    /// Loads the tables and checks that every template symbol is a known element.
    pub fn build(self) -> Result<Environment, DatabaseError> {
        let mut elements = ElementDatabase::builtin()?;
        if let Some(path) = &self.elements_overlay {
            let count = elements.overlay_from_path(path)?;
            info!(path = %path.display(), count, "Applied element table overlay");
        }
        let mut molecules = MoleculeDatabase::builtin()?;
        if let Some(path) = &self.molecules_overlay {
            molecules.merge(MoleculeDatabase::load(path)?);
            info!(path = %path.display(), "Applied molecule table overlay");
        }
        molecules.validate_symbols(&elements)?;

        Ok(Environment {
            elements: Arc::new(elements),
            molecules: Arc::new(molecules),
            units: Arc::new(UnitManager::new()),
            running_mode: self.running_mode.unwrap_or_default(),
        })
    }
}
