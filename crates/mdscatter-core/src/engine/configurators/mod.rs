//! Declarative, typed analysis parameters.
//!
//! An analysis declares an ordered list of [`Setting`]s. [`Configurable::setup`] feeds
//! the user's TOML parameters through the configure function registered for each
//! setting kind, resolving dependencies between slots (a frame range needs its
//! trajectory, weights need their selection) with a fixed-point loop.

mod kinds;
pub mod values;

use super::environment::Environment;
use crate::core::trajectory::Trajectory;
use crate::engine::job::RunningMode;
use nalgebra::Vector3;
use phf::phf_map;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use values::{
    AtomSelectionValue, BasisValue, ConfiguredValue, FramesValue, MoleculeSelectionValue,
    OutputFilesValue, QVectorsValue, RangeValue, ResolutionValue, WeightsValue,
};

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Cannot configure '{name}': {source}")]
    Configurator {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Parameters {pending:?} depend on settings that can never be configured")]
    Unsatisfiable { pending: Vec<String> },

    #[error("Parameter '{0}' has no configured value")]
    EmptySlot(String),

    #[error("Parameter '{name}' holds a {found}, not a {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// What a setting accepts, with the names of the slots it depends on.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingKind {
    /// Path of a trajectory file.
    Trajectory,
    /// `{ first, last, step }` over the frames, `last` exclusive; all frames by default.
    Frames { trajectory: &'static str },
    /// A selection expression; `"all"` by default.
    AtomSelection { trajectory: &'static str },
    AtomTransmutation { selection: &'static str },
    /// An element property name; `"equal"` by default.
    Weights {
        selection: &'static str,
        transmutation: Option<&'static str>,
    },
    SingleChoice { choices: &'static [&'static str] },
    MultipleChoices { choices: &'static [&'static str] },
    Range {
        unit: Option<&'static str>,
        inclusive: bool,
        min: Option<f64>,
    },
    Float {
        unit: Option<&'static str>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Integer { min: Option<i64>, max: Option<i64> },
    Boolean,
    Text,
    Vector { normalize: bool },
    MoleculeSelection { trajectory: &'static str },
    BasisSelection { trajectory: &'static str },
    OutputFiles,
    RunningMode,
    InputFile,
    QVectors { trajectory: &'static str },
    InstrumentResolution { frames: &'static str },
}

impl SettingKind {
    /// Key of the configure function in the dispatch table.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Trajectory => "hdf_trajectory",
            Self::Frames { .. } => "frames",
            Self::AtomSelection { .. } => "atom_selection",
            Self::AtomTransmutation { .. } => "atom_transmutation",
            Self::Weights { .. } => "weights",
            Self::SingleChoice { .. } => "single_choice",
            Self::MultipleChoices { .. } => "multiple_choices",
            Self::Range { .. } => "range",
            Self::Float { .. } => "float",
            Self::Integer { .. } => "integer",
            Self::Boolean => "boolean",
            Self::Text => "string",
            Self::Vector { .. } => "vector",
            Self::MoleculeSelection { .. } => "molecule_selection",
            Self::BasisSelection { .. } => "basis_selection",
            Self::OutputFiles => "output_files",
            Self::RunningMode => "running_mode",
            Self::InputFile => "input_file",
            Self::QVectors { .. } => "q_vectors",
            Self::InstrumentResolution { .. } => "instrument_resolution",
        }
    }

    pub fn dependencies(&self) -> Vec<&'static str> {
        match *self {
            Self::Frames { trajectory }
            | Self::AtomSelection { trajectory }
            | Self::MoleculeSelection { trajectory }
            | Self::BasisSelection { trajectory }
            | Self::QVectors { trajectory } => vec![trajectory],
            Self::AtomTransmutation { selection } => vec![selection],
            Self::Weights {
                selection,
                transmutation,
            } => std::iter::once(selection).chain(transmutation).collect(),
            Self::InstrumentResolution { frames } => vec![frames],
            _ => Vec::new(),
        }
    }
}

/// One declared parameter of an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub name: &'static str,
    pub kind: SettingKind,
    pub optional: bool,
    pub default: Option<toml::Value>,
    pub help: &'static str,
}

impl Setting {
    pub fn new(name: &'static str, kind: SettingKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
            default: None,
            help: "",
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<toml::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn help(mut self, help: &'static str) -> Self {
        self.help = help;
        self
    }

    fn invalid(&self, reason: String) -> ConfigurationError {
        ConfigurationError::InvalidValue {
            name: self.name.to_string(),
            reason,
        }
    }

    fn wrap(&self, source: impl std::error::Error + Send + Sync + 'static) -> ConfigurationError {
        ConfigurationError::Configurator {
            name: self.name.to_string(),
            source: Box::new(source),
        }
    }

    fn mismatch(&self) -> ConfigurationError {
        self.invalid(format!("no configurator for kind '{}'", self.kind.type_tag()))
    }
}

/// Read access to the slots configured so far.
pub(crate) struct ConfigureContext<'a> {
    env: &'a Environment,
    settings: &'a [Setting],
    values: &'a BTreeMap<&'static str, ConfiguredValue>,
}

macro_rules! slot_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self, name: &str) -> Result<&$ty, ConfigurationError> {
            match self.slot(name)? {
                ConfiguredValue::$variant(value) => Ok(value),
                other => Err(ConfigurationError::WrongType {
                    name: name.to_string(),
                    expected: stringify!($name),
                    found: other.type_name(),
                }),
            }
        }
    };
}

impl ConfigureContext<'_> {
    fn slot(&self, name: &str) -> Result<&ConfiguredValue, ConfigurationError> {
        self.values
            .get(name)
            .ok_or_else(|| ConfigurationError::EmptySlot(name.to_string()))
    }

    slot_getter!(trajectory, Trajectory, Arc<Trajectory>);
    slot_getter!(frames, Frames, FramesValue);
    slot_getter!(atom_selection, AtomSelection, AtomSelectionValue);
    slot_getter!(transmutation, Transmutation, BTreeMap<usize, String>);

    /// The trajectory an atom-selection slot was evaluated against.
    fn trajectory_of_selection(&self, selection: &str) -> Result<&Arc<Trajectory>, ConfigurationError> {
        match self.settings.iter().find(|s| s.name == selection).map(|s| &s.kind) {
            Some(SettingKind::AtomSelection { trajectory }) => self.trajectory(trajectory),
            _ => Err(ConfigurationError::WrongType {
                name: selection.to_string(),
                expected: "atom_selection",
                found: "other setting",
            }),
        }
    }
}

type ConfigureFn = fn(
    &Setting,
    Option<&toml::Value>,
    &ConfigureContext,
) -> Result<ConfiguredValue, ConfigurationError>;

static CONFIGURATORS: phf::Map<&'static str, ConfigureFn> = phf_map! {
    "hdf_trajectory" => kinds::trajectory as ConfigureFn,
    "frames" => kinds::frames as ConfigureFn,
    "atom_selection" => kinds::atom_selection as ConfigureFn,
    "atom_transmutation" => kinds::atom_transmutation as ConfigureFn,
    "weights" => kinds::weights as ConfigureFn,
    "single_choice" => kinds::single_choice as ConfigureFn,
    "multiple_choices" => kinds::multiple_choices as ConfigureFn,
    "range" => kinds::range as ConfigureFn,
    "float" => kinds::float as ConfigureFn,
    "integer" => kinds::integer as ConfigureFn,
    "boolean" => kinds::boolean as ConfigureFn,
    "string" => kinds::text as ConfigureFn,
    "vector" => kinds::vector as ConfigureFn,
    "molecule_selection" => kinds::molecule_selection as ConfigureFn,
    "basis_selection" => kinds::basis_selection as ConfigureFn,
    "output_files" => kinds::output_files as ConfigureFn,
    "running_mode" => kinds::running_mode as ConfigureFn,
    "input_file" => kinds::input_file as ConfigureFn,
    "q_vectors" => kinds::q_vectors as ConfigureFn,
    "instrument_resolution" => kinds::instrument_resolution as ConfigureFn,
};

/// Type tags with a registered configure function.
pub fn configurator_names() -> impl Iterator<Item = &'static str> {
    CONFIGURATORS.keys().copied()
}

/// A set of configured settings.
#[derive(Debug, Clone)]
pub struct Configurable {
    settings: Vec<Setting>,
    parameters: toml::Table,
    values: BTreeMap<&'static str, ConfiguredValue>,
    errors: BTreeMap<&'static str, String>,
}

impl Configurable {
    /// Configures every setting from `parameters`.
    ///
    /// Each pass configures the settings whose dependencies are already resolved.
    /// A failing required setting aborts the setup; a failing optional one records its
    /// error status and leaves its slot empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownParameter`] for a parameter no setting
    /// declares, [`ConfigurationError::Unsatisfiable`] when a pass makes no progress,
    /// or the error of the first required setting that fails.
    #[instrument(skip_all, name = "configure", fields(n_settings = settings.len()))]
    pub fn setup(
        settings: Vec<Setting>,
        parameters: &toml::Table,
        env: &Environment,
    ) -> Result<Self, ConfigurationError> {
        if let Some(unknown) = parameters
            .keys()
            .find(|key| !settings.iter().any(|s| s.name == key.as_str()))
        {
            return Err(ConfigurationError::UnknownParameter(unknown.clone()));
        }

        let mut values = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut resolved: BTreeSet<&'static str> = BTreeSet::new();
        let mut pending: Vec<&Setting> = settings.iter().collect();

        while !pending.is_empty() {
            let (ready, waiting): (Vec<&Setting>, Vec<&Setting>) = pending
                .into_iter()
                .partition(|s| s.kind.dependencies().iter().all(|d| resolved.contains(d)));
            if ready.is_empty() {
                return Err(ConfigurationError::Unsatisfiable {
                    pending: waiting.iter().map(|s| s.name.to_string()).collect(),
                });
            }
            for setting in ready {
                let configure = CONFIGURATORS
                    .get(setting.kind.type_tag())
                    .ok_or_else(|| setting.mismatch())?;
                let value = parameters.get(setting.name).or(setting.default.as_ref());
                let ctx = ConfigureContext {
                    env,
                    settings: &settings,
                    values: &values,
                };
                match configure(setting, value, &ctx) {
                    Ok(configured) => {
                        debug!(setting = setting.name, kind = configured.type_name(), "Configured");
                        values.insert(setting.name, configured);
                    }
                    Err(ConfigurationError::MissingParameter(_)) if setting.optional => {
                        debug!(setting = setting.name, "Optional setting left empty");
                    }
                    Err(e) if setting.optional => {
                        warn!(setting = setting.name, error = %e, "Optional setting is invalid; leaving it empty");
                        errors.insert(setting.name, e.to_string());
                    }
                    Err(e) => return Err(e),
                }
                resolved.insert(setting.name);
            }
            pending = waiting;
        }

        Ok(Self {
            settings,
            parameters: parameters.clone(),
            values,
            errors,
        })
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// The parameters as given by the user, before defaults.
    pub fn parameters(&self) -> &toml::Table {
        &self.parameters
    }

    /// Why an optional setting was left empty, if it was invalid.
    pub fn error_status(&self, name: &str) -> Option<&str> {
        self.errors.get(name).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&ConfiguredValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn slot(&self, name: &str) -> Result<&ConfiguredValue, ConfigurationError> {
        self.get(name)
            .ok_or_else(|| ConfigurationError::EmptySlot(name.to_string()))
    }

    slot_getter!(trajectory, Trajectory, Arc<Trajectory>);
    slot_getter!(frames, Frames, FramesValue);
    slot_getter!(atom_selection, AtomSelection, AtomSelectionValue);
    slot_getter!(transmutation, Transmutation, BTreeMap<usize, String>);
    slot_getter!(weights, Weights, WeightsValue);
    slot_getter!(choice, Choice, String);
    slot_getter!(choices, Choices, Vec<String>);
    slot_getter!(range, Range, RangeValue);
    slot_getter!(float, Float, f64);
    slot_getter!(integer, Integer, i64);
    slot_getter!(boolean, Boolean, bool);
    slot_getter!(text, Text, String);
    slot_getter!(vector, Vector, Vector3<f64>);
    slot_getter!(molecules, Molecules, MoleculeSelectionValue);
    slot_getter!(basis, Basis, BasisValue);
    slot_getter!(output_files, OutputFiles, OutputFilesValue);
    slot_getter!(running_mode, RunningMode, RunningMode);
    slot_getter!(q_vectors, QVectors, QVectorsValue);
    slot_getter!(resolution, Resolution, ResolutionValue);

    pub fn path(&self, name: &str) -> Result<&Path, ConfigurationError> {
        match self.slot(name)? {
            ConfiguredValue::Path(path) => Ok(path),
            other => Err(ConfigurationError::WrongType {
                name: name.to_string(),
                expected: "input file",
                found: other.type_name(),
            }),
        }
    }

    /// The selection of `selection` with the atoms of `transmutation` renamed, if that
    /// slot is configured.
    pub fn transmuted_selection(
        &self,
        selection: &str,
        transmutation: &str,
    ) -> Result<AtomSelectionValue, ConfigurationError> {
        let selected = self.atom_selection(selection)?;
        Ok(match self.get(transmutation) {
            Some(ConfiguredValue::Transmutation(map)) => selected.transmuted(map),
            _ => selected.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::unit_cell::UnitCell;
    use crate::core::io::container::FrameRecord;
    use crate::core::io::writer::{FrameContents, TrajectoryWriter};
    use crate::core::models::atom::Atom;
    use crate::core::models::entity::{AtomCluster, ChemicalEntity};
    use crate::core::models::system::ChemicalSystem;
    use crate::engine::output::OutputFormat;
    use tempfile::{TempDir, tempdir};

    fn env() -> Environment {
        Environment::builtin().unwrap()
    }

    /// Two water-like clusters over five frames 0.5 ps apart, written to disk.
    fn trajectory_file() -> (TempDir, String) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.mdt");
        let mut system = ChemicalSystem::new("waters");
        for name in ["W1", "W2"] {
            let cluster = AtomCluster::new(
                name,
                vec![
                    Atom::new("O").with_name("OW"),
                    Atom::new("H").with_name("HW1"),
                    Atom::new("H").with_name("HW2"),
                ],
                vec![[0, 1], [0, 2]],
            )
            .unwrap();
            system
                .add_chemical_entity(ChemicalEntity::AtomCluster(cluster))
                .unwrap();
        }
        let cell = UnitCell::cubic(2.0).unwrap();
        let contents = FrameContents {
            periodic: true,
            ..Default::default()
        };
        let mut writer = TrajectoryWriter::create(&path, &system, 5, contents).unwrap();
        for i in 0..5 {
            let record = FrameRecord {
                time: 0.5 * i as f64,
                unit_cell: Some(cell.to_rows()),
                coordinates: (0..6).map(|a| Vector3::new(0.1 * a as f64, 0.0, 0.0)).collect(),
                velocities: None,
                forces: None,
            };
            writer.append(&record).unwrap();
        }
        writer.close().unwrap();
        (dir, path.to_string_lossy().to_string())
    }

    fn settings() -> Vec<Setting> {
        vec![
            Setting::new("trajectory", SettingKind::Trajectory),
            Setting::new("frames", SettingKind::Frames { trajectory: "trajectory" }),
            Setting::new("atom_selection", SettingKind::AtomSelection { trajectory: "trajectory" }),
            Setting::new(
                "atom_transmutation",
                SettingKind::AtomTransmutation { selection: "atom_selection" },
            )
            .optional(),
            Setting::new(
                "weights",
                SettingKind::Weights {
                    selection: "atom_selection",
                    transmutation: Some("atom_transmutation"),
                },
            ),
            Setting::new(
                "r_values",
                SettingKind::Range {
                    unit: Some("nm"),
                    inclusive: false,
                    min: Some(0.0),
                },
            ),
            Setting::new(
                "probe_radius",
                SettingKind::Float {
                    unit: Some("nm"),
                    min: Some(0.0),
                    max: None,
                },
            )
            .default_value(0.14),
            Setting::new("output_files", SettingKind::OutputFiles),
            Setting::new("running_mode", SettingKind::RunningMode),
        ]
    }

    fn parameters(path: &str, extra: &str) -> toml::Table {
        toml::from_str(&format!(
            "trajectory = '{path}'\nr_values = {{ first = 0.0, last = 1.0, step = 0.1 }}\noutput_files = {{ root = 'out/run' }}\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn dependencies_are_resolved_whatever_the_declaration_order() {
        let (_dir, path) = trajectory_file();
        let mut reversed = settings();
        reversed.reverse();
        let configured = Configurable::setup(
            reversed,
            &parameters(&path, "frames = { first = 1, last = 5, step = 2 }"),
            &env(),
        )
        .unwrap();

        let frames = configured.frames("frames").unwrap();
        assert_eq!(frames.indices, vec![1, 3]);
        assert_eq!(frames.relative_times, vec![0.0, 1.0]);
        assert!((frames.time_step - 1.0).abs() < 1e-12);
        assert_eq!(configured.atom_selection("atom_selection").unwrap().len(), 6);
        assert_eq!(configured.weights("weights").unwrap().get("H"), 1.0);
        assert_eq!(configured.range("r_values").unwrap().values.len(), 10);
        assert_eq!(*configured.float("probe_radius").unwrap(), 0.14);
        assert_eq!(configured.output_files("output_files").unwrap().formats, vec![OutputFormat::Mda]);
        assert_eq!(*configured.running_mode("running_mode").unwrap(), RunningMode::Monoprocessor);
    }

    #[test]
    fn quantities_are_converted_to_the_declared_unit() {
        let (_dir, path) = trajectory_file();
        let configured = Configurable::setup(
            settings(),
            &parameters(&path, "probe_radius = { value = 1.4, unit = 'ang' }"),
            &env(),
        )
        .unwrap();
        assert!((configured.float("probe_radius").unwrap() - 0.14).abs() < 1e-12);
    }

    #[test]
    fn transmutation_renames_selected_atoms_for_the_weights() {
        let (_dir, path) = trajectory_file();
        let configured = Configurable::setup(
            settings(),
            &parameters(
                &path,
                "atom_selection = 'element,H'\natom_transmutation = { 'atom_index,1' = 'D' }\nweights = 'atomic_weight'",
            ),
            &env(),
        )
        .unwrap();
        let selection = configured
            .transmuted_selection("atom_selection", "atom_transmutation")
            .unwrap();
        assert_eq!(selection.elements(), vec!["D", "H"]);
        let weights = configured.weights("weights").unwrap();
        assert!(weights.get("D") > weights.get("H"));
    }

    #[test]
    fn unknown_and_missing_parameters_are_rejected() {
        let (_dir, path) = trajectory_file();
        assert!(matches!(
            Configurable::setup(settings(), &parameters(&path, "colour = 'red'"), &env()),
            Err(ConfigurationError::UnknownParameter(name)) if name == "colour"
        ));
        let mut missing = parameters(&path, "");
        missing.remove("output_files");
        assert!(matches!(
            Configurable::setup(settings(), &missing, &env()),
            Err(ConfigurationError::MissingParameter(name)) if name == "output_files"
        ));
    }

    #[test]
    fn frame_ranges_are_half_open_and_bounded() {
        let (_dir, path) = trajectory_file();
        let all = Configurable::setup(settings(), &parameters(&path, ""), &env()).unwrap();
        assert_eq!(all.frames("frames").unwrap().indices, vec![0, 1, 2, 3, 4]);
        for range in ["{ first = 0, last = 6 }", "{ first = 3, last = 3 }", "{ step = 0 }"] {
            let result = Configurable::setup(settings(), &parameters(&path, &format!("frames = {range}")), &env());
            assert!(
                matches!(result, Err(ConfigurationError::InvalidValue { ref name, .. }) if name == "frames"),
                "{range} should be rejected"
            );
        }
    }

    #[test]
    fn invalid_optional_settings_leave_an_empty_slot() {
        let (_dir, path) = trajectory_file();
        let configured = Configurable::setup(
            settings(),
            &parameters(&path, "atom_transmutation = { 'element,H' = 'Unobtainium' }"),
            &env(),
        )
        .unwrap();
        assert!(!configured.contains("atom_transmutation"));
        assert!(configured.error_status("atom_transmutation").is_some());
        assert!(configured.weights("weights").is_ok());
    }

    #[test]
    fn cyclic_dependencies_are_unsatisfiable() {
        let settings = vec![
            Setting::new("a", SettingKind::Frames { trajectory: "b" }),
            Setting::new("b", SettingKind::AtomSelection { trajectory: "a" }),
        ];
        assert!(matches!(
            Configurable::setup(settings, &toml::Table::new(), &env()),
            Err(ConfigurationError::Unsatisfiable { pending }) if pending.len() == 2
        ));
    }

    #[test]
    fn every_kind_has_a_configure_function() {
        let names: BTreeSet<&str> = configurator_names().collect();
        assert_eq!(names.len(), 20);
        assert!(names.contains("hdf_trajectory"));
        assert!(names.contains("instrument_resolution"));
    }

    #[test]
    fn getters_check_the_slot_type() {
        let (_dir, path) = trajectory_file();
        let configured = Configurable::setup(settings(), &parameters(&path, ""), &env()).unwrap();
        assert!(matches!(
            configured.float("frames"),
            Err(ConfigurationError::WrongType { .. })
        ));
        assert!(matches!(configured.text("nothing"), Err(ConfigurationError::EmptySlot(_))));
    }
}
