//! One configure function per setting kind.

use super::values::*;
use super::{ConfigurationError, ConfigureContext, Setting, SettingKind};
use crate::core::selection::AtomSelection;
use crate::core::trajectory::Trajectory;
use crate::engine::job::RunningMode;
use crate::engine::kernels::fft::angular_frequencies;
use crate::engine::output::OutputFormat;
use crate::engine::qvectors::QVectors;
use crate::engine::resolution::InstrumentResolution;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use toml::Value;
use tracing::{debug, warn};

type Outcome = Result<ConfiguredValue, ConfigurationError>;

fn required<'a>(setting: &Setting, value: Option<&'a Value>) -> Result<&'a Value, ConfigurationError> {
    value.ok_or_else(|| ConfigurationError::MissingParameter(setting.name.to_string()))
}

fn expect_str<'a>(setting: &Setting, value: &'a Value) -> Result<&'a str, ConfigurationError> {
    value
        .as_str()
        .ok_or_else(|| setting.invalid(format!("expected a string, got {}", value.type_str())))
}

fn expect_number(setting: &Setting, value: &Value) -> Result<f64, ConfigurationError> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Integer(i) => Ok(*i as f64),
        other => Err(setting.invalid(format!("expected a number, got {}", other.type_str()))),
    }
}

fn expect_integer(setting: &Setting, value: &Value, field: &str) -> Result<i64, ConfigurationError> {
    value
        .as_integer()
        .ok_or_else(|| setting.invalid(format!("'{field}' must be an integer")))
}

fn expect_table<'a>(setting: &Setting, value: &'a Value) -> Result<&'a toml::Table, ConfigurationError> {
    value
        .as_table()
        .ok_or_else(|| setting.invalid(format!("expected a table, got {}", value.type_str())))
}

/// Converts `amount` from `from` into the declared unit of the setting.
fn convert(
    setting: &Setting,
    ctx: &ConfigureContext,
    amount: f64,
    from: Option<&str>,
    declared: Option<&'static str>,
) -> Result<f64, ConfigurationError> {
    match (from, declared) {
        (None, _) => Ok(amount),
        (Some(from), Some(to)) => ctx
            .env
            .units
            .convert_equivalent(amount, from, to)
            .map_err(|e| setting.wrap(e)),
        (Some(from), None) => Err(setting.invalid(format!(
            "unit '{from}' given for a dimensionless parameter"
        ))),
    }
}

/// A plain number in the declared unit, or `{ value, unit }`.
fn quantity(
    setting: &Setting,
    ctx: &ConfigureContext,
    value: &Value,
    declared: Option<&'static str>,
) -> Result<f64, ConfigurationError> {
    match value {
        Value::Table(table) => {
            let amount = expect_number(setting, table.get("value").ok_or_else(|| {
                setting.invalid("a quantity table needs a 'value' field".to_string())
            })?)?;
            let unit = table.get("unit").map(|u| expect_str(setting, u)).transpose()?;
            convert(setting, ctx, amount, unit, declared)
        }
        other => expect_number(setting, other),
    }
}

fn check_bounds(setting: &Setting, x: f64, min: Option<f64>, max: Option<f64>) -> Result<(), ConfigurationError> {
    if let Some(min) = min.filter(|&min| x < min) {
        return Err(setting.invalid(format!("{x} is below the minimum {min}")));
    }
    if let Some(max) = max.filter(|&max| x > max) {
        return Err(setting.invalid(format!("{x} is above the maximum {max}")));
    }
    Ok(())
}

pub(super) fn trajectory(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let path = expect_str(setting, required(setting, value)?)?;
    let trajectory = Trajectory::open(path, &ctx.env.molecules).map_err(|e| setting.wrap(e))?;
    if trajectory.is_empty() {
        return Err(setting.invalid(format!("'{path}' holds no frame")));
    }
    trajectory
        .chemical_system()
        .validate_symbols(&ctx.env.elements)
        .map_err(|e| setting.wrap(e))?;
    Ok(ConfiguredValue::Trajectory(Arc::new(trajectory)))
}

pub(super) fn frames(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::Frames { trajectory } = setting.kind else {
        return Err(setting.mismatch());
    };
    let trajectory = ctx.trajectory(trajectory)?;
    let n = trajectory.len();

    let (first, last, step) = match value {
        None => (0, n, 1),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("all") => (0, n, 1),
        Some(value) => {
            let table = expect_table(setting, value)?;
            let field = |name: &str, default: i64| -> Result<i64, ConfigurationError> {
                table
                    .get(name)
                    .map(|v| expect_integer(setting, v, name))
                    .unwrap_or(Ok(default))
            };
            let first = field("first", 0)?;
            let last = field("last", n as i64)?;
            let step = field("step", 1)?;
            if first < 0 || last < 0 || step < 1 {
                return Err(setting.invalid(format!(
                    "first {first}, last {last} and step {step} must be non-negative with step >= 1"
                )));
            }
            (first as usize, last as usize, step as usize)
        }
    };
    if last > n {
        return Err(setting.invalid(format!("last frame {last} exceeds the {n} frames available")));
    }
    if first >= last {
        return Err(setting.invalid(format!("empty frame range {first}..{last}")));
    }

    let indices: Vec<usize> = (first..last).step_by(step).collect();
    let times: Vec<f64> = indices.iter().map(|&i| trajectory.times()[i]).collect();
    let relative_times = times.iter().map(|t| t - times[0]).collect();
    let time_step = if times.len() > 1 {
        times[1] - times[0]
    } else {
        1.0
    };
    Ok(ConfiguredValue::Frames(FramesValue {
        first,
        last,
        step,
        indices,
        times,
        relative_times,
        time_step,
    }))
}

pub(super) fn atom_selection(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::AtomSelection { trajectory } = setting.kind else {
        return Err(setting.mismatch());
    };
    let trajectory = ctx.trajectory(trajectory)?;
    let expression = match value {
        Some(v) => expect_str(setting, v)?,
        None => "all",
    };
    let system = trajectory.chemical_system();
    let indices = AtomSelection::parse(expression, &ctx.env.elements)
        .and_then(|selection| selection.evaluate(system))
        .map_err(|e| setting.wrap(e))?;
    let symbols = indices
        .iter()
        .map(|&i| system.atoms()[i].symbol.clone())
        .collect();
    Ok(ConfiguredValue::AtomSelection(AtomSelectionValue {
        expression: expression.to_string(),
        indices,
        symbols,
    }))
}

/// `{ "<selection expression>" = "<element>" }`: every matched atom takes the new element.
pub(super) fn atom_transmutation(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::AtomTransmutation { selection } = setting.kind else {
        return Err(setting.mismatch());
    };
    let selected = ctx.atom_selection(selection)?;
    let trajectory = ctx.trajectory_of_selection(selection)?;
    let mut transmutation = BTreeMap::new();
    let Some(value) = value else {
        return Ok(ConfiguredValue::Transmutation(transmutation));
    };
    for (expression, element) in expect_table(setting, value)? {
        let element = expect_str(setting, element)?;
        let symbol = ctx
            .env
            .elements
            .get(element)
            .map(|e| e.symbol.clone())
            .ok_or_else(|| setting.invalid(format!("unknown element '{element}'")))?;
        let indices = AtomSelection::parse(expression, &ctx.env.elements)
            .and_then(|s| s.evaluate(trajectory.chemical_system()))
            .map_err(|e| setting.wrap(e))?;
        let mut changed = 0;
        for index in indices {
            if selected.indices.binary_search(&index).is_ok() {
                transmutation.insert(index, symbol.clone());
                changed += 1;
            }
        }
        debug!(expression = %expression, element = %symbol, changed, "Transmuted atoms");
    }
    Ok(ConfiguredValue::Transmutation(transmutation))
}

pub(super) fn weights(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::Weights {
        selection,
        transmutation,
    } = setting.kind
    else {
        return Err(setting.mismatch());
    };
    let property = match value {
        Some(v) => expect_str(setting, v)?,
        None => "equal",
    };
    let mut selected = ctx.atom_selection(selection)?.clone();
    if let Some(name) = transmutation {
        match ctx.transmutation(name) {
            Ok(map) => selected = selected.transmuted(map),
            Err(ConfigurationError::EmptySlot(_)) => {}
            Err(e) => return Err(e),
        }
    }
    let values = selected
        .elements()
        .into_iter()
        .map(|element| {
            ctx.env
                .elements
                .property(&element, property)
                .map(|w| (element, w))
                .map_err(|e| setting.wrap(e))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(ConfiguredValue::Weights(WeightsValue {
        property: property.to_string(),
        values,
    }))
}

fn find_choice(setting: &Setting, choices: &[&'static str], candidate: &str) -> Result<String, ConfigurationError> {
    choices
        .iter()
        .find(|c| c.eq_ignore_ascii_case(candidate))
        .map(|c| c.to_string())
        .ok_or_else(|| setting.invalid(format!("'{candidate}' is not one of {choices:?}")))
}

pub(super) fn single_choice(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let SettingKind::SingleChoice { choices } = setting.kind else {
        return Err(setting.mismatch());
    };
    let candidate = expect_str(setting, required(setting, value)?)?;
    Ok(ConfiguredValue::Choice(find_choice(setting, choices, candidate)?))
}

pub(super) fn multiple_choices(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let SettingKind::MultipleChoices { choices } = setting.kind else {
        return Err(setting.mismatch());
    };
    let value = required(setting, value)?;
    let items = value
        .as_array()
        .ok_or_else(|| setting.invalid("expected an array of strings".to_string()))?;
    let mut picked = Vec::with_capacity(items.len());
    for item in items {
        let choice = find_choice(setting, choices, expect_str(setting, item)?)?;
        if !picked.contains(&choice) {
            picked.push(choice);
        }
    }
    if picked.is_empty() {
        return Err(setting.invalid("at least one choice is required".to_string()));
    }
    Ok(ConfiguredValue::Choices(picked))
}

/// `{ first, last, step, unit? }`.
pub(super) fn range(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::Range {
        unit,
        inclusive,
        min,
    } = setting.kind
    else {
        return Err(setting.mismatch());
    };
    let table = expect_table(setting, required(setting, value)?)?;
    let from = table.get("unit").map(|u| expect_str(setting, u)).transpose()?;
    let field = |name: &str| -> Result<f64, ConfigurationError> {
        let raw = table
            .get(name)
            .ok_or_else(|| setting.invalid(format!("missing '{name}'")))?;
        convert(setting, ctx, expect_number(setting, raw)?, from, unit)
    };
    let (first, last, step) = (field("first")?, field("last")?, field("step")?);
    if !(step > 0.0) {
        return Err(setting.invalid(format!("step must be positive, got {step}")));
    }
    check_bounds(setting, first, min, None)?;

    let span = (last - first) / step;
    let count = if inclusive {
        (span + 1e-9).floor() as i64 + 1
    } else {
        (span - 1e-9).ceil() as i64
    };
    if count <= 0 {
        return Err(setting.invalid(format!("empty range from {first} to {last}")));
    }
    let values = (0..count).map(|i| first + i as f64 * step).collect();
    Ok(ConfiguredValue::Range(RangeValue {
        first,
        last,
        step,
        values,
    }))
}

pub(super) fn float(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::Float { unit, min, max } = setting.kind else {
        return Err(setting.mismatch());
    };
    let x = quantity(setting, ctx, required(setting, value)?, unit)?;
    check_bounds(setting, x, min, max)?;
    Ok(ConfiguredValue::Float(x))
}

pub(super) fn integer(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let SettingKind::Integer { min, max } = setting.kind else {
        return Err(setting.mismatch());
    };
    let x = expect_integer(setting, required(setting, value)?, setting.name)?;
    check_bounds(setting, x as f64, min.map(|m| m as f64), max.map(|m| m as f64))?;
    Ok(ConfiguredValue::Integer(x))
}

pub(super) fn boolean(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let value = required(setting, value)?;
    value
        .as_bool()
        .map(ConfiguredValue::Boolean)
        .ok_or_else(|| setting.invalid(format!("expected a boolean, got {}", value.type_str())))
}

pub(super) fn text(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let s = expect_str(setting, required(setting, value)?)?;
    Ok(ConfiguredValue::Text(s.to_string()))
}

pub(super) fn vector(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let SettingKind::Vector { normalize } = setting.kind else {
        return Err(setting.mismatch());
    };
    let items = required(setting, value)?
        .as_array()
        .filter(|a| a.len() == 3)
        .ok_or_else(|| setting.invalid("expected an array of three numbers".to_string()))?;
    let components = items
        .iter()
        .map(|v| expect_number(setting, v))
        .collect::<Result<Vec<_>, _>>()?;
    let mut vector = Vector3::new(components[0], components[1], components[2]);
    if normalize {
        vector = vector
            .try_normalize(1e-12)
            .ok_or_else(|| setting.invalid("cannot normalize a zero vector".to_string()))?;
    }
    Ok(ConfiguredValue::Vector(vector))
}

fn names_of(setting: &Setting, value: &Value) -> Result<Vec<String>, ConfigurationError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| expect_str(setting, v).map(str::to_string))
            .collect(),
        other => Err(setting.invalid(format!("expected a name or a list of names, got {}", other.type_str()))),
    }
}

/// Top-level entities whose template code or name matches, case-insensitively.
fn matching_entities(trajectory: &Trajectory, names: &[String]) -> Vec<Vec<usize>> {
    let system = trajectory.chemical_system();
    system
        .top_level_entities()
        .iter()
        .filter_map(|&id| {
            let entity = system.entity(id)?;
            let matches = names.iter().any(|n| {
                entity.name.eq_ignore_ascii_case(n) || entity.code().is_some_and(|c| c.eq_ignore_ascii_case(n))
            });
            matches.then(|| system.entity_atom_indices(id))
        })
        .collect()
}

pub(super) fn molecule_selection(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::MoleculeSelection { trajectory } = setting.kind else {
        return Err(setting.mismatch());
    };
    let trajectory = ctx.trajectory(trajectory)?;
    let names = names_of(setting, required(setting, value)?)?;
    let molecules = matching_entities(trajectory, &names);
    if molecules.is_empty() {
        return Err(setting.invalid(format!("no molecule named {names:?}")));
    }
    Ok(ConfiguredValue::Molecules(MoleculeSelectionValue { names, molecules }))
}

/// `{ molecule, origin, x_axis, y_axis }`, the last three being atom names.
pub(super) fn basis_selection(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::BasisSelection { trajectory } = setting.kind else {
        return Err(setting.mismatch());
    };
    let trajectory = ctx.trajectory(trajectory)?;
    let table = expect_table(setting, required(setting, value)?)?;
    let field = |name: &str| -> Result<&str, ConfigurationError> {
        table
            .get(name)
            .ok_or_else(|| setting.invalid(format!("missing '{name}'")))
            .and_then(|v| expect_str(setting, v))
    };
    let molecule = field("molecule")?;
    let atom_names = [field("origin")?, field("x_axis")?, field("y_axis")?];

    let system = trajectory.chemical_system();
    let mut triples = Vec::new();
    for atoms in matching_entities(trajectory, &[molecule.to_string()]) {
        let mut triple = [0; 3];
        for (slot, name) in triple.iter_mut().zip(atom_names) {
            *slot = atoms
                .iter()
                .copied()
                .find(|&i| system.atoms()[i].name.eq_ignore_ascii_case(name))
                .ok_or_else(|| setting.invalid(format!("molecule '{molecule}' has no atom '{name}'")))?;
        }
        triples.push(triple);
    }
    if triples.is_empty() {
        return Err(setting.invalid(format!("no molecule named '{molecule}'")));
    }
    Ok(ConfiguredValue::Basis(BasisValue {
        molecule: molecule.to_string(),
        triples,
    }))
}

/// `{ root, formats = [...] }`; formats default to MDA.
pub(super) fn output_files(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let table = expect_table(setting, required(setting, value)?)?;
    let root = table
        .get("root")
        .ok_or_else(|| setting.invalid("missing 'root'".to_string()))
        .and_then(|v| expect_str(setting, v))?;
    if root.trim().is_empty() {
        return Err(setting.invalid("'root' is empty".to_string()));
    }
    let formats = match table.get("formats") {
        None => vec![OutputFormat::Mda],
        Some(v) => {
            let mut formats = Vec::new();
            for name in names_of(setting, v)? {
                let format: OutputFormat = name.parse().map_err(|e| setting.wrap(e))?;
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
            formats
        }
    };
    if formats.is_empty() {
        return Err(setting.invalid("no output format requested".to_string()));
    }
    Ok(ConfiguredValue::OutputFiles(OutputFilesValue {
        root: PathBuf::from(root),
        formats,
    }))
}

/// `"monoprocessor"`, `"multiprocessor"` or `{ mode, workers }`; defaults to the environment.
pub(super) fn running_mode(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let mode: RunningMode = match value {
        None => ctx.env.running_mode,
        Some(Value::String(s)) => Value::Table(toml::Table::from_iter([(
            "mode".to_string(),
            Value::String(s.to_lowercase()),
        )]))
        .try_into()
        .map_err(|e| setting.wrap(e))?,
        Some(other) => other.clone().try_into().map_err(|e| setting.wrap(e))?,
    };
    Ok(ConfiguredValue::RunningMode(mode))
}

pub(super) fn input_file(setting: &Setting, value: Option<&Value>, _ctx: &ConfigureContext) -> Outcome {
    let path = PathBuf::from(expect_str(setting, required(setting, value)?)?);
    if !path.is_file() {
        return Err(setting.invalid(format!("'{}' is not a readable file", path.display())));
    }
    Ok(ConfiguredValue::Path(path))
}

/// A tagged generator table; lattice generators use the cell of the first frame.
pub(super) fn q_vectors(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::QVectors { trajectory } = setting.kind else {
        return Err(setting.mismatch());
    };
    let trajectory = ctx.trajectory(trajectory)?;
    let generator: QVectors = required(setting, value)?
        .clone()
        .try_into()
        .map_err(|e| setting.wrap(e))?;
    let cell = if generator.is_lattice() {
        trajectory.unit_cell(0).map_err(|e| setting.wrap(e))?
    } else {
        None
    };
    let set = generator.generate(cell.as_ref(), None).map_err(|e| setting.wrap(e))?;
    Ok(ConfiguredValue::QVectors(QVectorsValue { generator, set }))
}

/// A tagged resolution table. `mu` and `sigma` are in rad/ps unless a `unit` is given.
pub(super) fn instrument_resolution(setting: &Setting, value: Option<&Value>, ctx: &ConfigureContext) -> Outcome {
    let SettingKind::InstrumentResolution { frames } = setting.kind else {
        return Err(setting.mismatch());
    };
    let frames = ctx.frames(frames)?;
    let resolution: InstrumentResolution = match value {
        None => InstrumentResolution::Ideal,
        Some(value) => {
            let mut table = expect_table(setting, value)?.clone();
            if let Some(unit) = table.remove("unit") {
                let unit = expect_str(setting, &unit)?.to_string();
                for (key, field) in table.iter_mut().filter(|(k, _)| k.starts_with("mu") || k.starts_with("sigma")) {
                    let amount = expect_number(setting, field)?;
                    let converted = convert(setting, ctx, amount, Some(&unit), Some("rad/ps"))?;
                    debug!(field = %key, amount, converted, "Converted resolution parameter");
                    *field = Value::Float(converted);
                }
            }
            Value::Table(table).try_into().map_err(|e| setting.wrap(e))?
        }
    };
    if frames.len() < 2 {
        warn!(frames = frames.len(), "Resolution kernel built over a single frame");
    }
    let omegas = angular_frequencies(frames.len(), frames.time_step);
    let kernel = resolution
        .set_kernel(&omegas, frames.time_step)
        .map_err(|e| setting.wrap(e))?;
    Ok(ConfiguredValue::Resolution(ResolutionValue {
        resolution,
        omegas,
        kernel,
    }))
}
