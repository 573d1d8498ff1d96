//! HDF5 layout of the `.mda` results file.
//!
//! - root attributes: `format`, `info`, `variables` (names in insertion order, one per line)
//! - `/<variable>/data`: f64 dataset with the variable's shape
//! - `/<variable>` attributes: `kind`, `axis` (`|`-separated), `units`, `main_result`,
//!   `partial_result`

use super::{OutputData, OutputError, OutputVariable, VariableKind};
use hdf5::types::VarLenUnicode;
use hdf5::{File as H5File, Location};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const FORMAT: &str = "mdscatter-output/1";
const AXIS_SEPARATOR: char = '|';

struct Context<'a> {
    path: &'a Path,
}

impl Context<'_> {
    fn err(&self, source: hdf5::Error) -> OutputError {
        OutputError::Hdf5 {
            path: self.path.to_string_lossy().to_string(),
            source,
        }
    }

    fn write_text(&self, location: &Location, name: &str, value: &str) -> Result<(), OutputError> {
        let value = VarLenUnicode::from_str(value).map_err(|_| OutputError::Text(value.to_string()))?;
        location
            .new_attr::<VarLenUnicode>()
            .shape(())
            .create(name)
            .and_then(|attr| attr.write_scalar(&value))
            .map_err(|e| self.err(e))
    }

    fn write_flag(&self, location: &Location, name: &str, value: bool) -> Result<(), OutputError> {
        location
            .new_attr::<u8>()
            .shape(())
            .create(name)
            .and_then(|attr| attr.write_scalar(&u8::from(value)))
            .map_err(|e| self.err(e))
    }

    fn read_text(&self, location: &Location, name: &str) -> Result<String, OutputError> {
        location
            .attr(name)
            .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
            .map(|value| value.as_str().to_string())
            .map_err(|e| self.err(e))
    }

    fn read_flag(&self, location: &Location, name: &str) -> Result<bool, OutputError> {
        location
            .attr(name)
            .and_then(|attr| attr.read_scalar::<u8>())
            .map(|value| value != 0)
            .map_err(|e| self.err(e))
    }
}

fn parse_kind(text: &str) -> Option<VariableKind> {
    [VariableKind::Line, VariableKind::Surface, VariableKind::Volume]
        .into_iter()
        .find(|kind| kind.to_string() == text)
}

pub(super) fn write(data: &OutputData, path: &Path, info: &str) -> Result<(), OutputError> {
    let cx = Context { path };
    let file = H5File::create(path).map_err(|e| cx.err(e))?;
    cx.write_text(&file, "format", FORMAT)?;
    cx.write_text(&file, "info", info)?;
    let names: Vec<&str> = data.names().collect();
    cx.write_text(&file, "variables", &names.join("\n"))?;

    for variable in data.iter() {
        let group = file.create_group(&variable.name).map_err(|e| cx.err(e))?;
        group
            .new_dataset::<f64>()
            .shape(variable.shape.clone())
            .create("data")
            .and_then(|dataset| dataset.write_raw(variable.data.as_slice()))
            .map_err(|e| cx.err(e))?;
        cx.write_text(&group, "kind", &variable.kind.to_string())?;
        let axis = variable.axis.join(&AXIS_SEPARATOR.to_string());
        cx.write_text(&group, "axis", &axis)?;
        cx.write_text(&group, "units", &variable.units)?;
        cx.write_flag(&group, "main_result", variable.main_result)?;
        cx.write_flag(&group, "partial_result", variable.partial_result)?;
        debug!(variable = %variable.name, "Wrote HDF5 group");
    }
    file.flush().map_err(|e| cx.err(e))
}

pub(super) fn read(path: &Path) -> Result<(OutputData, String), OutputError> {
    let cx = Context { path };
    let file = H5File::open(path).map_err(|e| cx.err(e))?;
    let not_ours = || OutputError::NotAnOutputFile(path.to_string_lossy().to_string());
    if cx.read_text(&file, "format").map_err(|_| not_ours())? != FORMAT {
        return Err(not_ours());
    }
    let info = cx.read_text(&file, "info")?;

    let mut data = OutputData::new();
    for name in cx.read_text(&file, "variables")?.lines() {
        let group = file.group(name).map_err(|e| cx.err(e))?;
        let dataset = group.dataset("data").map_err(|e| cx.err(e))?;
        let kind = parse_kind(&cx.read_text(&group, "kind")?).ok_or_else(not_ours)?;
        data.add(OutputVariable {
            name: name.to_string(),
            kind,
            shape: dataset.shape(),
            data: dataset.read_raw::<f64>().map_err(|e| cx.err(e))?,
            axis: cx
                .read_text(&group, "axis")?
                .split(AXIS_SEPARATOR)
                .map(str::to_string)
                .collect(),
            units: cx.read_text(&group, "units")?,
            main_result: cx.read_flag(&group, "main_result")?,
            partial_result: cx.read_flag(&group, "partial_result")?,
        })?;
    }
    Ok((data, info))
}
