//! Named, axis-tagged analysis results and their file formats.

#[cfg(feature = "hdf5")]
mod h5;
pub mod mda;
pub mod text;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub use mda::MdaFormat;
pub use text::TextFormat;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot encode '{path}': {source}")]
    Encode {
        path: String,
        #[source]
        source: bincode::Error,
    },

    #[error("Cannot decode '{path}': {source}")]
    Decode {
        path: String,
        #[source]
        source: bincode::Error,
    },

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error on '{path}': {source}")]
    Hdf5 {
        path: String,
        #[source]
        source: hdf5::Error,
    },

    #[cfg(feature = "hdf5")]
    #[error("Cannot store '{0}' as HDF5 text")]
    Text(String),

    #[error("'{0}' is not an analysis output file")]
    NotAnOutputFile(String),

    #[error("Cannot write table '{path}': {source}")]
    Table {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Output variable '{0}' already exists")]
    DuplicateVariable(String),

    #[error("Unknown output variable '{0}'")]
    UnknownVariable(String),

    #[error("Variable '{name}' has shape {shape:?} but holds {found} values")]
    Shape {
        name: String,
        shape: Vec<usize>,
        found: usize,
    },

    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),
}

impl OutputError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}

/// Dimensionality of an output variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    Line,
    Surface,
    Volume,
}

impl VariableKind {
    pub fn rank(&self) -> usize {
        match self {
            Self::Line => 1,
            Self::Surface => 2,
            Self::Volume => 3,
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Line => "LineOutputVariable",
            Self::Surface => "SurfaceOutputVariable",
            Self::Volume => "VolumeOutputVariable",
        };
        f.write_str(name)
    }
}

/// One result array, stored flat in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputVariable {
    pub name: String,
    pub kind: VariableKind,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    /// Names of sibling variables indexing each dimension; `"index"` for a bare index.
    pub axis: Vec<String>,
    pub units: String,
    pub main_result: bool,
    pub partial_result: bool,
}

impl OutputVariable {
    fn with_shape(name: impl Into<String>, kind: VariableKind, shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind,
            axis: vec!["index".to_string(); shape.len()],
            shape,
            data,
            units: "au".to_string(),
            main_result: false,
            partial_result: false,
        }
    }

    pub fn line(name: impl Into<String>, data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        Self::with_shape(name, VariableKind::Line, shape, data)
    }

    pub fn surface(name: impl Into<String>, shape: [usize; 2], data: Vec<f64>) -> Self {
        Self::with_shape(name, VariableKind::Surface, shape.to_vec(), data)
    }

    pub fn volume(name: impl Into<String>, shape: [usize; 3], data: Vec<f64>) -> Self {
        Self::with_shape(name, VariableKind::Volume, shape.to_vec(), data)
    }

    pub fn axis(mut self, axis: &[&str]) -> Self {
        self.axis = axis.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = units.to_string();
        self
    }

    pub fn main_result(mut self) -> Self {
        self.main_result = true;
        self
    }

    pub fn partial_result(mut self) -> Self {
        self.partial_result = true;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check(&self) -> Result<(), OutputError> {
        let expected: usize = self.shape.iter().product();
        if self.shape.len() != self.kind.rank() || expected != self.data.len() {
            return Err(OutputError::Shape {
                name: self.name.clone(),
                shape: self.shape.clone(),
                found: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Result variables in insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputData {
    variables: Vec<OutputVariable>,
}

impl OutputData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable after checking its shape; names are unique.
    pub fn add(&mut self, variable: OutputVariable) -> Result<(), OutputError> {
        variable.check()?;
        if self.contains(&variable.name) {
            return Err(OutputError::DuplicateVariable(variable.name));
        }
        self.variables.push(variable);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&OutputVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut OutputVariable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    /// Mutable values of `name`.
    pub fn data_mut(&mut self, name: &str) -> Result<&mut [f64], OutputError> {
        self.get_mut(name)
            .map(|v| v.data.as_mut_slice())
            .ok_or_else(|| OutputError::UnknownVariable(name.to_string()))
    }

    /// Replaces the values of `name`, keeping its shape.
    pub fn set_data(&mut self, name: &str, data: Vec<f64>) -> Result<(), OutputError> {
        let variable = self
            .get_mut(name)
            .ok_or_else(|| OutputError::UnknownVariable(name.to_string()))?;
        let previous = std::mem::replace(&mut variable.data, data);
        if let Err(e) = variable.check() {
            variable.data = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputVariable> {
        self.variables.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Writes every requested format under `root` and returns the created paths.
    pub fn write(
        &self,
        root: &Path,
        formats: &[OutputFormat],
        info: &str,
    ) -> Result<Vec<PathBuf>, OutputError> {
        for variable in &self.variables {
            for axis in variable.axis.iter().filter(|a| a.as_str() != "index") {
                if !self.contains(axis) {
                    warn!(variable = %variable.name, axis = %axis, "Output axis names no variable");
                }
            }
        }
        if let Some(parent) = root.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| OutputError::io(parent, e))?;
        }
        let mut written = Vec::with_capacity(formats.len());
        for format in formats {
            let path = match format {
                OutputFormat::Mda => MdaFormat::write(self, root, info)?,
                OutputFormat::Text => TextFormat::write(self, root, info)?,
            };
            info!(format = %format, path = %path.display(), "Wrote analysis results");
            written.push(path);
        }
        Ok(written)
    }
}

/// A file format for [`OutputData`].
///
/// Writers never modify the data they are given.
pub trait OutputWriter {
    /// Writes `data` next to `root` and returns the path of what was created.
    fn write(data: &OutputData, root: &Path, info: &str) -> Result<PathBuf, OutputError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Mda,
    Text,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mda => f.write_str("MDAFormat"),
            Self::Text => f.write_str("TextFormat"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mdaformat" | "mda" => Ok(Self::Mda),
            "textformat" | "text" => Ok(Self::Text),
            _ => Err(OutputError::UnknownFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_keep_insertion_order_and_unique_names() {
        let mut output = OutputData::new();
        output.add(OutputVariable::line("time", vec![0.0, 1.0])).unwrap();
        output
            .add(OutputVariable::line("msd", vec![0.0, 2.0]).axis(&["time"]).units("nm2").main_result())
            .unwrap();
        assert_eq!(output.names().collect::<Vec<_>>(), vec!["time", "msd"]);
        assert!(output.get("msd").unwrap().main_result);
        assert!(matches!(
            output.add(OutputVariable::line("time", vec![])),
            Err(OutputError::DuplicateVariable(_))
        ));
    }

    #[test]
    fn shapes_are_checked() {
        let mut output = OutputData::new();
        assert!(matches!(
            output.add(OutputVariable::surface("s", [2, 3], vec![0.0; 5])),
            Err(OutputError::Shape { .. })
        ));
        output.add(OutputVariable::surface("s", [2, 3], vec![0.0; 6])).unwrap();
        assert!(output.set_data("s", vec![1.0; 4]).is_err());
        assert_eq!(output.get("s").unwrap().data, vec![0.0; 6]);
        output.data_mut("s").unwrap()[5] = 2.0;
        assert_eq!(output.get("s").unwrap().data[5], 2.0);
    }

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!("MDAFormat".parse::<OutputFormat>().unwrap(), OutputFormat::Mda);
        assert_eq!("textformat".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("HDF".parse::<OutputFormat>().is_err());
    }
}
