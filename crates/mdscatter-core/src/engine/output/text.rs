use super::{OutputData, OutputError, OutputVariable, OutputWriter, VariableKind};
use csv::WriterBuilder;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A directory `{root}_text/` with one space-separated `.dat` file per variable.
///
/// Each file starts with `#` comment lines (the info text, then name, kind, shape, axis
/// and units). A line variable whose axis is a sibling line of the same length is
/// written as two columns, axis first. Surfaces are written one row per line, volumes
/// as consecutive slabs along the first dimension.
pub struct TextFormat;

impl TextFormat {
    pub fn directory_for(root: &Path) -> PathBuf {
        let mut name = root.as_os_str().to_owned();
        name.push("_text");
        PathBuf::from(name)
    }
}

fn file_name(variable: &str) -> String {
    let stem: String = variable
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}.dat")
}

fn write_header(out: &mut impl Write, variable: &OutputVariable, info: &str) -> std::io::Result<()> {
    for line in info.lines() {
        writeln!(out, "# {line}")?;
    }
    writeln!(out, "# variable: {}", variable.name)?;
    writeln!(out, "# kind: {}", variable.kind)?;
    let shape: Vec<String> = variable.shape.iter().map(|s| s.to_string()).collect();
    writeln!(out, "# shape: {}", shape.join(" x "))?;
    writeln!(out, "# axis: {}", variable.axis.join(", "))?;
    writeln!(out, "# units: {}", variable.units)?;
    writeln!(out, "# main_result: {}", variable.main_result)
}

fn write_variable(
    path: &Path,
    variable: &OutputVariable,
    data: &OutputData,
    info: &str,
) -> Result<(), OutputError> {
    let io_error = |e| OutputError::io(path, e);
    let table_error = |source| OutputError::Table {
        path: path.to_string_lossy().to_string(),
        source,
    };

    let mut file = BufWriter::new(File::create(path).map_err(io_error)?);
    write_header(&mut file, variable, info).map_err(io_error)?;
    let mut table = WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_writer(file);
    let row = |values: &[f64]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    match variable.kind {
        VariableKind::Line => {
            let axis = variable
                .axis
                .first()
                .and_then(|a| data.get(a))
                .filter(|a| a.kind == VariableKind::Line && a.len() == variable.len() && a.name != variable.name);
            match axis {
                Some(axis) => {
                    for (x, y) in axis.data.iter().zip(&variable.data) {
                        table.write_record(row(&[*x, *y])).map_err(table_error)?;
                    }
                }
                None => {
                    for value in &variable.data {
                        table.write_record(row(&[*value])).map_err(table_error)?;
                    }
                }
            }
        }
        VariableKind::Surface => {
            for values in variable.data.chunks(variable.shape[1].max(1)) {
                table.write_record(row(values)).map_err(table_error)?;
            }
        }
        VariableKind::Volume => {
            let slab = variable.shape[1] * variable.shape[2];
            for (i, values) in variable.data.chunks(slab.max(1)).enumerate() {
                let label = i.to_string();
                table.write_record(["#", "slab", label.as_str()]).map_err(table_error)?;
                for line in values.chunks(variable.shape[2].max(1)) {
                    table.write_record(row(line)).map_err(table_error)?;
                }
            }
        }
    }
    table.flush().map_err(io_error)
}

impl OutputWriter for TextFormat {
    fn write(data: &OutputData, root: &Path, info: &str) -> Result<PathBuf, OutputError> {
        let directory = Self::directory_for(root);
        std::fs::create_dir_all(&directory).map_err(|e| OutputError::io(&directory, e))?;
        for variable in data.iter() {
            write_variable(&directory.join(file_name(&variable.name)), variable, data, info)?;
        }
        Ok(directory)
    }
}
