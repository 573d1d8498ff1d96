use super::{OutputData, OutputError, OutputWriter};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const MAGIC: &str = "MDSCOUT1";

#[derive(Deserialize)]
struct MdaFile {
    magic: String,
    info: String,
    data: OutputData,
}

/// Borrowed twin of [`MdaFile`] with the same encoding.
#[derive(Serialize)]
struct MdaFileRef<'a> {
    magic: &'a str,
    info: &'a str,
    data: &'a OutputData,
}

/// The `{root}.mda` results file.
///
/// With the `hdf5` feature the file is HDF5: one group per variable holding a `data`
/// dataset plus `kind`, `axis`, `units`, `main_result` and `partial_result` attributes,
/// and the info text as a root attribute. Without it the same contents are stored as a
/// single bincode record.
pub struct MdaFormat;

impl MdaFormat {
    pub fn path_for(root: &Path) -> PathBuf {
        let mut name = root.as_os_str().to_owned();
        name.push(".mda");
        PathBuf::from(name)
    }

    /// Reads back a file written by [`MdaFormat`], returning the data and its info text.
    pub fn read(path: &Path) -> Result<(OutputData, String), OutputError> {
        #[cfg(feature = "hdf5")]
        return super::h5::read(path);
        #[cfg(not(feature = "hdf5"))]
        read_binary(path)
    }
}

impl OutputWriter for MdaFormat {
    fn write(data: &OutputData, root: &Path, info: &str) -> Result<PathBuf, OutputError> {
        let path = Self::path_for(root);
        #[cfg(feature = "hdf5")]
        super::h5::write(data, &path, info)?;
        #[cfg(not(feature = "hdf5"))]
        write_binary(data, &path, info)?;
        Ok(path)
    }
}

/// Fixed-width integers, the layout `bincode::serialize` uses.
#[cfg_attr(feature = "hdf5", allow(dead_code))]
fn encoding() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

#[cfg_attr(feature = "hdf5", allow(dead_code))]
pub(crate) fn write_binary(data: &OutputData, path: &Path, info: &str) -> Result<(), OutputError> {
    let file = File::create(path).map_err(|e| OutputError::io(path, e))?;
    let contents = MdaFileRef {
        magic: MAGIC,
        info,
        data,
    };
    let mut writer = BufWriter::new(file);
    encoding()
        .serialize_into(&mut writer, &contents)
        .map_err(|source| OutputError::Encode {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
    writer.flush().map_err(|e| OutputError::io(path, e))
}

/// Decodes with every length prefix bounded by the file size.
#[cfg_attr(feature = "hdf5", allow(dead_code))]
pub(crate) fn read_binary(path: &Path) -> Result<(OutputData, String), OutputError> {
    let bytes = std::fs::read(path).map_err(|e| OutputError::io(path, e))?;
    let decoded: MdaFile = encoding()
        .with_limit(bytes.len() as u64)
        .reject_trailing_bytes()
        .deserialize(&bytes)
        .map_err(|source| OutputError::Decode {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
    if decoded.magic != MAGIC {
        return Err(OutputError::NotAnOutputFile(path.to_string_lossy().to_string()));
    }
    Ok((decoded.data, decoded.info))
}

#[cfg(test)]
mod tests {
    use super::super::OutputVariable;
    use super::*;
    use tempfile::tempdir;

    fn sample() -> OutputData {
        let mut data = OutputData::new();
        data.add(OutputVariable::line("q", vec![1.0, 2.0]).units("nm^-1")).unwrap();
        data.add(
            OutputVariable::surface("s(q,f)_total", [2, 2], vec![0.5, 0.25, 0.125, 0.0625])
                .axis(&["q", "omega"])
                .main_result(),
        )
        .unwrap();
        data
    }

    #[test]
    fn written_files_read_back_identically() {
        let dir = tempdir().unwrap();
        let data = sample();
        let path = MdaFormat::write(&data, &dir.path().join("run"), "analysis: test").unwrap();
        assert_eq!(path, dir.path().join("run.mda"));
        let (read, info) = MdaFormat::read(&path).unwrap();
        assert_eq!(read, data);
        assert_eq!(info, "analysis: test");
    }

    mod binary_records {
        use super::*;

        #[test]
        fn junk_bytes_are_a_decode_error() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("junk.mda");
            std::fs::write(&path, b"definitely not bincode").unwrap();
            assert!(matches!(read_binary(&path), Err(OutputError::Decode { .. })));
        }

        #[test]
        fn huge_length_prefix_is_rejected_without_allocating() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("huge.mda");
            let mut bytes = u64::MAX.to_le_bytes().to_vec();
            bytes.extend_from_slice(b"MDSCOUT1");
            std::fs::write(&path, bytes).unwrap();
            assert!(matches!(read_binary(&path), Err(OutputError::Decode { .. })));
        }

        #[test]
        fn truncated_file_is_rejected() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("cut.mda");
            write_binary(&sample(), &path, "info").unwrap();
            let bytes = std::fs::read(&path).unwrap();
            std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
            assert!(read_binary(&path).is_err());
        }

        #[test]
        fn trailing_bytes_are_rejected() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("long.mda");
            write_binary(&sample(), &path, "info").unwrap();
            let mut bytes = std::fs::read(&path).unwrap();
            bytes.extend_from_slice(&[0, 1, 2]);
            std::fs::write(&path, bytes).unwrap();
            assert!(read_binary(&path).is_err());
        }

        #[test]
        fn wrong_magic_is_not_an_output_file() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("other.mda");
            let contents = MdaFileRef {
                magic: "SOMETHIN",
                info: "",
                data: &OutputData::new(),
            };
            std::fs::write(&path, encoding().serialize(&contents).unwrap()).unwrap();
            assert!(matches!(read_binary(&path), Err(OutputError::NotAnOutputFile(_))));
        }
    }
}
