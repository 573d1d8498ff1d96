use super::TrajectoryError;
use super::container::{
    FORMAT_VERSION, FRAME_COUNT_OFFSET, FrameLayout, FrameRecord, TrajectoryHeader, write_preamble,
};
use crate::core::geometry::configuration::{Configuration, FORCES, VELOCITIES};
use crate::core::models::serialization::SystemTables;
use crate::core::models::system::ChemicalSystem;
use crate::core::units::{UnitManager, canonical};
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Units of the configurations handed to [`TrajectoryWriter::dump_configuration`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableUnits {
    pub time: String,
    pub length: String,
    pub velocity: String,
    pub force: String,
}

impl Default for VariableUnits {
    fn default() -> Self {
        Self {
            time: canonical::TIME.to_string(),
            length: canonical::LENGTH.to_string(),
            velocity: canonical::VELOCITY.to_string(),
            force: canonical::FORCE.to_string(),
        }
    }
}

/// Which optional datasets a new trajectory stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameContents {
    pub periodic: bool,
    pub velocities: bool,
    pub forces: bool,
}

impl FrameContents {
    /// The datasets carried by `configuration`.
    pub fn of(configuration: &Configuration) -> Self {
        Self {
            periodic: configuration.is_periodic(),
            velocities: configuration.has_variable(VELOCITIES),
            forces: configuration.has_variable(FORCES),
        }
    }
}

struct ConversionFactors {
    time: f64,
    length: f64,
    velocity: f64,
    force: f64,
}

/// Appends frames to a new trajectory file.
///
/// The frame count in the preamble is patched by [`close`](Self::close). A writer that
/// is dropped without being closed finalizes the file itself and logs a warning, so an
/// early return or a cancelled import still leaves a readable, shorter trajectory.
pub struct TrajectoryWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    layout: FrameLayout,
    capacity: usize,
    written: u64,
    units: UnitManager,
    buffer: Vec<u8>,
}

impl TrajectoryWriter {
    /// Creates the file and writes the header for `system`.
    ///
    /// # Arguments
    ///
    /// * `path` - Destination file, truncated if it exists.
    /// * `system` - The chemical system every frame refers to.
    /// * `n_frames` - Number of frames the caller intends to write.
    /// * `contents` - Optional datasets stored with each frame.
    pub fn create(
        path: impl AsRef<Path>,
        system: &ChemicalSystem,
        n_frames: usize,
        contents: FrameContents,
    ) -> Result<Self, TrajectoryError> {
        let path = path.as_ref().to_path_buf();
        let layout = FrameLayout {
            n_atoms: system.total_number_of_atoms(),
            periodic: contents.periodic,
            velocities: contents.velocities,
            forces: contents.forces,
        };
        let header = TrajectoryHeader {
            format_version: FORMAT_VERSION,
            creator: format!("mdscatter {}", env!("CARGO_PKG_VERSION")),
            chemical_system: SystemTables::from_system(system),
            layout,
        };
        let header_bytes = bincode::serialize(&header).map_err(|e| TrajectoryError::Header {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        let file = File::create(&path).map_err(|e| TrajectoryError::io(&path, e))?;
        let mut file = BufWriter::new(file);
        write_preamble(&mut file, 0, header_bytes.len() as u64)
            .and_then(|_| file.write_all(&header_bytes))
            .map_err(|e| TrajectoryError::io(&path, e))?;
        debug!(path = %path.display(), n_frames, n_atoms = layout.n_atoms, "Created trajectory");

        Ok(Self {
            path,
            file: Some(file),
            layout,
            capacity: n_frames,
            written: 0,
            units: UnitManager::new(),
            buffer: Vec::with_capacity(layout.record_len() as usize),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn frames_written(&self) -> usize {
        self.written as usize
    }

    fn factors(&self, units: &VariableUnits) -> Result<ConversionFactors, TrajectoryError> {
        Ok(ConversionFactors {
            time: self.units.conversion_factor(&units.time, canonical::TIME)?,
            length: self.units.conversion_factor(&units.length, canonical::LENGTH)?,
            velocity: self
                .units
                .conversion_factor(&units.velocity, canonical::VELOCITY)?,
            force: self.units.conversion_factor(&units.force, canonical::FORCE)?,
        })
    }

    /// Appends the active configuration of `system` as the next frame.
    ///
    /// Values are converted from `units` into canonical storage units.
    ///
    /// # Errors
    ///
    /// Fails if the system has no configuration, if the configuration does not match the
    /// layout declared at creation, if `n_frames` frames were already written, or if a
    /// unit cannot be converted.
    pub fn dump_configuration(
        &mut self,
        system: &ChemicalSystem,
        time: f64,
        units: &VariableUnits,
    ) -> Result<(), TrajectoryError> {
        let configuration = system
            .configuration()
            .ok_or(TrajectoryError::MissingConfiguration)?;
        self.dump(configuration, time, units)
    }

    /// Appends `configuration` as the next frame.
    pub fn dump(
        &mut self,
        configuration: &Configuration,
        time: f64,
        units: &VariableUnits,
    ) -> Result<(), TrajectoryError> {
        if self.written as usize >= self.capacity {
            return Err(TrajectoryError::WriterFull {
                path: self.path.to_string_lossy().to_string(),
                n_frames: self.capacity,
            });
        }
        let factors = self.factors(units)?;
        let scaled = |values: Option<&[Vector3<f64>]>, factor: f64| {
            values.map(|v| v.iter().map(|r| r * factor).collect::<Vec<_>>())
        };
        let record = FrameRecord {
            time: time * factors.time,
            unit_cell: configuration.unit_cell().map(|cell| {
                cell.to_rows()
                    .map(|row| row.map(|value| value * factors.length))
            }),
            coordinates: scaled(
                Some(configuration.to_real_coordinates().as_slice()),
                factors.length,
            )
                .unwrap_or_default(),
            velocities: scaled(configuration.variable(VELOCITIES), factors.velocity)
                .filter(|_| self.layout.velocities),
            forces: scaled(configuration.variable(FORCES), factors.force)
                .filter(|_| self.layout.forces),
        };
        self.append(&record)
    }

    /// Appends a record already expressed in canonical units.
    pub fn append(&mut self, record: &FrameRecord) -> Result<(), TrajectoryError> {
        let index = self.written as usize;
        record.check_layout(&self.layout, index)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| TrajectoryError::io(&self.path, std::io::ErrorKind::BrokenPipe.into()))?;
        self.buffer.clear();
        record.encode(&mut self.buffer);
        file.write_all(&self.buffer)
            .map_err(|e| TrajectoryError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrajectoryError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let path = &self.path;
        file.flush().map_err(|e| TrajectoryError::io(path, e))?;
        let mut file = file
            .into_inner()
            .map_err(|e| TrajectoryError::io(path, e.into_error()))?;
        file.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))
            .and_then(|_| file.write_all(&self.written.to_le_bytes()))
            .and_then(|_| file.sync_all())
            .map_err(|e| TrajectoryError::io(path, e))?;
        Ok(())
    }

    /// Finalizes the file and returns the number of frames written.
    pub fn close(mut self) -> Result<usize, TrajectoryError> {
        self.finish()?;
        debug!(path = %self.path.display(), frames = self.written, "Closed trajectory");
        Ok(self.written as usize)
    }
}

impl Drop for TrajectoryWriter {
    fn drop(&mut self) {
        if self.file.is_none() {
            return;
        }
        warn!(
            path = %self.path.display(),
            frames = self.written,
            "Trajectory writer dropped without close; finalizing"
        );
        if let Err(e) = self.finish() {
            warn!(path = %self.path.display(), error = %e, "Failed to finalize trajectory");
        }
    }
}
