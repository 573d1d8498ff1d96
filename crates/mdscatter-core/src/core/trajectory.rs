use crate::core::database::molecules::MoleculeDatabase;
use crate::core::geometry::configuration::{Configuration, FORCES, VELOCITIES};
use crate::core::geometry::unit_cell::UnitCell;
use crate::core::io::TrajectoryError;
use crate::core::io::container::{
    Dataset, FORMAT_VERSION, FrameLayout, FrameRecord, decode_f64s, read_header,
};
use crate::core::models::system::ChemicalSystem;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

enum FrameSource {
    File {
        path: PathBuf,
        file: Mutex<File>,
        data_offset: u64,
    },
    Memory(Vec<FrameRecord>),
}

/// A random-access sequence of frames bound to a chemical system.
///
/// Every read materializes fresh buffers: configurations returned for different frames
/// never alias each other, so workers can read frames concurrently from a shared handle.
pub struct Trajectory {
    system: ChemicalSystem,
    layout: FrameLayout,
    times: Vec<f64>,
    source: FrameSource,
}

impl std::fmt::Debug for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trajectory")
            .field("path", &self.path())
            .field("n_frames", &self.len())
            .field("layout", &self.layout)
            .finish()
    }
}

impl Trajectory {
    /// Opens a trajectory file read-only.
    ///
    /// The chemical system is rebuilt from the header tables using `molecules` for
    /// template-based entities. A file whose writer never finished keeps only its
    /// complete frames.
    #[instrument(skip_all, name = "open_trajectory", fields(path = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        molecules: &MoleculeDatabase,
    ) -> Result<Self, TrajectoryError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| TrajectoryError::io(&path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| TrajectoryError::io(&path, e))?
            .len();
        let mut reader = BufReader::new(file);
        let (declared, header) = read_header(&mut reader, &path)?;
        let data_offset = reader
            .stream_position()
            .map_err(|e| TrajectoryError::io(&path, e))?;
        if header.format_version > FORMAT_VERSION {
            warn!(
                version = header.format_version,
                supported = FORMAT_VERSION,
                "Trajectory was written by a newer format version"
            );
        }

        let layout = header.layout;
        let available = (file_len.saturating_sub(data_offset)) / layout.record_len().max(1);
        let n_frames = if declared > available {
            warn!(
                declared,
                available, "Trajectory is truncated; keeping the complete frames only"
            );
            available
        } else if declared == 0 && available > 0 {
            warn!(available, "Trajectory writer was never closed; recovering the frames on disk");
            available
        } else {
            declared
        } as usize;

        let system = header.chemical_system.to_system(molecules)?;
        if system.total_number_of_atoms() != layout.n_atoms {
            return Err(TrajectoryError::MalformedFrame {
                index: 0,
                reason: format!(
                    "layout declares {} atoms but the system has {}",
                    layout.n_atoms,
                    system.total_number_of_atoms()
                ),
            });
        }

        let mut file = reader.into_inner();
        let mut times = Vec::with_capacity(n_frames);
        let mut raw = [0u8; 8];
        for i in 0..n_frames as u64 {
            file.seek(SeekFrom::Start(data_offset + i * layout.record_len()))
                .and_then(|_| file.read_exact(&mut raw))
                .map_err(|e| TrajectoryError::io(&path, e))?;
            times.push(f64::from_le_bytes(raw));
        }
        debug!(n_frames, n_atoms = layout.n_atoms, periodic = layout.periodic, "Opened trajectory");

        Ok(Self {
            system,
            layout,
            times,
            source: FrameSource::File {
                path,
                file: Mutex::new(file),
                data_offset,
            },
        })
    }

    /// Wraps frames held in memory, e.g. produced by a test or a conversion step.
    pub fn from_frames(
        system: ChemicalSystem,
        frames: Vec<FrameRecord>,
    ) -> Result<Self, TrajectoryError> {
        let layout = FrameLayout {
            n_atoms: system.total_number_of_atoms(),
            periodic: frames.first().is_some_and(|f| f.unit_cell.is_some()),
            velocities: frames.first().is_some_and(|f| f.velocities.is_some()),
            forces: frames.first().is_some_and(|f| f.forces.is_some()),
        };
        for (index, frame) in frames.iter().enumerate() {
            frame.check_layout(&layout, index)?;
        }
        Ok(Self {
            system,
            layout,
            times: frames.iter().map(|f| f.time).collect(),
            source: FrameSource::Memory(frames),
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn chemical_system(&self) -> &ChemicalSystem {
        &self.system
    }

    /// Simulation time of every frame, in ps.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn is_periodic(&self) -> bool {
        self.layout.periodic
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            FrameSource::File { path, .. } => Some(path),
            FrameSource::Memory(_) => None,
        }
    }

    fn check_frame(&self, index: usize) -> Result<(), TrajectoryError> {
        if index >= self.len() {
            return Err(TrajectoryError::FrameOutOfRange {
                index,
                n_frames: self.len(),
            });
        }
        Ok(())
    }

    fn read_bytes(&self, frame: usize, offset: u64, len: usize) -> Result<Vec<u8>, TrajectoryError> {
        let FrameSource::File {
            path,
            file,
            data_offset,
        } = &self.source
        else {
            return Ok(Vec::new());
        };
        let start = data_offset + frame as u64 * self.layout.record_len() + offset;
        let mut buffer = vec![0u8; len];
        let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.seek(SeekFrom::Start(start))
            .and_then(|_| file.read_exact(&mut buffer))
            .map_err(|e| TrajectoryError::io(path, e))?;
        Ok(buffer)
    }

    /// The raw record of frame `index`, in canonical units.
    pub fn frame(&self, index: usize) -> Result<FrameRecord, TrajectoryError> {
        self.check_frame(index)?;
        match &self.source {
            FrameSource::Memory(frames) => Ok(frames[index].clone()),
            FrameSource::File { .. } => {
                let bytes = self.read_bytes(index, 0, self.layout.record_len() as usize)?;
                Ok(FrameRecord::decode(&bytes, &self.layout))
            }
        }
    }

    /// Unit cell of frame `index`, `None` for non-periodic trajectories.
    pub fn unit_cell(&self, index: usize) -> Result<Option<UnitCell>, TrajectoryError> {
        self.check_frame(index)?;
        if !self.layout.periodic {
            return Ok(None);
        }
        let rows = match &self.source {
            FrameSource::Memory(frames) => frames[index].unit_cell,
            FrameSource::File { .. } => {
                let bytes = self.read_bytes(index, self.layout.offset_of(Dataset::UnitCell), 72)?;
                let values = decode_f64s(&bytes);
                Some([
                    [values[0], values[1], values[2]],
                    [values[3], values[4], values[5]],
                    [values[6], values[7], values[8]],
                ])
            }
        };
        rows.map(UnitCell::from_rows).transpose().map_err(|e| {
            TrajectoryError::MalformedFrame {
                index,
                reason: e.to_string(),
            }
        })
    }

    /// A fresh configuration for frame `index`, with its unit cell and any stored
    /// velocities and forces.
    pub fn configuration(&self, index: usize) -> Result<Configuration, TrajectoryError> {
        let record = self.frame(index)?;
        let unit_cell = match record.unit_cell {
            Some(rows) => Some(UnitCell::from_rows(rows).map_err(|e| {
                TrajectoryError::MalformedFrame {
                    index,
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        let mut configuration = Configuration::from_real(record.coordinates, unit_cell);
        if let Some(velocities) = record.velocities {
            configuration.set_variable(VELOCITIES, velocities)?;
        }
        if let Some(forces) = record.forces {
            configuration.set_variable(FORCES, forces)?;
        }
        Ok(configuration)
    }

    /// Value of `dataset` for a single atom of frame `index`, read without loading the frame.
    pub fn atom_value(
        &self,
        index: usize,
        dataset: Dataset,
        atom: usize,
    ) -> Result<Vector3<f64>, TrajectoryError> {
        self.check_frame(index)?;
        if atom >= self.layout.n_atoms {
            return Err(TrajectoryError::AtomOutOfRange {
                index: atom,
                n_atoms: self.layout.n_atoms,
            });
        }
        if dataset.variable().is_none() || !self.layout.contains(dataset) {
            return Err(TrajectoryError::MissingVariable(dataset.key().to_string()));
        }
        match &self.source {
            FrameSource::Memory(frames) => {
                let frame = &frames[index];
                let values = match dataset {
                    Dataset::Velocities => frame.velocities.as_deref(),
                    Dataset::Forces => frame.forces.as_deref(),
                    _ => Some(frame.coordinates.as_slice()),
                };
                values
                    .and_then(|v| v.get(atom).copied())
                    .ok_or_else(|| TrajectoryError::MissingVariable(dataset.key().to_string()))
            }
            FrameSource::File { .. } => {
                let offset = self.layout.offset_of(dataset) + (atom * 24) as u64;
                let values = decode_f64s(&self.read_bytes(index, offset, 24)?);
                Ok(Vector3::new(values[0], values[1], values[2]))
            }
        }
    }

    /// Time series of one atom's `dataset` over `frames`, as stored (wrapped positions).
    pub fn read_atomic_trajectory(
        &self,
        atom: usize,
        frames: &[usize],
        dataset: Dataset,
    ) -> Result<Vec<Vector3<f64>>, TrajectoryError> {
        frames
            .iter()
            .map(|&frame| self.atom_value(frame, dataset, atom))
            .collect()
    }

    /// Positions of one atom over `frames` with periodic jumps removed.
    ///
    /// Successive fractional displacements are reduced to the minimum image and
    /// accumulated, then mapped back to real space with each frame's own cell.
    pub fn read_unwrapped_trajectory(
        &self,
        atom: usize,
        frames: &[usize],
    ) -> Result<Vec<Vector3<f64>>, TrajectoryError> {
        let positions = self.read_atomic_trajectory(atom, frames, Dataset::Coordinates)?;
        if !self.layout.periodic {
            return Ok(positions);
        }
        let mut unwrapped = Vec::with_capacity(positions.len());
        let mut previous: Option<Vector3<f64>> = None;
        let mut accumulated = Vector3::zeros();
        for (&frame, position) in frames.iter().zip(&positions) {
            let cell = self.unit_cell(frame)?.ok_or(TrajectoryError::MalformedFrame {
                index: frame,
                reason: "missing unit cell".to_string(),
            })?;
            let fractional = cell.to_fractional(position);
            accumulated = match previous {
                None => fractional,
                Some(previous) => {
                    let delta = fractional - previous;
                    accumulated + delta.map(|x| x - x.round())
                }
            };
            previous = Some(fractional);
            unwrapped.push(cell.to_real(&accumulated));
        }
        Ok(unwrapped)
    }
}
