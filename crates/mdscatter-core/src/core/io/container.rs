use super::TrajectoryError;
use crate::core::geometry::configuration::{COORDINATES, FORCES, VELOCITIES};
use crate::core::models::serialization::SystemTables;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

pub const MAGIC: &[u8; 8] = b"MDSCTRJ1";
pub const FORMAT_VERSION: u32 = 1;
/// Magic, frame count and header length.
pub const PREAMBLE_LEN: u64 = 24;
/// Byte offset of the frame count, patched when a writer closes.
pub(crate) const FRAME_COUNT_OFFSET: u64 = 8;

const F64_LEN: usize = std::mem::size_of::<f64>();

/// Per-frame datasets of a trajectory, in their on-disk order within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Time,
    UnitCell,
    Coordinates,
    Velocities,
    Forces,
}

impl Dataset {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Time => "/time",
            Self::UnitCell => "/configuration/unit_cell",
            Self::Coordinates => "/configuration/coordinates",
            Self::Velocities => "/configuration/velocities",
            Self::Forces => "/configuration/forces",
        }
    }

    /// Name of the matching [`Configuration`](crate::core::geometry::configuration::Configuration) variable.
    pub fn variable(&self) -> Option<&'static str> {
        match self {
            Self::Coordinates => Some(COORDINATES),
            Self::Velocities => Some(VELOCITIES),
            Self::Forces => Some(FORCES),
            _ => None,
        }
    }

    pub fn from_variable(name: &str) -> Option<Self> {
        match name {
            COORDINATES => Some(Self::Coordinates),
            VELOCITIES => Some(Self::Velocities),
            FORCES => Some(Self::Forces),
            _ => None,
        }
    }
}

/// Which datasets each frame record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    pub n_atoms: usize,
    pub periodic: bool,
    pub velocities: bool,
    pub forces: bool,
}

impl FrameLayout {
    fn len_of(&self, dataset: Dataset) -> usize {
        match dataset {
            Dataset::Time => 1,
            Dataset::UnitCell => 9 * self.periodic as usize,
            Dataset::Coordinates => 3 * self.n_atoms,
            Dataset::Velocities => 3 * self.n_atoms * self.velocities as usize,
            Dataset::Forces => 3 * self.n_atoms * self.forces as usize,
        }
    }

    const ORDER: [Dataset; 5] = [
        Dataset::Time,
        Dataset::UnitCell,
        Dataset::Coordinates,
        Dataset::Velocities,
        Dataset::Forces,
    ];

    pub fn contains(&self, dataset: Dataset) -> bool {
        self.len_of(dataset) > 0
    }

    pub fn datasets(&self) -> impl Iterator<Item = Dataset> + '_ {
        Self::ORDER.into_iter().filter(|d| self.contains(*d))
    }

    /// Offset in bytes of `dataset` inside a frame record.
    pub fn offset_of(&self, dataset: Dataset) -> u64 {
        let values: usize = Self::ORDER
            .iter()
            .take_while(|&&d| d != dataset)
            .map(|&d| self.len_of(d))
            .sum();
        (values * F64_LEN) as u64
    }

    pub fn record_len(&self) -> u64 {
        let values: usize = Self::ORDER.iter().map(|&d| self.len_of(d)).sum();
        (values * F64_LEN) as u64
    }
}

/// Everything stored once per file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryHeader {
    pub format_version: u32,
    pub creator: String,
    pub chemical_system: SystemTables,
    pub layout: FrameLayout,
}

/// One frame in canonical units: time in ps, cell rows and positions in nm,
/// velocities in nm/ps, forces in kJ/mol/nm.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub time: f64,
    pub unit_cell: Option<[[f64; 3]; 3]>,
    pub coordinates: Vec<Vector3<f64>>,
    pub velocities: Option<Vec<Vector3<f64>>>,
    pub forces: Option<Vec<Vector3<f64>>>,
}

impl FrameRecord {
    /// Checks that the record carries exactly the datasets of `layout`.
    pub fn check_layout(&self, layout: &FrameLayout, index: usize) -> Result<(), TrajectoryError> {
        let malformed = |reason: String| TrajectoryError::MalformedFrame { index, reason };
        if self.coordinates.len() != layout.n_atoms {
            return Err(malformed(format!(
                "{} coordinates for {} atoms",
                self.coordinates.len(),
                layout.n_atoms
            )));
        }
        if self.unit_cell.is_some() != layout.periodic {
            return Err(malformed(format!(
                "unit cell {} but the trajectory is {}",
                if self.unit_cell.is_some() { "present" } else { "missing" },
                if layout.periodic { "periodic" } else { "not periodic" }
            )));
        }
        for (name, values, expected) in [
            (VELOCITIES, &self.velocities, layout.velocities),
            (FORCES, &self.forces, layout.forces),
        ] {
            match (values, expected) {
                (Some(v), true) if v.len() != layout.n_atoms => {
                    return Err(malformed(format!("{} {} for {} atoms", v.len(), name, layout.n_atoms)));
                }
                (None, true) => return Err(malformed(format!("missing {}", name))),
                (Some(_), false) => {
                    return Err(malformed(format!("{} not declared by the trajectory", name)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.time.to_le_bytes());
        if let Some(cell) = &self.unit_cell {
            for value in cell.iter().flatten() {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }
        let rows = std::iter::once(&self.coordinates)
            .chain(self.velocities.as_ref())
            .chain(self.forces.as_ref());
        for row in rows.flatten() {
            for value in row.iter() {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    pub(crate) fn decode(bytes: &[u8], layout: &FrameLayout) -> Self {
        let mut values = decode_f64s(bytes).into_iter();
        let time = values.next().unwrap_or_default();
        let unit_cell = layout.periodic.then(|| {
            let mut cell = [[0.0; 3]; 3];
            for value in cell.iter_mut().flatten() {
                *value = values.next().unwrap_or_default();
            }
            cell
        });
        let mut take_rows = |present: bool| {
            present.then(|| {
                (0..layout.n_atoms)
                    .map(|_| {
                        Vector3::new(
                            values.next().unwrap_or_default(),
                            values.next().unwrap_or_default(),
                            values.next().unwrap_or_default(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
        };
        let coordinates = take_rows(true).unwrap_or_default();
        let velocities = take_rows(layout.velocities);
        let forces = take_rows(layout.forces);
        Self {
            time,
            unit_cell,
            coordinates,
            velocities,
            forces,
        }
    }
}

pub(crate) fn decode_f64s(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(F64_LEN)
        .map(|chunk| {
            let mut raw = [0u8; F64_LEN];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect()
}

pub(crate) fn write_preamble(
    writer: &mut impl Write,
    n_frames: u64,
    header_len: u64,
) -> std::io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&n_frames.to_le_bytes())?;
    writer.write_all(&header_len.to_le_bytes())
}

/// Reads the preamble and header, returning the frame count and the header.
pub(crate) fn read_header(
    reader: &mut impl Read,
    path: &Path,
) -> Result<(u64, TrajectoryHeader), TrajectoryError> {
    let mut preamble = [0u8; PREAMBLE_LEN as usize];
    reader
        .read_exact(&mut preamble)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => TrajectoryError::BadMagic {
                path: path.to_string_lossy().to_string(),
            },
            _ => TrajectoryError::io(path, e),
        })?;
    if &preamble[..8] != MAGIC {
        return Err(TrajectoryError::BadMagic {
            path: path.to_string_lossy().to_string(),
        });
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&preamble[8..16]);
    let n_frames = u64::from_le_bytes(raw);
    raw.copy_from_slice(&preamble[16..24]);
    let header_len = u64::from_le_bytes(raw);

    let mut header_bytes = Vec::new();
    reader
        .take(header_len)
        .read_to_end(&mut header_bytes)
        .map_err(|e| TrajectoryError::io(path, e))?;
    let header: TrajectoryHeader =
        bincode::deserialize(&header_bytes).map_err(|e| TrajectoryError::Header {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
    Ok((n_frames, header))
}
