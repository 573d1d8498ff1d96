use crate::core::trajectory::Trajectory;
use crate::engine::job::RunningMode;
use crate::engine::output::OutputFormat;
use crate::engine::qvectors::{QVectorSet, QVectors};
use crate::engine::resolution::{InstrumentResolution, ResolutionKernel};
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The frames an analysis iterates over.
#[derive(Debug, Clone, PartialEq)]
pub struct FramesValue {
    pub first: usize,
    /// Exclusive.
    pub last: usize,
    pub step: usize,
    pub indices: Vec<usize>,
    /// Simulation time of each selected frame, in ps.
    pub times: Vec<f64>,
    /// `times` shifted so that the first selected frame sits at zero.
    pub relative_times: Vec<f64>,
    /// Time between two selected frames, in ps.
    pub time_step: f64,
}

impl FramesValue {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Selected atoms with the element symbol each one is analysed as.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomSelectionValue {
    pub expression: String,
    /// Sorted atom indices.
    pub indices: Vec<usize>,
    /// Element symbol of each entry of `indices`.
    pub symbols: Vec<String>,
}

impl AtomSelectionValue {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// A copy where the atoms named in `transmutation` carry their new symbol.
    pub fn transmuted(&self, transmutation: &BTreeMap<usize, String>) -> Self {
        let symbols = self
            .indices
            .iter()
            .zip(&self.symbols)
            .map(|(index, symbol)| transmutation.get(index).unwrap_or(symbol).clone())
            .collect();
        Self {
            expression: self.expression.clone(),
            indices: self.indices.clone(),
            symbols,
        }
    }

    /// Distinct symbols in alphabetical order.
    pub fn elements(&self) -> Vec<String> {
        self.groups().into_keys().collect()
    }

    /// Atom indices per symbol.
    pub fn groups(&self) -> BTreeMap<String, Vec<usize>> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, symbol) in self.indices.iter().zip(&self.symbols) {
            groups.entry(symbol.clone()).or_default().push(*index);
        }
        groups
    }
}

/// A numeric element property looked up for every selected element.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightsValue {
    pub property: String,
    pub values: BTreeMap<String, f64>,
}

impl WeightsValue {
    pub fn get(&self, element: &str) -> f64 {
        self.values.get(element).copied().unwrap_or(0.0)
    }

    /// Normalized weight of each element, `w_e·n_e / Σ w·n`, given the atom counts.
    ///
    /// Falls back to the atom fractions when every weight is zero.
    pub fn normalized(&self, counts: &BTreeMap<String, usize>) -> BTreeMap<String, f64> {
        let total: f64 = counts.iter().map(|(e, &n)| self.get(e) * n as f64).sum();
        let atoms: usize = counts.values().sum();
        counts
            .iter()
            .map(|(element, &n)| {
                let weight = if total != 0.0 {
                    self.get(element) * n as f64 / total
                } else {
                    n as f64 / atoms.max(1) as f64
                };
                (element.clone(), weight)
            })
            .collect()
    }
}

/// Evenly spaced values in a declared unit, converted to canonical units.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub first: f64,
    pub last: f64,
    pub step: f64,
    pub values: Vec<f64>,
}

impl RangeValue {
    /// Midpoints between consecutive values.
    pub fn mid_points(&self) -> Vec<f64> {
        self.values.iter().map(|v| v + self.step / 2.0).collect()
    }
}

/// Molecules matched by name, each as its sorted atom indices.
#[derive(Debug, Clone, PartialEq)]
pub struct MoleculeSelectionValue {
    pub names: Vec<String>,
    pub molecules: Vec<Vec<usize>>,
}

/// Atom triples `(origin, +x, +y)` defining one local frame per matched molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisValue {
    pub molecule: String,
    pub triples: Vec<[usize; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFilesValue {
    pub root: PathBuf,
    pub formats: Vec<OutputFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QVectorsValue {
    pub generator: QVectors,
    pub set: QVectorSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionValue {
    pub resolution: InstrumentResolution,
    /// Angular frequencies matching the selected frames, in rad/ps.
    pub omegas: Vec<f64>,
    pub kernel: ResolutionKernel,
}

/// The product of one configurator.
#[derive(Debug, Clone)]
pub enum ConfiguredValue {
    Trajectory(Arc<Trajectory>),
    Frames(FramesValue),
    AtomSelection(AtomSelectionValue),
    Transmutation(BTreeMap<usize, String>),
    Weights(WeightsValue),
    Choice(String),
    Choices(Vec<String>),
    Range(RangeValue),
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
    Vector(Vector3<f64>),
    Molecules(MoleculeSelectionValue),
    Basis(BasisValue),
    OutputFiles(OutputFilesValue),
    RunningMode(RunningMode),
    Path(PathBuf),
    QVectors(QVectorsValue),
    Resolution(ResolutionValue),
}

impl ConfiguredValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Trajectory(_) => "trajectory",
            Self::Frames(_) => "frames",
            Self::AtomSelection(_) => "atom selection",
            Self::Transmutation(_) => "atom transmutation",
            Self::Weights(_) => "weights",
            Self::Choice(_) => "single choice",
            Self::Choices(_) => "multiple choices",
            Self::Range(_) => "range",
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "string",
            Self::Vector(_) => "vector",
            Self::Molecules(_) => "molecule selection",
            Self::Basis(_) => "basis selection",
            Self::OutputFiles(_) => "output files",
            Self::RunningMode(_) => "running mode",
            Self::Path(_) => "input file",
            Self::QVectors(_) => "q vectors",
            Self::Resolution(_) => "instrument resolution",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> AtomSelectionValue {
        AtomSelectionValue {
            expression: "all".to_string(),
            indices: vec![0, 1, 2],
            symbols: vec!["O".to_string(), "H".to_string(), "H".to_string()],
        }
    }

    #[test]
    fn groups_follow_transmuted_symbols() {
        let transmuted = selection().transmuted(&BTreeMap::from([(2, "D".to_string())]));
        assert_eq!(transmuted.elements(), vec!["D", "H", "O"]);
        assert_eq!(transmuted.groups()["H"], vec![1]);
        assert_eq!(transmuted.groups()["D"], vec![2]);
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        let weights = WeightsValue {
            property: "atomic_weight".to_string(),
            values: BTreeMap::from([("H".to_string(), 1.0), ("O".to_string(), 16.0)]),
        };
        let counts = BTreeMap::from([("H".to_string(), 2), ("O".to_string(), 1)]);
        let normalized = weights.normalized(&counts);
        assert!((normalized["O"] - 16.0 / 18.0).abs() < 1e-12);
        assert!((normalized.values().sum::<f64>() - 1.0).abs() < 1e-12);

        let zero = WeightsValue {
            property: "b_incoherent".to_string(),
            values: BTreeMap::from([("H".to_string(), 0.0), ("O".to_string(), 0.0)]),
        };
        assert!((zero.normalized(&counts)["H"] - 2.0 / 3.0).abs() < 1e-12);
    }
}
