use super::{
    ATOM_SELECTION, ATOM_TRANSMUTATION, FRAMES, TRAJECTORY, WEIGHTS, element_counts, output_settings,
    require_periodic, selection_settings, trajectory_settings,
};
use crate::core::trajectory::Trajectory;
use crate::engine::configurators::{Configurable, Setting, SettingKind};
use crate::engine::environment::Environment;
use crate::engine::error::{AnalysisError, JobError};
use crate::engine::job::Job;
use crate::engine::kernels::distance_histogram::{HistogramBins, PairHistogram, distance_histogram};
use crate::engine::output::{OutputData, OutputVariable};
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const NAME: &str = "PairDistributionFunction";

/// Partial and total pair distribution functions, split into intra- and
/// inter-molecular contributions.
///
/// For species `i` and `j` with `n_i`, `n_j` atoms, over `F` frames:
///
/// ```text
/// g_ij(r) = Σ_t V_t·H_ij,t(r) / (F · N_ij · shell(r))
/// N_ij    = n_i(n_i - 1)/2 if i = j, n_i·n_j otherwise
/// ```
///
/// Totals weight each unordered pair by `(2 - δ_ij)·c_i·c_j·w_i·w_j / (Σ c·w)²`, with
/// `c` the atom fractions and `w` the configured element property.
pub struct PairDistributionFunction {
    configuration: Configurable,
    trajectory: Arc<Trajectory>,
    frames: Vec<usize>,
    bins: HistogramBins,
    elements: Vec<String>,
    counts: Vec<usize>,
    element_weights: Vec<f64>,
    atoms: Vec<usize>,
    molecules: Vec<usize>,
    species: Vec<usize>,
    histogram: PairHistogram,
    volume_sum: f64,
    output: OutputData,
}

pub struct FrameHistogram {
    histogram: PairHistogram,
    volume: f64,
}

#[derive(Clone, Copy)]
enum Contribution {
    Total,
    Intra,
    Inter,
}

impl Contribution {
    const ALL: [Contribution; 3] = [Self::Total, Self::Intra, Self::Inter];

    fn name(&self, prefix: &str, pair: &str) -> String {
        match self {
            Self::Total => format!("{prefix}_{pair}"),
            Self::Intra => format!("{prefix}_intra_{pair}"),
            Self::Inter => format!("{prefix}_inter_{pair}"),
        }
    }
}

impl PairDistributionFunction {
    pub fn settings() -> Vec<Setting> {
        let mut settings = trajectory_settings();
        settings.extend(selection_settings("b_coherent"));
        settings.push(
            Setting::new(
                "r_values",
                SettingKind::Range {
                    unit: Some("nm"),
                    inclusive: false,
                    min: Some(0.0),
                },
            )
            .help("Distance bins { first, last, step }, last exclusive"),
        );
        settings.extend(output_settings());
        settings
    }

    pub fn new(parameters: &toml::Table, env: &Environment) -> Result<Self, JobError> {
        let configuration = Configurable::setup(Self::settings(), parameters, env)?;
        let trajectory = configuration.trajectory(TRAJECTORY)?.clone();
        let frames = configuration.frames(FRAMES)?.indices.clone();
        let selection = configuration.transmuted_selection(ATOM_SELECTION, ATOM_TRANSMUTATION)?;
        let weights = configuration.weights(WEIGHTS)?;
        let range = configuration.range("r_values")?;
        let bins = HistogramBins::new(range.first, range.last, range.step)?;

        let elements = selection.elements();
        let counts_by_element = element_counts(&selection);
        let counts = elements.iter().map(|e| counts_by_element[e]).collect();
        let element_weights = elements.iter().map(|e| weights.get(e)).collect();
        let species = selection
            .symbols
            .iter()
            .map(|s| elements.iter().position(|e| e == s).unwrap_or(0))
            .collect();
        let molecule_ids = trajectory.chemical_system().molecule_ids();
        let molecules = selection.indices.iter().map(|&i| molecule_ids[i]).collect();

        Ok(Self {
            trajectory,
            frames,
            histogram: PairHistogram::new(elements.len(), bins.n_bins),
            bins,
            elements,
            counts,
            element_weights,
            atoms: selection.indices,
            molecules,
            species,
            volume_sum: 0.0,
            output: OutputData::new(),
            configuration,
        })
    }

    /// Unordered species pairs `(i, j)` with `i <= j`, with their label.
    fn pairs(&self) -> Vec<(usize, usize, String)> {
        let n = self.elements.len();
        (0..n)
            .flat_map(|i| (i..n).map(move |j| (i, j)))
            .map(|(i, j)| (i, j, format!("{}{}", self.elements[i], self.elements[j])))
            .collect()
    }

    /// Weight of each pair in the totals, summing to one.
    fn pair_weights(&self) -> Vec<f64> {
        let n_atoms: usize = self.counts.iter().sum();
        let fractions: Vec<f64> = self
            .counts
            .iter()
            .map(|&n| n as f64 / n_atoms.max(1) as f64)
            .collect();
        let norm: f64 = fractions
            .iter()
            .zip(&self.element_weights)
            .map(|(c, w)| c * w)
            .sum();
        let raw = |i: usize, j: usize| {
            let factor = if i == j { 1.0 } else { 2.0 };
            if norm != 0.0 {
                factor * fractions[i] * fractions[j] * self.element_weights[i] * self.element_weights[j]
                    / (norm * norm)
            } else {
                factor * fractions[i] * fractions[j]
            }
        };
        self.pairs().iter().map(|&(i, j, _)| raw(i, j)).collect()
    }

    fn set(&mut self, name: String, data: Vec<f64>) -> Result<(), JobError> {
        self.output.set_data(&name, data)?;
        Ok(())
    }
}

impl Job for PairDistributionFunction {
    type Payload = FrameHistogram;

    fn name(&self) -> &'static str {
        NAME
    }

    fn configuration(&self) -> &Configurable {
        &self.configuration
    }

    fn initialize(&mut self) -> Result<usize, JobError> {
        require_periodic(&self.trajectory, NAME)?;
        let n = self.bins.n_bins;
        self.output
            .add(OutputVariable::line("r", self.bins.centers()).units("nm"))?;
        let labels: Vec<String> = self
            .pairs()
            .into_iter()
            .map(|(_, _, label)| label)
            .chain(std::iter::once("total".to_string()))
            .collect();
        for label in &labels {
            for (prefix, units) in [("pdf", "au"), ("rdf", "nm^-1"), ("tcf", "nm^-2")] {
                for contribution in Contribution::ALL {
                    let mut variable = OutputVariable::line(contribution.name(prefix, label), vec![0.0; n])
                        .axis(&["r"])
                        .units(units);
                    variable = if label == "total" {
                        variable.main_result()
                    } else {
                        variable.partial_result()
                    };
                    self.output.add(variable)?;
                }
            }
        }
        debug!(pairs = labels.len() - 1, bins = n, "Allocated distribution functions");
        Ok(self.frames.len())
    }

    #[instrument(skip(self), name = "pair_distribution_step")]
    fn run_step(&self, index: usize) -> Result<FrameHistogram, JobError> {
        let configuration = self.trajectory.configuration(self.frames[index])?;
        let cell = configuration
            .unit_cell()
            .ok_or(AnalysisError::NotPeriodic { analysis: NAME })?;
        let all = configuration.coordinates();
        let coordinates: Vec<_> = self.atoms.iter().map(|&i| all[i]).collect();
        let mut histogram = PairHistogram::new(self.elements.len(), self.bins.n_bins);
        distance_histogram(
            &coordinates,
            cell,
            &self.atoms,
            &self.molecules,
            &self.species,
            &self.bins,
            &mut histogram,
        )?;
        let volume = cell.volume();
        histogram.scale(volume);
        Ok(FrameHistogram { histogram, volume })
    }

    fn combine(&mut self, _index: usize, payload: FrameHistogram) -> Result<(), JobError> {
        self.histogram.merge(&payload.histogram)?;
        self.volume_sum += payload.volume;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), JobError> {
        let n_frames = self.frames.len() as f64;
        let n_bins = self.bins.n_bins;
        let r = self.bins.centers();
        let shells: Vec<f64> = (0..n_bins)
            .map(|b| {
                let lo = self.bins.r_min + b as f64 * self.bins.dr;
                let hi = lo + self.bins.dr;
                4.0 / 3.0 * PI * (hi.powi(3) - lo.powi(3))
            })
            .collect();
        let n_atoms: usize = self.counts.iter().sum();
        let density = n_atoms as f64 / (self.volume_sum / n_frames);

        let pairs = self.pairs();
        let weights = self.pair_weights();
        let mut totals = [vec![0.0; n_bins], vec![0.0; n_bins], vec![0.0; n_bins]];

        for ((i, j, label), weight) in pairs.into_iter().zip(weights) {
            let (ni, nj) = (self.counts[i] as f64, self.counts[j] as f64);
            let n_pairs = if i == j { ni * (ni - 1.0) } else { ni * nj };
            let normalize = |histogram: &[f64]| -> Vec<f64> {
                histogram
                    .iter()
                    .zip(&shells)
                    .map(|(h, shell)| {
                        if n_pairs > 0.0 {
                            h / (n_frames * n_pairs * shell)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            };
            let intra = normalize(&self.histogram.ordered_intra(i, j));
            let inter = normalize(&self.histogram.ordered_inter(i, j));
            let pdf: Vec<f64> = intra.iter().zip(&inter).map(|(a, b)| a + b).collect();
            let partials = [pdf, intra, inter];

            for (total, partial) in totals.iter_mut().zip(&partials) {
                for (t, p) in total.iter_mut().zip(partial) {
                    *t += weight * p;
                }
            }
            for (contribution, partial) in Contribution::ALL.into_iter().zip(partials) {
                self.write_derived(contribution, &label, partial, &r, density)?;
            }
        }
        for (contribution, total) in Contribution::ALL.into_iter().zip(totals) {
            self.write_derived(contribution, "total", total, &r, density)?;
        }
        info!(density, frames = self.frames.len(), "Normalized pair distribution functions");
        Ok(())
    }

    fn output(&self) -> &OutputData {
        &self.output
    }

    fn take_output(&mut self) -> OutputData {
        std::mem::take(&mut self.output)
    }
}

impl PairDistributionFunction {
    /// Stores `pdf` with the radial and total correlation functions derived from it.
    ///
    /// `rdf = 4πr²ρ·g`; `tcf = 4πrρ·(g - 1)`, except for the intra-molecular part which
    /// has no unit baseline.
    fn write_derived(
        &mut self,
        contribution: Contribution,
        label: &str,
        pdf: Vec<f64>,
        r: &[f64],
        density: f64,
    ) -> Result<(), JobError> {
        let baseline = match contribution {
            Contribution::Intra => 0.0,
            _ => 1.0,
        };
        let rdf = pdf
            .iter()
            .zip(r)
            .map(|(g, r)| 4.0 * PI * r * r * density * g)
            .collect();
        let tcf = pdf
            .iter()
            .zip(r)
            .map(|(g, r)| 4.0 * PI * r * density * (g - baseline))
            .collect();
        self.set(contribution.name("pdf", label), pdf)?;
        self.set(contribution.name("rdf", label), rdf)?;
        self.set(contribution.name("tcf", label), tcf)
    }
}
