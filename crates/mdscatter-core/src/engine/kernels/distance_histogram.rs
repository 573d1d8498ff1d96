use crate::core::geometry::unit_cell::UnitCell;
use crate::engine::error::AnalysisError;
use nalgebra::Vector3;
use tracing::instrument;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Uniform distance bins `[r_min + b·dr, r_min + (b+1)·dr)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBins {
    pub r_min: f64,
    pub dr: f64,
    pub n_bins: usize,
}

impl HistogramBins {
    pub fn new(r_min: f64, r_max: f64, dr: f64) -> Result<Self, AnalysisError> {
        if !(dr > 0.0) || r_max <= r_min || r_min < 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "invalid histogram range [{r_min}, {r_max}) with step {dr}"
            )));
        }
        let n_bins = ((r_max - r_min) / dr).round().max(1.0) as usize;
        Ok(Self { r_min, dr, n_bins })
    }

    pub fn r_max(&self) -> f64 {
        self.r_min + self.n_bins as f64 * self.dr
    }

    #[inline]
    pub fn bin_of(&self, distance: f64) -> Option<usize> {
        if distance < self.r_min || distance >= self.r_max() {
            return None;
        }
        let bin = ((distance - self.r_min) / self.dr) as usize;
        (bin < self.n_bins).then_some(bin)
    }

    pub fn centers(&self) -> Vec<f64> {
        (0..self.n_bins)
            .map(|b| self.r_min + (b as f64 + 0.5) * self.dr)
            .collect()
    }
}

/// Pair counts per species pair and bin, split into intra- and inter-molecular parts.
///
/// Only the `si <= sj` entries are filled; [`PairHistogram::intra`] and
/// [`PairHistogram::inter`] accept either order.
#[derive(Debug, Clone, PartialEq)]
pub struct PairHistogram {
    n_species: usize,
    n_bins: usize,
    intra: Vec<f64>,
    inter: Vec<f64>,
}

impl PairHistogram {
    pub fn new(n_species: usize, n_bins: usize) -> Self {
        let len = n_species * n_species * n_bins;
        Self {
            n_species,
            n_bins,
            intra: vec![0.0; len],
            inter: vec![0.0; len],
        }
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    #[inline]
    fn offset(&self, si: usize, sj: usize) -> usize {
        let (a, b) = if si <= sj { (si, sj) } else { (sj, si) };
        (a * self.n_species + b) * self.n_bins
    }

    pub fn intra(&self, si: usize, sj: usize) -> &[f64] {
        let start = self.offset(si, sj);
        &self.intra[start..start + self.n_bins]
    }

    pub fn inter(&self, si: usize, sj: usize) -> &[f64] {
        let start = self.offset(si, sj);
        &self.inter[start..start + self.n_bins]
    }

    /// Intra-molecular counts over ordered atom pairs `(a, b)`, `a` of species `si` and
    /// `b` of species `sj`.
    pub fn ordered_intra(&self, si: usize, sj: usize) -> Vec<f64> {
        Self::ordered(self.intra(si, sj), si, sj)
    }

    /// Inter-molecular counts over ordered atom pairs, as [`PairHistogram::ordered_intra`].
    pub fn ordered_inter(&self, si: usize, sj: usize) -> Vec<f64> {
        Self::ordered(self.inter(si, sj), si, sj)
    }

    /// Within one species each stored unordered pair stands for two ordered ones.
    fn ordered(counts: &[f64], si: usize, sj: usize) -> Vec<f64> {
        let factor = if si == sj { 2.0 } else { 1.0 };
        counts.iter().map(|c| c * factor).collect()
    }

    #[inline]
    fn record(&mut self, si: usize, sj: usize, bin: usize, same_molecule: bool) {
        let at = self.offset(si, sj) + bin;
        if same_molecule {
            self.intra[at] += 1.0;
        } else {
            self.inter[at] += 1.0;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.intra.iter_mut().chain(self.inter.iter_mut()).for_each(|v| *v *= factor);
    }

    fn add(&mut self, other: &PairHistogram) {
        for (a, b) in self.intra.iter_mut().zip(&other.intra) {
            *a += b;
        }
        for (a, b) in self.inter.iter_mut().zip(&other.inter) {
            *a += b;
        }
    }

    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: &PairHistogram) -> Result<(), AnalysisError> {
        AnalysisError::check_len("histogram species", self.n_species, other.n_species)?;
        AnalysisError::check_len("histogram bins", self.n_bins, other.n_bins)?;
        self.add(other);
        Ok(())
    }
}

/// Accumulates minimum-image pair distances of one frame into `histogram`.
///
/// Row `k` of every slice describes one atom: its real (folded) position, its global
/// atom index, the id of its parent molecule, and its species. Each unordered pair is
/// counted once; rows sharing a global index are never paired.
///
/// # Errors
///
/// Returns [`AnalysisError::ShapeMismatch`] if the per-atom slices differ in length or
/// the histogram does not match `bins`, and [`AnalysisError::InvalidInput`] for a
/// species id outside the histogram.
#[instrument(skip_all, name = "distance_histogram", fields(atoms = coordinates.len()))]
pub fn distance_histogram(
    coordinates: &[Vector3<f64>],
    cell: &UnitCell,
    indices: &[usize],
    molecules: &[usize],
    species: &[usize],
    bins: &HistogramBins,
    histogram: &mut PairHistogram,
) -> Result<(), AnalysisError> {
    let k = coordinates.len();
    AnalysisError::check_len("atom indices", k, indices.len())?;
    AnalysisError::check_len("atom to molecule map", k, molecules.len())?;
    AnalysisError::check_len("atom to species map", k, species.len())?;
    AnalysisError::check_len("histogram bins", bins.n_bins, histogram.n_bins)?;
    if let Some(&bad) = species.iter().find(|&&s| s >= histogram.n_species) {
        return Err(AnalysisError::InvalidInput(format!(
            "species id {bad} exceeds the {} histogram species",
            histogram.n_species
        )));
    }

    let (n_species, n_bins) = (histogram.n_species, histogram.n_bins);
    let accumulate_row = |mut local: PairHistogram, i: usize| {
        for j in i + 1..k {
            if indices[i] == indices[j] {
                continue;
            }
            let distance = cell.minimum_image(&(coordinates[j] - coordinates[i])).norm();
            if let Some(bin) = bins.bin_of(distance) {
                local.record(species[i], species[j], bin, molecules[i] == molecules[j]);
            }
        }
        local
    };

    #[cfg(not(feature = "parallel"))]
    let frame = (0..k).fold(PairHistogram::new(n_species, n_bins), accumulate_row);

    #[cfg(feature = "parallel")]
    let frame = (0..k)
        .into_par_iter()
        .fold(|| PairHistogram::new(n_species, n_bins), accumulate_row)
        .reduce(
            || PairHistogram::new(n_species, n_bins),
            |mut a, b| {
                a.add(&b);
                a
            },
        );

    histogram.add(&frame);
    Ok(())
}
