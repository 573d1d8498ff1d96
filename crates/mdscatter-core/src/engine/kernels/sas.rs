use crate::engine::error::AnalysisError;
use kiddo::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use nalgebra::Vector3;
use std::f64::consts::PI;
use tracing::instrument;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// `n` nearly uniform points on the unit sphere, on a golden-angle spiral.
pub fn sphere_points(n: usize) -> Vec<Vector3<f64>> {
    let golden_angle = PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|k| {
            let z = 1.0 - (2.0 * k as f64 + 1.0) / n as f64;
            let rho = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden_angle * k as f64;
            Vector3::new(rho * phi.cos(), rho * phi.sin(), z)
        })
        .collect()
}

/// Accessible sample points of the selected atoms of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SasResult {
    pub n_points: usize,
    /// Accessible points per selected atom.
    pub counts: Vec<usize>,
    /// `counts / n_points` per selected atom.
    pub fractions: Vec<f64>,
    /// `r_i + probe` per selected atom.
    pub radii: Vec<f64>,
}

impl SasResult {
    pub fn total_fraction(&self) -> f64 {
        self.fractions.iter().sum()
    }

    /// Accessible area, each point standing for `4π/P` of its atom's expanded sphere.
    pub fn surface_area(&self) -> f64 {
        if self.n_points == 0 {
            return 0.0;
        }
        let element = 4.0 * PI / self.n_points as f64;
        self.counts
            .iter()
            .zip(&self.radii)
            .map(|(&count, r)| element * count as f64 * r * r)
            .sum()
    }
}

/// Solvent accessible surface of `selected` atoms by point sampling.
///
/// `coordinates` must be continuous (no periodic jumps inside a molecule). Every
/// atom of the frame occludes; only the selected ones are sampled.
///
/// # Errors
///
/// Returns [`AnalysisError::ShapeMismatch`] if `radii` does not match the coordinates,
/// and [`AnalysisError::InvalidInput`] for a selected index out of range or a negative
/// probe radius.
#[instrument(skip_all, name = "solvent_accessible_surface", fields(selected = selected.len()))]
pub fn solvent_accessible_surface(
    coordinates: &[Vector3<f64>],
    radii: &[f64],
    points: &[Vector3<f64>],
    selected: &[usize],
    probe: f64,
) -> Result<SasResult, AnalysisError> {
    AnalysisError::check_len("atomic radii", coordinates.len(), radii.len())?;
    if probe < 0.0 {
        return Err(AnalysisError::InvalidInput(format!("negative probe radius {probe}")));
    }
    if let Some(&bad) = selected.iter().find(|&&i| i >= coordinates.len()) {
        return Err(AnalysisError::InvalidInput(format!(
            "selected atom {bad} is out of range for {} atoms",
            coordinates.len()
        )));
    }
    if coordinates.is_empty() {
        return Ok(SasResult {
            n_points: points.len(),
            counts: Vec::new(),
            fractions: Vec::new(),
            radii: Vec::new(),
        });
    }

    let positions: Vec<[f64; 3]> = coordinates.iter().map(|c| [c.x, c.y, c.z]).collect();
    // Built in one pass; lattice input may put any number of atoms on one plane.
    let kdtree: ImmutableKdTree<f64, u64, 3, 32> = ImmutableKdTree::new_from_slice(&positions);
    let max_radius = radii.iter().copied().fold(0.0, f64::max);

    let accessible = |&i: &usize| -> usize {
        let expanded = radii[i] + probe;
        let reach = expanded + max_radius + probe;
        let neighbours: Vec<(Vector3<f64>, f64)> = kdtree
            .within_unsorted::<SquaredEuclidean>(&positions[i], reach * reach)
            .into_iter()
            .map(|n| n.item as usize)
            .filter(|&j| j != i)
            .filter(|&j| {
                let cutoff = radii[i] + radii[j] + 2.0 * probe;
                (coordinates[j] - coordinates[i]).norm_squared() < cutoff * cutoff
            })
            .map(|j| (coordinates[j], (radii[j] + probe).powi(2)))
            .collect();

        points
            .iter()
            .map(|u| coordinates[i] + u * expanded)
            .filter(|p| {
                neighbours
                    .iter()
                    .all(|(centre, r_sq)| (p - centre).norm_squared() >= *r_sq)
            })
            .count()
    };

    #[cfg(not(feature = "parallel"))]
    let counts: Vec<usize> = selected.iter().map(accessible).collect();

    #[cfg(feature = "parallel")]
    let counts: Vec<usize> = selected.par_iter().map(accessible).collect();

    let n_points = points.len();
    let fractions = counts
        .iter()
        .map(|&c| if n_points == 0 { 0.0 } else { c as f64 / n_points as f64 })
        .collect();
    Ok(SasResult {
        n_points,
        counts,
        fractions,
        radii: selected.iter().map(|&i| radii[i] + probe).collect(),
    })
}
