use crate::engine::error::AnalysisError;
use nalgebra::{Matrix3, Vector3};

/// An orthonormal frame built from an origin and two reference atoms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    origin: Vector3<f64>,
    /// Rows are the local x, y and z axes.
    axes: Matrix3<f64>,
}

impl LocalFrame {
    /// Local x points at `plus_x`; local y is the part of `plus_y - origin` orthogonal to x.
    pub fn from_triple(
        origin: Vector3<f64>,
        plus_x: Vector3<f64>,
        plus_y: Vector3<f64>,
    ) -> Result<Self, AnalysisError> {
        let degenerate = || AnalysisError::InvalidInput("degenerate local frame triple".to_string());
        let x = (plus_x - origin).try_normalize(1e-12).ok_or_else(degenerate)?;
        let v = plus_y - origin;
        let y = (v - x * x.dot(&v)).try_normalize(1e-12).ok_or_else(degenerate)?;
        let z = x.cross(&y);
        Ok(Self {
            origin,
            axes: Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]),
        })
    }

    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    #[inline]
    pub fn to_local(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.axes * (position - self.origin)
    }
}

/// Half-width of a cube around `origin` guaranteed to contain every target once it is
/// expressed in any rotated frame with that origin.
pub fn local_extent(origin: &Vector3<f64>, targets: &[Vector3<f64>]) -> f64 {
    let largest = targets
        .iter()
        .map(|p| (p - origin).abs().max())
        .fold(0.0, f64::max);
    3f64.sqrt() * largest
}

/// A uniform 3-D histogram of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    min: Vector3<f64>,
    resolution: f64,
    shape: [usize; 3],
    counts: Vec<f64>,
}

impl SpatialGrid {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>, resolution: f64) -> Result<Self, AnalysisError> {
        if !(resolution > 0.0) {
            return Err(AnalysisError::InvalidInput(format!(
                "grid resolution must be positive, got {resolution}"
            )));
        }
        let mut shape = [0; 3];
        for axis in 0..3 {
            let span = max[axis] - min[axis];
            if !(span >= 0.0) {
                return Err(AnalysisError::InvalidInput(format!(
                    "grid axis {axis} has an empty span"
                )));
            }
            shape[axis] = ((span / resolution).ceil() as usize).max(1);
        }
        Ok(Self {
            min,
            resolution,
            shape,
            counts: vec![0.0; shape[0] * shape[1] * shape[2]],
        })
    }

    /// A cube `[-extent, extent)³`.
    pub fn centered(extent: f64, resolution: f64) -> Result<Self, AnalysisError> {
        let half = Vector3::repeat(extent);
        Self::new(-half, half, resolution)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Counts in x-major order.
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn counts_mut(&mut self) -> &mut [f64] {
        &mut self.counts
    }

    /// Adds one count at `position`; positions outside the grid are dropped.
    pub fn accumulate(&mut self, position: &Vector3<f64>) -> bool {
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let cell = ((position[axis] - self.min[axis]) / self.resolution).floor();
            if cell < 0.0 || cell >= self.shape[axis] as f64 {
                return false;
            }
            index[axis] = cell as usize;
        }
        let flat = (index[0] * self.shape[1] + index[1]) * self.shape[2] + index[2];
        self.counts[flat] += 1.0;
        true
    }

    pub fn merge(&mut self, other: &SpatialGrid) -> Result<(), AnalysisError> {
        AnalysisError::check_len("spatial grid cells", self.counts.len(), other.counts.len())?;
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    /// Cell centres along x, y and z.
    pub fn axes(&self) -> [Vec<f64>; 3] {
        std::array::from_fn(|axis| {
            (0..self.shape[axis])
                .map(|i| self.min[axis] + (i as f64 + 0.5) * self.resolution)
                .collect()
        })
    }
}
