use super::GeometryError;
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// A periodic simulation cell described by its row-basis vectors `a`, `b`, `c` (nm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCell {
    direct: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl UnitCell {
    /// Creates a cell from a matrix whose rows are the basis vectors.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DegenerateCell`] if the basis vectors are coplanar.
    pub fn new(direct: Matrix3<f64>) -> Result<Self, GeometryError> {
        let volume = direct.determinant().abs();
        if !(volume > 1e-12) {
            return Err(GeometryError::DegenerateCell { volume });
        }
        let inverse = direct
            .try_inverse()
            .ok_or(GeometryError::DegenerateCell { volume })?;
        Ok(Self { direct, inverse })
    }

    pub fn from_vectors(
        a: Vector3<f64>,
        b: Vector3<f64>,
        c: Vector3<f64>,
    ) -> Result<Self, GeometryError> {
        Self::new(Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]))
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Result<Self, GeometryError> {
        Self::from_vectors(rows[0].into(), rows[1].into(), rows[2].into())
    }

    pub fn cubic(length: f64) -> Result<Self, GeometryError> {
        Self::orthorhombic(length, length, length)
    }

    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Result<Self, GeometryError> {
        Self::new(Matrix3::from_diagonal(&Vector3::new(a, b, c)))
    }

    /// Builds a cell from lengths (nm) and angles (degrees) in the standard orientation:
    /// `a` along x and `b` in the xy plane.
    pub fn from_parameters(
        lengths: [f64; 3],
        angles: [f64; 3],
    ) -> Result<Self, GeometryError> {
        let [a, b, c] = lengths;
        let [alpha, beta, gamma] = angles.map(f64::to_radians);
        let (cos_a, cos_b, cos_g, sin_g) = (alpha.cos(), beta.cos(), gamma.cos(), gamma.sin());
        let cx = cos_b;
        let cy = (cos_a - cos_b * cos_g) / sin_g;
        let cz = (1.0 - cx * cx - cy * cy).max(0.0).sqrt();
        Self::from_vectors(
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(b * cos_g, b * sin_g, 0.0),
            Vector3::new(c * cx, c * cy, c * cz),
        )
    }

    /// Matrix whose rows are the basis vectors.
    pub fn direct(&self) -> &Matrix3<f64> {
        &self.direct
    }

    /// Inverse of [`direct`](Self::direct); a real row vector times it gives fractional coordinates.
    pub fn inverse(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// Basis vectors as columns, for the column-vector convention.
    pub fn transposed_direct(&self) -> Matrix3<f64> {
        self.direct.transpose()
    }

    pub fn transposed_inverse(&self) -> Matrix3<f64> {
        self.inverse.transpose()
    }

    pub fn volume(&self) -> f64 {
        self.direct.determinant().abs()
    }

    pub fn a(&self) -> Vector3<f64> {
        self.direct.row(0).transpose()
    }

    pub fn b(&self) -> Vector3<f64> {
        self.direct.row(1).transpose()
    }

    pub fn c(&self) -> Vector3<f64> {
        self.direct.row(2).transpose()
    }

    pub fn lengths(&self) -> [f64; 3] {
        [self.a().norm(), self.b().norm(), self.c().norm()]
    }

    /// Cell angles `alpha`, `beta`, `gamma` in degrees.
    pub fn angles(&self) -> [f64; 3] {
        let (a, b, c) = (self.a(), self.b(), self.c());
        [b.angle(&c), a.angle(&c), a.angle(&b)].map(f64::to_degrees)
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let mut rows = [[0.0; 3]; 3];
        for (i, row) in rows.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = self.direct[(i, j)];
            }
        }
        rows
    }

    #[inline]
    pub fn to_fractional(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.inverse.tr_mul(position)
    }

    #[inline]
    pub fn to_real(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.direct.tr_mul(fractional)
    }

    /// Shortest periodic image of a displacement vector.
    #[inline]
    pub fn minimum_image(&self, delta: &Vector3<f64>) -> Vector3<f64> {
        let fractional = self.to_fractional(delta).map(wrap_centered);
        self.to_real(&fractional)
    }

    /// Rows are the reciprocal vectors `a*`, `b*`, `c*` including the `2π` factor.
    pub fn reciprocal_basis(&self) -> Matrix3<f64> {
        self.inverse.transpose() * (2.0 * PI)
    }

    pub fn is_orthorhombic(&self) -> bool {
        let off_diagonal = (0..3)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .filter(|(i, j)| i != j)
            .map(|(i, j)| self.direct[(i, j)].abs())
            .fold(0.0, f64::max);
        off_diagonal < 1e-12
    }
}

/// Wraps a fractional component into `[-0.5, 0.5)`.
#[inline]
pub fn wrap_centered(x: f64) -> f64 {
    let wrapped = x - (x + 0.5).floor();
    if wrapped >= 0.5 { wrapped - 1.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triclinic() -> UnitCell {
        UnitCell::from_parameters([3.0, 4.0, 5.0], [80.0, 95.0, 110.0]).unwrap()
    }

    #[test]
    fn cubic_cell_has_expected_volume_and_lengths() {
        let cell = UnitCell::cubic(5.0).unwrap();
        assert!((cell.volume() - 125.0).abs() < 1e-12);
        assert_eq!(cell.lengths(), [5.0, 5.0, 5.0]);
        assert!(cell.is_orthorhombic());
    }

    #[test]
    fn degenerate_cell_is_rejected() {
        let result = UnitCell::from_vectors(
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        );
        assert!(matches!(result, Err(GeometryError::DegenerateCell { .. })));
    }

    #[test]
    fn parameters_round_trip_through_angles() {
        let cell = triclinic();
        let [a, b, c] = cell.lengths();
        assert!((a - 3.0).abs() < 1e-12 && (b - 4.0).abs() < 1e-12 && (c - 5.0).abs() < 1e-12);
        let [alpha, beta, gamma] = cell.angles();
        assert!((alpha - 80.0).abs() < 1e-9);
        assert!((beta - 95.0).abs() < 1e-9);
        assert!((gamma - 110.0).abs() < 1e-9);
        assert!(!cell.is_orthorhombic());
    }

    #[test]
    fn fractional_and_real_transforms_are_inverse() {
        let cell = triclinic();
        let r = Vector3::new(1.3, -2.7, 0.4);
        let back = cell.to_real(&cell.to_fractional(&r));
        assert!((back - r).norm() < 1e-12);
        let s = cell.to_fractional(&cell.a());
        assert!((s - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn minimum_image_returns_shortest_vector() {
        let cell = UnitCell::cubic(5.0).unwrap();
        let d = cell.minimum_image(&Vector3::new(4.9, -4.8, 2.0));
        assert!((d - Vector3::new(-0.1, 0.2, 2.0)).norm() < 1e-12);
    }

    #[test]
    fn reciprocal_basis_is_dual_to_direct_basis() {
        let cell = triclinic();
        let reciprocal = cell.reciprocal_basis();
        let product = cell.direct() * reciprocal.transpose();
        let expected = Matrix3::identity() * (2.0 * PI);
        assert!((product - expected).norm() < 1e-10);
    }

    #[test]
    fn wrap_centered_maps_into_half_open_interval() {
        for x in [-1.5, -0.5, -0.25, 0.0, 0.49, 0.5, 1.75, 3.5] {
            let w = wrap_centered(x);
            assert!((-0.5..0.5).contains(&w), "{x} -> {w}");
            assert!(((x - w) - (x - w).round()).abs() < 1e-12);
        }
    }
}
