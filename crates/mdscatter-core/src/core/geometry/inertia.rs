use super::GeometryError;
use nalgebra::{Isometry3, Matrix3, Rotation3, SymmetricEigen, Translation3, UnitQuaternion, Vector3};
use std::str::FromStr;

/// Assignment of the principal axes `a`, `b`, `c` (ascending moments) to the `x`, `y`, `z` axes.
///
/// Follows the standard I/II/III right/left representations used for rotational spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisRepresentation {
    /// x=b, y=c, z=a
    #[default]
    Ir,
    /// x=c, y=a, z=b
    IIr,
    /// x=a, y=b, z=c
    IIIr,
    /// x=c, y=b, z=a
    Il,
    /// x=a, y=c, z=b
    IIl,
    /// x=b, y=a, z=c
    IIIl,
}

impl AxisRepresentation {
    /// Index of the principal axis (0=a, 1=b, 2=c) mapped onto x, y and z.
    fn permutation(self) -> [usize; 3] {
        match self {
            Self::Ir => [1, 2, 0],
            Self::IIr => [2, 0, 1],
            Self::IIIr => [0, 1, 2],
            Self::Il => [2, 1, 0],
            Self::IIl => [0, 2, 1],
            Self::IIIl => [1, 0, 2],
        }
    }
}

impl FromStr for AxisRepresentation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ir" => Ok(Self::Ir),
            "iir" => Ok(Self::IIr),
            "iiir" => Ok(Self::IIIr),
            "il" => Ok(Self::Il),
            "iil" => Ok(Self::IIl),
            "iiil" => Ok(Self::IIIl),
            _ => Err(format!("Invalid axis representation: {}", s)),
        }
    }
}

/// Principal moments (ascending) and the matching unit axes as matrix columns.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalAxes {
    pub moments: Vector3<f64>,
    pub axes: Matrix3<f64>,
}

pub fn center_of_mass(
    positions: &[Vector3<f64>],
    masses: &[f64],
) -> Result<Vector3<f64>, GeometryError> {
    if positions.len() != masses.len() {
        return Err(GeometryError::AtomCountMismatch {
            expected: positions.len(),
            found: masses.len(),
        });
    }
    let total: f64 = masses.iter().sum();
    if total <= 0.0 {
        return Err(GeometryError::ZeroMass);
    }
    let weighted = positions
        .iter()
        .zip(masses)
        .fold(Vector3::zeros(), |acc, (p, m)| acc + p * *m);
    Ok(weighted / total)
}

/// Inertia tensor about `center`.
pub fn inertia_tensor(
    positions: &[Vector3<f64>],
    masses: &[f64],
    center: &Vector3<f64>,
) -> Matrix3<f64> {
    let mut tensor = Matrix3::zeros();
    for (p, &m) in positions.iter().zip(masses) {
        let r = p - center;
        tensor += (Matrix3::identity() * r.norm_squared() - r * r.transpose()) * m;
    }
    tensor
}

pub fn principal_axes(tensor: &Matrix3<f64>) -> PrincipalAxes {
    let eigen = SymmetricEigen::new(*tensor);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));
    let moments = Vector3::from_fn(|i, _| eigen.eigenvalues[order[i]]);
    let axes = Matrix3::from_columns(&[
        eigen.eigenvectors.column(order[0]).into_owned(),
        eigen.eigenvectors.column(order[1]).into_owned(),
        eigen.eigenvectors.column(order[2]).into_owned(),
    ]);
    PrincipalAxes { moments, axes }
}

/// Rigid transform that moves the centre of mass to the origin and aligns the
/// principal axes with the coordinate axes according to `representation`.
pub fn normalizing_transformation(
    positions: &[Vector3<f64>],
    masses: &[f64],
    representation: AxisRepresentation,
) -> Result<Isometry3<f64>, GeometryError> {
    let com = center_of_mass(positions, masses)?;
    let principal = principal_axes(&inertia_tensor(positions, masses, &com));
    let [x, y, z] = representation.permutation();
    let mut rows = Matrix3::from_rows(&[
        principal.axes.column(x).transpose(),
        principal.axes.column(y).transpose(),
        principal.axes.column(z).transpose(),
    ]);
    if rows.determinant() < 0.0 {
        rows.row_mut(2).neg_mut();
    }
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rows));
    let translation = Translation3::from(-(rotation * com));
    Ok(Isometry3::from_parts(translation, rotation))
}
