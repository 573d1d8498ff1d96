use super::GeometryError;
use super::unit_cell::{UnitCell, wrap_centered};
use crate::core::models::system::ChemicalSystem;
use nalgebra::Vector3;
use std::collections::{BTreeMap, VecDeque};

pub const COORDINATES: &str = "coordinates";
pub const VELOCITIES: &str = "velocities";
pub const FORCES: &str = "forces";
pub const GRADIENTS: &str = "gradients";

/// The coordinate representation of a [`Configuration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationKind {
    /// Real-space coordinates of an infinite (non-periodic) universe.
    Real,
    /// Real-space coordinates inside a periodic cell.
    PeriodicReal,
    /// Fractional coordinates in the cell basis, components in `[-0.5, 0.5)` once folded.
    PeriodicBox,
}

/// One frame of per-atom data: coordinates plus optional velocities, forces and gradients.
///
/// The `coordinates` variable is expressed in the space named by [`kind`](Self::kind);
/// every other variable is always stored in real space.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    kind: ConfigurationKind,
    unit_cell: Option<UnitCell>,
    variables: BTreeMap<String, Vec<Vector3<f64>>>,
}

impl Configuration {
    pub fn real(coordinates: Vec<Vector3<f64>>) -> Self {
        Self::with_kind(ConfigurationKind::Real, None, coordinates)
    }

    pub fn periodic_real(coordinates: Vec<Vector3<f64>>, unit_cell: UnitCell) -> Self {
        Self::with_kind(ConfigurationKind::PeriodicReal, Some(unit_cell), coordinates)
    }

    pub fn periodic_box(box_coordinates: Vec<Vector3<f64>>, unit_cell: UnitCell) -> Self {
        Self::with_kind(ConfigurationKind::PeriodicBox, Some(unit_cell), box_coordinates)
    }

    /// Creates a real or periodic-real configuration depending on whether a cell is given.
    pub fn from_real(coordinates: Vec<Vector3<f64>>, unit_cell: Option<UnitCell>) -> Self {
        match unit_cell {
            Some(cell) => Self::periodic_real(coordinates, cell),
            None => Self::real(coordinates),
        }
    }

    fn with_kind(
        kind: ConfigurationKind,
        unit_cell: Option<UnitCell>,
        coordinates: Vec<Vector3<f64>>,
    ) -> Self {
        let mut variables = BTreeMap::new();
        variables.insert(COORDINATES.to_string(), coordinates);
        Self {
            kind,
            unit_cell,
            variables,
        }
    }

    pub fn kind(&self) -> ConfigurationKind {
        self.kind
    }

    pub fn is_periodic(&self) -> bool {
        self.unit_cell.is_some()
    }

    pub fn unit_cell(&self) -> Option<&UnitCell> {
        self.unit_cell.as_ref()
    }

    pub fn number_of_atoms(&self) -> usize {
        self.coordinates().len()
    }

    /// Coordinates in the representation given by [`kind`](Self::kind).
    pub fn coordinates(&self) -> &[Vector3<f64>] {
        self.variables
            .get(COORDINATES)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn coordinates_mut(&mut self) -> &mut [Vector3<f64>] {
        self.variables
            .entry(COORDINATES.to_string())
            .or_default()
            .as_mut_slice()
    }

    pub fn variable(&self, name: &str) -> Option<&[Vector3<f64>]> {
        self.variables.get(name).map(Vec::as_slice)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &[Vector3<f64>])> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Adds or replaces a per-atom variable.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::VariableLength`] if `values` does not have one row per atom.
    pub fn set_variable(
        &mut self,
        name: &str,
        values: Vec<Vector3<f64>>,
    ) -> Result<(), GeometryError> {
        if name != COORDINATES && values.len() != self.number_of_atoms() {
            return Err(GeometryError::VariableLength {
                name: name.to_string(),
                expected: self.number_of_atoms(),
                found: values.len(),
            });
        }
        if name == COORDINATES {
            let expected = self
                .variables
                .iter()
                .find(|(k, _)| k.as_str() != COORDINATES)
                .map(|(_, v)| v.len());
            if let Some(expected) = expected.filter(|&n| n != values.len()) {
                return Err(GeometryError::VariableLength {
                    name: name.to_string(),
                    expected,
                    found: values.len(),
                });
            }
        }
        self.variables.insert(name.to_string(), values);
        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Vec<Vector3<f64>>> {
        if name == COORDINATES {
            return None;
        }
        self.variables.remove(name)
    }

    /// Fractional coordinates `coords · inverse(unit_cell)`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::NotPeriodic`] for a configuration without a unit cell.
    pub fn to_box_coordinates(&self) -> Result<Vec<Vector3<f64>>, GeometryError> {
        match (self.kind, &self.unit_cell) {
            (ConfigurationKind::PeriodicBox, Some(_)) => Ok(self.coordinates().to_vec()),
            (_, Some(cell)) => Ok(self
                .coordinates()
                .iter()
                .map(|r| cell.to_fractional(r))
                .collect()),
            (_, None) => Err(GeometryError::NotPeriodic),
        }
    }

    pub fn to_real_coordinates(&self) -> Vec<Vector3<f64>> {
        match (self.kind, &self.unit_cell) {
            (ConfigurationKind::PeriodicBox, Some(cell)) => self
                .coordinates()
                .iter()
                .map(|s| cell.to_real(s))
                .collect(),
            _ => self.coordinates().to_vec(),
        }
    }

    pub fn to_box_configuration(&self) -> Result<Configuration, GeometryError> {
        let coordinates = self.to_box_coordinates()?;
        let mut converted = self.clone();
        converted.kind = ConfigurationKind::PeriodicBox;
        converted.variables.insert(COORDINATES.to_string(), coordinates);
        Ok(converted)
    }

    pub fn to_real_configuration(&self) -> Configuration {
        let coordinates = self.to_real_coordinates();
        let mut converted = self.clone();
        converted.kind = if self.is_periodic() {
            ConfigurationKind::PeriodicReal
        } else {
            ConfigurationKind::Real
        };
        converted.variables.insert(COORDINATES.to_string(), coordinates);
        converted
    }

    /// Wraps every atom into the primary cell in place. No-op for non-periodic configurations.
    pub fn fold_coordinates(&mut self) {
        let Some(cell) = self.unit_cell else {
            return;
        };
        let kind = self.kind;
        for position in self.coordinates_mut() {
            *position = match kind {
                ConfigurationKind::PeriodicBox => position.map(wrap_centered),
                _ => cell.to_real(&cell.to_fractional(position).map(wrap_centered)),
            };
        }
    }

    /// Removes periodic jumps inside every bonded fragment.
    ///
    /// Each connected component of the bond graph is walked breadth-first from its
    /// lowest-index atom; every neighbour is placed at the minimum-image displacement
    /// from the atom it was reached from. The result is a non-periodic real
    /// configuration carrying copies of all other variables.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::AtomCountMismatch`] if `system` does not match this configuration.
    pub fn continuous_configuration(
        &self,
        system: &ChemicalSystem,
    ) -> Result<Configuration, GeometryError> {
        self.check_atom_count(system)?;
        let real = self.to_real_coordinates();
        let Some(cell) = self.unit_cell else {
            let mut copy = self.clone();
            copy.kind = ConfigurationKind::Real;
            return Ok(copy);
        };

        let n_atoms = real.len();
        let mut continuous = real.clone();
        let mut visited = vec![false; n_atoms];
        let mut queue = VecDeque::new();
        for seed in 0..n_atoms {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            queue.push_back(seed);
            while let Some(current) = queue.pop_front() {
                for &neighbor in system.bonded_neighbors(current) {
                    if visited[neighbor] {
                        continue;
                    }
                    visited[neighbor] = true;
                    let delta = cell.minimum_image(&(real[neighbor] - real[current]));
                    continuous[neighbor] = continuous[current] + delta;
                    queue.push_back(neighbor);
                }
            }
        }

        let mut result = self.clone();
        result.kind = ConfigurationKind::Real;
        result.unit_cell = None;
        result.variables.insert(COORDINATES.to_string(), continuous);
        Ok(result)
    }

    /// Structural copy for a different but isomorphic system.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::AtomCountMismatch`] if `system` has a different atom count.
    pub fn clone_for(&self, system: &ChemicalSystem) -> Result<Configuration, GeometryError> {
        self.check_atom_count(system)?;
        Ok(self.clone())
    }

    pub(crate) fn check_atom_count(&self, system: &ChemicalSystem) -> Result<(), GeometryError> {
        let expected = system.total_number_of_atoms();
        if self.number_of_atoms() != expected {
            return Err(GeometryError::AtomCountMismatch {
                expected,
                found: self.number_of_atoms(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::entity::{AtomCluster, ChemicalEntity};
    use crate::core::models::atom::Atom;

    fn triclinic() -> UnitCell {
        UnitCell::from_parameters([2.0, 2.5, 3.0], [85.0, 100.0, 105.0]).unwrap()
    }

    fn sample_coordinates() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::new(-3.1, 4.2, 0.7),
            Vector3::new(1.9, -0.4, 5.5),
            Vector3::new(0.0, 0.0, -2.2),
        ]
    }

    fn chain_system(n_atoms: usize) -> ChemicalSystem {
        let atoms = (0..n_atoms)
            .map(|i| Atom::new("C").with_name(format!("C{i}")))
            .collect();
        let bonds = (1..n_atoms).map(|i| [i - 1, i]).collect();
        let cluster = AtomCluster::new("chain", atoms, bonds).unwrap();
        let mut system = ChemicalSystem::new("test");
        system
            .add_chemical_entity(ChemicalEntity::AtomCluster(cluster))
            .unwrap();
        system
    }

    #[test]
    fn box_real_box_round_trip_is_identity() {
        let conf = Configuration::periodic_real(sample_coordinates(), triclinic());
        let boxed = conf.to_box_configuration().unwrap();
        let real = boxed.to_real_configuration();
        let again = real.to_box_coordinates().unwrap();
        for (a, b) in boxed.coordinates().iter().zip(&again) {
            assert!((a - b).norm() < 1e-12);
        }
        for (a, b) in conf.coordinates().iter().zip(real.coordinates()) {
            assert!((a - b).norm() < 1e-12);
        }
        assert_eq!(boxed.kind(), ConfigurationKind::PeriodicBox);
        assert_eq!(real.kind(), ConfigurationKind::PeriodicReal);
    }

    #[test]
    fn box_coordinates_of_non_periodic_configuration_fail() {
        let conf = Configuration::real(sample_coordinates());
        assert_eq!(conf.to_box_coordinates(), Err(GeometryError::NotPeriodic));
        assert!(conf.to_box_configuration().is_err());
    }

    #[test]
    fn folding_places_atoms_in_primary_cell_and_is_idempotent() {
        let cell = triclinic();
        let mut conf = Configuration::periodic_real(sample_coordinates(), cell);
        conf.fold_coordinates();
        for s in conf.to_box_coordinates().unwrap() {
            assert!(s.iter().all(|x| (-0.5..0.5).contains(x)), "{s:?}");
        }
        let once = conf.coordinates().to_vec();
        conf.fold_coordinates();
        for (a, b) in once.iter().zip(conf.coordinates()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn folding_box_configuration_wraps_fractional_components() {
        let coords = vec![Vector3::new(0.75, -0.6, 2.1)];
        let mut conf = Configuration::periodic_box(coords, UnitCell::cubic(1.0).unwrap());
        conf.fold_coordinates();
        let s = conf.coordinates()[0];
        assert!((s - Vector3::new(-0.25, 0.4, 0.1)).norm() < 1e-12);
    }

    #[test]
    fn continuous_configuration_preserves_minimum_image_bond_lengths() {
        let system = chain_system(4);
        let cell = UnitCell::cubic(2.0).unwrap();
        let coords = vec![
            Vector3::new(0.95, 0.0, 0.0),
            Vector3::new(-0.95, 0.0, 0.0),
            Vector3::new(-0.85, 0.1, 0.0),
            Vector3::new(-0.75, 0.1, 0.9),
        ];
        let conf = Configuration::periodic_real(coords.clone(), cell);
        let continuous = conf.continuous_configuration(&system).unwrap();

        assert!(!continuous.is_periodic());
        assert_eq!(continuous.kind(), ConfigurationKind::Real);
        for bond in system.bonds() {
            let (i, j) = (bond.first(), bond.second());
            let expected = cell.minimum_image(&(coords[j] - coords[i])).norm();
            let found = (continuous.coordinates()[j] - continuous.coordinates()[i]).norm();
            assert!((expected - found).abs() < 1e-12);
        }
        assert!((continuous.coordinates()[1].x - 1.05).abs() < 1e-12);
    }

    #[test]
    fn set_variable_checks_row_count() {
        let mut conf = Configuration::real(sample_coordinates());
        assert!(conf.set_variable(VELOCITIES, vec![Vector3::zeros(); 4]).is_ok());
        assert_eq!(
            conf.set_variable(FORCES, vec![Vector3::zeros(); 3]),
            Err(GeometryError::VariableLength {
                name: FORCES.to_string(),
                expected: 4,
                found: 3
            })
        );
        assert!(conf.has_variable(VELOCITIES));
        assert!(conf.remove_variable(COORDINATES).is_none());
    }

    #[test]
    fn clone_for_requires_matching_atom_count() {
        let conf = Configuration::real(sample_coordinates());
        assert!(conf.clone_for(&chain_system(4)).is_ok());
        assert!(matches!(
            conf.clone_for(&chain_system(3)),
            Err(GeometryError::AtomCountMismatch { expected: 3, found: 4 })
        ));
    }
}
