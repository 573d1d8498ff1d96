use super::ChemicalEntityError;
use super::atom::Atom;
use super::entity::{AtomCluster, ChemicalEntity, EntityKind, Fragment, TerminusVariant};
use super::ids::EntityId;
use super::topology::Bond;
use crate::core::database::DatabaseError;
use crate::core::database::elements::ElementDatabase;
use crate::core::geometry::GeometryError;
use crate::core::geometry::configuration::Configuration;
use crate::core::geometry::inertia::{self, AxisRepresentation};
use nalgebra::{Isometry3, Matrix3, Vector3};
use slotmap::SlotMap;
use std::collections::{HashSet, VecDeque};

/// What an entity of the system holds: atom indices for leaves, child entities for chains.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Atom(usize),
    AtomCluster {
        atoms: Vec<usize>,
        parentless: bool,
    },
    Molecule {
        code: String,
        atoms: Vec<usize>,
    },
    Residue {
        code: String,
        variant: Option<TerminusVariant>,
        atoms: Vec<usize>,
    },
    Nucleotide {
        code: String,
        variant: Option<TerminusVariant>,
        atoms: Vec<usize>,
    },
    PeptideChain {
        residues: Vec<EntityId>,
    },
    NucleotideChain {
        nucleotides: Vec<EntityId>,
    },
    Protein {
        chains: Vec<EntityId>,
    },
}

/// An entity registered in a [`ChemicalSystem`].
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub parent: Option<EntityId>,
    pub data: EntityData,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match &self.data {
            EntityData::Atom(_) => EntityKind::Atom,
            EntityData::AtomCluster { .. } => EntityKind::AtomCluster,
            EntityData::Molecule { .. } => EntityKind::Molecule,
            EntityData::Residue { .. } => EntityKind::Residue,
            EntityData::Nucleotide { .. } => EntityKind::Nucleotide,
            EntityData::PeptideChain { .. } => EntityKind::PeptideChain,
            EntityData::NucleotideChain { .. } => EntityKind::NucleotideChain,
            EntityData::Protein { .. } => EntityKind::Protein,
        }
    }

    /// Atom indices held directly by a leaf entity. Empty for chains and proteins.
    pub fn direct_atoms(&self) -> &[usize] {
        match &self.data {
            EntityData::Atom(index) => std::slice::from_ref(index),
            EntityData::AtomCluster { atoms, .. }
            | EntityData::Molecule { atoms, .. }
            | EntityData::Residue { atoms, .. }
            | EntityData::Nucleotide { atoms, .. } => atoms,
            _ => &[],
        }
    }

    pub fn children(&self) -> &[EntityId] {
        match &self.data {
            EntityData::PeptideChain { residues } => residues,
            EntityData::NucleotideChain { nucleotides } => nucleotides,
            EntityData::Protein { chains } => chains,
            _ => &[],
        }
    }

    /// Template code of molecules, residues and nucleotides.
    pub fn code(&self) -> Option<&str> {
        match &self.data {
            EntityData::Molecule { code, .. }
            | EntityData::Residue { code, .. }
            | EntityData::Nucleotide { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// The root container of a molecular model.
///
/// Entities added to the system are flattened into an arena; their atoms receive dense,
/// immutable indices in traversal order and their bonds land in a single canonical,
/// de-duplicated bond table. The system also owns the active [`Configuration`], which
/// the trajectory replaces frame by frame.
#[derive(Debug, Clone, Default)]
pub struct ChemicalSystem {
    name: String,
    /// All atoms, sorted by index.
    atoms: Vec<Atom>,
    /// Leaf entity holding each atom, including parentless clusters.
    atom_owners: Vec<EntityId>,
    entities: SlotMap<EntityId, Entity>,
    top_level: Vec<EntityId>,
    bonds: Vec<Bond>,
    bond_set: HashSet<Bond>,
    adjacency: Vec<Vec<usize>>,
    configuration: Option<Configuration>,
}

impl ChemicalSystem {
    /// Creates an empty system.
    ///
    /// # Arguments
    ///
    /// * `name` - A free-form label stored alongside the system in trajectory files.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an entity and every atom it contains.
    ///
    /// Atoms receive consecutive indices in depth-first traversal order, intra-entity
    /// and chain-link bonds are appended to the bond table, and the active
    /// configuration is dropped since it no longer matches the atom count.
    ///
    /// # Arguments
    ///
    /// * `entity` - The entity tree to register.
    ///
    /// # Return
    ///
    /// The arena key of the new top-level entity.
    ///
    /// # Errors
    ///
    /// Returns [`ChemicalEntityError::InvalidChemicalEntity`] if the entity holds no atoms.
    pub fn add_chemical_entity(
        &mut self,
        entity: ChemicalEntity,
    ) -> Result<EntityId, ChemicalEntityError> {
        if entity.number_of_atoms() == 0 {
            return Err(ChemicalEntityError::InvalidChemicalEntity(format!(
                "{:?} '{}' has no atoms",
                entity.kind(),
                entity.name()
            )));
        }
        let id = self.insert_entity(entity, None);
        self.top_level.push(id);
        self.configuration = None;
        Ok(id)
    }

    fn insert_entity(&mut self, entity: ChemicalEntity, parent: Option<EntityId>) -> EntityId {
        match entity {
            ChemicalEntity::Atom(atom) => {
                let index = self.atoms.len();
                let id = self.entities.insert(Entity {
                    name: atom.name.clone(),
                    parent,
                    data: EntityData::Atom(index),
                });
                self.push_atom(atom, parent, id);
                id
            }
            ChemicalEntity::AtomCluster(cluster) => {
                let (name, parentless, fragment) = cluster.into_parts();
                let id = self.insert_leaf(
                    name,
                    parent,
                    EntityData::AtomCluster {
                        atoms: Vec::new(),
                        parentless,
                    },
                );
                let atom_parent = (!parentless).then_some(id);
                self.push_fragment(id, fragment, atom_parent);
                id
            }
            ChemicalEntity::Molecule(molecule) => {
                let (code, name, fragment) = molecule.into_parts();
                let id = self.insert_leaf(
                    name,
                    parent,
                    EntityData::Molecule {
                        code,
                        atoms: Vec::new(),
                    },
                );
                self.push_fragment(id, fragment, Some(id));
                id
            }
            ChemicalEntity::Residue(residue) => {
                let (code, name, variant, fragment) = residue.into_parts();
                let id = self.insert_leaf(
                    name,
                    parent,
                    EntityData::Residue {
                        code,
                        variant,
                        atoms: Vec::new(),
                    },
                );
                self.push_fragment(id, fragment, Some(id));
                id
            }
            ChemicalEntity::Nucleotide(nucleotide) => {
                let (code, name, variant, fragment) = nucleotide.into_parts();
                let id = self.insert_leaf(
                    name,
                    parent,
                    EntityData::Nucleotide {
                        code,
                        variant,
                        atoms: Vec::new(),
                    },
                );
                self.push_fragment(id, fragment, Some(id));
                id
            }
            ChemicalEntity::PeptideChain(chain) => {
                let (name, residues, links) = chain.into_parts();
                let id = self.insert_leaf(
                    name,
                    parent,
                    EntityData::PeptideChain {
                        residues: Vec::new(),
                    },
                );
                let children: Vec<EntityId> = residues
                    .into_iter()
                    .map(|r| self.insert_entity(ChemicalEntity::Residue(r), Some(id)))
                    .collect();
                self.link_units(&children, links.iter().map(|l| (l.previous, l.next)));
                if let Some(EntityData::PeptideChain { residues }) =
                    self.entities.get_mut(id).map(|e| &mut e.data)
                {
                    *residues = children;
                }
                id
            }
            ChemicalEntity::NucleotideChain(chain) => {
                let (name, nucleotides, links) = chain.into_parts();
                let id = self.insert_leaf(
                    name,
                    parent,
                    EntityData::NucleotideChain {
                        nucleotides: Vec::new(),
                    },
                );
                let children: Vec<EntityId> = nucleotides
                    .into_iter()
                    .map(|n| self.insert_entity(ChemicalEntity::Nucleotide(n), Some(id)))
                    .collect();
                self.link_units(&children, links.iter().map(|l| (l.previous, l.next)));
                if let Some(EntityData::NucleotideChain { nucleotides }) =
                    self.entities.get_mut(id).map(|e| &mut e.data)
                {
                    *nucleotides = children;
                }
                id
            }
            ChemicalEntity::Protein(protein) => {
                let (name, chains) = protein.into_parts();
                let id = self.insert_leaf(name, parent, EntityData::Protein { chains: Vec::new() });
                let children: Vec<EntityId> = chains
                    .into_iter()
                    .map(|c| self.insert_entity(ChemicalEntity::PeptideChain(c), Some(id)))
                    .collect();
                if let Some(EntityData::Protein { chains }) =
                    self.entities.get_mut(id).map(|e| &mut e.data)
                {
                    *chains = children;
                }
                id
            }
        }
    }

    fn insert_leaf(&mut self, name: String, parent: Option<EntityId>, data: EntityData) -> EntityId {
        self.entities.insert(Entity { name, parent, data })
    }

    fn push_atom(&mut self, mut atom: Atom, parent: Option<EntityId>, owner: EntityId) -> usize {
        let index = self.atoms.len();
        atom.register(index, parent);
        self.atoms.push(atom);
        self.atom_owners.push(owner);
        self.adjacency.push(Vec::new());
        index
    }

    fn push_fragment(&mut self, id: EntityId, fragment: Fragment, atom_parent: Option<EntityId>) {
        let (atoms, bonds) = fragment.into_parts();
        let start = self.atoms.len();
        let indices: Vec<usize> = atoms
            .into_iter()
            .map(|atom| self.push_atom(atom, atom_parent, id))
            .collect();
        for [i, j] in bonds {
            self.connect(start + i, start + j);
        }
        if let Some(entity) = self.entities.get_mut(id) {
            match &mut entity.data {
                EntityData::AtomCluster { atoms, .. }
                | EntityData::Molecule { atoms, .. }
                | EntityData::Residue { atoms, .. }
                | EntityData::Nucleotide { atoms, .. } => *atoms = indices,
                _ => {}
            }
        }
    }

    fn link_units(
        &mut self,
        units: &[EntityId],
        links: impl Iterator<Item = ((usize, usize), (usize, usize))>,
    ) {
        for ((pu, pa), (nu, na)) in links {
            let first = units.get(pu).and_then(|&u| self.entities.get(u)?.direct_atoms().get(pa).copied());
            let second = units.get(nu).and_then(|&u| self.entities.get(u)?.direct_atoms().get(na).copied());
            if let (Some(i), Some(j)) = (first, second) {
                self.connect(i, j);
            }
        }
    }

    fn connect(&mut self, i: usize, j: usize) -> bool {
        let Some(bond) = Bond::new(i, j) else {
            return false;
        };
        if !self.bond_set.insert(bond) {
            return false;
        }
        self.bonds.push(bond);
        self.adjacency[i].push(j);
        self.adjacency[j].push(i);
        true
    }

    /// Adds a bond between two registered atoms.
    ///
    /// # Return
    ///
    /// `true` if the bond is new, `false` for duplicates and self-bonds.
    ///
    /// # Errors
    ///
    /// Returns [`ChemicalEntityError::AtomIndexOutOfRange`] for an unknown atom index.
    pub fn add_bond(&mut self, i: usize, j: usize) -> Result<bool, ChemicalEntityError> {
        let n_atoms = self.atoms.len();
        if let Some(&index) = [i, j].iter().find(|&&k| k >= n_atoms) {
            return Err(ChemicalEntityError::AtomIndexOutOfRange { index, n_atoms });
        }
        Ok(self.connect(i, j))
    }

    /// All atoms, sorted by index.
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn atom(&self, index: usize) -> Option<&Atom> {
        self.atoms.get(index)
    }

    /// Number of registered atoms, ghosts included.
    pub fn total_number_of_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Number of non-ghost atoms.
    pub fn number_of_atoms(&self) -> usize {
        self.atoms.iter().filter(|a| !a.ghost).count()
    }

    pub fn atom_names(&self) -> Vec<&str> {
        self.atoms.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn bonded_neighbors(&self, index: usize) -> &[usize] {
        self.adjacency.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter().filter(move |(_, e)| e.kind() == kind)
    }

    pub fn top_level_entities(&self) -> &[EntityId] {
        &self.top_level
    }

    /// Indices of every atom below `id`, in index order.
    pub fn entity_atom_indices(&self, id: EntityId) -> Vec<usize> {
        let mut indices = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(entity) = self.entities.get(current) {
                indices.extend_from_slice(entity.direct_atoms());
                stack.extend(entity.children().iter().rev());
            }
        }
        indices.sort_unstable();
        indices
    }

    /// The leaf entity that holds the atom, even when that entity is a parentless cluster.
    pub fn owner_of_atom(&self, index: usize) -> Option<EntityId> {
        self.atom_owners.get(index).copied()
    }

    pub fn top_level_entity_of_atom(&self, index: usize) -> Option<EntityId> {
        let mut current = self.owner_of_atom(index)?;
        while let Some(parent) = self.entities.get(current)?.parent {
            current = parent;
        }
        Some(current)
    }

    /// Dense molecule ids used to separate intra- from inter-molecular contributions.
    ///
    /// Atoms that reach a parent entity share the id of its top-level ancestor. Atoms
    /// with no parent (top-level atoms, members of parentless clusters) each get an id
    /// of their own.
    pub fn molecule_ids(&self) -> Vec<usize> {
        let mut ids = Vec::with_capacity(self.atoms.len());
        let mut assigned: std::collections::HashMap<EntityId, usize> = Default::default();
        let mut next = 0;
        for (index, atom) in self.atoms.iter().enumerate() {
            let key = atom.parent().and_then(|_| self.top_level_entity_of_atom(index));
            let id = match key {
                Some(top) => *assigned.entry(top).or_insert_with(|| {
                    next += 1;
                    next - 1
                }),
                None => {
                    next += 1;
                    next - 1
                }
            };
            ids.push(id);
        }
        ids
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    pub fn configuration_mut(&mut self) -> Option<&mut Configuration> {
        self.configuration.as_mut()
    }

    /// Binds `configuration` as the active configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::AtomCountMismatch`] if the configuration does not hold one
    /// row per atom of the system.
    pub fn set_configuration(&mut self, configuration: Configuration) -> Result<(), GeometryError> {
        configuration.check_atom_count(self)?;
        self.configuration = Some(configuration);
        Ok(())
    }

    pub fn take_configuration(&mut self) -> Option<Configuration> {
        self.configuration.take()
    }

    /// Deep copy with an isomorphic entity tree, identical atom indices, bonds and
    /// active configuration.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Regroups the atoms into one [`AtomCluster`] per entry of `clusters`.
    ///
    /// With a `selection`, cluster entries are positions into it rather than atom indices.
    /// Atom order becomes the concatenation of the clusters and bonds are carried over.
    /// The active configuration survives only if the atom-name sequence is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ChemicalEntityError::Rebuild`] if the clusters do not cover every atom
    /// exactly once, or if a configuration is bound and the name sequence would change.
    pub fn rebuild(
        &mut self,
        clusters: &[Vec<usize>],
        selection: Option<&[usize]>,
    ) -> Result<(), ChemicalEntityError> {
        let n_atoms = self.atoms.len();
        let mut order = Vec::with_capacity(n_atoms);
        for cluster in clusters {
            for &entry in cluster {
                let index = match selection {
                    Some(selection) => *selection.get(entry).ok_or_else(|| {
                        ChemicalEntityError::Rebuild(format!(
                            "cluster entry {} is outside the {}-atom selection",
                            entry,
                            selection.len()
                        ))
                    })?,
                    None => entry,
                };
                if index >= n_atoms {
                    return Err(ChemicalEntityError::AtomIndexOutOfRange { index, n_atoms });
                }
                order.push(index);
            }
        }
        let unique: HashSet<usize> = order.iter().copied().collect();
        if order.len() != n_atoms || unique.len() != n_atoms {
            return Err(ChemicalEntityError::Rebuild(format!(
                "clusters cover {} distinct of {} atoms ({} entries)",
                unique.len(),
                n_atoms,
                order.len()
            )));
        }

        let names_unchanged = order
            .iter()
            .enumerate()
            .all(|(new, &old)| self.atoms[new].name == self.atoms[old].name);
        if self.configuration.is_some() && !names_unchanged {
            return Err(ChemicalEntityError::Rebuild(
                "the new atom order changes the name sequence of a bound configuration".to_string(),
            ));
        }

        let mut old_to_new = vec![0; n_atoms];
        for (new, &old) in order.iter().enumerate() {
            old_to_new[old] = new;
        }

        let mut rebuilt = ChemicalSystem::new(self.name.clone());
        let mut offset = 0;
        for (k, cluster) in clusters.iter().enumerate() {
            let atoms = order[offset..offset + cluster.len()]
                .iter()
                .map(|&old| {
                    let mut atom = self.atoms[old].clone();
                    atom.unregister();
                    atom
                })
                .collect();
            offset += cluster.len();
            if cluster.is_empty() {
                continue;
            }
            let entity = AtomCluster::new(format!("{}_{}", self.name, k), atoms, Vec::new())?;
            rebuilt.add_chemical_entity(ChemicalEntity::AtomCluster(entity))?;
        }
        for bond in &self.bonds {
            rebuilt.connect(old_to_new[bond.first()], old_to_new[bond.second()]);
        }
        rebuilt.configuration = self.configuration.take();
        *self = rebuilt;
        Ok(())
    }

    /// Groups atoms into the connected components of the bond graph.
    ///
    /// Each component is sorted by index; components are ordered by their first atom.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.atoms.len()];
        let mut components = Vec::new();
        for seed in 0..self.atoms.len() {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut component = vec![seed];
            let mut queue = VecDeque::from([seed]);
            while let Some(current) = queue.pop_front() {
                for &neighbor in &self.adjacency[current] {
                    if !visited[neighbor] {
                        visited[neighbor] = true;
                        component.push(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }

    /// Checks that every atom symbol is known to `elements`.
    pub fn validate_symbols(&self, elements: &ElementDatabase) -> Result<(), ChemicalEntityError> {
        match self.atoms.iter().find(|a| !elements.contains(&a.symbol)) {
            Some(atom) => Err(ChemicalEntityError::UnknownSymbol(atom.symbol.clone())),
            None => Ok(()),
        }
    }

    /// Per-atom masses in amu; ghost atoms weigh nothing.
    pub fn masses(&self, elements: &ElementDatabase) -> Result<Vec<f64>, DatabaseError> {
        self.atoms
            .iter()
            .map(|atom| {
                if atom.ghost {
                    Ok(0.0)
                } else {
                    elements.property(&atom.symbol, "atomic_weight")
                }
            })
            .collect()
    }

    fn subset(
        &self,
        configuration: &Configuration,
        indices: &[usize],
        masses: &[f64],
    ) -> Result<(Vec<Vector3<f64>>, Vec<f64>), GeometryError> {
        configuration.check_atom_count(self)?;
        if masses.len() != self.atoms.len() {
            return Err(GeometryError::AtomCountMismatch {
                expected: self.atoms.len(),
                found: masses.len(),
            });
        }
        let coordinates = configuration.coordinates();
        indices
            .iter()
            .map(|&i| {
                coordinates
                    .get(i)
                    .map(|p| (*p, masses[i]))
                    .ok_or(GeometryError::AtomIndexOutOfRange {
                        index: i,
                        n_atoms: coordinates.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|pairs| pairs.into_iter().unzip())
    }

    /// Mass-weighted centroid of `indices` in `configuration`.
    ///
    /// # Arguments
    ///
    /// * `configuration` - Coordinates to use, one row per atom of this system.
    /// * `indices` - The atom subset (a whole entity, a chain, a group...).
    /// * `masses` - Per-atom masses for every atom of the system, e.g. from [`Self::masses`].
    pub fn center_of_mass(
        &self,
        configuration: &Configuration,
        indices: &[usize],
        masses: &[f64],
    ) -> Result<Vector3<f64>, GeometryError> {
        let (positions, masses) = self.subset(configuration, indices, masses)?;
        inertia::center_of_mass(&positions, &masses)
    }

    /// Inertia tensor of `indices` about their centre of mass, with that centre.
    pub fn inertia(
        &self,
        configuration: &Configuration,
        indices: &[usize],
        masses: &[f64],
    ) -> Result<(Vector3<f64>, Matrix3<f64>), GeometryError> {
        let (positions, masses) = self.subset(configuration, indices, masses)?;
        let com = inertia::center_of_mass(&positions, &masses)?;
        Ok((com, inertia::inertia_tensor(&positions, &masses, &com)))
    }

    /// Rigid transform putting the centre of mass of `indices` at the origin and their
    /// principal axes along the coordinate axes, following `representation`.
    pub fn normalizing_transformation(
        &self,
        configuration: &Configuration,
        indices: &[usize],
        masses: &[f64],
        representation: AxisRepresentation,
    ) -> Result<Isometry3<f64>, GeometryError> {
        let (positions, masses) = self.subset(configuration, indices, masses)?;
        inertia::normalizing_transformation(&positions, &masses, representation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::molecules::MoleculeDatabase;
    use crate::core::geometry::unit_cell::UnitCell;
    use crate::core::models::entity::{Molecule, PeptideChain, Protein, Residue};

    fn db() -> MoleculeDatabase {
        MoleculeDatabase::builtin().unwrap()
    }

    fn water(name: &str) -> ChemicalEntity {
        ChemicalEntity::Molecule(Molecule::from_database(&db(), "WAT", name).unwrap())
    }

    fn dipeptide() -> ChemicalEntity {
        let residues = vec![
            Residue::from_database(&db(), "GLY", "G1", Some(TerminusVariant::NTerminus)).unwrap(),
            Residue::from_database(&db(), "ALA", "A2", Some(TerminusVariant::CTerminus)).unwrap(),
        ];
        let chain = PeptideChain::new("A", residues).unwrap();
        ChemicalEntity::Protein(Protein::new("P", vec![chain]).unwrap())
    }

    fn mixed_system() -> ChemicalSystem {
        let mut system = ChemicalSystem::new("mixed");
        system.add_chemical_entity(water("w1")).unwrap();
        system.add_chemical_entity(dipeptide()).unwrap();
        system
            .add_chemical_entity(ChemicalEntity::Atom(Atom::new("Ar")))
            .unwrap();
        let cluster = AtomCluster::new(
            "ions",
            vec![Atom::new("Na"), Atom::new("Cl")],
            Vec::new(),
        )
        .unwrap()
        .parentless();
        system.add_chemical_entity(ChemicalEntity::AtomCluster(cluster)).unwrap();
        system
    }

    mod indexing {
        use super::*;

        #[test]
        fn atom_indices_are_dense_and_follow_insertion_order() {
            let system = mixed_system();
            for (i, atom) in system.atoms().iter().enumerate() {
                assert_eq!(atom.index(), Some(i));
            }
            let n = system.total_number_of_atoms();
            assert!(system.bonds().iter().all(|b| b.first() < b.second() && b.second() < n));
        }

        #[test]
        fn bonds_are_unique_and_symmetric_in_adjacency() {
            let mut system = mixed_system();
            let before = system.bonds().len();
            let bond = system.bonds()[0];
            assert!(!system.add_bond(bond.second(), bond.first()).unwrap());
            assert_eq!(system.bonds().len(), before);
            for bond in system.bonds() {
                assert!(system.bonded_neighbors(bond.first()).contains(&bond.second()));
                assert!(system.bonded_neighbors(bond.second()).contains(&bond.first()));
            }
            assert!(matches!(
                system.add_bond(0, 10_000),
                Err(ChemicalEntityError::AtomIndexOutOfRange { .. })
            ));
        }

        #[test]
        fn peptide_link_bond_crosses_residues() {
            let mut system = ChemicalSystem::new("p");
            let protein = system.add_chemical_entity(dipeptide()).unwrap();
            let chain = system.entity(protein).unwrap().children()[0];
            let residues = system.entity(chain).unwrap().children().to_vec();
            let carbon = system.entity(residues[0]).unwrap().direct_atoms()
                .iter()
                .copied()
                .find(|&i| system.atoms()[i].name == "C")
                .unwrap();
            let nitrogen = system.entity(residues[1]).unwrap().direct_atoms()
                .iter()
                .copied()
                .find(|&i| system.atoms()[i].name == "N")
                .unwrap();
            assert!(system.bonded_neighbors(carbon).contains(&nitrogen));
        }

        #[test]
        fn parentless_cluster_atoms_have_no_parent() {
            let system = mixed_system();
            let n = system.total_number_of_atoms();
            let (na, cl) = (&system.atoms()[n - 2], &system.atoms()[n - 1]);
            assert!(na.parent().is_none() && cl.parent().is_none());
            assert!(system.owner_of_atom(n - 1).is_some());

            let ids = system.molecule_ids();
            assert_ne!(ids[n - 2], ids[n - 1]);
            assert_eq!(ids[0], ids[1]);
            assert_eq!(ids[0], ids[2]);
        }

        #[test]
        fn ghost_atoms_are_not_counted() {
            let mut system = ChemicalSystem::new("g");
            let cluster = AtomCluster::new(
                "c",
                vec![Atom::new("C"), Atom::new("H").as_ghost()],
                vec![[0, 1]],
            )
            .unwrap();
            system.add_chemical_entity(ChemicalEntity::AtomCluster(cluster)).unwrap();
            assert_eq!(system.total_number_of_atoms(), 2);
            assert_eq!(system.number_of_atoms(), 1);
            let masses = system.masses(&ElementDatabase::builtin().unwrap()).unwrap();
            assert_eq!(masses[1], 0.0);
        }

        #[test]
        fn empty_entity_is_rejected() {
            let mut system = ChemicalSystem::new("e");
            let cluster = AtomCluster::new("empty", Vec::new(), Vec::new()).unwrap();
            assert!(matches!(
                system.add_chemical_entity(ChemicalEntity::AtomCluster(cluster)),
                Err(ChemicalEntityError::InvalidChemicalEntity(_))
            ));
        }

        #[test]
        fn adding_an_entity_drops_the_configuration() {
            let mut system = ChemicalSystem::new("w");
            system.add_chemical_entity(water("w1")).unwrap();
            system
                .set_configuration(Configuration::real(vec![Vector3::zeros(); 3]))
                .unwrap();
            assert!(system.configuration().is_some());
            system.add_chemical_entity(water("w2")).unwrap();
            assert!(system.configuration().is_none());
            assert!(system
                .set_configuration(Configuration::real(vec![Vector3::zeros(); 3]))
                .is_err());
        }
    }

    mod restructuring {
        use super::*;

        #[test]
        fn copy_is_structurally_equal() {
            let system = mixed_system();
            let copy = system.copy();
            assert_eq!(copy.atoms(), system.atoms());
            assert_eq!(copy.bonds(), system.bonds());
            for (&a, &b) in system.top_level_entities().iter().zip(copy.top_level_entities()) {
                assert_eq!(system.entity(a), copy.entity(b));
            }
        }

        #[test]
        fn connected_components_split_an_unstructured_cluster() {
            let mut system = ChemicalSystem::new("box");
            let atoms = vec![
                Atom::new("O"),
                Atom::new("H"),
                Atom::new("O"),
                Atom::new("H"),
                Atom::new("H"),
            ];
            let cluster =
                AtomCluster::new("all", atoms, vec![[0, 1], [2, 3], [2, 4]]).unwrap();
            system.add_chemical_entity(ChemicalEntity::AtomCluster(cluster)).unwrap();
            let components = system.connected_components();
            assert_eq!(components, vec![vec![0, 1], vec![2, 3, 4]]);

            system.rebuild(&components, None).unwrap();
            assert_eq!(system.top_level_entities().len(), 2);
            assert_eq!(system.bonds().len(), 3);
            let ids = system.molecule_ids();
            assert_eq!(ids, vec![0, 0, 1, 1, 1]);
        }

        #[test]
        fn rebuild_keeps_configuration_when_names_are_unchanged() {
            let mut system = ChemicalSystem::new("w");
            system.add_chemical_entity(water("w1")).unwrap();
            system.add_chemical_entity(water("w2")).unwrap();
            system
                .set_configuration(Configuration::real(vec![Vector3::zeros(); 6]))
                .unwrap();
            system.rebuild(&[vec![0, 1, 2, 3, 4, 5]], None).unwrap();
            assert!(system.configuration().is_some());
        }

        #[test]
        fn rebuild_refuses_to_reorder_under_a_live_configuration() {
            let mut system = ChemicalSystem::new("w");
            system.add_chemical_entity(water("w1")).unwrap();
            system
                .set_configuration(Configuration::real(vec![Vector3::zeros(); 3]))
                .unwrap();
            assert!(matches!(
                system.rebuild(&[vec![1, 0, 2]], None),
                Err(ChemicalEntityError::Rebuild(_))
            ));
            assert!(system.rebuild(&[vec![0, 1]], None).is_err());
            system.take_configuration();
            system.rebuild(&[vec![1], vec![0, 2]], None).unwrap();
            assert_eq!(system.atom_names(), ["HW1", "OW", "HW2"]);
            assert_eq!(system.bonds().len(), 2);
        }

        #[test]
        fn rebuild_with_selection_maps_positions() {
            let mut system = ChemicalSystem::new("w");
            system.add_chemical_entity(water("w1")).unwrap();
            system.rebuild(&[vec![0], vec![1, 2]], Some(&[2, 0, 1])).unwrap();
            assert_eq!(system.atom_names(), ["HW2", "OW", "HW1"]);
        }
    }

    mod mass_properties {
        use super::*;

        #[test]
        fn center_of_mass_of_a_subset() {
            let mut system = ChemicalSystem::new("w");
            system.add_chemical_entity(water("w1")).unwrap();
            let conf = Configuration::periodic_real(
                vec![
                    Vector3::new(0.0, 0.0, 0.0),
                    Vector3::new(0.1, 0.0, 0.0),
                    Vector3::new(-0.1, 0.0, 0.0),
                ],
                UnitCell::cubic(2.0).unwrap(),
            );
            let masses = vec![16.0, 1.0, 1.0];
            let com = system.center_of_mass(&conf, &[0, 1, 2], &masses).unwrap();
            assert!(com.norm() < 1e-12);
            let com = system.center_of_mass(&conf, &[1], &masses).unwrap();
            assert!((com.x - 0.1).abs() < 1e-12);
            assert!(matches!(
                system.center_of_mass(&conf, &[7], &masses),
                Err(GeometryError::AtomIndexOutOfRange { .. })
            ));
            let (_, tensor) = system.inertia(&conf, &[0, 1, 2], &masses).unwrap();
            assert!(tensor[(0, 0)].abs() < 1e-12);
            assert!((tensor[(1, 1)] - 0.02).abs() < 1e-12);
        }

        #[test]
        fn unknown_symbols_are_reported() {
            let mut system = ChemicalSystem::new("x");
            system
                .add_chemical_entity(ChemicalEntity::Atom(Atom::new("Xx")))
                .unwrap();
            assert_eq!(
                system.validate_symbols(&ElementDatabase::builtin().unwrap()),
                Err(ChemicalEntityError::UnknownSymbol("Xx".to_string()))
            );
        }
    }
}
