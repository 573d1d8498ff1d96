use super::atom::Atom;
use super::entity::{
    AtomCluster, ChemicalEntity, EntityKind, Molecule, Nucleotide, NucleotideChain, PeptideChain,
    Protein, Residue, TerminusVariant,
};
use super::ids::EntityId;
use super::system::{ChemicalSystem, EntityData};
use crate::core::database::molecules::MoleculeDatabase;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

/// The on-disk representation of a system does not describe a valid system.
#[derive(Debug, Error)]
#[error("Corrupted file: invalid {kind} entry {index}: {source}")]
pub struct CorruptedFileError {
    pub kind: String,
    pub index: usize,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl CorruptedFileError {
    pub fn new(
        kind: impl Into<String>,
        index: usize,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            kind: kind.into(),
            index,
            source: source.into(),
        }
    }
}

/// The `/chemical_system` group: one homogeneous table of string-encoded rows per kind.
///
/// Composite rows reference their children by row index in the child kind's table.
/// `contents` lists the top-level entities as `(kind table, row)` in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemTables {
    pub name: String,
    pub contents: Vec<[String; 2]>,
    /// `(symbol, name, index, ghost)` for every atom of the system.
    pub atoms: Vec<[String; 4]>,
    /// `(atom indices, name, parentless)`
    pub atom_clusters: Vec<[String; 3]>,
    /// `(atom indices, code, name)`
    pub molecules: Vec<[String; 3]>,
    /// `(atom indices, code, name, variant)`
    pub residues: Vec<[String; 4]>,
    pub nucleotides: Vec<[String; 4]>,
    /// `(residue rows, name)`
    pub peptide_chains: Vec<[String; 2]>,
    pub nucleotide_chains: Vec<[String; 2]>,
    /// `(peptide chain rows, name)`
    pub proteins: Vec<[String; 2]>,
    pub bonds: Vec<[i32; 2]>,
}

fn encode_indices(indices: &[usize]) -> String {
    format!("[{}]", indices.iter().join(", "))
}

fn decode_indices(text: &str) -> Result<Vec<usize>, String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("malformed index list '{}'", text))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|token| {
            token
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid index '{}': {}", token.trim(), e))
        })
        .collect()
}

impl SystemTables {
    /// Encodes `system`, walking each top-level entity depth-first.
    pub fn from_system(system: &ChemicalSystem) -> Self {
        let mut tables = Self {
            name: system.name().to_string(),
            ..Self::default()
        };
        tables.atoms = system
            .atoms()
            .iter()
            .enumerate()
            .map(|(i, a)| [a.symbol.clone(), a.name.clone(), i.to_string(), a.ghost.to_string()])
            .collect();
        for &id in system.top_level_entities() {
            if let Some((kind, row)) = tables.encode(system, id) {
                tables.contents.push([kind.table_name().to_string(), row.to_string()]);
            }
        }
        tables.bonds = system
            .bonds()
            .iter()
            .map(|b| [b.first() as i32, b.second() as i32])
            .collect();
        tables
    }

    fn encode(&mut self, system: &ChemicalSystem, id: EntityId) -> Option<(EntityKind, usize)> {
        let entity = system.entity(id)?;
        let name = entity.name.clone();
        let encoded = match &entity.data {
            EntityData::Atom(index) => (EntityKind::Atom, *index),
            EntityData::AtomCluster { atoms, parentless } => {
                self.atom_clusters
                    .push([encode_indices(atoms), name, parentless.to_string()]);
                (EntityKind::AtomCluster, self.atom_clusters.len() - 1)
            }
            EntityData::Molecule { code, atoms } => {
                self.molecules.push([encode_indices(atoms), code.clone(), name]);
                (EntityKind::Molecule, self.molecules.len() - 1)
            }
            EntityData::Residue {
                code,
                variant,
                atoms,
            } => {
                let variant = variant.map(|v| v.as_str().to_string()).unwrap_or_default();
                self.residues
                    .push([encode_indices(atoms), code.clone(), name, variant]);
                (EntityKind::Residue, self.residues.len() - 1)
            }
            EntityData::Nucleotide {
                code,
                variant,
                atoms,
            } => {
                let variant = variant.map(|v| v.as_str().to_string()).unwrap_or_default();
                self.nucleotides
                    .push([encode_indices(atoms), code.clone(), name, variant]);
                (EntityKind::Nucleotide, self.nucleotides.len() - 1)
            }
            EntityData::PeptideChain { residues } => {
                let rows = self.encode_children(system, residues);
                self.peptide_chains.push([encode_indices(&rows), name]);
                (EntityKind::PeptideChain, self.peptide_chains.len() - 1)
            }
            EntityData::NucleotideChain { nucleotides } => {
                let rows = self.encode_children(system, nucleotides);
                self.nucleotide_chains.push([encode_indices(&rows), name]);
                (EntityKind::NucleotideChain, self.nucleotide_chains.len() - 1)
            }
            EntityData::Protein { chains } => {
                let rows = self.encode_children(system, chains);
                self.proteins.push([encode_indices(&rows), name]);
                (EntityKind::Protein, self.proteins.len() - 1)
            }
        };
        Some(encoded)
    }

    fn encode_children(&mut self, system: &ChemicalSystem, children: &[EntityId]) -> Vec<usize> {
        children
            .iter()
            .filter_map(|&child| self.encode(system, child).map(|(_, row)| row))
            .collect()
    }

    /// Rebuilds the system by replaying `contents` against the molecule templates.
    ///
    /// Template-based entities are re-instantiated and reordered to the stored atom
    /// names; chains are re-linked from their stored terminus variants. The rebuilt atom
    /// sequence is checked against the atom table before the bond table is applied.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptedFileError`] naming the table and row that could not be restored.
    pub fn to_system(&self, molecules: &MoleculeDatabase) -> Result<ChemicalSystem, CorruptedFileError> {
        let atoms = self.decode_atoms()?;
        let mut system = ChemicalSystem::new(self.name.clone());

        for (k, [kind, row]) in self.contents.iter().enumerate() {
            let kind = EntityKind::from_table_name(kind).ok_or_else(|| {
                CorruptedFileError::new("contents", k, format!("unknown entity kind '{}'", kind))
            })?;
            let row: usize = row
                .parse()
                .map_err(|e| CorruptedFileError::new("contents", k, format!("invalid row '{}': {}", row, e)))?;
            let entity = self.decode(kind, row, &atoms, molecules)?;
            system
                .add_chemical_entity(entity)
                .map_err(|e| CorruptedFileError::new(kind.table_name(), row, e))?;
        }

        if system.total_number_of_atoms() != atoms.len() {
            return Err(CorruptedFileError::new(
                "atoms",
                system.total_number_of_atoms().min(atoms.len()),
                format!(
                    "contents define {} atoms but the atom table has {}",
                    system.total_number_of_atoms(),
                    atoms.len()
                ),
            ));
        }
        for (i, (rebuilt, stored)) in system.atoms().iter().zip(&atoms).enumerate() {
            if rebuilt.name != stored.name || rebuilt.symbol != stored.symbol {
                return Err(CorruptedFileError::new(
                    "atoms",
                    i,
                    format!(
                        "rebuilt atom {}:{} does not match stored {}:{}",
                        rebuilt.symbol, rebuilt.name, stored.symbol, stored.name
                    ),
                ));
            }
        }

        for (k, &[i, j]) in self.bonds.iter().enumerate() {
            let (Ok(i), Ok(j)) = (usize::try_from(i), usize::try_from(j)) else {
                return Err(CorruptedFileError::new("bonds", k, "negative atom index"));
            };
            system
                .add_bond(i, j)
                .map_err(|e| CorruptedFileError::new("bonds", k, e))?;
        }
        Ok(system)
    }

    fn decode_atoms(&self) -> Result<Vec<Atom>, CorruptedFileError> {
        self.atoms
            .iter()
            .enumerate()
            .map(|(k, [symbol, name, index, ghost])| {
                let corrupted = |reason: String| CorruptedFileError::new("atoms", k, reason);
                let index: usize = index
                    .parse()
                    .map_err(|e| corrupted(format!("invalid index '{}': {}", index, e)))?;
                if index != k {
                    return Err(corrupted(format!("row {} stores index {}", k, index)));
                }
                let ghost: bool = ghost
                    .parse()
                    .map_err(|e| corrupted(format!("invalid ghost flag '{}': {}", ghost, e)))?;
                let atom = Atom::new(symbol.clone()).with_name(name.clone());
                Ok(if ghost { atom.as_ghost() } else { atom })
            })
            .collect()
    }

    fn decode(
        &self,
        kind: EntityKind,
        row: usize,
        atoms: &[Atom],
        molecules: &MoleculeDatabase,
    ) -> Result<ChemicalEntity, CorruptedFileError> {
        let corrupted = |e: Box<dyn StdError + Send + Sync>| {
            CorruptedFileError::new(kind.table_name(), row, e)
        };
        let missing = || {
            CorruptedFileError::new(kind.table_name(), row, "row does not exist")
        };
        let stored_atoms = |text: &str| -> Result<Vec<&Atom>, CorruptedFileError> {
            decode_indices(text)
                .map_err(|e| corrupted(e.into()))?
                .into_iter()
                .map(|i| {
                    atoms
                        .get(i)
                        .ok_or_else(|| corrupted(format!("atom index {} out of range", i).into()))
                })
                .collect()
        };
        let names = |members: &[&Atom]| -> Vec<String> {
            members.iter().map(|a| a.name.clone()).collect()
        };
        let reordered = |result: Result<(), _>| result.map_err(|e: super::ChemicalEntityError| corrupted(e.into()));

        let entity = match kind {
            EntityKind::Atom => ChemicalEntity::Atom(atoms.get(row).ok_or_else(missing)?.clone()),
            EntityKind::AtomCluster => {
                let [indices, name, parentless] = self.atom_clusters.get(row).ok_or_else(missing)?;
                let members = stored_atoms(indices)?;
                let parentless = parentless.parse::<bool>().map_err(|e| corrupted(e.into()))?;
                let cluster = AtomCluster::new(
                    name.clone(),
                    members.into_iter().cloned().collect(),
                    Vec::new(),
                )
                .map_err(|e| corrupted(e.into()))?;
                ChemicalEntity::AtomCluster(if parentless { cluster.parentless() } else { cluster })
            }
            EntityKind::Molecule => {
                let [indices, code, name] = self.molecules.get(row).ok_or_else(missing)?;
                let order = names(&stored_atoms(indices)?);
                let mut molecule = Molecule::from_database(molecules, code, name.clone())
                    .map_err(|e| corrupted(e.into()))?;
                reordered(molecule.reorder_atoms(&order.iter().map(String::as_str).collect::<Vec<_>>()))?;
                ChemicalEntity::Molecule(molecule)
            }
            EntityKind::Residue => {
                let [indices, code, name, variant] = self.residues.get(row).ok_or_else(missing)?;
                let order = names(&stored_atoms(indices)?);
                let variant = parse_variant(variant).map_err(|e| corrupted(e.into()))?;
                let mut residue = Residue::from_database(molecules, code, name.clone(), variant)
                    .map_err(|e| corrupted(e.into()))?;
                reordered(residue.reorder_atoms(&order.iter().map(String::as_str).collect::<Vec<_>>()))?;
                ChemicalEntity::Residue(residue)
            }
            EntityKind::Nucleotide => {
                let [indices, code, name, variant] = self.nucleotides.get(row).ok_or_else(missing)?;
                let order = names(&stored_atoms(indices)?);
                let variant = parse_variant(variant).map_err(|e| corrupted(e.into()))?;
                let mut nucleotide = Nucleotide::from_database(molecules, code, name.clone(), variant)
                    .map_err(|e| corrupted(e.into()))?;
                reordered(nucleotide.reorder_atoms(&order.iter().map(String::as_str).collect::<Vec<_>>()))?;
                ChemicalEntity::Nucleotide(nucleotide)
            }
            EntityKind::PeptideChain => {
                let [rows, name] = self.peptide_chains.get(row).ok_or_else(missing)?;
                check_termini(rows, &self.residues, TerminusVariant::NTerminus, TerminusVariant::CTerminus)
                    .map_err(|e| corrupted(e.into()))?;
                let residues = self
                    .decode_children(rows, EntityKind::Residue, atoms, molecules, &corrupted)?
                    .into_iter()
                    .filter_map(|e| match e {
                        ChemicalEntity::Residue(r) => Some(r),
                        _ => None,
                    })
                    .collect();
                let chain = PeptideChain::new(name.clone(), residues).map_err(|e| corrupted(e.into()))?;
                ChemicalEntity::PeptideChain(chain)
            }
            EntityKind::NucleotideChain => {
                let [rows, name] = self.nucleotide_chains.get(row).ok_or_else(missing)?;
                check_termini(rows, &self.nucleotides, TerminusVariant::FivePrime, TerminusVariant::ThreePrime)
                    .map_err(|e| corrupted(e.into()))?;
                let nucleotides = self
                    .decode_children(rows, EntityKind::Nucleotide, atoms, molecules, &corrupted)?
                    .into_iter()
                    .filter_map(|e| match e {
                        ChemicalEntity::Nucleotide(n) => Some(n),
                        _ => None,
                    })
                    .collect();
                let chain =
                    NucleotideChain::new(name.clone(), nucleotides).map_err(|e| corrupted(e.into()))?;
                ChemicalEntity::NucleotideChain(chain)
            }
            EntityKind::Protein => {
                let [rows, name] = self.proteins.get(row).ok_or_else(missing)?;
                let chains = self
                    .decode_children(rows, EntityKind::PeptideChain, atoms, molecules, &corrupted)?
                    .into_iter()
                    .filter_map(|e| match e {
                        ChemicalEntity::PeptideChain(c) => Some(c),
                        _ => None,
                    })
                    .collect();
                let protein = Protein::new(name.clone(), chains).map_err(|e| corrupted(e.into()))?;
                ChemicalEntity::Protein(protein)
            }
        };
        Ok(entity)
    }

    fn decode_children(
        &self,
        rows: &str,
        kind: EntityKind,
        atoms: &[Atom],
        molecules: &MoleculeDatabase,
        corrupted: &dyn Fn(Box<dyn StdError + Send + Sync>) -> CorruptedFileError,
    ) -> Result<Vec<ChemicalEntity>, CorruptedFileError> {
        decode_indices(rows)
            .map_err(|e| corrupted(e.into()))?
            .into_iter()
            .map(|child| self.decode(kind, child, atoms, molecules))
            .collect()
    }
}

/// Checks the stored variants of a chain's first and last unit rows.
///
/// Run before the units are rebuilt, so a lost terminus is reported against the chain row.
fn check_termini(
    rows: &str,
    units: &[[String; 4]],
    first: TerminusVariant,
    last: TerminusVariant,
) -> Result<(), String> {
    let rows = decode_indices(rows)?;
    let (Some(&head), Some(&tail)) = (rows.first(), rows.last()) else {
        return Err("a chain needs at least two units".to_string());
    };
    for (unit, expected) in [(head, first), (tail, last)] {
        let stored = units
            .get(unit)
            .ok_or_else(|| format!("unit row {} does not exist", unit))?;
        if parse_variant(&stored[3])? != Some(expected) {
            return Err(format!(
                "unit row {} should carry the {} variant, found '{}'",
                unit, expected, stored[3]
            ));
        }
    }
    Ok(())
}

fn parse_variant(text: &str) -> Result<Option<TerminusVariant>, String> {
    if text.is_empty() {
        Ok(None)
    } else {
        text.parse().map(Some)
    }
}
