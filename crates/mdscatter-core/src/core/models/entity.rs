use super::ChemicalEntityError;
use super::atom::{Atom, ConnectionFlag};
use crate::core::database::molecules::{
    AtomTemplate, FragmentTemplate, MoleculeDatabase, NEXT_UNIT_STUB, PREVIOUS_UNIT_STUB,
    PolymerFamily, VariantPatch,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// An unresolved connection from a polymer unit to its neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// `+R`: bonds to the next unit of the chain.
    Next,
    /// `-R`: bonds to the previous unit of the chain.
    Previous,
}

impl Link {
    pub fn from_stub(token: &str) -> Option<Self> {
        match token {
            NEXT_UNIT_STUB => Some(Self::Next),
            PREVIOUS_UNIT_STUB => Some(Self::Previous),
            _ => None,
        }
    }

    pub fn stub(self) -> &'static str {
        match self {
            Self::Next => NEXT_UNIT_STUB,
            Self::Previous => PREVIOUS_UNIT_STUB,
        }
    }
}

/// Terminal variants of residues and nucleotides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminusVariant {
    NTerminus,
    CTerminus,
    FivePrime,
    ThreePrime,
}

impl TerminusVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NTerminus => "N-terminus",
            Self::CTerminus => "C-terminus",
            Self::FivePrime => "5-terminus",
            Self::ThreePrime => "3-terminus",
        }
    }

    pub fn family(&self) -> PolymerFamily {
        match self {
            Self::NTerminus | Self::CTerminus => PolymerFamily::Peptide,
            Self::FivePrime | Self::ThreePrime => PolymerFamily::Nucleotide,
        }
    }
}

impl FromStr for TerminusVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "n-terminus" | "nter" => Ok(Self::NTerminus),
            "c-terminus" | "cter" => Ok(Self::CTerminus),
            "5-terminus" | "5ter" => Ok(Self::FivePrime),
            "3-terminus" | "3ter" => Ok(Self::ThreePrime),
            _ => Err(format!("Invalid terminus variant: {}", s)),
        }
    }
}

impl fmt::Display for TerminusVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atoms of one building block with its local bonds and unresolved chain links.
///
/// Bonds are stored as canonical local index pairs `[i, j]` with `i < j`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    atoms: Vec<Atom>,
    bonds: Vec<[usize; 2]>,
    links: Vec<(usize, Link)>,
}

impl Fragment {
    pub fn new(
        atoms: Vec<Atom>,
        bonds: Vec<[usize; 2]>,
        entity: &str,
    ) -> Result<Self, ChemicalEntityError> {
        let n_atoms = atoms.len();
        let mut fragment = Self {
            atoms,
            bonds: Vec::with_capacity(bonds.len()),
            links: Vec::new(),
        };
        for [i, j] in bonds {
            if let Some(&index) = [i, j].iter().find(|&&k| k >= n_atoms) {
                return Err(ChemicalEntityError::InvalidChemicalEntity(format!(
                    "{} bonds atom {} but has only {} atoms",
                    entity, index, n_atoms
                )));
            }
            fragment.add_bond(i, j);
        }
        Ok(fragment)
    }

    fn from_template(template: &FragmentTemplate, entity: &str) -> Result<Self, ChemicalEntityError> {
        let mut fragment = Self::default();
        for atom_template in &template.atoms {
            fragment.atoms.push(atom_from_template(atom_template)?);
        }
        for (i, atom_template) in template.atoms.iter().enumerate() {
            fragment.connect_template_bonds(i, &atom_template.bonds, entity)?;
        }
        Ok(fragment)
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[[usize; 2]] {
        &self.bonds
    }

    pub fn links(&self) -> &[(usize, Link)] {
        &self.links
    }

    pub fn atom_index(&self, name: &str) -> Option<usize> {
        self.atoms.iter().position(|a| a.name == name)
    }

    pub fn link_atom(&self, link: Link) -> Option<usize> {
        self.links.iter().find(|(_, l)| *l == link).map(|(i, _)| *i)
    }

    pub(crate) fn into_parts(self) -> (Vec<Atom>, Vec<[usize; 2]>) {
        (self.atoms, self.bonds)
    }

    fn require_atom(&self, name: &str, entity: &str) -> Result<usize, ChemicalEntityError> {
        self.atom_index(name)
            .ok_or_else(|| ChemicalEntityError::UnknownAtom {
                entity: entity.to_string(),
                name: name.to_string(),
            })
    }

    fn add_bond(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        let bond = [i.min(j), i.max(j)];
        if !self.bonds.contains(&bond) {
            self.bonds.push(bond);
        }
    }

    fn add_link(&mut self, atom: usize, link: Link) {
        if !self.links.contains(&(atom, link)) {
            self.links.push((atom, link));
        }
    }

    fn remove_link(&mut self, link: Link) {
        self.links.retain(|(_, l)| *l != link);
    }

    fn connect_template_bonds(
        &mut self,
        atom: usize,
        partners: &[String],
        entity: &str,
    ) -> Result<(), ChemicalEntityError> {
        for partner in partners {
            match Link::from_stub(partner) {
                Some(link) => self.add_link(atom, link),
                None => {
                    let other = self.require_atom(partner, entity)?;
                    self.add_bond(atom, other);
                }
            }
        }
        Ok(())
    }

    fn remap(&mut self, old_to_new: &[Option<usize>]) {
        self.bonds = self
            .bonds
            .iter()
            .filter_map(|&[i, j]| {
                let (i, j) = (old_to_new[i]?, old_to_new[j]?);
                Some([i.min(j), i.max(j)])
            })
            .collect();
        self.links = self
            .links
            .iter()
            .filter_map(|&(i, link)| Some((old_to_new[i]?, link)))
            .collect();
    }

    fn remove_atoms(&mut self, names: &[String], entity: &str) -> Result<(), ChemicalEntityError> {
        let doomed = names
            .iter()
            .map(|name| self.require_atom(name, entity))
            .collect::<Result<HashSet<_>, _>>()?;
        let mut next = 0;
        let old_to_new: Vec<Option<usize>> = (0..self.atoms.len())
            .map(|i| {
                if doomed.contains(&i) {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect();
        let mut index = 0;
        self.atoms.retain(|_| {
            index += 1;
            !doomed.contains(&(index - 1))
        });
        self.remap(&old_to_new);
        Ok(())
    }

    /// Reorders the atoms so that their names follow `names`.
    ///
    /// # Errors
    ///
    /// Returns [`ChemicalEntityError::InconsistentAtomNames`] unless `names` is a
    /// permutation of the current (unique) atom names.
    pub fn reorder(&mut self, names: &[&str], entity: &str) -> Result<(), ChemicalEntityError> {
        let inconsistent = |reason: String| ChemicalEntityError::InconsistentAtomNames {
            entity: entity.to_string(),
            reason,
        };
        if names.len() != self.atoms.len() {
            return Err(inconsistent(format!(
                "expected {} names, got {}",
                self.atoms.len(),
                names.len()
            )));
        }
        let positions: HashMap<&str, usize> = self
            .atoms
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.as_str(), i))
            .collect();
        if positions.len() != self.atoms.len() {
            return Err(inconsistent("atom names are not unique".to_string()));
        }

        let mut old_to_new = vec![None; self.atoms.len()];
        for (new, name) in names.iter().enumerate() {
            let old = *positions
                .get(name)
                .ok_or_else(|| inconsistent(format!("unknown atom '{}'", name)))?;
            if old_to_new[old].replace(new).is_some() {
                return Err(inconsistent(format!("atom '{}' listed twice", name)));
            }
        }

        let mut reordered: Vec<Option<Atom>> = vec![None; self.atoms.len()];
        for (old, atom) in self.atoms.drain(..).enumerate() {
            if let Some(new) = old_to_new[old] {
                reordered[new] = Some(atom);
            }
        }
        self.atoms = reordered.into_iter().flatten().collect();
        self.remap(&old_to_new);
        Ok(())
    }

    fn apply_patch(&mut self, patch: &VariantPatch, entity: &str) -> Result<(), ChemicalEntityError> {
        self.remove_atoms(&patch.remove, entity)?;
        if let Some(stub) = &patch.drop_link {
            let link = Link::from_stub(stub).ok_or_else(|| {
                ChemicalEntityError::Template(format!("invalid link stub '{}' in variant patch", stub))
            })?;
            self.remove_link(link);
        }
        let first_new = self.atoms.len();
        for atom_template in &patch.add {
            self.atoms.push(atom_from_template(atom_template)?);
        }
        for (k, atom_template) in patch.add.iter().enumerate() {
            self.connect_template_bonds(first_new + k, &atom_template.bonds, entity)?;
        }
        Ok(())
    }
}

fn atom_from_template(template: &AtomTemplate) -> Result<Atom, ChemicalEntityError> {
    let mut atom = Atom::new(&template.symbol)
        .with_name(&template.name)
        .with_groups(template.groups.iter().cloned());
    for flag in &template.flags {
        atom.flags
            .insert(flag.parse().map_err(ChemicalEntityError::Template)?);
    }
    atom.ghost = template.ghost;
    Ok(atom)
}

fn template_error(error: crate::core::database::DatabaseError) -> ChemicalEntityError {
    ChemicalEntityError::Template(error.to_string())
}

/// A user-defined group of atoms, e.g. an unstructured molecule or a whole solvent box.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomCluster {
    name: String,
    fragment: Fragment,
    parentless: bool,
}

impl AtomCluster {
    pub fn new(
        name: impl Into<String>,
        atoms: Vec<Atom>,
        bonds: Vec<[usize; 2]>,
    ) -> Result<Self, ChemicalEntityError> {
        let name = name.into();
        let fragment = Fragment::new(atoms, bonds, &name)?;
        Ok(Self {
            name,
            fragment,
            parentless: false,
        })
    }

    /// Marks the cluster as parentless: its atoms will not point back to it.
    pub fn parentless(mut self) -> Self {
        self.parentless = true;
        self
    }

    pub fn is_parentless(&self) -> bool {
        self.parentless
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn atoms(&self) -> &[Atom] {
        self.fragment.atoms()
    }

    pub fn bonds(&self) -> &[[usize; 2]] {
        self.fragment.bonds()
    }

    pub fn reorder_atoms(&mut self, names: &[&str]) -> Result<(), ChemicalEntityError> {
        self.fragment.reorder(names, &self.name)
    }

    pub(crate) fn into_parts(self) -> (String, bool, Fragment) {
        (self.name, self.parentless, self.fragment)
    }
}

/// A molecule instantiated from a named entry of the molecule database.
#[derive(Debug, Clone, PartialEq)]
pub struct Molecule {
    code: String,
    name: String,
    fragment: Fragment,
}

impl Molecule {
    pub fn from_database(
        database: &MoleculeDatabase,
        code: &str,
        name: impl Into<String>,
    ) -> Result<Self, ChemicalEntityError> {
        let template = database.molecule(code).map_err(template_error)?;
        let fragment = Fragment::from_template(template, code)?;
        Ok(Self {
            code: code.to_string(),
            name: name.into(),
            fragment,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn atoms(&self) -> &[Atom] {
        self.fragment.atoms()
    }

    pub fn bonds(&self) -> &[[usize; 2]] {
        self.fragment.bonds()
    }

    pub fn reorder_atoms(&mut self, names: &[&str]) -> Result<(), ChemicalEntityError> {
        self.fragment.reorder(names, &self.code)
    }

    pub(crate) fn into_parts(self) -> (String, String, Fragment) {
        (self.code, self.name, self.fragment)
    }
}

fn polymer_unit_fragment(
    database: &MoleculeDatabase,
    template: &FragmentTemplate,
    code: &str,
    variant: Option<TerminusVariant>,
    family: PolymerFamily,
) -> Result<Fragment, ChemicalEntityError> {
    let mut fragment = Fragment::from_template(template, code)?;
    if let Some(variant) = variant {
        let patch = database.variant(variant.as_str()).map_err(template_error)?;
        if variant.family() != family || patch.family != family {
            return Err(ChemicalEntityError::InvalidChemicalEntity(format!(
                "variant '{}' cannot be applied to {:?} unit '{}'",
                variant, family, code
            )));
        }
        fragment.apply_patch(patch, code)?;
    }
    Ok(fragment)
}

macro_rules! polymer_unit {
    ($(#[$meta:meta])* $name:ident, $lookup:ident, $family:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            code: String,
            name: String,
            variant: Option<TerminusVariant>,
            fragment: Fragment,
        }

        impl $name {
            pub fn from_database(
                database: &MoleculeDatabase,
                code: &str,
                name: impl Into<String>,
                variant: Option<TerminusVariant>,
            ) -> Result<Self, ChemicalEntityError> {
                let template = database.$lookup(code).map_err(template_error)?;
                let fragment = polymer_unit_fragment(database, template, code, variant, $family)?;
                Ok(Self {
                    code: code.to_string(),
                    name: name.into(),
                    variant,
                    fragment,
                })
            }

            pub fn code(&self) -> &str {
                &self.code
            }

            pub fn name(&self) -> &str {
                &self.name
            }

            pub fn variant(&self) -> Option<TerminusVariant> {
                self.variant
            }

            pub fn atoms(&self) -> &[Atom] {
                self.fragment.atoms()
            }

            pub fn bonds(&self) -> &[[usize; 2]] {
                self.fragment.bonds()
            }

            pub fn links(&self) -> &[(usize, Link)] {
                self.fragment.links()
            }

            pub fn reorder_atoms(&mut self, names: &[&str]) -> Result<(), ChemicalEntityError> {
                self.fragment.reorder(names, &self.code)
            }

            pub(crate) fn into_parts(self) -> (String, String, Option<TerminusVariant>, Fragment) {
                (self.code, self.name, self.variant, self.fragment)
            }
        }

        impl PolymerUnit for $name {
            fn fragment(&self) -> &Fragment {
                &self.fragment
            }

            fn fragment_mut(&mut self) -> &mut Fragment {
                &mut self.fragment
            }

            fn variant(&self) -> Option<TerminusVariant> {
                self.variant
            }

            fn label(&self) -> &str {
                &self.name
            }
        }
    };
}

pub(crate) trait PolymerUnit {
    fn fragment(&self) -> &Fragment;
    fn fragment_mut(&mut self) -> &mut Fragment;
    fn variant(&self) -> Option<TerminusVariant>;
    fn label(&self) -> &str;
}

polymer_unit!(
    /// An amino-acid residue, only usable inside a [`PeptideChain`].
    Residue,
    residue,
    PolymerFamily::Peptide
);

polymer_unit!(
    /// A nucleotide, only usable inside a [`NucleotideChain`].
    Nucleotide,
    nucleotide,
    PolymerFamily::Nucleotide
);

/// A resolved bond between two consecutive units, as `(unit, local atom)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub previous: (usize, usize),
    pub next: (usize, usize),
}

struct LinkRule {
    first_variant: TerminusVariant,
    last_variant: TerminusVariant,
    previous_pivot: &'static str,
    previous_flag: ConnectionFlag,
    next_pivot: &'static str,
    next_flag: ConnectionFlag,
}

const PEPTIDE_RULE: LinkRule = LinkRule {
    first_variant: TerminusVariant::NTerminus,
    last_variant: TerminusVariant::CTerminus,
    previous_pivot: "C",
    previous_flag: ConnectionFlag::CterConnected,
    next_pivot: "N",
    next_flag: ConnectionFlag::NterConnected,
};

const NUCLEOTIDE_RULE: LinkRule = LinkRule {
    first_variant: TerminusVariant::FivePrime,
    last_variant: TerminusVariant::ThreePrime,
    previous_pivot: "O3'",
    previous_flag: ConnectionFlag::O3primeConnected,
    next_pivot: "O5'",
    next_flag: ConnectionFlag::O5primeConnected,
};

/// Resolves the `+R`/`-R` stubs of consecutive units into chain links.
fn link_units<U: PolymerUnit>(units: &mut [U], rule: &LinkRule) -> Result<Vec<ChainLink>, String> {
    if units.len() < 2 {
        return Err("a chain needs at least two units".to_string());
    }
    let last = units.len() - 1;
    for (k, unit) in units.iter().enumerate() {
        let expected = match k {
            0 => Some(rule.first_variant),
            k if k == last => Some(rule.last_variant),
            _ => None,
        };
        if unit.variant() != expected {
            return Err(format!(
                "unit {} ('{}') has variant {:?}, expected {:?}",
                k,
                unit.label(),
                unit.variant().map(|v| v.as_str()),
                expected.map(|v| v.as_str())
            ));
        }
    }

    let mut links = Vec::with_capacity(last);
    for k in 0..last {
        let previous = units[k].fragment();
        let pivot = previous.atom_index(rule.previous_pivot).ok_or_else(|| {
            format!("unit {} ('{}') has no '{}' atom", k, units[k].label(), rule.previous_pivot)
        })?;
        if !previous.atoms()[pivot].has_flag(rule.previous_flag) {
            return Err(format!(
                "atom '{}' of unit {} is not flagged {}",
                rule.previous_pivot, k, rule.previous_flag
            ));
        }
        if previous.link_atom(Link::Next) != Some(pivot) {
            return Err(format!(
                "atom '{}' of unit {} carries no '{}' link",
                rule.previous_pivot,
                k,
                Link::Next.stub()
            ));
        }

        let next = units[k + 1].fragment();
        if next.atom_index(rule.next_pivot).is_none() {
            return Err(format!(
                "unit {} ('{}') has no '{}' atom",
                k + 1,
                units[k + 1].label(),
                rule.next_pivot
            ));
        }
        let partner = next.link_atom(Link::Previous).ok_or_else(|| {
            format!("unit {} carries no '{}' link", k + 1, Link::Previous.stub())
        })?;
        if !next.atoms()[partner].has_flag(rule.next_flag) {
            return Err(format!(
                "linking atom '{}' of unit {} is not flagged {}",
                next.atoms()[partner].name,
                k + 1,
                rule.next_flag
            ));
        }
        links.push(ChainLink {
            previous: (k, pivot),
            next: (k + 1, partner),
        });
    }

    for (k, unit) in units.iter_mut().enumerate() {
        let fragment = unit.fragment_mut();
        if k < last {
            fragment.remove_link(Link::Next);
        }
        if k > 0 {
            fragment.remove_link(Link::Previous);
        }
        if let Some((atom, link)) = fragment.links().first() {
            return Err(format!(
                "unresolved '{}' link on atom '{}' of unit {}",
                link.stub(),
                fragment.atoms()[*atom].name,
                k
            ));
        }
    }
    Ok(links)
}

/// An ordered sequence of residues linked by peptide bonds.
#[derive(Debug, Clone, PartialEq)]
pub struct PeptideChain {
    name: String,
    residues: Vec<Residue>,
    links: Vec<ChainLink>,
}

impl PeptideChain {
    /// Links `residues` head to tail.
    ///
    /// The first residue must carry the N-terminus variant and the last the C-terminus one.
    ///
    /// # Errors
    ///
    /// Returns [`ChemicalEntityError::InvalidPeptideChain`] when a terminus variant,
    /// pivot atom, connection flag or link stub is missing.
    pub fn new(name: impl Into<String>, mut residues: Vec<Residue>) -> Result<Self, ChemicalEntityError> {
        let name = name.into();
        let links = link_units(&mut residues, &PEPTIDE_RULE).map_err(|reason| {
            ChemicalEntityError::InvalidPeptideChain {
                chain: name.clone(),
                reason,
            }
        })?;
        Ok(Self {
            name,
            residues,
            links,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Residue>, Vec<ChainLink>) {
        (self.name, self.residues, self.links)
    }
}

/// An ordered sequence of nucleotides linked through their phosphate groups.
#[derive(Debug, Clone, PartialEq)]
pub struct NucleotideChain {
    name: String,
    nucleotides: Vec<Nucleotide>,
    links: Vec<ChainLink>,
}

impl NucleotideChain {
    /// Links `nucleotides` from the 5' to the 3' end.
    ///
    /// # Errors
    ///
    /// Returns [`ChemicalEntityError::InvalidNucleotideChain`] when a terminus variant,
    /// pivot atom, connection flag or link stub is missing.
    pub fn new(
        name: impl Into<String>,
        mut nucleotides: Vec<Nucleotide>,
    ) -> Result<Self, ChemicalEntityError> {
        let name = name.into();
        let links = link_units(&mut nucleotides, &NUCLEOTIDE_RULE).map_err(|reason| {
            ChemicalEntityError::InvalidNucleotideChain {
                chain: name.clone(),
                reason,
            }
        })?;
        Ok(Self {
            name,
            nucleotides,
            links,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nucleotides(&self) -> &[Nucleotide] {
        &self.nucleotides
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Nucleotide>, Vec<ChainLink>) {
        (self.name, self.nucleotides, self.links)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Protein {
    name: String,
    chains: Vec<PeptideChain>,
}

impl Protein {
    pub fn new(name: impl Into<String>, chains: Vec<PeptideChain>) -> Result<Self, ChemicalEntityError> {
        let name = name.into();
        if chains.is_empty() {
            return Err(ChemicalEntityError::InvalidChemicalEntity(format!(
                "protein '{}' has no peptide chains",
                name
            )));
        }
        Ok(Self { name, chains })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chains(&self) -> &[PeptideChain] {
        &self.chains
    }

    pub(crate) fn into_parts(self) -> (String, Vec<PeptideChain>) {
        (self.name, self.chains)
    }
}

/// The kinds of entity a [`ChemicalSystem`](super::system::ChemicalSystem) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Atom,
    AtomCluster,
    Molecule,
    Residue,
    Nucleotide,
    PeptideChain,
    NucleotideChain,
    Protein,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        Self::Atom,
        Self::AtomCluster,
        Self::Molecule,
        Self::Residue,
        Self::Nucleotide,
        Self::PeptideChain,
        Self::NucleotideChain,
        Self::Protein,
    ];

    /// Name of the table that stores this kind in a serialized system.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Atom => "atoms",
            Self::AtomCluster => "atom_clusters",
            Self::Molecule => "molecules",
            Self::Residue => "residues",
            Self::Nucleotide => "nucleotides",
            Self::PeptideChain => "peptide_chains",
            Self::NucleotideChain => "nucleotide_chains",
            Self::Protein => "proteins",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == name)
    }
}

/// An owned entity tree that can be added to a chemical system.
#[derive(Debug, Clone, PartialEq)]
pub enum ChemicalEntity {
    Atom(Atom),
    AtomCluster(AtomCluster),
    Molecule(Molecule),
    Residue(Residue),
    Nucleotide(Nucleotide),
    PeptideChain(PeptideChain),
    NucleotideChain(NucleotideChain),
    Protein(Protein),
}

impl ChemicalEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Atom(_) => EntityKind::Atom,
            Self::AtomCluster(_) => EntityKind::AtomCluster,
            Self::Molecule(_) => EntityKind::Molecule,
            Self::Residue(_) => EntityKind::Residue,
            Self::Nucleotide(_) => EntityKind::Nucleotide,
            Self::PeptideChain(_) => EntityKind::PeptideChain,
            Self::NucleotideChain(_) => EntityKind::NucleotideChain,
            Self::Protein(_) => EntityKind::Protein,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Atom(a) => &a.name,
            Self::AtomCluster(c) => c.name(),
            Self::Molecule(m) => m.name(),
            Self::Residue(r) => r.name(),
            Self::Nucleotide(n) => n.name(),
            Self::PeptideChain(c) => c.name(),
            Self::NucleotideChain(c) => c.name(),
            Self::Protein(p) => p.name(),
        }
    }

    pub fn number_of_atoms(&self) -> usize {
        match self {
            Self::Atom(_) => 1,
            Self::AtomCluster(c) => c.atoms().len(),
            Self::Molecule(m) => m.atoms().len(),
            Self::Residue(r) => r.atoms().len(),
            Self::Nucleotide(n) => n.atoms().len(),
            Self::PeptideChain(c) => c.residues().iter().map(|r| r.atoms().len()).sum(),
            Self::NucleotideChain(c) => c.nucleotides().iter().map(|n| n.atoms().len()).sum(),
            Self::Protein(p) => p
                .chains()
                .iter()
                .flat_map(|c| c.residues())
                .map(|r| r.atoms().len())
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> MoleculeDatabase {
        MoleculeDatabase::builtin().unwrap()
    }

    fn residue(code: &str, name: &str, variant: Option<TerminusVariant>) -> Residue {
        Residue::from_database(&db(), code, name, variant).unwrap()
    }

    fn nucleotide(code: &str, name: &str, variant: Option<TerminusVariant>) -> Nucleotide {
        Nucleotide::from_database(&db(), code, name, variant).unwrap()
    }

    mod fragments {
        use super::*;

        #[test]
        fn molecule_bonds_are_resolved_from_names() {
            let water = Molecule::from_database(&db(), "WAT", "w1").unwrap();
            assert_eq!(water.atoms().len(), 3);
            assert_eq!(water.bonds(), &[[0, 1], [0, 2]]);
            assert_eq!(water.code(), "WAT");
        }

        #[test]
        fn reorder_permutes_atoms_and_remaps_bonds() {
            let mut water = Molecule::from_database(&db(), "WAT", "w1").unwrap();
            water.reorder_atoms(&["HW1", "OW", "HW2"]).unwrap();
            let names: Vec<_> = water.atoms().iter().map(|a| a.name.as_str()).collect();
            assert_eq!(names, ["HW1", "OW", "HW2"]);
            let mut bonds = water.bonds().to_vec();
            bonds.sort();
            assert_eq!(bonds, vec![[0, 1], [1, 2]]);
        }

        #[test]
        fn reorder_rejects_inconsistent_name_sets() {
            let mut water = Molecule::from_database(&db(), "WAT", "w1").unwrap();
            assert!(matches!(
                water.reorder_atoms(&["OW", "HW1"]),
                Err(ChemicalEntityError::InconsistentAtomNames { .. })
            ));
            assert!(matches!(
                water.reorder_atoms(&["OW", "HW1", "HW1"]),
                Err(ChemicalEntityError::InconsistentAtomNames { .. })
            ));
            assert!(matches!(
                water.reorder_atoms(&["OW", "HW1", "XX"]),
                Err(ChemicalEntityError::InconsistentAtomNames { .. })
            ));
        }

        #[test]
        fn cluster_rejects_out_of_range_bonds() {
            let atoms = vec![Atom::new("C"), Atom::new("O")];
            assert!(AtomCluster::new("co", atoms.clone(), vec![[0, 1]]).is_ok());
            assert!(AtomCluster::new("co", atoms, vec![[0, 2]]).is_err());
        }

        #[test]
        fn unknown_template_is_a_template_error() {
            assert!(matches!(
                Molecule::from_database(&db(), "NOPE", "x"),
                Err(ChemicalEntityError::Template(_))
            ));
        }
    }

    mod variants {
        use super::*;

        #[test]
        fn n_terminus_replaces_amide_hydrogen_and_drops_previous_link() {
            let plain = residue("ALA", "A1", None);
            let nter = residue("ALA", "A1", Some(TerminusVariant::NTerminus));
            assert!(plain.atoms().iter().any(|a| a.name == "H"));
            assert!(!nter.atoms().iter().any(|a| a.name == "H"));
            for name in ["HT1", "HT2", "HT3"] {
                assert!(nter.atoms().iter().any(|a| a.name == name));
            }
            assert!(nter.links().iter().all(|(_, l)| *l == Link::Next));
            assert_eq!(nter.atoms().len(), plain.atoms().len() + 2);
        }

        #[test]
        fn five_prime_terminus_removes_phosphate() {
            let five = nucleotide("U", "U1", Some(TerminusVariant::FivePrime));
            assert!(five.atoms().iter().all(|a| !a.is_in_group("phosphate")));
            let h5t = five.atoms().iter().position(|a| a.name == "H5T").unwrap();
            let o5 = five.atoms().iter().position(|a| a.name == "O5'").unwrap();
            assert!(five.bonds().contains(&[o5.min(h5t), o5.max(h5t)]));
        }

        #[test]
        fn variant_of_the_wrong_family_is_rejected() {
            assert!(matches!(
                Residue::from_database(&db(), "ALA", "A1", Some(TerminusVariant::FivePrime)),
                Err(ChemicalEntityError::InvalidChemicalEntity(_))
            ));
        }

        #[test]
        fn variant_names_parse() {
            assert_eq!("n-terminus".parse(), Ok(TerminusVariant::NTerminus));
            assert_eq!("3-TERMINUS".parse(), Ok(TerminusVariant::ThreePrime));
            assert!("middle".parse::<TerminusVariant>().is_err());
        }
    }

    mod chains {
        use super::*;

        fn tripeptide() -> Vec<Residue> {
            vec![
                residue("GLY", "G1", Some(TerminusVariant::NTerminus)),
                residue("ALA", "A2", None),
                residue("SER", "S3", Some(TerminusVariant::CTerminus)),
            ]
        }

        #[test]
        fn peptide_chain_links_carbonyl_to_amide_nitrogen() {
            let chain = PeptideChain::new("A", tripeptide()).unwrap();
            assert_eq!(chain.links().len(), 2);
            for link in chain.links() {
                let (pu, pa) = link.previous;
                let (nu, na) = link.next;
                assert_eq!(chain.residues()[pu].atoms()[pa].name, "C");
                assert_eq!(chain.residues()[nu].atoms()[na].name, "N");
            }
            assert!(chain.residues().iter().all(|r| r.links().is_empty()));
        }

        #[test]
        fn peptide_chain_requires_terminus_variants() {
            let mut residues = tripeptide();
            residues[0] = residue("GLY", "G1", None);
            assert!(matches!(
                PeptideChain::new("A", residues),
                Err(ChemicalEntityError::InvalidPeptideChain { .. })
            ));
            let mut residues = tripeptide();
            residues[1] = residue("ALA", "A2", Some(TerminusVariant::CTerminus));
            assert!(PeptideChain::new("A", residues).is_err());
        }

        #[test]
        fn single_residue_chain_is_rejected() {
            let residues = vec![residue("GLY", "G1", Some(TerminusVariant::NTerminus))];
            assert!(matches!(
                PeptideChain::new("A", residues),
                Err(ChemicalEntityError::InvalidPeptideChain { .. })
            ));
        }

        #[test]
        fn missing_connection_flag_fails_chain_assembly() {
            let mut residues = tripeptide();
            let carbon = residues[1].fragment.atom_index("C").unwrap();
            residues[1].fragment.atoms[carbon].flags.clear();
            let err = PeptideChain::new("A", residues).unwrap_err();
            assert!(err.to_string().contains("cter_connected"), "{err}");
        }

        #[test]
        fn nucleotide_chain_links_o3_to_phosphorus() {
            let nucleotides = vec![
                nucleotide("U", "U1", Some(TerminusVariant::FivePrime)),
                nucleotide("C", "C2", None),
                nucleotide("U", "U3", Some(TerminusVariant::ThreePrime)),
            ];
            let chain = NucleotideChain::new("R", nucleotides).unwrap();
            for link in chain.links() {
                let (pu, pa) = link.previous;
                let (nu, na) = link.next;
                assert_eq!(chain.nucleotides()[pu].atoms()[pa].name, "O3'");
                assert_eq!(chain.nucleotides()[nu].atoms()[na].name, "P");
            }
        }

        #[test]
        fn nucleotide_chain_requires_o5_prime_pivot() {
            let mut second = nucleotide("C", "C2", None);
            let o5 = second.fragment.atom_index("O5'").unwrap();
            second.fragment.atoms[o5].name = "O5X".to_string();
            let nucleotides = vec![
                nucleotide("U", "U1", Some(TerminusVariant::FivePrime)),
                second,
                nucleotide("U", "U3", Some(TerminusVariant::ThreePrime)),
            ];
            assert!(matches!(
                NucleotideChain::new("R", nucleotides),
                Err(ChemicalEntityError::InvalidNucleotideChain { .. })
            ));
        }

        #[test]
        fn entity_counts_atoms_recursively() {
            let chain = PeptideChain::new("A", tripeptide()).unwrap();
            let expected: usize = chain.residues().iter().map(|r| r.atoms().len()).sum();
            let protein = Protein::new("P", vec![chain.clone()]).unwrap();
            assert_eq!(ChemicalEntity::PeptideChain(chain).number_of_atoms(), expected);
            assert_eq!(ChemicalEntity::Protein(protein).number_of_atoms(), expected);
            assert!(Protein::new("empty", vec![]).is_err());
        }
    }

    #[test]
    fn entity_kind_table_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table_name(kind.table_name()), Some(kind));
        }
        assert_eq!(EntityKind::from_table_name("ligands"), None);
    }
}
