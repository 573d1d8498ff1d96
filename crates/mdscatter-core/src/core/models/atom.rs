use super::ids::EntityId;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Marks the atom of a polymer unit that may connect to a neighbouring unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionFlag {
    /// Peptide nitrogen bonded to the previous residue's carbonyl carbon.
    NterConnected,
    /// Peptide carbonyl carbon bonded to the next residue's nitrogen.
    CterConnected,
    /// Nucleotide phosphorus bonded to the previous unit's O3'.
    O5primeConnected,
    /// Nucleotide O3' bonded to the next unit's phosphorus.
    O3primeConnected,
}

impl ConnectionFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NterConnected => "nter_connected",
            Self::CterConnected => "cter_connected",
            Self::O5primeConnected => "o5prime_connected",
            Self::O3primeConnected => "o3prime_connected",
        }
    }
}

impl FromStr for ConnectionFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nter_connected" => Ok(Self::NterConnected),
            "cter_connected" => Ok(Self::CterConnected),
            "o5prime_connected" => Ok(Self::O5primeConnected),
            "o3prime_connected" => Ok(Self::O3primeConnected),
            _ => Err(format!("Invalid connection flag: {}", s)),
        }
    }
}

impl fmt::Display for ConnectionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An atom of a chemical system.
///
/// `index` and `parent` are assigned by the owning
/// [`ChemicalSystem`](super::system::ChemicalSystem) when the atom is registered and are
/// `None` for atoms that belong to a standalone entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// Element symbol, a key of the element database.
    pub symbol: String,
    /// Atom name, unique within its fragment. Defaults to the symbol.
    pub name: String,
    /// Tags such as "backbone", "sidechain", "sugar", "base", "peptide".
    pub groups: BTreeSet<String>,
    pub flags: BTreeSet<ConnectionFlag>,
    /// Ghost atoms take part in the topology but not in atom counts or mass sums.
    pub ghost: bool,
    index: Option<usize>,
    parent: Option<EntityId>,
}

impl Atom {
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            name: symbol.clone(),
            symbol,
            groups: BTreeSet::new(),
            flags: BTreeSet::new(),
            ghost: false,
            index: None,
            parent: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn with_flag(mut self, flag: ConnectionFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn as_ghost(mut self) -> Self {
        self.ghost = true;
        self
    }

    /// Dense index within the owning system, `None` before registration.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// The entity this atom belongs to. `None` for top-level atoms and for atoms of
    /// parentless clusters.
    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn is_in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    pub fn has_flag(&self, flag: ConnectionFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub(crate) fn register(&mut self, index: usize, parent: Option<EntityId>) {
        self.index = Some(index);
        self.parent = parent;
    }

    pub(crate) fn unregister(&mut self) {
        self.index = None;
        self.parent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_atom_defaults_name_to_symbol() {
        let atom = Atom::new("C");
        assert_eq!(atom.name, "C");
        assert_eq!(atom.index(), None);
        assert!(!atom.ghost);
    }

    #[test]
    fn builders_set_groups_flags_and_ghost() {
        let atom = Atom::new("N")
            .with_name("N")
            .with_groups(["backbone", "peptide"])
            .with_flag(ConnectionFlag::NterConnected)
            .as_ghost();
        assert!(atom.is_in_group("backbone"));
        assert!(atom.has_flag(ConnectionFlag::NterConnected));
        assert!(atom.ghost);
    }

    #[test]
    fn connection_flag_parses_case_insensitively() {
        assert_eq!("O3PRIME_CONNECTED".parse(), Ok(ConnectionFlag::O3primeConnected));
        assert!("sideways".parse::<ConnectionFlag>().is_err());
        assert_eq!(ConnectionFlag::CterConnected.to_string(), "cter_connected");
    }
}
