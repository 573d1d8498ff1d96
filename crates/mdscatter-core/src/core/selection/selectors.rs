use super::AtomSelectionParserError;
use crate::core::database::elements::ElementDatabase;
use crate::core::models::entity::EntityKind;
use crate::core::models::system::{ChemicalSystem, Entity};
use phf::phf_map;
use std::ops::RangeInclusive;

/// A named predicate over atoms.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    All,
    /// Lowercased element symbols.
    Element(Vec<String>),
    AtomName(Vec<String>),
    AtomIndex(Vec<RangeInclusive<usize>>),
    /// Atom groups such as "backbone" or "sugar".
    Group(Vec<String>),
    /// Enclosing entities of `kind` whose template code or name is listed.
    Entity { kind: EntityKind, names: Vec<String> },
}

type SelectorBuilder = fn(&str, &[String]) -> Result<Selector, AtomSelectionParserError>;

static SELECTORS: phf::Map<&'static str, SelectorBuilder> = phf_map! {
    "all" => all as SelectorBuilder,
    "element" => element as SelectorBuilder,
    "symbol" => element as SelectorBuilder,
    "name" => atom_name as SelectorBuilder,
    "atom_name" => atom_name as SelectorBuilder,
    "atom_index" => atom_index as SelectorBuilder,
    "index" => atom_index as SelectorBuilder,
    "group" => group as SelectorBuilder,
    "backbone" => fixed_group as SelectorBuilder,
    "sidechain" => fixed_group as SelectorBuilder,
    "peptide" => fixed_group as SelectorBuilder,
    "sugar" => fixed_group as SelectorBuilder,
    "base" => fixed_group as SelectorBuilder,
    "phosphate" => fixed_group as SelectorBuilder,
    "molecule" => molecule as SelectorBuilder,
    "molecule_name" => molecule as SelectorBuilder,
    "residue" => residue as SelectorBuilder,
    "residue_name" => residue as SelectorBuilder,
    "nucleotide" => nucleotide as SelectorBuilder,
    "chain" => chain as SelectorBuilder,
    "cluster" => cluster as SelectorBuilder,
};

/// Names accepted by [`Selector::resolve`], besides element names.
pub fn selector_names() -> impl Iterator<Item = &'static str> {
    SELECTORS.keys().copied()
}

fn no_arguments(name: &str, arguments: &[String]) -> Result<(), AtomSelectionParserError> {
    match arguments.first() {
        Some(argument) => Err(AtomSelectionParserError::InvalidArgument {
            selector: name.to_string(),
            argument: argument.clone(),
            reason: "this selector takes no argument".to_string(),
        }),
        None => Ok(()),
    }
}

fn some_arguments(name: &str, arguments: &[String]) -> Result<Vec<String>, AtomSelectionParserError> {
    if arguments.is_empty() {
        return Err(AtomSelectionParserError::InvalidArgument {
            selector: name.to_string(),
            argument: String::new(),
            reason: "at least one value is required".to_string(),
        });
    }
    Ok(arguments.to_vec())
}

fn all(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    no_arguments(name, arguments)?;
    Ok(Selector::All)
}

fn element(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    let symbols = some_arguments(name, arguments)?;
    Ok(Selector::Element(
        symbols.into_iter().map(|s| s.to_lowercase()).collect(),
    ))
}

fn atom_name(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    Ok(Selector::AtomName(some_arguments(name, arguments)?))
}

fn atom_index(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    let invalid = |argument: &str, reason: &str| AtomSelectionParserError::InvalidArgument {
        selector: name.to_string(),
        argument: argument.to_string(),
        reason: reason.to_string(),
    };
    let parse = |value: &str, argument: &str| {
        value
            .parse::<usize>()
            .map_err(|_| invalid(argument, "expected a non-negative integer"))
    };
    some_arguments(name, arguments)?
        .iter()
        .map(|argument| match argument.split_once('-') {
            Some((first, last)) => {
                let (first, last) = (parse(first, argument)?, parse(last, argument)?);
                if first > last {
                    return Err(invalid(argument, "range start exceeds its end"));
                }
                Ok(first..=last)
            }
            None => {
                let index = parse(argument, argument)?;
                Ok(index..=index)
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Selector::AtomIndex)
}

fn group(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    Ok(Selector::Group(
        some_arguments(name, arguments)?
            .into_iter()
            .map(|g| g.to_lowercase())
            .collect(),
    ))
}

fn fixed_group(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    no_arguments(name, arguments)?;
    Ok(Selector::Group(vec![name.to_string()]))
}

fn entity(kind: EntityKind, name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    Ok(Selector::Entity {
        kind,
        names: some_arguments(name, arguments)?,
    })
}

fn molecule(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    entity(EntityKind::Molecule, name, arguments)
}

fn residue(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    entity(EntityKind::Residue, name, arguments)
}

fn nucleotide(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    entity(EntityKind::Nucleotide, name, arguments)
}

fn chain(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    entity(EntityKind::PeptideChain, name, arguments)
}

fn cluster(name: &str, arguments: &[String]) -> Result<Selector, AtomSelectionParserError> {
    entity(EntityKind::AtomCluster, name, arguments)
}

impl Selector {
    /// Resolves a selector name and its arguments.
    ///
    /// Names are looked up case-insensitively in the selector table first, then as
    /// full element names (`"hydrogen"`), which take no arguments.
    pub fn resolve(
        name: &str,
        arguments: &[String],
        elements: &ElementDatabase,
    ) -> Result<Self, AtomSelectionParserError> {
        let key = name.to_lowercase();
        if let Some(builder) = SELECTORS.get(key.as_str()) {
            return builder(&key, arguments);
        }
        if let Some(found) = elements.find_by_name(&key) {
            no_arguments(&key, arguments)?;
            return Ok(Self::Element(vec![found.symbol.to_lowercase()]));
        }
        Err(AtomSelectionParserError::UnknownSelector(name.to_string()))
    }

    pub fn matches(&self, system: &ChemicalSystem, index: usize) -> bool {
        let Some(atom) = system.atom(index) else {
            return false;
        };
        match self {
            Self::All => true,
            Self::Element(symbols) => symbols.contains(&atom.symbol.to_lowercase()),
            Self::AtomName(names) => names.iter().any(|n| n == &atom.name),
            Self::AtomIndex(ranges) => ranges.iter().any(|r| r.contains(&index)),
            Self::Group(groups) => groups.iter().any(|g| atom.is_in_group(g)),
            Self::Entity { kind, names } => ancestors(system, index)
                .filter(|entity| entity.kind() == *kind)
                .any(|entity| {
                    names.iter().any(|n| {
                        n == &entity.name
                            || entity.code().is_some_and(|code| code.eq_ignore_ascii_case(n))
                    })
                }),
        }
    }
}

/// The owning entity of an atom followed by its ancestors, innermost first.
fn ancestors(system: &ChemicalSystem, index: usize) -> impl Iterator<Item = &Entity> {
    let mut next = system.owner_of_atom(index);
    std::iter::from_fn(move || {
        let entity = system.entity(next?)?;
        next = entity.parent;
        Some(entity)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(name: &str, arguments: &[&str]) -> Result<Selector, AtomSelectionParserError> {
        let arguments: Vec<String> = arguments.iter().map(|s| s.to_string()).collect();
        Selector::resolve(name, &arguments, &ElementDatabase::builtin().unwrap())
    }

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(resolve("ALL", &[]).unwrap(), Selector::All);
        assert_eq!(
            resolve("Element", &["Na", "CL"]).unwrap(),
            Selector::Element(vec!["na".to_string(), "cl".to_string()])
        );
        assert_eq!(
            resolve("Oxygen", &[]).unwrap(),
            Selector::Element(vec!["o".to_string()])
        );
        assert_eq!(
            resolve("Backbone", &[]).unwrap(),
            Selector::Group(vec!["backbone".to_string()])
        );
    }

    #[test]
    fn argument_counts_are_checked() {
        assert!(matches!(
            resolve("all", &["x"]),
            Err(AtomSelectionParserError::InvalidArgument { .. })
        ));
        assert!(matches!(
            resolve("element", &[]),
            Err(AtomSelectionParserError::InvalidArgument { .. })
        ));
        assert!(matches!(
            resolve("hydrogen", &["1"]),
            Err(AtomSelectionParserError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn index_ranges_are_inclusive_and_ordered() {
        assert_eq!(
            resolve("atom_index", &["2-4", "7"]).unwrap(),
            Selector::AtomIndex(vec![2..=4, 7..=7])
        );
        assert!(resolve("atom_index", &["4-2"]).is_err());
        assert!(resolve("atom_index", &["-1"]).is_err());
    }

    #[test]
    fn table_lists_the_documented_selectors() {
        let names: Vec<_> = selector_names().collect();
        for expected in ["all", "element", "symbol", "molecule", "residue", "atom_index", "backbone", "sidechain"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
