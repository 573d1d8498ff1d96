use super::elements::ElementDatabase;
use super::{BUILTIN_SOURCE, DatabaseError};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

const BUILTIN_MOLECULES: &str = include_str!("data/molecules.toml");

pub const NEXT_UNIT_STUB: &str = "+R";
pub const PREVIOUS_UNIT_STUB: &str = "-R";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AtomTemplate {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub bonds: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub ghost: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FragmentTemplate {
    #[serde(default)]
    pub name: Option<String>,
    pub atoms: Vec<AtomTemplate>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolymerFamily {
    Peptide,
    Nucleotide,
}

/// Describes how a terminus variant rewrites a residue or nucleotide template.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VariantPatch {
    pub family: PolymerFamily,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub drop_link: Option<String>,
    #[serde(default)]
    pub add: Vec<AtomTemplate>,
}

/// Fragment templates for molecules, residues and nucleotides, plus terminus patches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoleculeDatabase {
    #[serde(default)]
    molecules: HashMap<String, FragmentTemplate>,
    #[serde(default)]
    residues: HashMap<String, FragmentTemplate>,
    #[serde(default)]
    nucleotides: HashMap<String, FragmentTemplate>,
    #[serde(default)]
    variants: HashMap<String, VariantPatch>,
}

impl MoleculeDatabase {
    pub fn builtin() -> Result<Self, DatabaseError> {
        Self::from_toml_str(BUILTIN_MOLECULES, BUILTIN_SOURCE)
    }

    pub fn from_toml_str(content: &str, source: &str) -> Result<Self, DatabaseError> {
        let database: Self = toml::from_str(content).map_err(|e| DatabaseError::Toml {
            path: source.to_string(),
            source: e,
        })?;
        database.check_bond_partners()?;
        debug!(
            source,
            molecules = database.molecules.len(),
            residues = database.residues.len(),
            nucleotides = database.nucleotides.len(),
            "Loaded fragment templates"
        );
        Ok(database)
    }

    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let content = std::fs::read_to_string(path).map_err(|e| DatabaseError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.to_string_lossy())
    }

    /// Overlays every template of `other` on top of this database.
    pub fn merge(&mut self, other: MoleculeDatabase) {
        self.molecules.extend(other.molecules);
        self.residues.extend(other.residues);
        self.nucleotides.extend(other.nucleotides);
        self.variants.extend(other.variants);
    }

    pub fn molecule(&self, code: &str) -> Result<&FragmentTemplate, DatabaseError> {
        Self::lookup(&self.molecules, "molecule", code)
    }

    pub fn residue(&self, code: &str) -> Result<&FragmentTemplate, DatabaseError> {
        Self::lookup(&self.residues, "residue", code)
    }

    pub fn nucleotide(&self, code: &str) -> Result<&FragmentTemplate, DatabaseError> {
        Self::lookup(&self.nucleotides, "nucleotide", code)
    }

    pub fn variant(&self, name: &str) -> Result<&VariantPatch, DatabaseError> {
        self.variants
            .get(name)
            .ok_or_else(|| DatabaseError::UnknownTemplate {
                kind: "variant",
                code: name.to_string(),
            })
    }

    pub fn molecule_codes(&self) -> impl Iterator<Item = &str> {
        self.molecules.keys().map(String::as_str)
    }

    fn lookup<'a>(
        table: &'a HashMap<String, FragmentTemplate>,
        kind: &'static str,
        code: &str,
    ) -> Result<&'a FragmentTemplate, DatabaseError> {
        table.get(code).ok_or_else(|| DatabaseError::UnknownTemplate {
            kind,
            code: code.to_string(),
        })
    }

    fn tables(&self) -> [(&'static str, &HashMap<String, FragmentTemplate>); 3] {
        [
            ("molecule", &self.molecules),
            ("residue", &self.residues),
            ("nucleotide", &self.nucleotides),
        ]
    }

    fn check_bond_partners(&self) -> Result<(), DatabaseError> {
        for (kind, table) in self.tables() {
            for (code, template) in table {
                let names: HashSet<&str> = template.atoms.iter().map(|a| a.name.as_str()).collect();
                if names.len() != template.atoms.len() {
                    return Err(DatabaseError::InvalidTemplate {
                        kind,
                        code: code.clone(),
                        reason: "duplicate atom names".to_string(),
                    });
                }
                for atom in &template.atoms {
                    for partner in &atom.bonds {
                        let is_stub = partner == NEXT_UNIT_STUB || partner == PREVIOUS_UNIT_STUB;
                        if !is_stub && !names.contains(partner.as_str()) {
                            return Err(DatabaseError::InvalidTemplate {
                                kind,
                                code: code.clone(),
                                reason: format!(
                                    "atom '{}' bonds to unknown atom '{}'",
                                    atom.name, partner
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that every atom symbol used by a template or patch exists in `elements`.
    pub fn validate_symbols(&self, elements: &ElementDatabase) -> Result<(), DatabaseError> {
        for (kind, table) in self.tables() {
            for (code, template) in table {
                if let Some(atom) = template.atoms.iter().find(|a| !elements.contains(&a.symbol)) {
                    return Err(DatabaseError::InvalidTemplate {
                        kind,
                        code: code.clone(),
                        reason: format!("unknown element '{}'", atom.symbol),
                    });
                }
            }
        }
        for (name, patch) in &self.variants {
            if let Some(atom) = patch.add.iter().find(|a| !elements.contains(&a.symbol)) {
                return Err(DatabaseError::InvalidTemplate {
                    kind: "variant",
                    code: name.clone(),
                    reason: format!("unknown element '{}'", atom.symbol),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn builtin_database_loads_and_validates() {
        let db = MoleculeDatabase::builtin().unwrap();
        let elements = ElementDatabase::builtin().unwrap();
        db.validate_symbols(&elements).unwrap();

        assert_eq!(db.molecule("WAT").unwrap().atoms.len(), 3);
        assert!(db.residue("ALA").is_ok());
        assert!(db.nucleotide("U").is_ok());
        assert_eq!(db.variant("N-terminus").unwrap().family, PolymerFamily::Peptide);
        assert_eq!(db.variant("5-terminus").unwrap().family, PolymerFamily::Nucleotide);
    }

    #[test]
    fn unknown_templates_are_reported_with_their_kind() {
        let db = MoleculeDatabase::builtin().unwrap();
        match db.residue("XYZ") {
            Err(DatabaseError::UnknownTemplate { kind, code }) => {
                assert_eq!(kind, "residue");
                assert_eq!(code, "XYZ");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_templates_with_dangling_bonds() {
        let content = r#"
            [molecules.BAD]
            atoms = [{ name = "C1", symbol = "C", bonds = ["C9"] }]
        "#;
        assert!(matches!(
            MoleculeDatabase::from_toml_str(content, "test"),
            Err(DatabaseError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn rejects_templates_with_unknown_elements() {
        let content = r#"
            [molecules.ODD]
            atoms = [{ name = "Q1", symbol = "Qq" }]
        "#;
        let db = MoleculeDatabase::from_toml_str(content, "test").unwrap();
        let elements = ElementDatabase::builtin().unwrap();
        assert!(db.validate_symbols(&elements).is_err());
    }

    #[test]
    fn merge_overlays_user_templates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user.toml");
        fs::write(
            &path,
            r#"
            [molecules.WAT]
            name = "rigid water"
            atoms = [
              { name = "O", symbol = "O", bonds = ["H1", "H2"] },
              { name = "H1", symbol = "H" },
              { name = "H2", symbol = "H" },
            ]

            [molecules.NE]
            atoms = [{ name = "NE", symbol = "He" }]
            "#,
        )
        .unwrap();

        let mut db = MoleculeDatabase::builtin().unwrap();
        db.merge(MoleculeDatabase::load(&path).unwrap());
        assert_eq!(db.molecule("WAT").unwrap().name.as_deref(), Some("rigid water"));
        assert!(db.molecule("NE").is_ok());
        assert!(db.molecule("CH4").is_ok());
    }

    #[test]
    fn load_fails_for_malformed_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not toml").unwrap();
        assert!(matches!(
            MoleculeDatabase::load(&path),
            Err(DatabaseError::Toml { .. })
        ));
    }
}
