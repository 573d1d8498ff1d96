use super::{BUILTIN_SOURCE, DatabaseError};
use phf::phf_map;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const BUILTIN_ELEMENTS: &str = include_str!("data/elements.csv");

/// Physical and neutron-scattering properties of a chemical element or isotope.
///
/// Radii are in nm, scattering lengths in fm and cross sections in barn.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Element {
    pub symbol: String,
    pub name: String,
    pub atomic_number: u32,
    pub atomic_weight: f64,
    pub covalent_radius: f64,
    pub vdw_radius: f64,
    pub b_coherent: f64,
    pub b_incoherent: f64,
    pub xs_coherent: f64,
    pub xs_incoherent: f64,
    pub xs_absorption: f64,
}

type PropertyGetter = fn(&Element) -> f64;

static NUMERIC_PROPERTIES: phf::Map<&'static str, PropertyGetter> = phf_map! {
    "equal" => equal as PropertyGetter,
    "atomic_number" => atomic_number as PropertyGetter,
    "atomic_weight" => atomic_weight as PropertyGetter,
    "mass" => atomic_weight as PropertyGetter,
    "covalent_radius" => covalent_radius as PropertyGetter,
    "vdw_radius" => vdw_radius as PropertyGetter,
    "b_coherent" => b_coherent as PropertyGetter,
    "b_incoherent" => b_incoherent as PropertyGetter,
    "b_coherent2" => b_coherent2 as PropertyGetter,
    "b_incoherent2" => b_incoherent2 as PropertyGetter,
    "xs_coherent" => xs_coherent as PropertyGetter,
    "xs_incoherent" => xs_incoherent as PropertyGetter,
    "xs_absorption" => xs_absorption as PropertyGetter,
};

fn equal(_e: &Element) -> f64 {
    1.0
}

fn atomic_number(e: &Element) -> f64 {
    e.atomic_number as f64
}

fn atomic_weight(e: &Element) -> f64 {
    e.atomic_weight
}

fn covalent_radius(e: &Element) -> f64 {
    e.covalent_radius
}

fn vdw_radius(e: &Element) -> f64 {
    e.vdw_radius
}

fn b_coherent(e: &Element) -> f64 {
    e.b_coherent
}

fn b_incoherent(e: &Element) -> f64 {
    e.b_incoherent
}

fn b_coherent2(e: &Element) -> f64 {
    e.b_coherent * e.b_coherent
}

fn b_incoherent2(e: &Element) -> f64 {
    e.b_incoherent * e.b_incoherent
}

fn xs_coherent(e: &Element) -> f64 {
    e.xs_coherent
}

fn xs_incoherent(e: &Element) -> f64 {
    e.xs_incoherent
}

fn xs_absorption(e: &Element) -> f64 {
    e.xs_absorption
}

impl Element {
    /// Looks up a numeric property by name (e.g. `"b_incoherent2"`, `"mass"`).
    pub fn property(&self, name: &str) -> Option<f64> {
        NUMERIC_PROPERTIES
            .get(name.to_lowercase().as_str())
            .map(|getter| getter(self))
    }
}

/// Element table keyed by symbol; symbol lookup is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ElementDatabase {
    elements: HashMap<String, Element>,
    order: Vec<String>,
}

impl ElementDatabase {
    pub fn builtin() -> Result<Self, DatabaseError> {
        let mut database = Self::default();
        database.merge_from_reader(BUILTIN_ELEMENTS.as_bytes(), BUILTIN_SOURCE)?;
        Ok(database)
    }

    /// Overlays the records of a user CSV table on top of the current ones.
    ///
    /// Records whose symbol already exists replace the previous entry; new symbols
    /// are appended. Returns the number of records read.
    pub fn overlay_from_path(&mut self, path: &Path) -> Result<usize, DatabaseError> {
        let file = std::fs::File::open(path).map_err(|e| DatabaseError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        self.merge_from_reader(file, &path.to_string_lossy())
    }

    fn merge_from_reader<R: Read>(&mut self, reader: R, source: &str) -> Result<usize, DatabaseError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut count = 0;
        for result in reader.deserialize::<Element>() {
            let record = result.map_err(|e| DatabaseError::Csv {
                path: source.to_string(),
                source: e,
            })?;
            self.insert(record);
            count += 1;
        }
        debug!(source, count, "Loaded element records");
        Ok(count)
    }

    pub fn insert(&mut self, element: Element) {
        let key = element.symbol.to_lowercase();
        if !self.elements.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.elements.insert(key, element);
    }

    pub fn get(&self, symbol: &str) -> Option<&Element> {
        self.elements.get(&symbol.to_lowercase())
    }

    pub fn element(&self, symbol: &str) -> Result<&Element, DatabaseError> {
        self.get(symbol)
            .ok_or_else(|| DatabaseError::UnknownElement(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.elements.contains_key(&symbol.to_lowercase())
    }

    /// Returns the numeric property `property` of the element `symbol`.
    pub fn property(&self, symbol: &str, property: &str) -> Result<f64, DatabaseError> {
        self.element(symbol)?
            .property(property)
            .ok_or_else(|| DatabaseError::UnknownProperty(property.to_string()))
    }

    /// Finds an element by its full name (e.g. `"hydrogen"`), case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Option<&Element> {
        let name = name.to_lowercase();
        self.iter().find(|e| e.name.to_lowercase() == name)
    }

    /// Iterates over the elements in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.order.iter().filter_map(|key| self.elements.get(key))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_numeric_property(name: &str) -> bool {
        NUMERIC_PROPERTIES.contains_key(name.to_lowercase().as_str())
    }

    pub fn numeric_properties() -> impl Iterator<Item = &'static str> {
        NUMERIC_PROPERTIES.keys().copied()
    }
}
