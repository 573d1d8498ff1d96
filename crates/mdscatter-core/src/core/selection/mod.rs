//! # Atom Selection
//!
//! A small boolean expression language over named atom selectors:
//!
//! ```text
//! expr     := term (("or" | "|") term)*
//! term     := factor (("and" | "&") factor)*
//! factor   := ("not" | "~") factor | "(" expr ")" | selector
//! selector := IDENT ("," VALUE)*
//! ```
//!
//! Keywords and selector names are case-insensitive. Full element names act as
//! selectors on their own, so `hydrogen or (carbon and not backbone)` is valid.
//! Evaluation always yields the selected atom indices in ascending order.

pub mod parser;
pub mod selectors;

use crate::core::database::elements::ElementDatabase;
use crate::core::models::system::ChemicalSystem;
use parser::Expr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AtomSelectionParserError {
    #[error("Syntax error in '{expression}' at position {position}: {reason}")]
    Syntax {
        expression: String,
        position: usize,
        reason: String,
    },

    #[error("Unknown selector '{0}'")]
    UnknownSelector(String),

    #[error("Invalid argument '{argument}' for selector '{selector}': {reason}")]
    InvalidArgument {
        selector: String,
        argument: String,
        reason: String,
    },

    #[error("Selection '{0}' matches no atom")]
    EmptySelection(String),
}

/// A parsed selection expression, ready to be evaluated against any system.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomSelection {
    expression: String,
    root: Expr,
}

impl AtomSelection {
    /// Parses `expression` and resolves every selector name.
    ///
    /// # Errors
    ///
    /// Returns [`AtomSelectionParserError::Syntax`] for malformed expressions and
    /// [`AtomSelectionParserError::UnknownSelector`] for names that are neither a
    /// registered selector nor an element name known to `elements`.
    pub fn parse(
        expression: &str,
        elements: &ElementDatabase,
    ) -> Result<Self, AtomSelectionParserError> {
        let root = parser::parse(expression, elements)?;
        Ok(Self {
            expression: expression.trim().to_string(),
            root,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluates the selection, returning the selected atom indices sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns [`AtomSelectionParserError::EmptySelection`] if no atom matches.
    pub fn evaluate(&self, system: &ChemicalSystem) -> Result<Vec<usize>, AtomSelectionParserError> {
        let mask = self.root.evaluate(system);
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(index, &selected)| selected.then_some(index))
            .collect();
        if indices.is_empty() {
            return Err(AtomSelectionParserError::EmptySelection(
                self.expression.clone(),
            ));
        }
        debug!(expression = %self.expression, n_selected = indices.len(), "Evaluated atom selection");
        Ok(indices)
    }
}

/// Parses and evaluates `expression` in one step.
pub fn select_atoms(
    system: &ChemicalSystem,
    elements: &ElementDatabase,
    expression: &str,
) -> Result<Vec<usize>, AtomSelectionParserError> {
    AtomSelection::parse(expression, elements)?.evaluate(system)
}
