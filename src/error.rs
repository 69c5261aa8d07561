//! Error types for grid loading and per-cell resolution.

use crate::spreadsheet::CellAddress;
use serde::Serialize;
use thiserror::Error;

/// Result type for work done on behalf of a single cell
pub type CellResult<T> = std::result::Result<T, CellError>;

/// Errors that stop a single cell from resolving. The run carries on with the other cells.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CellError {
    /// Header reference or carry-forward token with no literal behind it
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// `=^^` chain that never reaches a literal
    #[error("Propagation did not terminate: no literal above {0}")]
    PropagationNonTermination(String),

    #[error("Unknown function in call {call}")]
    UnknownFunction { call: String },

    /// Wrong arity or argument type for a builtin
    #[error("Invalid argument in call {call}: {reason}")]
    Argument { call: String, reason: String },

    #[error("Parse error: {0}")]
    ExpressionParse(String),

    #[error("Evaluation error: {0}")]
    ExpressionEvaluation(String),
}

/// Errors raised while building the grid from pipe-delimited text
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line} has {count} columns; at most 26 (A-Z) are supported")]
    TooManyColumns { line: usize, count: usize },
}

/// Text that is not a `<Letter><Number>` cell address
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid cell address: '{0}'")]
pub struct AddressError(pub String);

/// A cell that failed to resolve, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellFailure {
    #[serde(serialize_with = "crate::spreadsheet::serialize_display")]
    pub cell: CellAddress,
    #[serde(serialize_with = "crate::spreadsheet::serialize_display")]
    pub error: CellError,
}
