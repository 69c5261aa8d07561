//! Formula resolution engine for pipe-delimited budget sheets.
//!
//! A sheet is loaded into a sparse [`Grid`], then [`resolve_grid`] turns every formula,
//! header reference and carry-forward marker into a literal.

pub mod dependencies;
pub mod engine;
pub mod error;
pub mod expression;
pub mod function;
pub mod loader;
pub mod parser;
pub mod references;
pub mod spreadsheet;

pub use engine::{evaluate_formula, resolve_grid, EngineOptions, Report, Snapshot};
pub use error::{AddressError, CellError, CellFailure, CellResult, LoadError};
pub use loader::{parse_grid, read_grid};
pub use spreadsheet::{CellAddress, CellContent, Grid, ERR_VALUE};
