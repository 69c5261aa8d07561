//! Carry-forward passes: `=^^` propagation and the `E^` / `E^v` column back-fill.
//!
//! Both passes read a snapshot of the grid and return what they resolved; the caller
//! commits the result.

use crate::error::{CellError, CellResult};
use crate::spreadsheet::{CellAddress, CellContent, Grid};
use std::collections::{BTreeMap, BTreeSet};

/// Column scanned for the `E^` / `E^v` tokens.
pub const BACKFILL_COLUMN: u8 = 4;
/// The "value" spelling; replaced before the shorter "display" spelling.
pub const BACKFILL_VALUE_TOKEN: &str = "E^v";
pub const BACKFILL_DISPLAY_TOKEN: &str = "E^";

/// Outcome of the `=^^` fixed-point pass.
#[derive(Debug, Default, PartialEq)]
pub struct Propagation {
    pub resolved: BTreeMap<CellAddress, String>,
    /// Markers whose chain never reached a concrete value
    pub unresolved: Vec<CellAddress>,
    pub sweeps: usize,
}

/// Resolve every `=^^` marker by copying the concrete value of the cell above it.
///
/// Sweeps the markers until one sweep changes nothing. `max_sweeps` caps the loop; by default
/// it is one more than the marker count, which is enough for the longest possible chain.
pub fn propagate_double_caret(grid: &Grid, max_sweeps: Option<usize>) -> Propagation {
    let mut pending: BTreeMap<CellAddress, Option<String>> = grid
        .iter()
        .filter(|(_, value)| CellContent::classify(value) == CellContent::DoubleCaret)
        .map(|(addr, _)| (addr, None))
        .collect();
    let cap = max_sweeps.unwrap_or(pending.len() + 1);

    let mut sweeps = 0;
    let mut changed = !pending.is_empty();
    while changed && sweeps < cap {
        changed = false;
        sweeps += 1;
        let markers: Vec<CellAddress> = pending
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in markers {
            let Some(above) = addr.above() else {
                continue;
            };
            let value = match pending.get(&above) {
                Some(resolved) => resolved.clone(),
                None => grid.get(above).map(str::to_string),
            };
            if let Some(value) = value {
                pending.insert(addr, Some(value));
                changed = true;
            }
        }
        log::trace!("double-caret sweep {sweeps} changed={changed}");
    }

    let mut result = Propagation {
        sweeps,
        ..Default::default()
    };
    for (addr, value) in pending {
        match value {
            Some(value) => {
                result.resolved.insert(addr, value);
            }
            None => result.unresolved.push(addr),
        }
    }
    result
}

/// First back-fill pass over the remaining formulas.
#[derive(Debug, Default, PartialEq)]
pub struct Backfill {
    /// Formulas ready for evaluation, tokens substituted where present
    pub ready: BTreeMap<CellAddress, String>,
    /// Formulas whose nearest candidate is still an unevaluated formula
    pub deferred: BTreeMap<CellAddress, String>,
    /// Formulas whose nearest candidate is a failed cell
    pub failed: BTreeMap<CellAddress, CellError>,
}

pub fn has_backfill_token(formula: &str) -> bool {
    formula.contains(BACKFILL_DISPLAY_TOKEN)
}

/// Substitute the back-fill tokens with the nearest value of the back-fill column.
///
/// The scan runs upward from the last row and ignores headers and empty cells. When the
/// first cell it meets is a formula, the owning formula is deferred to [`backfill_deferred`].
pub fn backfill_carry_tokens(
    grid: &Grid,
    failed: &BTreeSet<CellAddress>,
    formulas: &BTreeMap<CellAddress, String>,
) -> Backfill {
    let mut pass = Backfill::default();
    for (cell, formula) in formulas {
        if !has_backfill_token(formula) {
            pass.ready.insert(*cell, formula.clone());
            continue;
        }
        match nearest_in_column(grid, failed, BACKFILL_COLUMN, false) {
            Candidate::Value(value) => {
                pass.ready
                    .insert(*cell, substitute_backfill(formula, value));
            }
            Candidate::Failed(source) => {
                pass.failed.insert(*cell, failed_source(source));
            }
            Candidate::Pending | Candidate::Missing => {
                log::debug!("deferring {cell}: nearest back-fill candidate is not evaluated yet");
                pass.deferred.insert(*cell, formula.clone());
            }
        }
    }
    pass
}

/// Second back-fill pass, run after the ready formulas were evaluated and committed.
/// Formulas are skipped during this scan; finding no literal at all is an error.
pub fn backfill_deferred(
    grid: &Grid,
    failed: &BTreeSet<CellAddress>,
    deferred: &BTreeMap<CellAddress, String>,
) -> BTreeMap<CellAddress, CellResult<String>> {
    deferred
        .iter()
        .map(|(cell, formula)| {
            let result = match nearest_in_column(grid, failed, BACKFILL_COLUMN, true) {
                Candidate::Value(value) => Ok(substitute_backfill(formula, value)),
                Candidate::Failed(source) => Err(failed_source(source)),
                Candidate::Pending | Candidate::Missing => Err(CellError::UnresolvedReference(
                    format!("{BACKFILL_VALUE_TOKEN} has no literal in column E"),
                )),
            };
            (*cell, result)
        })
        .collect()
}

fn substitute_backfill(formula: &str, value: &str) -> String {
    formula
        .replace(BACKFILL_VALUE_TOKEN, value)
        .replace(BACKFILL_DISPLAY_TOKEN, value)
}

fn failed_source(source: CellAddress) -> CellError {
    CellError::UnresolvedReference(format!("{BACKFILL_VALUE_TOKEN} reads failed cell {source}"))
}

enum Candidate<'a> {
    Value(&'a str),
    /// An unevaluated formula or marker
    Pending,
    Failed(CellAddress),
    Missing,
}

/// Nearest non-empty, non-header cell in `col`, scanning upward from the last row.
/// With `skip_formulas` the scan walks past formulas instead of stopping at them.
fn nearest_in_column<'a>(
    grid: &'a Grid,
    failed: &BTreeSet<CellAddress>,
    col: u8,
    skip_formulas: bool,
) -> Candidate<'a> {
    let (max_rows, _) = grid.dimensions();
    for row in (1..=max_rows).rev() {
        let Some(addr) = CellAddress::new(col, row) else {
            continue;
        };
        let Some(value) = grid.get(addr) else {
            continue;
        };
        if failed.contains(&addr) {
            return Candidate::Failed(addr);
        }
        match CellContent::classify(value) {
            CellContent::Empty | CellContent::Header(_) => continue,
            CellContent::Literal(literal) => return Candidate::Value(literal),
            _ if skip_formulas => continue,
            _ => return Candidate::Pending,
        }
    }
    Candidate::Missing
}
