//! Pipeline driver: runs the resolution passes over a grid in order and commits each result.
//!
//! 1. references to literals in every formula
//! 2. `=^^` propagation
//! 3. standalone formulas, repeated while any of them reads a formula evaluated in the
//!    previous round
//! 4. remaining formulas: `E^` back-fill, references again, calls, expression
//!
//! A cell that fails is set to [`ERR_VALUE`] and recorded in the [`Report`]; the run goes on.
//! A formula reading a failed cell fails too, and one still waiting on another formula at the
//! end fails with [`CellError::UnresolvedReference`].

use crate::dependencies::{backfill_carry_tokens, backfill_deferred, propagate_double_caret};
use crate::error::{CellError, CellFailure, CellResult};
use crate::expression::{evaluate_expression, is_plain_text};
use crate::function::{reduce_calls, Value};
use crate::parser::{clean_formula, parse_formula};
use crate::references::{find_header_ref, resolve_formula, resolve_references};
use crate::spreadsheet::{find_carry_token, CellAddress, Grid, ERR_VALUE};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Digits after the decimal point for numeric results.
pub const DEFAULT_PRECISION: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub precision: usize,
    /// Cap on `=^^` sweeps; `None` derives it from the number of markers
    pub max_propagation_sweeps: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            max_propagation_sweeps: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub failures: Vec<CellFailure>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(&self, cell: CellAddress) -> Option<&CellError> {
        self.failures
            .iter()
            .find(|failure| failure.cell == cell)
            .map(|failure| &failure.error)
    }

    /// Cells that failed so far; later passes must not read them as data.
    pub fn failed_cells(&self) -> BTreeSet<CellAddress> {
        self.failures.iter().map(|failure| failure.cell).collect()
    }

    fn fail(&mut self, grid: &mut Grid, cell: CellAddress, error: CellError) {
        log::warn!("cell {cell} failed: {error}");
        grid.set(cell, ERR_VALUE);
        self.failures.push(CellFailure { cell, error });
    }

    fn commit(&mut self, grid: &mut Grid, results: BTreeMap<CellAddress, CellResult<String>>) {
        for (cell, result) in results {
            match result {
                Ok(value) => grid.set(cell, value),
                Err(error) => self.fail(grid, cell, error),
            }
        }
    }
}

/// Resolve every formula and marker in `grid` in place.
pub fn resolve_grid(grid: &mut Grid, options: &EngineOptions) -> Report {
    let mut report = Report::default();

    let formulas = grid.formulas();
    log::info!("resolving references in {} formulas", formulas.len());
    let no_failures = BTreeSet::new();
    let resolved: BTreeMap<CellAddress, String> = formulas
        .iter()
        .filter_map(|(cell, formula)| {
            let resolved = resolve_formula(grid, &no_failures, formula).ok()?;
            Some((*cell, resolved.text))
        })
        .collect();
    grid.commit(resolved);

    let propagation = propagate_double_caret(grid, options.max_propagation_sweeps);
    log::info!(
        "propagated {} double-caret markers in {} sweeps",
        propagation.resolved.len(),
        propagation.sweeps
    );
    grid.commit(propagation.resolved);
    for cell in propagation.unresolved {
        let error = CellError::PropagationNonTermination(cell.to_string());
        report.fail(grid, cell, error);
    }

    // formulas reading other formulas stay in the grid for the next wave
    let standalone = grid.standalone_formulas();
    log::info!("solving {} standalone formulas", standalone.len());
    let waiting = solve(grid, &mut report, standalone, options);
    log::debug!("{} standalone formulas wait on later cells", waiting.len());

    let remaining = grid.formulas();
    log::info!("solving {} remaining formulas", remaining.len());
    let backfill = backfill_carry_tokens(grid, &report.failed_cells(), &remaining);
    for (cell, error) in backfill.failed {
        report.fail(grid, cell, error);
    }
    let mut waiting = solve(grid, &mut report, backfill.ready, options);

    if !backfill.deferred.is_empty() {
        log::info!("solving {} deferred formulas", backfill.deferred.len());
        let mut pending: BTreeMap<CellAddress, String> = waiting
            .into_iter()
            .map(|(cell, waiting)| (cell, waiting.formula))
            .collect();
        let second = backfill_deferred(grid, &report.failed_cells(), &backfill.deferred);
        for (cell, result) in second {
            match result {
                Ok(formula) => {
                    pending.insert(cell, formula);
                }
                Err(error) => report.fail(grid, cell, error),
            }
        }
        waiting = solve(grid, &mut report, pending, options);
    }

    for (cell, waiting) in waiting {
        let cells: Vec<String> = waiting.on.iter().map(ToString::to_string).collect();
        let error = CellError::UnresolvedReference(format!(
            "{} never resolved",
            cells.join(", ")
        ));
        report.fail(grid, cell, error);
    }

    report.failures.sort_by_key(|failure| failure.cell);
    report
}

/// A formula still referencing cells without a value.
struct Waiting {
    formula: String,
    on: BTreeSet<CellAddress>,
}

/// Evaluate every formula whose references all hold values, commit, and repeat until a
/// round makes no progress. Returns the formulas left waiting.
fn solve(
    grid: &mut Grid,
    report: &mut Report,
    mut pending: BTreeMap<CellAddress, String>,
    options: &EngineOptions,
) -> BTreeMap<CellAddress, Waiting> {
    let mut round = 0;
    loop {
        round += 1;
        let mut ready = BTreeMap::new();
        let mut waiting = BTreeMap::new();
        let mut failed = Vec::new();
        for (cell, result) in resolve_references(grid, &report.failed_cells(), &pending) {
            match result {
                Ok(resolved) if resolved.waiting_on.is_empty() => {
                    ready.insert(cell, resolved.text);
                }
                Ok(resolved) => {
                    waiting.insert(cell, resolved.waiting_on);
                }
                Err(error) => failed.push((cell, error)),
            }
        }
        log::trace!(
            "round {round}: {} ready, {} waiting, {} failed",
            ready.len(),
            waiting.len(),
            failed.len()
        );

        let progressed = !ready.is_empty() || !failed.is_empty();
        for (cell, error) in failed {
            report.fail(grid, cell, error);
        }
        let results = evaluate_all(&ready, options);
        report.commit(grid, results);

        pending.retain(|cell, _| waiting.contains_key(cell));
        if !progressed || pending.is_empty() {
            return pending
                .into_iter()
                .map(|(cell, formula)| {
                    let on = waiting.remove(&cell).unwrap_or_default();
                    (cell, Waiting { formula, on })
                })
                .collect();
        }
    }
}

fn evaluate_all(
    formulas: &BTreeMap<CellAddress, String>,
    options: &EngineOptions,
) -> BTreeMap<CellAddress, CellResult<String>> {
    formulas
        .iter()
        .map(|(cell, formula)| {
            log::debug!("processing formula {formula} on cell {cell}");
            let result = evaluate_formula(formula, options.precision);
            if let Ok(value) = &result {
                log::debug!("cell {cell} resolved to {value}");
            }
            (*cell, result)
        })
        .collect()
}

/// Evaluate one formula whose references are already substituted.
///
/// A formula that is exactly one call returning text or a boolean takes that literal.
/// Anything else goes through the expression evaluator; numbers are printed with
/// `precision` decimals, and plain words that are not an expression are kept verbatim.
pub fn evaluate_formula(formula: &str, precision: usize) -> CellResult<String> {
    if let Some(token) = unresolved_token(formula) {
        return Err(CellError::UnresolvedReference(token));
    }

    let parsed = parse_formula(&clean_formula(formula))?;
    let reduced = reduce_calls(&parsed)?;
    match reduced.value {
        Some(Value::Text(text)) => return Ok(text),
        Some(Value::Bool(b)) => return Ok(b.to_string()),
        _ => {}
    }

    match evaluate_expression(&reduced.text) {
        Ok(Value::Number(n)) => Ok(format!("{n:.precision$}")),
        Ok(other) => Ok(other.to_string()),
        Err(CellError::ExpressionParse(_)) if is_plain_text(&reduced.text) => {
            Ok(reduced.text.trim().to_string())
        }
        Err(error) => Err(error),
    }
}

fn unresolved_token(formula: &str) -> Option<String> {
    if let Some(token) = find_header_ref(formula) {
        return Some(format!("no value for header reference {token}"));
    }
    if let Some(token) = find_carry_token(formula) {
        return Some(format!("unsupported carry-forward token {token}"));
    }
    None
}

/// Serializable view of a resolved grid and its failures.
#[derive(Debug, Serialize)]
pub struct Snapshot<'a> {
    pub rows: u32,
    pub cols: u8,
    pub cells: BTreeMap<String, &'a str>,
    pub failures: &'a [CellFailure],
}

impl<'a> Snapshot<'a> {
    pub fn new(grid: &'a Grid, report: &'a Report) -> Self {
        let (rows, cols) = grid.dimensions();
        Self {
            rows,
            cols,
            cells: grid
                .iter()
                .map(|(addr, value)| (addr.to_string(), value))
                .collect(),
            failures: &report.failures,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn grid(cells: &[(&str, &str)]) -> Grid {
        cells
            .iter()
            .map(|(addr, value)| (addr.parse().unwrap(), value.to_string()))
            .collect()
    }

    fn value<'a>(grid: &'a Grid, cell: &str) -> &'a str {
        grid.get(cell.parse().unwrap()).unwrap_or_default()
    }

    #[test]
    fn test_evaluate_formula() {
        assert_eq!(evaluate_formula("=2+3", 6), Ok("5.000000".into()));
        assert_eq!(evaluate_formula("=sum(1,2,3)", 2), Ok("6.00".into()));
        assert_eq!(evaluate_formula("=incFrom(incFrom(1))", 6), Ok("3.000000".into()));
        assert_eq!(evaluate_formula("=concat(a,b)", 6), Ok("ab".into()));
        assert_eq!(evaluate_formula("=text(12)", 6), Ok("12".into()));
        assert_eq!(evaluate_formula("=bte(3,2)", 6), Ok("true".into()));
        assert_eq!(evaluate_formula("=Rent", 6), Ok("Rent".into()));
        assert_eq!(evaluate_formula("=sum(1,1) > 1", 6), Ok("true".into()));
    }

    #[test]
    fn test_evaluate_formula_errors() {
        assert!(matches!(
            evaluate_formula("=foo(1)", 6),
            Err(CellError::UnknownFunction { .. })
        ));
        assert!(matches!(
            evaluate_formula("=@cost<1>+1", 6),
            Err(CellError::UnresolvedReference(_))
        ));
        assert_eq!(
            evaluate_formula("=B^v+1", 6),
            Err(CellError::UnresolvedReference(
                "unsupported carry-forward token B^v".into()
            ))
        );
        assert_eq!(
            evaluate_formula("=2*@rent<1>", 6),
            Err(CellError::UnresolvedReference(
                "no value for header reference @rent<1>".into()
            ))
        );
        assert!(matches!(
            evaluate_formula("=1/0", 6),
            Err(CellError::ExpressionEvaluation(_))
        ));
        assert!(matches!(
            evaluate_formula("=Rent-May", 6),
            Err(CellError::ExpressionParse(_))
        ));
    }

    #[test]
    fn test_grid_without_formulas_is_unchanged() {
        let input = grid(&[("A1", "!cost"), ("A2", "10"), ("B2", "Rent"), ("C5", "")]);
        let mut resolved = input.clone();
        let report = resolve_grid(&mut resolved, &EngineOptions::default());
        assert_eq!(resolved, input);
        assert!(report.is_clean());
    }

    #[test]
    fn test_standalone_then_dependent() {
        let mut g = grid(&[
            ("A1", "!cost"),
            ("A2", "10"),
            ("B2", "=@cost<1>*2"),
            ("E1", "!balance"),
            ("E2", "100"),
            ("F2", "=E^v-A2"),
            ("C2", "=^^"),
            ("C1", "x"),
        ]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(value(&g, "B2"), "20.000000");
        assert_eq!(value(&g, "F2"), "90.000000");
        assert_eq!(value(&g, "C2"), "x");
    }

    #[test]
    fn test_reference_to_marker_waits_for_propagation() {
        let mut g = grid(&[("C2", "1200"), ("C3", "=^^"), ("D3", "=C3/2"), ("D4", "=E^v-C3")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert_eq!(value(&g, "C3"), "1200");
        assert_eq!(value(&g, "D3"), "600.000000");
        // no literal in column E
        assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
        assert!(matches!(
            report.failure("D4".parse().unwrap()),
            Some(CellError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_formula_reads_evaluated_formula() {
        let mut g = grid(&[("A1", "=B1*2"), ("B1", "=C1+1"), ("C1", "1")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(value(&g, "B1"), "2.000000");
        // B1 is a value by then, so precedence is not disturbed
        assert_eq!(value(&g, "A1"), "4.000000");
    }

    #[test]
    fn test_dependent_reads_standalone_result() {
        let mut g = grid(&[("E1", "1000"), ("D2", "=100+50"), ("E2", "=E^v-D2")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(value(&g, "E2"), "850.000000");
    }

    #[test]
    fn test_standalone_reads_dependent_result() {
        let mut g = grid(&[("E1", "10"), ("E2", "=E^v+5"), ("A1", "=E2*2")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(value(&g, "E2"), "15.000000");
        assert_eq!(value(&g, "A1"), "30.000000");
    }

    #[test]
    fn test_formula_cycle_is_unresolved() {
        let mut g = grid(&[("A1", "=B1+1"), ("B1", "=A1+1"), ("C1", "=2*2")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert_eq!(value(&g, "C1"), "4.000000");
        assert_eq!(value(&g, "A1"), ERR_VALUE);
        assert_eq!(
            report.failure("A1".parse().unwrap()),
            Some(&CellError::UnresolvedReference("B1 never resolved".into()))
        );
        assert!(matches!(
            report.failure("B1".parse().unwrap()),
            Some(CellError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_reading_a_failed_cell_fails_the_reader() {
        let mut g = grid(&[("A1", "=^^"), ("B1", "=A1")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(
            report.failure("B1".parse().unwrap()),
            Some(&CellError::UnresolvedReference(
                "A1 reads failed cell A1".into()
            ))
        );

        let mut g = grid(&[("E1", "=foo(1)"), ("F1", "=E^")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert_eq!(value(&g, "F1"), ERR_VALUE);
        assert_eq!(
            report.failure("F1".parse().unwrap()),
            Some(&CellError::UnresolvedReference(
                "E^v reads failed cell E1".into()
            ))
        );
    }

    #[test]
    fn test_deferred_backfill_reads_evaluated_column() {
        let mut g = grid(&[("E1", "7"), ("E2", "=E^v*2"), ("F1", "=E^+1")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        assert!(report.is_clean(), "{:?}", report.failures);
        // both formulas are deferred behind E2, then read E1
        assert_eq!(value(&g, "E2"), "14.000000");
        assert_eq!(value(&g, "F1"), "8.000000");
    }

    #[test]
    fn test_failures_are_collected() {
        let mut g = grid(&[
            ("A1", "=foo(1)"),
            ("A2", "=sum(1,2)"),
            ("B1", "=^^"),
            ("C1", "=E^v"),
        ]);
        let report = resolve_grid(&mut g, &EngineOptions::default());

        assert_eq!(value(&g, "A1"), ERR_VALUE);
        assert_eq!(value(&g, "A2"), "3.000000");
        assert_eq!(value(&g, "B1"), ERR_VALUE);
        assert_eq!(value(&g, "C1"), ERR_VALUE);
        let cells: Vec<String> = report.failures.iter().map(|f| f.cell.to_string()).collect();
        assert_eq!(cells, vec!["A1", "B1", "C1"]);
        assert!(matches!(
            report.failure("B1".parse().unwrap()),
            Some(CellError::PropagationNonTermination(_))
        ));
    }

    #[test]
    fn test_snapshot_json() {
        let mut g = grid(&[("A1", "=1+1")]);
        let report = resolve_grid(&mut g, &EngineOptions::default());
        let json = Snapshot::new(&g, &report).to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["cells"]["A1"], "2.000000");
        assert_eq!(parsed["rows"], 1);
        assert_eq!(parsed["failures"].as_array().map(Vec::len), Some(0));
    }
}
