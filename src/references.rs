//! Reference Resolver: replaces header references (`@name<1>`) and cell references (`B12`)
//! inside formulas with the literals currently held by the grid.
//!
//! A cell reference to an address outside the grid becomes `0`. A header reference with no
//! matching header is left as written and reported later, when the formula is evaluated.
//! A reference to a formula or a `=^^` marker is kept until that cell holds its value.

use crate::error::{CellError, CellResult};
use crate::spreadsheet::{parse_cell_name, CellAddress, CellContent, Grid};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Literal used for a cell reference whose address is not in the grid.
pub const MISSING_CELL_VALUE: &str = "0";

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@(?P<header>.*?)<1>|(?P<cell>[A-Z]\d+)").expect("valid reference regex")
    })
}

fn header_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(.*?)<1>").expect("valid header reference regex"))
}

/// The first `@name<1>` token still left in the text.
pub fn find_header_ref(text: &str) -> Option<&str> {
    header_ref_re().find(text).map(|m| m.as_str())
}

/// A formula after substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolved {
    pub text: String,
    /// Cells whose tokens were kept because they do not hold a value yet
    pub waiting_on: BTreeSet<CellAddress>,
}

/// Resolve every formula in `formulas` against `grid`.
pub fn resolve_references(
    grid: &Grid,
    failed: &BTreeSet<CellAddress>,
    formulas: &BTreeMap<CellAddress, String>,
) -> BTreeMap<CellAddress, CellResult<Resolved>> {
    formulas
        .iter()
        .map(|(cell, formula)| (*cell, resolve_formula(grid, failed, formula)))
        .collect()
}

/// Header references take precedence over cell references at the same position, and the
/// text is scanned once, so a substituted value is never itself substituted again.
///
/// Reading a cell listed in `failed` is an error naming that cell.
pub fn resolve_formula(
    grid: &Grid,
    failed: &BTreeSet<CellAddress>,
    formula: &str,
) -> CellResult<Resolved> {
    let mut waiting_on = BTreeSet::new();
    let mut failed_read = None;
    let text = reference_re()
        .replace_all(formula, |caps: &Captures<'_>| {
            let token = &caps[0];
            let target = match caps.name("header") {
                Some(header) => match grid.header_value_cell(header.as_str()) {
                    Some(addr) => addr,
                    // unmatched headers stay as written
                    None => return token.to_string(),
                },
                None => match parse_cell_name(token) {
                    Some(addr) => addr,
                    None => return MISSING_CELL_VALUE.to_string(),
                },
            };
            if failed.contains(&target) {
                failed_read.get_or_insert_with(|| format!("{token} reads failed cell {target}"));
                return token.to_string();
            }
            match grid.get(target) {
                Some(value) => {
                    let content = CellContent::classify(value);
                    if content.is_formula() || content == CellContent::DoubleCaret {
                        waiting_on.insert(target);
                        token.to_string()
                    } else {
                        value.to_string()
                    }
                }
                None if caps.name("header").is_some() => token.to_string(),
                None => MISSING_CELL_VALUE.to_string(),
            }
        })
        .into_owned();

    match failed_read {
        Some(reason) => Err(CellError::UnresolvedReference(reason)),
        None => Ok(Resolved { text, waiting_on }),
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

    fn addr(s: &str) -> CellAddress {
        s.parse().unwrap()
    }

    fn text(grid: &Grid, formula: &str) -> String {
        resolve_formula(grid, &BTreeSet::new(), formula).unwrap().text
    }

    #[test]
    fn test_cell_references() {
        let g = grid(&[("A1", "2"), ("B1", "3")]);
        assert_eq!(text(&g, "=A1+B1"), "=2+3");
    }

    #[test]
    fn test_missing_cell_defaults_to_zero() {
        let g = grid(&[("A1", "2")]);
        assert_eq!(text(&g, "=A1*C9"), "=2*0");
    }

    #[test]
    fn test_header_reference() {
        let g = grid(&[("A1", "!cost"), ("A2", "10"), ("B1", "!adjusted_cost"), ("B2", "4")]);
        assert_eq!(text(&g, "=@cost<1>-@adjusted_cost<1>"), "=10-4");
    }

    #[test]
    fn test_unmatched_header_is_left_alone() {
        let g = grid(&[("A1", "!cost")]);
        // header present but no value row below it
        assert_eq!(text(&g, "=@cost<1>+1"), "=@cost<1>+1");
        assert_eq!(text(&g, "=@rent<1>"), "=@rent<1>");
        assert_eq!(find_header_ref("=@rent<1>+2"), Some("@rent<1>"));
    }

    #[test]
    fn test_injected_text_is_not_resubstituted() {
        let g = grid(&[("A1", "!label"), ("A2", "B1"), ("B1", "7"), ("C1", "D1"), ("D1", "9")]);
        assert_eq!(text(&g, "=concat(@label<1>,x)"), "=concat(B1,x)");
        assert_eq!(text(&g, "=C1"), "=D1");
    }

    #[test]
    fn test_marker_targets_are_kept() {
        let g = grid(&[("A1", "!cost"), ("A2", "=^^"), ("B1", "4"), ("B2", "=^^")]);
        let resolved = resolve_formula(&g, &BTreeSet::new(), "=B1+B2+@cost<1>").unwrap();
        assert_eq!(resolved.text, "=4+B2+@cost<1>");
        assert_eq!(resolved.waiting_on, BTreeSet::from([addr("A2"), addr("B2")]));
    }

    #[test]
    fn test_formula_targets_are_kept() {
        let g = grid(&[("A1", "1"), ("B1", "=A1+1"), ("C1", "=E^v*2")]);
        let resolved = resolve_formula(&g, &BTreeSet::new(), "=B1*2+C1+A1").unwrap();
        assert_eq!(resolved.text, "=B1*2+C1+1");
        assert_eq!(resolved.waiting_on, BTreeSet::from([addr("B1"), addr("C1")]));
    }

    #[test]
    fn test_reading_a_failed_cell_is_an_error() {
        let g = grid(&[("A1", "!cost"), ("A2", "ERR"), ("B1", "ERR")]);
        let failed = BTreeSet::from([addr("A2"), addr("B1")]);
        assert_eq!(
            resolve_formula(&g, &failed, "=B1+1"),
            Err(CellError::UnresolvedReference(
                "B1 reads failed cell B1".to_string()
            ))
        );
        assert!(matches!(
            resolve_formula(&g, &failed, "=@cost<1>*2"),
            Err(CellError::UnresolvedReference(reason)) if reason.contains("A2")
        ));
        // a user literal "ERR" is plain data
        assert_eq!(text(&g, "=B1"), "=ERR");
    }

    #[test]
    fn test_resolve_references_map() {
        let g = grid(&[("A1", "5")]);
        let formulas: BTreeMap<_, _> = [(addr("B1"), "=A1*2".to_string())].into();
        let resolved = resolve_references(&g, &BTreeSet::new(), &formulas);
        assert_eq!(
            resolved.get(&addr("B1")).map(|r| r.as_ref().map(|r| r.text.as_str())),
            Some(Ok("=5*2"))
        );
    }

    #[test]
    fn test_already_literal_formula_is_unchanged() {
        let g = grid(&[("A1", "5")]);
        let once = text(&g, "=A1+sum(1,2)");
        assert_eq!(text(&g, &once), once);
    }
}
