use crate::error::AddressError;
use regex::Regex;
use serde::Serializer;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::str::FromStr;
use std::sync::OnceLock;

/// Literal written into a cell that failed to resolve; the renderer shows it as is.
pub const ERR_VALUE: &str = "ERR";

/// Highest supported column index (`Z`).
pub const MAX_COL: u8 = 25;

/// A `<Letter><Number>` coordinate. Ordered row-major so grid iteration reads like the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    /// 1-based row number
    pub row: u32,
    /// 0-based column index, `A` = 0 ... `Z` = 25
    pub col: u8,
}

impl CellAddress {
    /// Returns `None` when the column is past `Z` or the row is 0.
    pub fn new(col: u8, row: u32) -> Option<Self> {
        if col > MAX_COL || row == 0 {
            return None;
        }
        Some(Self { row, col })
    }

    pub fn column_letter(&self) -> char {
        col_to_letter(self.col)
    }

    /// The address one row up, if there is one.
    pub fn above(&self) -> Option<Self> {
        Self::new(self.col, self.row.checked_sub(1)?)
    }

    pub fn below(&self) -> Option<Self> {
        Self::new(self.col, self.row.checked_add(1)?)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column_letter(), self.row)
    }
}

impl FromStr for CellAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cell_name(s).ok_or_else(|| AddressError(s.to_string()))
    }
}

/// Convert a zero-based column index to its letter label (0 → 'A', 25 → 'Z').
pub fn col_to_letter(col: u8) -> char {
    (b'A' + col.min(MAX_COL)) as char
}

/// Parse a cell name such as "C12" into an address.
pub fn parse_cell_name(cell_name: &str) -> Option<CellAddress> {
    let mut chars = cell_name.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_uppercase() {
        return None;
    }
    let row_str = chars.as_str();
    if row_str.is_empty() || !row_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row = row_str.parse::<u32>().ok()?;
    CellAddress::new(letter as u8 - b'A', row)
}

pub(crate) fn serialize_display<T: fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn carry_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z]\^v?").expect("valid carry-forward regex"))
}

/// True if the text holds any `A^` / `A^v` style carry-forward token.
pub fn has_carry_token(text: &str) -> bool {
    carry_token_re().is_match(text)
}

/// The first carry-forward token in the text, e.g. `B^v`.
pub fn find_carry_token(text: &str) -> Option<&str> {
    carry_token_re().find(text).map(|m| m.as_str())
}

/// The classified form of a raw cell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellContent<'a> {
    Empty,
    /// `!name`; holds the name
    Header(&'a str),
    /// `=^^`: copy the value from the cell directly above
    DoubleCaret,
    /// A formula made of one carry-forward token only, e.g. `=E^v`
    CarryForward,
    /// Formula that can be evaluated as soon as the literals it reads are in place
    StandaloneFormula,
    /// Formula holding a carry-forward token; waits for the standalone wave
    DependentFormula,
    Literal(&'a str),
}

impl<'a> CellContent<'a> {
    pub fn classify(raw: &'a str) -> Self {
        if raw.is_empty() {
            return CellContent::Empty;
        }
        if let Some(name) = raw.strip_prefix('!') {
            return CellContent::Header(name);
        }
        if raw.starts_with("=^^") {
            return CellContent::DoubleCaret;
        }
        let Some(body) = raw.strip_prefix('=') else {
            return CellContent::Literal(raw);
        };
        if !has_carry_token(raw) {
            return CellContent::StandaloneFormula;
        }
        if carry_token_re()
            .find(body.trim())
            .is_some_and(|m| m.as_str() == body.trim())
        {
            CellContent::CarryForward
        } else {
            CellContent::DependentFormula
        }
    }

    /// Any formula the evaluator has to process (markers excluded).
    pub fn is_formula(&self) -> bool {
        matches!(
            self,
            CellContent::StandaloneFormula
                | CellContent::DependentFormula
                | CellContent::CarryForward
        )
    }
}

/// Sparse sheet: address → raw string. Absent and empty cells are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    cells: BTreeMap<CellAddress, String>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: CellAddress) -> Option<&str> {
        self.cells.get(&addr).map(String::as_str)
    }

    pub fn set(&mut self, addr: CellAddress, value: impl Into<String>) {
        self.cells.insert(addr, value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellAddress, &str)> {
        self.cells.iter().map(|(addr, value)| (*addr, value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Writes every entry of a pass result back into the grid.
    pub fn commit(&mut self, resolved: BTreeMap<CellAddress, String>) {
        self.cells.extend(resolved);
    }

    /// (max_rows, max_cols) over present addresses.
    pub fn dimensions(&self) -> (u32, u8) {
        self.cells.keys().fold((0, 0), |(rows, cols), addr| {
            (rows.max(addr.row), cols.max(addr.col + 1))
        })
    }

    /// Every formula cell except `=^^` markers.
    pub fn formulas(&self) -> BTreeMap<CellAddress, String> {
        self.select(|content| content.is_formula())
    }

    pub fn standalone_formulas(&self) -> BTreeMap<CellAddress, String> {
        self.select(|content| *content == CellContent::StandaloneFormula)
    }

    fn select(&self, keep: impl Fn(&CellContent<'_>) -> bool) -> BTreeMap<CellAddress, String> {
        self.cells
            .iter()
            .filter(|(_, value)| keep(&CellContent::classify(value)))
            .map(|(addr, value)| (*addr, value.clone()))
            .collect()
    }

    /// The value cell of header `name`: one row below the first matching `!name` cell.
    pub fn header_value_cell(&self, name: &str) -> Option<CellAddress> {
        self.iter()
            .find(|(_, value)| CellContent::classify(value) == CellContent::Header(name))
            .and_then(|(addr, _)| addr.below())
    }

    /// Render rows `1..=max_rows` with right-aligned, per-column widths.
    pub fn render(&self) -> String {
        let (max_rows, max_cols) = self.dimensions();
        let widths: Vec<usize> = (0..max_cols)
            .map(|col| {
                self.iter()
                    .filter(|(addr, _)| addr.col == col)
                    .map(|(_, value)| value.chars().count())
                    .max()
                    .unwrap_or(0)
                    .max(1)
                    + 2
            })
            .collect();
        let row_width = max_rows.to_string().len();

        let mut out = String::new();
        let _ = write!(out, "{:row_width$} ", "");
        for (col, width) in widths.iter().enumerate() {
            let _ = write!(out, "{:>width$}", col_to_letter(col as u8));
        }
        out.push('\n');

        for row in 1..=max_rows {
            let _ = write!(out, "{:>row_width$} ", row);
            for (col, width) in widths.iter().enumerate() {
                let value = CellAddress::new(col as u8, row)
                    .and_then(|addr| self.get(addr))
                    .unwrap_or("");
                let _ = write!(out, "{:>width$}", value);
            }
            out.push('\n');
        }
        out
    }
}

impl FromIterator<(CellAddress, String)> for Grid {
    fn from_iter<I: IntoIterator<Item = (CellAddress, String)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}
