//! Builds a [`Grid`] from the pipe-delimited budget sheet format.
//!
//! Rows are separated by line breaks and columns by `|`. A line starting with `!` opens a
//! header block; every header block after the first one is preceded by three reserved rows.

use crate::error::LoadError;
use crate::spreadsheet::{CellAddress, Grid, MAX_COL};
use std::fs;
use std::path::Path;

/// Rows skipped before every header block except the first.
const HEADER_RESERVED_ROWS: u32 = 3;

pub fn read_grid(path: impl AsRef<Path>) -> Result<Grid, LoadError> {
    let data = fs::read_to_string(path)?;
    parse_grid(&data)
}

pub fn parse_grid(data: &str) -> Result<Grid, LoadError> {
    let data = data.replace('\r', "");
    let mut lines: Vec<&str> = data.split('\n').collect();
    if lines.len() > 1 && lines.last() == Some(&"") {
        lines.pop();
    }

    let mut grid = Grid::new();
    let mut row: u32 = 1;
    let mut first_header = true;
    for (idx, line) in lines.iter().enumerate() {
        if line.starts_with('!') {
            if first_header {
                first_header = false;
            } else {
                row += HEADER_RESERVED_ROWS;
            }
        }

        let cols: Vec<&str> = line.split('|').collect();
        if cols.len() > MAX_COL as usize + 1 {
            return Err(LoadError::TooManyColumns {
                line: idx + 1,
                count: cols.len(),
            });
        }
        for (col, value) in cols.into_iter().enumerate() {
            // bounds checked above
            if let Some(addr) = CellAddress::new(col as u8, row) {
                grid.set(addr, value);
            }
        }
        row += 1;
    }
    log::debug!("loaded {} cells from {} lines", grid.len(), lines.len());
    Ok(grid)
}
