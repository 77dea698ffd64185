//! Typed table grid
//!
//! Columns are addressed spreadsheet-style (`A` is the first raw column) and
//! rows by their 1-based raw position, so authored formulas can point at
//! cells exactly as the table was extracted.

use crate::cell::{coerce_cell, CellValue};
use crate::expr::column_letters;
use once_cell::sync::Lazy;
use regex::Regex;
use vouch_state::RawTable;

// `subtotal_detection` fails if the pattern stops compiling
static SUBTOTAL_LABEL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)\b(sub-?)?totals?\b").ok());

fn is_subtotal_label(label: &str) -> bool {
    SUBTOTAL_LABEL.as_ref().is_some_and(|pattern| pattern.is_match(label))
}

/// Four-digit year as printed in a column caption
fn is_year(raw: &str) -> bool {
    let raw = raw.trim();
    raw.len() == 4
        && raw.bytes().all(|b| b.is_ascii_digit())
        && raw.parse::<u16>().is_ok_and(|year| (1900..=2100).contains(&year))
}

/// One typed row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow {
    /// 0-based raw row index
    pub index: usize,
    /// First text cell of the row, or empty
    pub label: String,
    /// Typed cells, padded to the grid width
    pub cells: Vec<CellValue>,
    /// Header rows carry captions, not data
    pub is_header: bool,
    /// Row label names a total or subtotal
    pub is_subtotal: bool,
}

/// Parsed table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedGrid {
    table_id: String,
    title: Option<String>,
    rows: Vec<GridRow>,
    width: usize,
}

impl TypedGrid {
    /// Parse a raw table
    ///
    /// Leading rows are headers while they hold no numbers other than
    /// years (`| | 2024 | 2023 |`, `| Revenue | 2024 | 2023 |`). The first
    /// row with an amount ends the header block, blank label or not.
    #[must_use]
    pub fn parse(table: &RawTable) -> Self {
        let width = table.width();
        let mut in_header = true;

        let rows = table
            .rows
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                let mut cells: Vec<CellValue> = raw.iter().map(|c| coerce_cell(c)).collect();
                cells.resize(width, CellValue::Null);

                let label = cells
                    .iter()
                    .find_map(|c| match c {
                        CellValue::Text(t) => Some(t.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();

                if in_header {
                    in_header = raw
                        .iter()
                        .zip(&cells)
                        .filter(|(_, cell)| cell.is_number())
                        .all(|(text, _)| is_year(text));
                }

                GridRow {
                    index,
                    is_subtotal: is_subtotal_label(&label),
                    label,
                    cells,
                    is_header: in_header,
                }
            })
            .collect();

        Self {
            table_id: table.id.clone(),
            title: table.title.clone(),
            rows,
            width,
        }
    }

    /// Table id
    #[inline]
    #[must_use]
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Title, falling back to the id
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.table_id)
    }

    /// Row count
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column count
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.width
    }

    /// All rows
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    /// Data (non-header) rows
    pub fn data_rows(&self) -> impl Iterator<Item = &GridRow> {
        self.rows.iter().filter(|r| !r.is_header)
    }

    /// Cell at (row, column)
    #[inline]
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.cells.get(column))
    }

    /// Columns holding at least one number in a data row
    #[must_use]
    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.width)
            .filter(|&col| {
                self.data_rows()
                    .any(|row| row.cells.get(col).is_some_and(CellValue::is_number))
            })
            .collect()
    }

    /// Find a row by label (case and whitespace insensitive)
    #[must_use]
    pub fn row_by_label(&self, label: &str) -> Option<usize> {
        let wanted = vouch_state::normalize_text(label);
        self.rows
            .iter()
            .find(|r| !r.label.is_empty() && vouch_state::normalize_text(&r.label) == wanted)
            .map(|r| r.index)
    }

    /// Spreadsheet-style coordinate, with the row label when present
    #[must_use]
    pub fn describe(&self, row: usize, column: usize) -> String {
        let coord = format!("{}{}", column_letters(column), row + 1);
        match self.rows.get(row).map(|r| r.label.as_str()) {
            Some(label) if !label.is_empty() => format!("{coord} ({label})"),
            _ => coord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn income_statement() -> RawTable {
        RawTable::new(
            "is",
            vec![
                vec!["", "2024", "2023"],
                vec!["Product", "100", "90"],
                vec!["Services", "50", "-"],
                vec!["Total revenue", "150", "90"],
            ],
        )
    }

    #[test]
    fn year_row_is_header() {
        let grid = TypedGrid::parse(&income_statement());
        assert!(grid.rows()[0].is_header);
        assert_eq!(grid.data_rows().count(), 3);
    }

    #[test]
    fn labelled_year_row_is_header() {
        let grid = TypedGrid::parse(&RawTable::new(
            "t",
            vec![vec!["Revenue", "2024", "2023"], vec!["Product", "100", "90"]],
        ));
        assert!(grid.rows()[0].is_header);
        assert_eq!(grid.data_rows().map(|r| r.index).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn unlabelled_amount_rows_are_data() {
        let grid = TypedGrid::parse(&RawTable::new(
            "t",
            vec![
                vec!["", "Opening", "Closing"],
                vec!["", "100", "110"],
                vec!["", "1,950", "2,000"],
            ],
        ));
        let headers: Vec<_> = grid.rows().iter().map(|r| r.is_header).collect();
        assert_eq!(headers, vec![true, false, false]);
        assert_eq!(grid.numeric_columns(), vec![1, 2]);
    }

    #[test]
    fn subtotal_detection() {
        let grid = TypedGrid::parse(&income_statement());
        let flags: Vec<_> = grid.rows().iter().map(|r| r.is_subtotal).collect();
        assert_eq!(flags, vec![false, false, false, true]);
    }

    #[test]
    fn label_lookup_and_description() {
        let grid = TypedGrid::parse(&income_statement());
        assert_eq!(grid.row_by_label("total  REVENUE"), Some(3));
        assert_eq!(grid.describe(3, 1), "B4 (Total revenue)");
        assert_eq!(grid.cell(2, 2), Some(&CellValue::Null));
        assert_eq!(grid.cell(1, 1).and_then(CellValue::as_number), Some(Decimal::from(100)));
    }

    #[test]
    fn numeric_columns_skip_labels() {
        let grid = TypedGrid::parse(&income_statement());
        assert_eq!(grid.numeric_columns(), vec![1, 2]);
    }

    #[test]
    fn headerless_numeric_table() {
        let grid = TypedGrid::parse(&RawTable::new("t", vec![vec!["100", "50", "140"]]));
        assert_eq!(grid.data_rows().count(), 1);
        assert_eq!(grid.describe(0, 2), "C1");
    }

    #[test]
    fn ragged_rows_are_padded() {
        let grid = TypedGrid::parse(&RawTable::new("t", vec![vec!["a", "1", "2"], vec!["b", "3"]]));
        assert_eq!(grid.cell(1, 2), Some(&CellValue::Null));
    }
}
