//! Anchor formulas and their replication binding

use crate::error::FormulaError;
use crate::expr::{column_index, parse_formula, Expr, ParsedFormula, RefTemplate, RowAnchor};
use crate::grid::TypedGrid;
use serde::{Deserialize, Serialize};

/// Direction a formula is replicated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Once per row; references name columns
    Rows,
    /// Once per column; references name rows
    Columns,
}

/// Rows a row-wise formula is instantiated on
///
/// Row numbers are 1-based, as printed in cell coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "select", rename_all = "snake_case")]
pub enum RowSelector {
    /// Every data row
    All,
    /// Every data row whose label is not a total or subtotal
    #[default]
    ExceptSubtotals,
    /// Exactly these rows
    Only {
        /// Row numbers
        rows: Vec<usize>,
    },
    /// Data rows in `start..=end`
    Range {
        /// First row number
        start: usize,
        /// Last row number
        end: usize,
    },
}

/// Columns a column-wise formula is instantiated on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "select", rename_all = "snake_case")]
pub enum ColumnSelector {
    /// Every column holding numbers
    #[default]
    Numeric,
    /// Exactly these columns, by letter
    Only {
        /// Column letters
        columns: Vec<String>,
    },
}

/// Replication binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "axis", rename_all = "snake_case")]
pub enum Replication {
    /// Replicate down rows
    Rows {
        /// Row selection
        #[serde(default)]
        rows: RowSelector,
    },
    /// Replicate across columns
    Columns {
        /// Column selection
        #[serde(default)]
        columns: ColumnSelector,
    },
}

impl Replication {
    /// Axis of this binding
    #[inline]
    #[must_use]
    pub fn axis(&self) -> Axis {
        match self {
            Self::Rows { .. } => Axis::Rows,
            Self::Columns { .. } => Axis::Columns,
        }
    }

    fn default_for(axis: Axis) -> Self {
        match axis {
            Axis::Rows => Self::Rows {
                rows: RowSelector::default(),
            },
            Axis::Columns => Self::Columns {
                columns: ColumnSelector::default(),
            },
        }
    }
}

/// One authored arithmetic relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorFormula {
    /// Formula id, unique per table
    pub id: String,
    /// `TARGET = EXPR`
    pub expression: String,
    /// Replication binding; inferred from the references when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate: Option<Replication>,
    /// Who authored the formula
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl AnchorFormula {
    /// Create a formula with an inferred binding
    #[must_use]
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expression: expression.into(),
            replicate: None,
            author: None,
        }
    }

    /// With an explicit replication binding
    #[inline]
    #[must_use]
    pub fn with_replication(mut self, replicate: Replication) -> Self {
        self.replicate = Some(replicate);
        self
    }

    /// With author attribution
    #[inline]
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Parse, bind and bounds-check against a grid
    pub(crate) fn compile(&self, grid: &TypedGrid) -> Result<Compiled, FormulaError> {
        let parsed = parse_formula(&self.expression)?;
        let axis = parsed.axis()?;

        let replicate = match &self.replicate {
            Some(bound) if bound.axis() != axis => {
                return Err(FormulaError::AxisMismatch {
                    found: axis,
                    bound: bound.axis(),
                })
            }
            Some(bound) => bound.clone(),
            None => Replication::default_for(axis),
        };

        let target = resolve_ref(&parsed.target, grid)?;
        let expr = resolve_expr(&parsed.expr, grid)?;
        let indices = select(&replicate, grid)?;
        let formula = ParsedFormula { target, expr };
        check_offsets(&formula, axis, &indices, grid)?;

        Ok(Compiled {
            formula,
            axis,
            indices,
        })
    }
}

/// Formula ready to instantiate: labels resolved, references in bounds
#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    pub(crate) formula: ParsedFormula,
    pub(crate) axis: Axis,
    /// Row or column indices to instantiate on, ascending
    pub(crate) indices: Vec<usize>,
}

fn out_of_bounds(reference: &RefTemplate, grid: &TypedGrid) -> FormulaError {
    FormulaError::OutOfBounds {
        reference: reference.to_string(),
        rows: grid.row_count(),
        columns: grid.column_count(),
    }
}

fn resolve_ref(reference: &RefTemplate, grid: &TypedGrid) -> Result<RefTemplate, FormulaError> {
    match reference {
        RefTemplate::Column { column, .. } if *column >= grid.column_count() => {
            Err(out_of_bounds(reference, grid))
        }
        RefTemplate::Column { .. } => Ok(reference.clone()),
        RefTemplate::Row {
            row: RowAnchor::Number(n),
            ..
        } if *n >= grid.row_count() => Err(out_of_bounds(reference, grid)),
        RefTemplate::Row {
            row: RowAnchor::Number(_),
            ..
        } => Ok(reference.clone()),
        RefTemplate::Row {
            row: RowAnchor::Label(label),
            column_offset,
        } => {
            let n = grid
                .row_by_label(label)
                .ok_or_else(|| FormulaError::UnknownLabel(label.clone()))?;
            Ok(RefTemplate::Row {
                row: RowAnchor::Number(n),
                column_offset: *column_offset,
            })
        }
    }
}

fn resolve_expr(expr: &Expr, grid: &TypedGrid) -> Result<Expr, FormulaError> {
    Ok(match expr {
        Expr::Number(n) => Expr::Number(*n),
        Expr::Ref(r) => Expr::Ref(resolve_ref(r, grid)?),
        Expr::Sum(a, b) if a.offset() != b.offset() => {
            return Err(FormulaError::RangeOffsetMismatch {
                from: a.to_string(),
                to: b.to_string(),
            })
        }
        Expr::Sum(a, b) => Expr::Sum(resolve_ref(a, grid)?, resolve_ref(b, grid)?),
        Expr::Neg(inner) => Expr::Neg(Box::new(resolve_expr(inner, grid)?)),
        Expr::Binary(lhs, op, rhs) => Expr::Binary(
            Box::new(resolve_expr(lhs, grid)?),
            *op,
            Box::new(resolve_expr(rhs, grid)?),
        ),
    })
}

/// A shifted reference must land inside the grid on at least one instance
fn check_offsets(formula: &ParsedFormula, axis: Axis, indices: &[usize], grid: &TypedGrid) -> Result<(), FormulaError> {
    if indices.is_empty() {
        return Ok(());
    }
    let extent = match axis {
        Axis::Rows => grid.row_count(),
        Axis::Columns => grid.column_count(),
    };
    for reference in formula.references() {
        let offset = reference.offset();
        if offset == 0 {
            continue;
        }
        let lands = indices.iter().any(|&index| {
            i64::try_from(index)
                .ok()
                .and_then(|i| i.checked_add(offset))
                .and_then(|shifted| usize::try_from(shifted).ok())
                .is_some_and(|shifted| shifted < extent)
        });
        if !lands {
            return Err(out_of_bounds(reference, grid));
        }
    }
    Ok(())
}

fn select(replicate: &Replication, grid: &TypedGrid) -> Result<Vec<usize>, FormulaError> {
    match replicate {
        Replication::Rows { rows } => select_rows(rows, grid),
        Replication::Columns { columns } => select_columns(columns, grid),
    }
}

fn select_rows(selector: &RowSelector, grid: &TypedGrid) -> Result<Vec<usize>, FormulaError> {
    let row_ref = |n: usize| FormulaError::OutOfBounds {
        reference: format!("#{n}"),
        rows: grid.row_count(),
        columns: grid.column_count(),
    };

    Ok(match selector {
        RowSelector::All => grid.data_rows().map(|r| r.index).collect(),
        RowSelector::ExceptSubtotals => grid
            .data_rows()
            .filter(|r| !r.is_subtotal)
            .map(|r| r.index)
            .collect(),
        RowSelector::Only { rows } => {
            let mut picked = Vec::with_capacity(rows.len());
            for &n in rows {
                if n == 0 || n > grid.row_count() {
                    return Err(row_ref(n));
                }
                picked.push(n - 1);
            }
            picked.sort_unstable();
            picked.dedup();
            picked
        }
        RowSelector::Range { start, end } => {
            if *start == 0 || *end > grid.row_count() || start > end {
                return Err(row_ref(if *start == 0 { *start } else { *end }));
            }
            grid.data_rows()
                .map(|r| r.index)
                .filter(|i| (start - 1..*end).contains(i))
                .collect()
        }
    })
}

fn select_columns(selector: &ColumnSelector, grid: &TypedGrid) -> Result<Vec<usize>, FormulaError> {
    match selector {
        ColumnSelector::Numeric => Ok(grid.numeric_columns()),
        ColumnSelector::Only { columns } => {
            let mut picked = Vec::with_capacity(columns.len());
            for letters in columns {
                let column = column_index(letters).ok_or_else(|| FormulaError::Syntax {
                    offset: 0,
                    message: format!("invalid column {letters:?} in selector"),
                })?;
                if column >= grid.column_count() {
                    return Err(FormulaError::OutOfBounds {
                        reference: letters.to_ascii_uppercase(),
                        rows: grid.row_count(),
                        columns: grid.column_count(),
                    });
                }
                picked.push(column);
            }
            picked.sort_unstable();
            picked.dedup();
            Ok(picked)
        }
    }
}
