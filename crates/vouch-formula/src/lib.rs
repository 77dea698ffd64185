//! Vouch Formula
//!
//! Verifies the numeric self-consistency of one table without any reasoning
//! call. An authored [`AnchorFormula`] (for example `C = A + B`) is replicated
//! across every matching row or column, evaluated with exact decimal
//! arithmetic, and compared to the reported cell within a [`Tolerance`].
//!
//! # Pipeline
//!
//! ```text
//! RawTable → TypedGrid → (AnchorFormula → Compiled) → instantiate per row/column → evaluate → VerificationReport
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use vouch_formula::{AnchorFormula, Verifier};
//! use vouch_state::RawTable;
//!
//! let table = RawTable::new("t1", vec![vec!["100", "50", "140"]]);
//! let formula = AnchorFormula::new("f1", "C = A + B");
//!
//! let report = Verifier::default().verify_table(&table, &[formula]);
//! assert_eq!(report.exceeding().count(), 1);
//! ```
//!
//! Verification is a pure function of table, formulas and tolerance: running
//! it twice yields byte-identical reports.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod anchor;
mod cell;
mod error;
mod expr;
mod grid;
mod verify;

pub use anchor::{AnchorFormula, Axis, ColumnSelector, Replication, RowSelector};
pub use cell::{coerce_cell, CellValue};
pub use error::FormulaError;
pub use expr::{column_index, column_letters, parse_formula, Expr, Op, ParsedFormula, RefTemplate, RowAnchor};
pub use grid::{GridRow, TypedGrid};
pub use verify::{CheckOutcome, CheckStatus, RejectedFormula, Tolerance, VerificationReport, Verifier};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
