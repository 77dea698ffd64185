//! Formula errors
//!
//! All variants are attributed to the author of the anchor formula: a
//! malformed expression or a reference outside the table is a schema error in
//! the authored formula, never something the engine silently ignores.

/// Anchor formula errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// Unexpected character or token
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset in the formula text
        offset: usize,
        /// What went wrong
        message: String,
    },

    /// Left-hand side is not a single cell reference
    #[error("formula target must be a single reference")]
    InvalidTarget,

    /// Mixes column references and row references
    #[error("formula mixes column and row references")]
    MixedAxis,

    /// Replication binding disagrees with the references used
    #[error("formula references {found:?} but is bound to replicate over {bound:?}")]
    AxisMismatch {
        /// Axis implied by the references
        found: crate::anchor::Axis,
        /// Axis named by the binding
        bound: crate::anchor::Axis,
    },

    /// Reference outside the table bounds
    #[error("reference {reference} is outside the table ({rows} rows x {columns} columns)")]
    OutOfBounds {
        /// Offending reference, rendered
        reference: String,
        /// Table row count
        rows: usize,
        /// Table column count
        columns: usize,
    },

    /// Range endpoints shifted by different offsets
    #[error("range {from}:{to} mixes offsets; both ends must share one")]
    RangeOffsetMismatch {
        /// First endpoint, rendered
        from: String,
        /// Last endpoint, rendered
        to: String,
    },

    /// Row label does not match any row
    #[error("no row labelled {0:?}")]
    UnknownLabel(String),

    /// Formula references no cell at all
    #[error("formula references no cells")]
    NoReferences,
}
