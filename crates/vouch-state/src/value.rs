//! Values held by the state store

use crate::finding::{Discrepancy, Finding};
use serde::{Deserialize, Serialize};

/// Extracted table: a grid of strings addressed by (row, column)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    /// Stable table identifier
    pub id: String,
    /// Caption or heading, if extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Row-major cells
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Create a table from row-major cells
    #[must_use]
    pub fn new<R, C>(id: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            id: id.into(),
            title: None,
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    /// With title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Widest row length
    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Fan-out unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Opaque identifier, unique within one fan-out
    pub id: String,
    /// Work payload
    pub payload: serde_json::Value,
}

impl Item {
    /// Create an item
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Output of one stage or one worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSet {
    /// Findings
    pub findings: Vec<Finding>,
    /// Numeric discrepancies backing the findings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrepancies: Vec<Discrepancy>,
}

impl FindingSet {
    /// Create from findings only
    #[inline]
    #[must_use]
    pub fn new(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            discrepancies: Vec::new(),
        }
    }

    /// With discrepancies
    #[inline]
    #[must_use]
    pub fn with_discrepancies(mut self, discrepancies: Vec<Discrepancy>) -> Self {
        self.discrepancies = discrepancies;
        self
    }
}

/// Failure recorded in place of a worker's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Item (or chain) that failed
    pub item_id: String,
    /// Final error message
    pub error: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

/// Merged output of a fan-out or refinement stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateFindings {
    /// Deduplicated findings
    pub findings: Vec<Finding>,
    /// Discrepancies from all workers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrepancies: Vec<Discrepancy>,
    /// Workers that settled
    pub total: usize,
    /// Workers that failed
    pub failed: usize,
    /// Failure details, in item order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

impl AggregateFindings {
    /// Whether some workers failed
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Typed value stored under a state key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    /// Free text (document body, classifier notes)
    Text(String),
    /// Extracted tables
    Tables(Vec<RawTable>),
    /// Item list feeding a fan-out
    Items(Vec<Item>),
    /// Stage or worker output
    Findings(FindingSet),
    /// Aggregated fan-out or refinement output
    Aggregate(AggregateFindings),
    /// Worker failure record
    Failure(FailureRecord),
    /// Any other structured output
    Json(serde_json::Value),
}

impl StateValue {
    /// Variant name, for diagnostics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Tables(_) => "tables",
            Self::Items(_) => "items",
            Self::Findings(_) => "findings",
            Self::Aggregate(_) => "aggregate",
            Self::Failure(_) => "failure",
            Self::Json(_) => "json",
        }
    }

    /// Text payload
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Table payload
    #[inline]
    #[must_use]
    pub fn as_tables(&self) -> Option<&[RawTable]> {
        match self {
            Self::Tables(tables) => Some(tables),
            _ => None,
        }
    }

    /// Item payload
    #[inline]
    #[must_use]
    pub fn as_items(&self) -> Option<&[Item]> {
        match self {
            Self::Items(items) => Some(items),
            _ => None,
        }
    }

    /// Fan-out units: items as-is, tables one item per table
    #[must_use]
    pub fn to_items(&self) -> Option<Vec<Item>> {
        match self {
            Self::Items(items) => Some(items.clone()),
            Self::Tables(tables) => Some(
                tables
                    .iter()
                    .map(|t| Item::new(t.id.clone(), serde_json::to_value(t).unwrap_or_default()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Findings carried by this value, regardless of shape
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Findings(set) => &set.findings,
            Self::Aggregate(agg) => &agg.findings,
            _ => &[],
        }
    }

    /// Discrepancies carried by this value, regardless of shape
    #[must_use]
    pub fn discrepancies(&self) -> &[Discrepancy] {
        match self {
            Self::Findings(set) => &set.discrepancies,
            Self::Aggregate(agg) => &agg.discrepancies,
            _ => &[],
        }
    }

    /// Render as prompt context
    ///
    /// Text is passed through; everything else is pretty JSON.
    #[must_use]
    pub fn to_prompt_context(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.kind().to_string()),
        }
    }
}
