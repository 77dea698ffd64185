//! Findings, discrepancies and deduplication
//!
//! Findings are immutable once created. Aggregators merge finding lists and
//! drop duplicates under a [`DedupRule`]; they never edit a finding in place.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Checked and consistent
    Pass,
    /// Needs attention
    Warning,
    /// Material issue
    Critical,
}

impl Severity {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analysis result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Severity classification
    pub severity: Severity,
    /// One-line conclusion
    pub summary: String,
    /// Supporting explanation
    pub detail: String,
    /// What the finding is about (table, standard, line item)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Where in the document the evidence lives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
    /// Reasoning trace supplied by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Finding {
    /// Create a finding
    #[inline]
    #[must_use]
    pub fn new(severity: Severity, summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
            source_reference: None,
            reasoning: None,
        }
    }

    /// With subject
    #[inline]
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// With source reference
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_reference = Some(source.into());
        self
    }

    /// With reasoning trace
    #[inline]
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Whether this finding needs attention
    #[inline]
    #[must_use]
    pub fn is_issue(&self) -> bool {
        self.severity > Severity::Pass
    }
}

/// Numeric mismatch found by formula verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Anchor formula that produced the check
    pub formula_id: String,
    /// Table the check ran against
    pub table_id: String,
    /// Human-readable cell location
    pub location: String,
    /// Value computed from the formula
    pub expected_value: Decimal,
    /// Value reported in the table
    pub actual_value: Decimal,
    /// Absolute difference
    pub delta: Decimal,
    /// Whether the delta is beyond the configured tolerance
    pub tolerance_exceeded: bool,
}

/// Equality rule used when merging finding lists
pub trait DedupRule: Send + Sync + fmt::Debug {
    /// Identity key; findings with equal keys are duplicates
    fn key(&self, finding: &Finding) -> String;
}

/// Default rule: same subject and same conclusion
///
/// Subject falls back to the source reference when absent. The conclusion is
/// the severity plus the normalized summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectConclusionRule;

impl DedupRule for SubjectConclusionRule {
    fn key(&self, finding: &Finding) -> String {
        let subject = finding
            .subject
            .as_deref()
            .or(finding.source_reference.as_deref())
            .map(normalize_text)
            .unwrap_or_default();
        format!(
            "{}|{}|{}",
            subject,
            finding.severity,
            normalize_text(&finding.summary)
        )
    }
}

/// Lowercase, collapse whitespace, trim trailing punctuation
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// Merge finding lists, keeping the first occurrence of each duplicate
///
/// Input order is preserved, so merging is deterministic for a fixed input
/// order.
pub fn merge_findings<R>(lists: impl IntoIterator<Item = Vec<Finding>>, rule: &R) -> Vec<Finding>
where
    R: DedupRule + ?Sized,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for finding in lists.into_iter().flatten() {
        if seen.insert(rule.key(&finding)) {
            merged.push(finding);
        }
    }

    merged
}
