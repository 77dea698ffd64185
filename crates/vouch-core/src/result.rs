//! Run outcome

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;
use vouch_engine::{Acceptance, AuditEntry, GateRejection};
use vouch_state::{Discrepancy, FailureRecord, Finding, StateValue};

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Gate turned the document away; no vertical ran
    Rejected,
    /// Every vertical reached a terminal status
    Complete,
    /// A state contract was violated
    Failed,
}

impl RunStatus {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one vertical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalStatus {
    /// Not started
    #[default]
    Idle,
    /// In flight
    Running,
    /// Finished; findings may be partial when items failed
    Complete,
    /// A stage failed
    Error,
}

/// Outcome of one vertical
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalResult {
    /// Status
    pub status: VerticalStatus,
    /// Terminal findings
    pub findings: Vec<Finding>,
    /// Numeric discrepancies, if the vertical verifies tables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrepancies: Vec<Discrepancy>,
    /// Failed items or chains inside the vertical
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
    /// Why the vertical ended in error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerticalResult {
    /// Completed vertical built from its terminal value
    #[must_use]
    pub fn complete(terminal: Option<&StateValue>) -> Self {
        let mut result = Self {
            status: VerticalStatus::Complete,
            ..Self::default()
        };
        if let Some(value) = terminal {
            result.findings = value.findings().to_vec();
            result.discrepancies = value.discrepancies().to_vec();
            if let StateValue::Aggregate(aggregate) = value {
                result.failures.clone_from(&aggregate.failures);
            }
        }
        result
    }

    /// Vertical ended in error
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: VerticalStatus::Error,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Items or chains that failed
    #[inline]
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier
    pub run_id: Ulid,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Terminal state
    pub status: RunStatus,
    /// Gate rejection, when rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<GateRejection>,
    /// How the gate accepted, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<Acceptance>,
    /// Per-vertical outcome, in launch order
    pub verticals: IndexMap<String, VerticalResult>,
    /// Refinement passes and retries, hash-chained
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<AuditEntry>,
}

impl RunResult {
    /// Outcome of one vertical
    #[must_use]
    pub fn vertical(&self, name: &str) -> Option<&VerticalResult> {
        self.verticals.get(name)
    }

    /// All findings across verticals
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.verticals.values().flat_map(|v| v.findings.iter())
    }

    /// All discrepancies across verticals
    pub fn discrepancies(&self) -> impl Iterator<Item = &Discrepancy> {
        self.verticals.values().flat_map(|v| v.discrepancies.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_state::{AggregateFindings, Severity};

    #[test]
    fn complete_copies_aggregate_metadata() {
        let aggregate = AggregateFindings {
            findings: vec![Finding::new(Severity::Warning, "gap", "")],
            discrepancies: Vec::new(),
            total: 3,
            failed: 1,
            failures: vec![FailureRecord {
                item_id: "b".into(),
                error: "timeout".into(),
                attempts: 4,
            }],
        };
        let result = VerticalResult::complete(Some(&StateValue::Aggregate(aggregate)));

        assert_eq!(result.status, VerticalStatus::Complete);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.failed(), 1);
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&VerticalStatus::Idle).unwrap(), "\"idle\"");
        assert_eq!(serde_json::to_string(&RunStatus::Rejected).unwrap(), "\"rejected\"");
    }
}
