//! Merge worker outputs into one aggregate

use vouch_state::{merge_findings, AggregateFindings, DedupRule, FailureRecord, FindingSet};

/// Settled output of one fan-out item or refinement chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    /// Item or chain id
    pub id: String,
    /// What the worker produced (last good output for a failed chain)
    pub output: FindingSet,
    /// Set when the worker failed
    pub failure: Option<FailureRecord>,
}

/// Merge settled workers, in the given order
///
/// Findings are deduplicated under `rule`, keeping first occurrences.
/// Discrepancies are concatenated. Failures are counted, never raised.
#[must_use]
pub fn merge_outcomes(outcomes: Vec<WorkerOutcome>, rule: &dyn DedupRule) -> AggregateFindings {
    let total = outcomes.len();
    let mut lists = Vec::with_capacity(total);
    let mut discrepancies = Vec::new();
    let mut failures = Vec::new();

    for outcome in outcomes {
        lists.push(outcome.output.findings);
        discrepancies.extend(outcome.output.discrepancies);
        failures.extend(outcome.failure);
    }

    AggregateFindings {
        findings: merge_findings(lists, rule),
        discrepancies,
        total,
        failed: failures.len(),
        failures,
    }
}
