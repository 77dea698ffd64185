//! Functional tests for whole runs through the orchestrator.
//!
//! Core guarantees exercised here:
//! - No vertical starts unless the gate accepted the document, and a
//!   preflight rejection never reaches the classifier.
//! - The gate leans towards accepting borderline documents.
//! - Item failures inside a vertical leave the vertical complete with the
//!   failure counted.
//! - A state contract violation fails the whole run; an ordinary vertical
//!   error does not.
//! - Persistence sees every finished run and cannot change its outcome.

use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use vouch_core::verticals::numeric;
use vouch_core::{
    text_key, DocumentSeed, Orchestrator, PersistenceError, RunError, RunPersistence, RunResult, RunStatus,
    VerticalStatus,
};
use vouch_engine::{
    Acceptance, AuditKind, GateCheck, Pipeline, PipelineBuilder, ProgressEvent, ProviderError, RunContext, Stage,
    StageError, StageOutput,
};
use vouch_state::{StateKey, StateValue};
use vouch_test_utils::{
    consistent_table, document_text, fast_config, findings_json, mismatched_table, RecordingSink, ScriptedProvider,
};

mock! {
    Persistence {}

    #[async_trait]
    impl RunPersistence for Persistence {
        async fn persist(
            &self,
            result: &RunResult,
            state: &BTreeMap<String, StateValue>,
        ) -> Result<(), PersistenceError>;
    }
}

/// Every task scripted to succeed; the classifier says relevant
fn scripted() -> ScriptedProvider {
    ScriptedProvider::new()
        .reply("gate.classifier", json!({ "relevant": true, "confidence": 0.92 }))
        .reply(
            "numeric.anchor",
            json!({ "formulas": [{ "id": "total", "expression": "D = B + C" }] }),
        )
        .reply(
            "logic.review",
            findings_json(&[("warning", "Outlook contradicts the going-concern note")]),
        )
        .reply(
            "compliance.standards",
            json!({ "items": [{ "id": "IFRS 15" }, { "id": "IAS 1" }, { "id": "IFRS 16" }] }),
        )
        .reply("compliance.assess", findings_json(&[("warning", "Disclosure incomplete")]))
        .reply("external_signal.scan", findings_json(&[("pass", "No adverse signals found")]))
}

fn seed() -> DocumentSeed {
    DocumentSeed::new(document_text(), vec![mismatched_table(), consistent_table("balance")])
}

fn last_event(sink: &RecordingSink) -> ProgressEvent {
    sink.events().pop().unwrap()
}

/// Stage that overwrites the seeded document text
struct Tamper;

#[async_trait]
impl Stage for Tamper {
    fn name(&self) -> &str {
        "tamper"
    }

    fn inputs(&self) -> Vec<StateKey> {
        vec![text_key()]
    }

    fn outputs(&self) -> Vec<StateKey> {
        vec![StateKey::new("rogue", "tamper")]
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.store().set(&text_key(), StateValue::Text("rewritten".into()))?;
        Ok(StageOutput::default())
    }
}

/// Stage that outlives any reasonable test
struct Slow;

#[async_trait]
impl Stage for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn inputs(&self) -> Vec<StateKey> {
        vec![text_key()]
    }

    fn outputs(&self) -> Vec<StateKey> {
        vec![StateKey::new("slow", "wait")]
    }

    async fn run(&self, _ctx: &RunContext) -> Result<StageOutput, StageError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(StageOutput::default())
    }
}

fn custom(name: &str, stage: impl Stage + 'static) -> Pipeline {
    PipelineBuilder::new(name).seed(text_key()).stage(stage).build().unwrap()
}

/// Tenet: an accepted document runs every vertical to completion.
#[tokio::test]
async fn accepted_document_runs_every_vertical() {
    let provider = Arc::new(scripted());
    let sink = Arc::new(RecordingSink::new());
    let orchestrator = Orchestrator::new(provider.clone(), fast_config())
        .unwrap()
        .with_progress(sink.clone());

    let result = orchestrator.run(&seed()).await.unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert!(matches!(result.acceptance, Some(Acceptance::Classifier { .. })));
    let names: Vec<&str> = result.verticals.keys().map(String::as_str).collect();
    assert_eq!(names, ["numeric", "logic", "compliance", "external_signal"]);
    assert!(result.verticals.values().all(|v| v.status == VerticalStatus::Complete));

    // 100 + 50 reported as 140; the balance sheet adds up
    let numeric = result.vertical("numeric").unwrap();
    assert_eq!(numeric.discrepancies.len(), 1);
    assert_eq!(result.discrepancies().count(), 1);

    // same conclusion about three standards stays three findings
    assert_eq!(result.vertical("compliance").unwrap().findings.len(), 3);
    assert_eq!(provider.calls("compliance.assess"), 3);

    // two chains, two passes each
    let passes = result.audit.iter().filter(|e| matches!(e.kind, AuditKind::Pass)).count();
    assert_eq!(passes, 4);

    assert_eq!(
        last_event(&sink),
        ProgressEvent::RunComplete {
            run_id: result.run_id.to_string(),
            status: "complete".into(),
        }
    );
}

/// Tenet: one failed item is counted; its vertical still completes.
#[tokio::test]
async fn failed_standard_is_counted_not_fatal() {
    let provider = Arc::new(scripted().fail_when(
        "compliance.assess",
        "## item IFRS 16",
        ProviderError::Unavailable("overloaded".into()),
    ));
    let orchestrator = Orchestrator::new(provider.clone(), fast_config()).unwrap();

    let result = orchestrator.run(&seed()).await.unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    let compliance = result.vertical("compliance").unwrap();
    assert_eq!(compliance.status, VerticalStatus::Complete);
    assert_eq!(compliance.findings.len(), 2);
    assert_eq!(compliance.failed(), 1);
    assert_eq!(compliance.failures[0].item_id, "IFRS 16");
    assert_eq!(compliance.failures[0].attempts, 2);

    let retries = result.audit.iter().filter(|e| matches!(e.kind, AuditKind::Retry)).count();
    assert_eq!(retries, 1);
}

/// Tenet: a repeated item id is a failed item, not a failed run.
#[tokio::test]
async fn repeated_ids_are_counted_not_fatal() {
    let provider = Arc::new(scripted().reply(
        "compliance.standards",
        json!({ "items": [{ "id": "IFRS 15" }, { "id": "IAS 1" }, { "id": "IFRS 15" }] }),
    ));
    let orchestrator = Orchestrator::new(provider.clone(), fast_config()).unwrap();
    let tables = vec![mismatched_table(), consistent_table("balance"), consistent_table("balance")];

    let result = orchestrator.run(&DocumentSeed::new(document_text(), tables)).await.unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    let compliance = result.vertical("compliance").unwrap();
    assert_eq!(compliance.status, VerticalStatus::Complete);
    assert_eq!(compliance.failed(), 1);
    assert_eq!(compliance.failures[0].item_id, "IFRS 15");
    assert_eq!(provider.calls("compliance.assess"), 2);

    let numeric = result.vertical("numeric").unwrap();
    assert_eq!(numeric.status, VerticalStatus::Complete);
    assert_eq!(numeric.failed(), 1);
}

/// Tenet: a preflight rejection starts nothing and calls nothing.
#[tokio::test]
async fn short_document_is_rejected_before_the_classifier() {
    let provider = Arc::new(scripted());
    let sink = Arc::new(RecordingSink::new());
    let orchestrator = Orchestrator::new(provider.clone(), fast_config())
        .unwrap()
        .with_progress(sink.clone());

    let result = orchestrator
        .run(&DocumentSeed::new("Page 1 of 1", vec![mismatched_table()]))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Rejected);
    assert_eq!(result.rejection.as_ref().unwrap().check, GateCheck::ContentLength);
    assert_eq!(provider.calls("gate.classifier"), 0);
    assert_eq!(provider.total_calls(), 0);
    assert!(result.verticals.values().all(|v| v.status == VerticalStatus::Idle));
    assert_eq!(sink.started_count(), 0);
    assert_eq!(
        last_event(&sink),
        ProgressEvent::RunComplete {
            run_id: result.run_id.to_string(),
            status: "rejected".into(),
        }
    );
}

/// Tenet: documents without a usable table never reach the verticals.
#[tokio::test]
async fn document_without_tables_is_rejected() {
    let provider = Arc::new(scripted());
    let orchestrator = Orchestrator::new(provider.clone(), fast_config()).unwrap();

    let result = orchestrator.run(&DocumentSeed::new(document_text(), vec![])).await.unwrap();

    assert_eq!(result.status, RunStatus::Rejected);
    assert_eq!(result.rejection.unwrap().check, GateCheck::TablePresence);
    assert_eq!(provider.total_calls(), 0);
}

/// Tenet: a borderline classifier verdict lets the document through.
#[tokio::test]
async fn borderline_verdict_is_accepted() {
    let provider = Arc::new(
        scripted().reply("gate.classifier", json!({ "relevant": false, "confidence": 0.55 })),
    );
    let orchestrator = Orchestrator::new(provider.clone(), fast_config()).unwrap();

    let result = orchestrator.run(&seed()).await.unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert!(matches!(result.acceptance, Some(Acceptance::Uncertain { .. })));
    assert_eq!(provider.calls("numeric.anchor"), 2);
}

/// Tenet: a confident rejection stops the run before any vertical.
#[tokio::test]
async fn confident_rejection_stops_the_run() {
    let provider = Arc::new(scripted().reply(
        "gate.classifier",
        json!({ "relevant": false, "confidence": 0.97, "reason": "restaurant menu" }),
    ));
    let orchestrator = Orchestrator::new(provider.clone(), fast_config()).unwrap();

    let result = orchestrator.run(&seed()).await.unwrap();

    assert_eq!(result.status, RunStatus::Rejected);
    let rejection = result.rejection.unwrap();
    assert_eq!(rejection.check, GateCheck::Classifier);
    assert_eq!(rejection.reason, "restaurant menu");
    assert_eq!(provider.total_calls(), 1);
}

/// Tenet: overwriting a key another stage owns fails the whole run.
///
/// The offending vertical ends in error and every vertical still running
/// is aborted rather than left to finish on a corrupted store.
#[tokio::test]
async fn contract_violation_fails_the_run() {
    let provider = Arc::new(scripted());
    let sink = Arc::new(RecordingSink::new());
    let orchestrator = Orchestrator::new(provider, fast_config())
        .unwrap()
        .with_verticals(vec![custom("rogue", Tamper), custom("slow", Slow)])
        .unwrap()
        .with_progress(sink.clone());

    let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&seed()))
        .await
        .expect("aborted verticals must not be awaited")
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let rogue = result.vertical("rogue").unwrap();
    assert_eq!(rogue.status, VerticalStatus::Error);
    let slow = result.vertical("slow").unwrap();
    assert_eq!(slow.status, VerticalStatus::Error);
    assert_eq!(slow.error.as_deref(), Some("aborted after a state contract violation"));

    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ProgressEvent::VerticalError { vertical, .. } if vertical == "rogue")));
}

/// Tenet: an ordinary vertical failure is isolated to that vertical.
#[tokio::test]
async fn vertical_error_leaves_the_run_complete() {
    let provider = Arc::new(scripted().fail_times(
        "external_signal.scan",
        10,
        ProviderError::Unavailable("search backend down".into()),
    ));
    let sink = Arc::new(RecordingSink::new());
    let orchestrator = Orchestrator::new(provider, fast_config())
        .unwrap()
        .with_progress(sink.clone());

    let result = orchestrator.run(&seed()).await.unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    let external = result.vertical("external_signal").unwrap();
    assert_eq!(external.status, VerticalStatus::Error);
    assert!(external.error.as_deref().unwrap().contains("search backend down"));
    assert_eq!(result.vertical("numeric").unwrap().status, VerticalStatus::Complete);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ProgressEvent::VerticalError { vertical, .. } if vertical == "external_signal")));
}

/// Tenet: every finished run is handed to persistence exactly once.
#[tokio::test]
async fn finished_run_is_persisted_once() {
    let mut persistence = MockPersistence::new();
    persistence
        .expect_persist()
        .withf(|result, state| result.status == RunStatus::Complete && state.contains_key("document_text_output"))
        .times(1)
        .returning(|_, _| Ok(()));
    let orchestrator = Orchestrator::new(Arc::new(scripted()), fast_config())
        .unwrap()
        .with_persistence(Arc::new(persistence));

    orchestrator.run(&seed()).await.unwrap();
}

/// Tenet: a persistence failure does not change the run's outcome.
#[tokio::test]
async fn persistence_failure_is_not_a_run_failure() {
    let mut persistence = MockPersistence::new();
    persistence
        .expect_persist()
        .times(1)
        .returning(|_, _| Err(PersistenceError("disk full".into())));
    let orchestrator = Orchestrator::new(Arc::new(scripted()), fast_config())
        .unwrap()
        .with_persistence(Arc::new(persistence));

    let result = orchestrator.run(&seed()).await.unwrap();
    assert_eq!(result.status, RunStatus::Complete);
}

/// Tenet: vertical names are unique within an orchestrator.
#[test]
fn duplicate_vertical_names_are_refused() {
    let err = Orchestrator::new(Arc::new(scripted()), fast_config())
        .unwrap()
        .with_verticals(vec![numeric::pipeline().unwrap(), numeric::pipeline().unwrap()])
        .unwrap_err();

    assert!(matches!(err, RunError::DuplicateVertical(name) if name == "numeric"));
}
