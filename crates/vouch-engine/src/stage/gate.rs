//! Gate: decide whether a document is worth analysing
//!
//! Two ordered checks, short-circuiting on the first failure:
//! 1. deterministic preflight: content length floor, table presence
//! 2. classifier call, biased towards acceptance
//!
//! The outcome is a value, not an error. [`GateDecision::Proceed`] carries a
//! [`ProceedToken`] that only this module can mint; the orchestrator needs
//! one to launch verticals.

use crate::config::GateConfig;
use crate::context::RunContext;
use crate::error::{PipelineError, StageError};
use crate::schema::{classifier_schema, ClassifierOutput};
use crate::task::ReasoningTask;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vouch_state::{RawTable, StateKey};

/// Characters of document text shown to the classifier
const CLASSIFIER_EXCERPT_CHARS: usize = 6_000;

/// Which check rejected the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCheck {
    /// Text shorter than the floor
    ContentLength,
    /// No table extracted
    TablePresence,
    /// Classifier confidently said no
    Classifier,
}

/// Why the document was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRejection {
    /// Failing check
    pub check: GateCheck,
    /// Human-readable reason
    pub reason: String,
}

/// How the document got through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Acceptance {
    /// Classifier said relevant
    Classifier {
        /// Reported confidence
        confidence: f64,
    },
    /// Classifier said not relevant, below the rejection threshold
    Uncertain {
        /// Reported confidence
        confidence: f64,
    },
    /// Classifier call failed
    ClassifierUnavailable {
        /// Rendered error
        error: String,
    },
    /// Preflight only; no classifier configured
    Preflight,
}

/// Permission to launch verticals
#[derive(Debug, Clone, PartialEq)]
pub struct ProceedToken {
    acceptance: Acceptance,
}

impl ProceedToken {
    /// How the gate accepted
    #[inline]
    #[must_use]
    pub fn acceptance(&self) -> &Acceptance {
        &self.acceptance
    }
}

/// Gate outcome
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Launch verticals
    Proceed(ProceedToken),
    /// Terminate the run as rejected
    Rejected(GateRejection),
}

impl GateDecision {
    /// Whether the run may proceed
    #[inline]
    #[must_use]
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed(_))
    }
}

/// Deterministic preflight
///
/// # Errors
/// The first failing check.
pub fn preflight(config: &GateConfig, text: &str, tables: &[RawTable]) -> Result<(), GateRejection> {
    let length = text.trim().chars().count();
    if length < config.min_content_chars {
        return Err(GateRejection {
            check: GateCheck::ContentLength,
            reason: format!(
                "document has {length} characters of text, below the floor of {}",
                config.min_content_chars
            ),
        });
    }
    if config.require_table && !tables.iter().any(|t| t.rows.iter().any(|r| !r.is_empty())) {
        return Err(GateRejection {
            check: GateCheck::TablePresence,
            reason: "no table was extracted from the document".to_string(),
        });
    }
    Ok(())
}

/// Gate over the seeded document
#[derive(Debug, Clone)]
pub struct GateStage {
    text: StateKey,
    tables: StateKey,
    classifier: Option<ReasoningTask>,
}

impl GateStage {
    /// Gate reading document text and tables from the given keys
    #[must_use]
    pub fn new(text: StateKey, tables: StateKey) -> Self {
        Self {
            text,
            tables,
            classifier: None,
        }
    }

    /// With a classifier call after preflight
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` (not expected for the built-in schema).
    pub fn with_classifier(mut self, instructions: impl Into<String>) -> Result<Self, PipelineError> {
        self.classifier = Some(ReasoningTask::new("gate.classifier", instructions, classifier_schema())?);
        Ok(self)
    }

    /// Run both checks
    ///
    /// # Errors
    /// Only state errors; a classifier failure is handled by policy.
    pub async fn evaluate(&self, ctx: &RunContext) -> Result<GateDecision, StageError> {
        let config = &ctx.config().gate;
        let text_value = ctx.store().require(&self.text)?;
        let text = text_value.as_text().unwrap_or_default();
        let tables_value = ctx.store().get(&self.tables);
        let tables = tables_value.as_ref().and_then(|v| v.as_tables()).unwrap_or_default();

        if let Err(rejection) = preflight(config, text, tables) {
            info!(check = ?rejection.check, reason = %rejection.reason, "gate preflight rejected document");
            return Ok(GateDecision::Rejected(rejection));
        }

        let Some(classifier) = &self.classifier else {
            return Ok(proceed(Acceptance::Preflight));
        };

        let excerpt: String = text.chars().take(CLASSIFIER_EXCERPT_CHARS).collect();
        let titles: Vec<&str> = tables.iter().map(|t| t.title.as_deref().unwrap_or(&t.id)).collect();
        let context = format!("## Document excerpt\n{excerpt}\n\n## Tables\n{}", titles.join("\n"));

        let verdict = match classifier.run::<ClassifierOutput>(ctx, "document", context).await {
            Ok(verdict) => verdict,
            Err(e) if e.is_contract_violation() => return Err(StageError::Task(e)),
            Err(e) if config.accept_when_uncertain => {
                warn!(error = %e, "gate classifier failed, accepting");
                return Ok(proceed(Acceptance::ClassifierUnavailable { error: e.to_string() }));
            }
            Err(e) => {
                return Ok(GateDecision::Rejected(GateRejection {
                    check: GateCheck::Classifier,
                    reason: format!("classifier unavailable: {e}"),
                }))
            }
        };

        Ok(decide(config, &verdict))
    }
}

fn proceed(acceptance: Acceptance) -> GateDecision {
    GateDecision::Proceed(ProceedToken { acceptance })
}

/// Apply the acceptance bias to a classifier verdict
fn decide(config: &GateConfig, verdict: &ClassifierOutput) -> GateDecision {
    if verdict.relevant {
        return proceed(Acceptance::Classifier {
            confidence: verdict.confidence,
        });
    }
    if config.accept_when_uncertain && verdict.confidence < config.reject_confidence {
        info!(confidence = verdict.confidence, "gate classifier uncertain, accepting");
        return proceed(Acceptance::Uncertain {
            confidence: verdict.confidence,
        });
    }
    GateDecision::Rejected(GateRejection {
        check: GateCheck::Classifier,
        reason: verdict
            .reason
            .clone()
            .unwrap_or_else(|| format!("classified out of scope (confidence {:.2})", verdict.confidence)),
    })
}
