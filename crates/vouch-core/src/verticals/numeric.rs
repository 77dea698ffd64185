//! Numeric vertical: anchor formulas per table, verified deterministically
//!
//! One reasoning call per table authors the anchor formulas; everything
//! after that is arithmetic. The provider never sees or judges the
//! comparison itself.

use crate::seed::tables_key;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use vouch_engine::{FanOutStage, ItemTask, Pipeline, PipelineBuilder, PipelineError, ReasoningTask, RunContext, TaskError};
use vouch_formula::{column_letters, AnchorFormula, Verifier};
use vouch_state::{Finding, FindingSet, Item, RawTable, Severity, StateKey};

/// Vertical name
pub const NAME: &str = "numeric";

const INSTRUCTIONS: &str = "You are given one table extracted from a financial document. \
Write anchor formulas that state how its figures relate, one formula per relationship. \
Reference columns by letter (C = A + B) for relationships that hold on every row, or rows by \
number or label ({Total revenue} = SUM(#1:#3)) for relationships that hold in every column. \
Do not compute or compare any values yourself.";

/// Output schema of the authoring call
#[must_use]
pub fn formulas_schema() -> Value {
    json!({
        "type": "object",
        "required": ["formulas"],
        "properties": {
            "formulas": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "expression"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "expression": { "type": "string", "pattern": "=" },
                        "replicate": { "type": "object" }
                    }
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct FormulasOutput {
    formulas: Vec<AnchorFormula>,
}

/// Authors anchor formulas for a table, then verifies them
#[derive(Debug, Clone)]
pub struct TableVerificationTask {
    author: ReasoningTask,
}

impl TableVerificationTask {
    /// Create with the built-in authoring instructions
    ///
    /// # Errors
    /// `PipelineError::InvalidSchema` (not expected for the built-in schema).
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            author: ReasoningTask::new(format!("{NAME}.anchor"), INSTRUCTIONS, formulas_schema())?,
        })
    }
}

/// Grid with column letters and 1-based row numbers, as formulas address it
fn render_grid(table: &RawTable) -> String {
    let width = table.width();
    let header: Vec<String> = (0..width).map(column_letters).collect();
    let mut out = format!("table {}", table.id);
    if let Some(title) = &table.title {
        out.push_str(&format!(" ({title})"));
    }
    out.push_str(&format!("\n#  | {}", header.join(" | ")));
    for (i, row) in table.rows.iter().enumerate() {
        out.push_str(&format!("\n{:<2} | {}", i + 1, row.join(" | ")));
    }
    out
}

#[async_trait]
impl ItemTask for TableVerificationTask {
    async fn run(&self, ctx: &RunContext, item: &Item, _context: &str) -> Result<FindingSet, TaskError> {
        let table: RawTable = match serde_json::from_value(item.payload.clone()) {
            Ok(table) => table,
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "item is not a table");
                return Ok(FindingSet::new(vec![Finding::new(
                    Severity::Warning,
                    format!("Table {} could not be read", item.id),
                    e.to_string(),
                )
                .with_subject(item.id.clone())]));
            }
        };

        let output: FormulasOutput = self.author.run(ctx, &table.id, render_grid(&table)).await?;
        let formulas: Vec<AnchorFormula> = output
            .formulas
            .into_iter()
            .map(|f| match f.author {
                Some(_) => f,
                None => f.with_author(self.author.name()),
            })
            .collect();

        let report = Verifier::new(ctx.config().tolerance).verify_table(&table, &formulas);
        info!(
            table = %table.id,
            formulas = formulas.len(),
            checks = report.checks.len(),
            discrepancies = report.exceeding().count(),
            rejected = report.rejected.len(),
            "table verified"
        );
        Ok(report.into_finding_set())
    }
}

/// Fan-out over the seeded tables
///
/// # Errors
/// Wiring errors (not expected for the built-in layout).
pub fn pipeline() -> Result<Pipeline, PipelineError> {
    let output = StateKey::new(NAME, "verify");
    PipelineBuilder::new(NAME)
        .seed(tables_key())
        .stage(FanOutStage::new(output.clone(), tables_key(), Arc::new(TableVerificationTask::new()?)))
        .terminal(output)
        .build()
}
