//! Static stage composition
//!
//! A [`PipelineBuilder`] assembles stages into sequential and parallel
//! groups and checks the key wiring once, at build time:
//! - every input is a seed or an output of a stage that runs strictly before
//! - no stage reads a per-item key
//! - every key has one producer
//!
//! Siblings in a parallel group run concurrently and cannot see each other's
//! outputs. A built [`Pipeline`] only executes; it makes no further checks.

use crate::context::RunContext;
use crate::error::PipelineError;
use crate::progress::ProgressEvent;
use crate::stage::Stage;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vouch_state::StateKey;

/// Composition node
#[derive(Clone)]
pub enum Node {
    /// One stage
    Stage(Arc<dyn Stage>),
    /// Children in order
    Sequential(Vec<Node>),
    /// Children concurrently
    Parallel(Vec<Node>),
}

impl Node {
    /// Wrap a stage
    #[must_use]
    pub fn stage(stage: impl Stage + 'static) -> Self {
        Self::Stage(Arc::new(stage))
    }

    fn stage_count(&self) -> usize {
        match self {
            Self::Stage(_) => 1,
            Self::Sequential(children) | Self::Parallel(children) => children.iter().map(Self::stage_count).sum(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => write!(f, "Stage({})", stage.name()),
            Self::Sequential(children) => f.debug_tuple("Sequential").field(children).finish(),
            Self::Parallel(children) => f.debug_tuple("Parallel").field(children).finish(),
        }
    }
}

/// One completed stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    /// Stage name
    pub stage: String,
    /// Findings in its output
    pub findings_count: usize,
}

/// Result of a successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Pipeline name
    pub name: String,
    /// Completed stages, in completion order within each group
    pub stages: Vec<StageRecord>,
    /// Key holding the pipeline's result
    pub terminal: StateKey,
}

/// Builder for [`Pipeline`]
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    seeds: Vec<StateKey>,
    nodes: Vec<Node>,
    terminal: Option<StateKey>,
}

impl PipelineBuilder {
    /// Start a pipeline
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seeds: Vec::new(),
            nodes: Vec::new(),
            terminal: None,
        }
    }

    /// Declare a key present before the pipeline starts
    #[must_use]
    pub fn seed(mut self, key: StateKey) -> Self {
        self.seeds.push(key);
        self
    }

    /// Append a stage
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.nodes.push(Node::stage(stage));
        self
    }

    /// Append a parallel group
    #[must_use]
    pub fn parallel(mut self, children: Vec<Node>) -> Self {
        self.nodes.push(Node::Parallel(children));
        self
    }

    /// Append any node
    #[must_use]
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Key holding the result; defaults to the last stage's first output
    #[must_use]
    pub fn terminal(mut self, key: StateKey) -> Self {
        self.terminal = Some(key);
        self
    }

    /// Check the wiring
    ///
    /// # Errors
    /// The first wiring problem found, in declaration order.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let root = Node::Sequential(self.nodes);
        if root.stage_count() == 0 {
            return Err(PipelineError::Empty(self.name));
        }

        let mut wiring = Wiring {
            producers: self.seeds.iter().cloned().collect(),
            last_output: None,
        };
        let available: HashSet<StateKey> = self.seeds.iter().cloned().collect();
        wiring.check(&root, &available)?;

        let terminal = match self.terminal {
            Some(key) if wiring.producers.contains(&key) => key,
            Some(key) => return Err(PipelineError::UnknownTerminal(key.to_string())),
            None => wiring
                .last_output
                .ok_or_else(|| PipelineError::UnknownTerminal(format!("{} (no stage outputs)", self.name)))?,
        };

        debug!(pipeline = %self.name, stages = root.stage_count(), terminal = %terminal, "pipeline built");
        Ok(Pipeline {
            name: self.name,
            root,
            terminal,
        })
    }
}

struct Wiring {
    producers: HashSet<StateKey>,
    last_output: Option<StateKey>,
}

impl Wiring {
    /// Validate `node` against the keys available before it; return its outputs
    fn check(&mut self, node: &Node, available: &HashSet<StateKey>) -> Result<Vec<StateKey>, PipelineError> {
        match node {
            Node::Stage(stage) => {
                for key in stage.inputs() {
                    if key.is_dynamic() {
                        return Err(PipelineError::DynamicInput {
                            stage: stage.name().to_string(),
                            key: key.to_string(),
                        });
                    }
                    if !available.contains(&key) {
                        return Err(PipelineError::UnresolvedInput {
                            stage: stage.name().to_string(),
                            key: key.to_string(),
                        });
                    }
                }
                let outputs = stage.outputs();
                for key in &outputs {
                    if !self.producers.insert(key.clone()) {
                        return Err(PipelineError::DuplicateOutput { key: key.to_string() });
                    }
                }
                if let Some(first) = outputs.first() {
                    self.last_output = Some(first.clone());
                }
                Ok(outputs)
            }
            Node::Sequential(children) => {
                let mut visible = available.clone();
                let mut produced = Vec::new();
                for child in children {
                    let outputs = self.check(child, &visible)?;
                    visible.extend(outputs.iter().cloned());
                    produced.extend(outputs);
                }
                Ok(produced)
            }
            Node::Parallel(children) => {
                let mut produced = Vec::new();
                for child in children {
                    produced.extend(self.check(child, available)?);
                }
                Ok(produced)
            }
        }
    }
}

/// Validated composition, ready to run
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    root: Node,
    terminal: StateKey,
}

impl Pipeline {
    /// Pipeline name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key holding the result
    #[inline]
    #[must_use]
    pub fn terminal_key(&self) -> &StateKey {
        &self.terminal
    }

    /// Run every stage
    ///
    /// A sequential group stops at its first failure. A parallel group lets
    /// every sibling settle, then reports one failure, preferring a contract
    /// violation.
    ///
    /// # Errors
    /// `PipelineError::Stage` naming the failing stage.
    pub async fn run(&self, ctx: &RunContext) -> Result<PipelineReport, PipelineError> {
        info!(pipeline = %self.name, vertical = ctx.vertical(), "pipeline started");
        let stages = run_node(&self.root, ctx).await?;
        info!(pipeline = %self.name, stages = stages.len(), "pipeline completed");
        Ok(PipelineReport {
            name: self.name.clone(),
            stages,
            terminal: self.terminal.clone(),
        })
    }
}

fn run_node<'a>(node: &'a Node, ctx: &'a RunContext) -> BoxFuture<'a, Result<Vec<StageRecord>, PipelineError>> {
    async move {
        match node {
            Node::Stage(stage) => run_stage(stage.as_ref(), ctx).await.map(|record| vec![record]),
            Node::Sequential(children) => {
                let mut records = Vec::new();
                for child in children {
                    records.extend(run_node(child, ctx).await?);
                }
                Ok(records)
            }
            Node::Parallel(children) => {
                let settled = join_all(children.iter().map(|child| run_node(child, ctx))).await;
                let mut records = Vec::new();
                let mut failure: Option<PipelineError> = None;
                for result in settled {
                    match result {
                        Ok(r) => records.extend(r),
                        Err(e) => {
                            let replace = match &failure {
                                None => true,
                                Some(current) => e.is_contract_violation() && !current.is_contract_violation(),
                            };
                            if replace {
                                failure = Some(e);
                            }
                        }
                    }
                }
                match failure {
                    Some(e) => Err(e),
                    None => Ok(records),
                }
            }
        }
    }
    .boxed()
}

async fn run_stage(stage: &dyn Stage, ctx: &RunContext) -> Result<StageRecord, PipelineError> {
    let name = stage.name().to_string();
    ctx.progress().emit(ProgressEvent::StageStarted {
        vertical: ctx.vertical().to_string(),
        stage: name.clone(),
    });
    debug!(vertical = ctx.vertical(), stage = %name, "stage started");

    match stage.run(ctx).await {
        Ok(output) => {
            info!(vertical = ctx.vertical(), stage = %name, findings = output.findings_count, "stage completed");
            ctx.progress().emit(ProgressEvent::StageCompleted {
                vertical: ctx.vertical().to_string(),
                stage: name.clone(),
                findings_count: output.findings_count,
            });
            Ok(StageRecord {
                stage: name,
                findings_count: output.findings_count,
            })
        }
        Err(source) => {
            if source.is_contract_violation() {
                tracing::error!(vertical = ctx.vertical(), stage = %name, error = %source, "state contract violated");
            } else {
                warn!(vertical = ctx.vertical(), stage = %name, error = %source, "stage failed");
            }
            Err(PipelineError::Stage { stage: name, source })
        }
    }
}
