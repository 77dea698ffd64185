//! Progress events
//!
//! Emission is best-effort: a sink that drops events, or a receiver that went
//! away, never changes the outcome of a run.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Lifecycle event, in completion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Stage began
    StageStarted {
        /// Vertical (pipeline) name
        vertical: String,
        /// Stage name
        stage: String,
    },
    /// Stage wrote its output
    StageCompleted {
        /// Vertical name
        vertical: String,
        /// Stage name
        stage: String,
        /// Findings in the stage output
        findings_count: usize,
    },
    /// Vertical ended in error
    VerticalError {
        /// Vertical name
        vertical: String,
        /// Rendered error
        message: String,
    },
    /// Run reached a terminal state
    RunComplete {
        /// Run identifier
        run_id: String,
        /// `rejected`, `complete` or `failed`
        status: String,
    },
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    /// Deliver one event; must not block
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink forwarding to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("progress receiver dropped");
        }
    }
}
