//! Vouch Core
//!
//! The root orchestrator:
//! - seeds extracted document text and tables into a run's state store
//! - gates the document, short-circuiting to `rejected`
//! - runs the numeric, logic, compliance and external-signal verticals
//!   concurrently
//! - collects a [`RunResult`] and hands it to an optional persistence
//!   collaborator
//!
//! # Example
//!
//! ```rust,ignore
//! use vouch_core::{DocumentSeed, Orchestrator, RunStatus};
//! use vouch_engine::EngineConfig;
//!
//! # async fn example(provider: std::sync::Arc<dyn vouch_engine::ReasoningProvider>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(provider, EngineConfig::default())?;
//! let result = orchestrator.run(&DocumentSeed::new(text, tables)).await?;
//!
//! if result.status == RunStatus::Complete {
//!     println!("{} findings", result.findings().count());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod result;
pub mod seed;
pub mod verticals;

pub use error::RunError;
pub use orchestrator::Orchestrator;
pub use persistence::{PersistenceError, RunPersistence};
pub use result::{RunResult, RunStatus, VerticalResult, VerticalStatus};
pub use seed::{tables_key, text_key, DocumentSeed};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
