//! Vouch State
//!
//! The data plane shared by every stage of a run:
//! - [`StateKey`]: namespaced keys (`{pipeline}_{stage}_output[:{item_id}]`)
//! - [`StateStore`]: write-once, concurrently writable key-value store
//! - [`WriteHandle`]: type-level single-writer claim on one key
//! - [`Finding`] / [`Discrepancy`]: immutable analysis records
//! - [`DedupRule`]: pluggable equality used when aggregators merge findings
//!
//! # Example
//!
//! ```rust,ignore
//! use vouch_state::{StateKey, StateStore, StateValue};
//!
//! let store = StateStore::new();
//! let key = StateKey::new("numeric", "verify");
//!
//! let handle = store.claim(&key)?;
//! handle.write(StateValue::Text("done".into()))?;
//!
//! assert!(store.contains(&key));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod finding;
mod key;
mod store;
mod value;

pub use error::StateError;
pub use finding::{
    merge_findings, normalize_text, DedupRule, Discrepancy, Finding, Severity,
    SubjectConclusionRule,
};
pub use key::StateKey;
pub use store::{StateStore, WriteHandle};
pub use value::{AggregateFindings, FailureRecord, FindingSet, Item, RawTable, StateValue};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
