//! Namespaced state keys

use serde::{Deserialize, Serialize};
use std::fmt;

const OUTPUT_SUFFIX: &str = "_output";

/// Key into the state store
///
/// Static stages write `{pipeline}_{stage}_output`. Fan-out workers write
/// `{pipeline}_{stage}_output:{item_id}`, which an aggregator later collapses
/// into the un-suffixed aggregate key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pipeline: String,
    stage: String,
    item: Option<String>,
}

impl StateKey {
    /// Create a static (aggregate) key
    #[inline]
    #[must_use]
    pub fn new(pipeline: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            stage: stage.into(),
            item: None,
        }
    }

    /// Per-item variant of this key
    #[inline]
    #[must_use]
    pub fn for_item(&self, item_id: impl Into<String>) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            stage: self.stage.clone(),
            item: Some(item_id.into()),
        }
    }

    /// Aggregate (un-suffixed) variant of this key
    #[inline]
    #[must_use]
    pub fn aggregate(&self) -> Self {
        Self::new(self.pipeline.clone(), self.stage.clone())
    }

    /// Pipeline namespace
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Stage name
    #[inline]
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Item id for per-item keys
    #[inline]
    #[must_use]
    pub fn item(&self) -> Option<&str> {
        self.item.as_deref()
    }

    /// Whether this is a per-item key
    #[inline]
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.item.is_some()
    }

    /// Prefix shared by every per-item variant of this key
    #[must_use]
    pub fn item_prefix(&self) -> String {
        format!("{}_{}{}:", self.pipeline, self.stage, OUTPUT_SUFFIX)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}{}", self.pipeline, self.stage, OUTPUT_SUFFIX)?;
        if let Some(item) = &self.item {
            write!(f, ":{item}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_key_rendering() {
        let key = StateKey::new("numeric", "verify");
        assert_eq!(key.to_string(), "numeric_verify_output");
        assert!(!key.is_dynamic());
    }

    #[test]
    fn item_key_rendering() {
        let key = StateKey::new("compliance", "standards").for_item("ias-16");
        assert_eq!(key.to_string(), "compliance_standards_output:ias-16");
        assert_eq!(key.item(), Some("ias-16"));
        assert!(key.to_string().starts_with(&key.item_prefix()));
    }

    #[test]
    fn aggregate_strips_item() {
        let key = StateKey::new("numeric", "tables").for_item("t1");
        assert_eq!(key.aggregate(), StateKey::new("numeric", "tables"));
    }
}
