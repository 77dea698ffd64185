//! Write-once state store
//!
//! One store lives for one run. Stages write disjoint keys; writing a key
//! twice with a different value is a contract violation, never a race to
//! recover from. Writers are expected to hold a [`WriteHandle`], which makes
//! the single-writer rule part of the type: a handle is not `Clone` and is
//! consumed by its write.

use crate::error::StateError;
use crate::key::StateKey;
use crate::value::StateValue;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    entries: DashMap<String, (StateKey, StateValue)>,
    claims: DashSet<String>,
}

/// Shared, namespaced key-value store for one run
///
/// Cloning is cheap and yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl StateStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim exclusive write access to `key`
    ///
    /// # Errors
    /// `StateError::DoubleClaim` if the key was already claimed or written.
    pub fn claim(&self, key: &StateKey) -> Result<WriteHandle, StateError> {
        let rendered = key.to_string();
        if self.inner.entries.contains_key(&rendered) || !self.inner.claims.insert(rendered.clone()) {
            tracing::error!(key = %rendered, "double claim on state key");
            return Err(StateError::DoubleClaim { key: rendered });
        }

        Ok(WriteHandle {
            key: key.clone(),
            store: self.clone(),
        })
    }

    /// Write `value` under an unclaimed key
    ///
    /// Used for seeding. Rewriting the identical value is accepted so that
    /// an idempotent retry cannot trip the contract.
    ///
    /// # Errors
    /// - `StateError::OwnedKey` if a [`WriteHandle`] owns the key
    /// - `StateError::ConflictingWrite` if the key holds a different value
    pub fn set(&self, key: &StateKey, value: StateValue) -> Result<(), StateError> {
        let rendered = key.to_string();
        if self.inner.claims.contains(&rendered) {
            tracing::error!(key = %rendered, "unclaimed write to owned key");
            return Err(StateError::OwnedKey { key: rendered });
        }
        self.insert_once(key, rendered, value)
    }

    fn insert_once(&self, key: &StateKey, rendered: String, value: StateValue) -> Result<(), StateError> {
        match self.inner.entries.entry(rendered) {
            Entry::Occupied(existing) => {
                if existing.get().1 == value {
                    Ok(())
                } else {
                    tracing::error!(key = %existing.key(), "conflicting write to state key");
                    Err(StateError::ConflictingWrite {
                        key: existing.key().clone(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                tracing::trace!(key = %slot.key(), kind = value.kind(), "state write");
                slot.insert((key.clone(), value));
                Ok(())
            }
        }
    }

    /// Read a value
    #[must_use]
    pub fn get(&self, key: &StateKey) -> Option<StateValue> {
        self.inner
            .entries
            .get(&key.to_string())
            .map(|entry| entry.value().1.clone())
    }

    /// Read a value a stage depends on
    ///
    /// # Errors
    /// - `StateError::DynamicRead` for per-item keys (stages only depend on aggregates)
    /// - `StateError::Missing` if absent
    pub fn require(&self, key: &StateKey) -> Result<StateValue, StateError> {
        if key.is_dynamic() {
            return Err(StateError::DynamicRead {
                key: key.to_string(),
            });
        }
        self.get(key).ok_or_else(|| StateError::Missing {
            key: key.to_string(),
        })
    }

    /// Whether a value exists
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &StateKey) -> bool {
        self.inner.entries.contains_key(&key.to_string())
    }

    /// All per-item entries in the namespace of `key`, sorted by rendered key
    #[must_use]
    pub fn list_prefix(&self, key: &StateKey) -> Vec<(StateKey, StateValue)> {
        let prefix = key.item_prefix();
        let mut found: Vec<(String, StateKey, StateValue)> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| (entry.key().clone(), entry.value().0.clone(), entry.value().1.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Ordered copy of every entry, for wholesale persistence
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, StateValue> {
        self.inner
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().1.clone()))
            .collect()
    }
}

/// Exclusive right to write one key
///
/// Obtained from [`StateStore::claim`]; consumed by [`WriteHandle::write`].
#[derive(Debug)]
pub struct WriteHandle {
    key: StateKey,
    store: StateStore,
}

impl WriteHandle {
    /// Key this handle writes
    #[inline]
    #[must_use]
    pub fn key(&self) -> &StateKey {
        &self.key
    }

    /// Write the value, consuming the handle
    ///
    /// # Errors
    /// `StateError::ConflictingWrite` if a different value is already present.
    pub fn write(self, value: StateValue) -> Result<(), StateError> {
        let rendered = self.key.to_string();
        self.store.insert_once(&self.key, rendered, value)
    }
}
