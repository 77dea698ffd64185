//! Error types for the state store

/// State store errors
///
/// Every variant except [`StateError::Missing`] and
/// [`StateError::KindMismatch`] is a contract violation: it indicates an
/// engine bug, never bad user data, and aborts the whole run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Key written twice with different values
    #[error("state contract violation: {key} already holds a different value")]
    ConflictingWrite {
        /// Rendered key
        key: String,
    },

    /// Key claimed by more than one writer
    #[error("state contract violation: {key} claimed twice")]
    DoubleClaim {
        /// Rendered key
        key: String,
    },

    /// Unclaimed write to a key another writer owns
    #[error("state contract violation: {key} is owned by a write handle")]
    OwnedKey {
        /// Rendered key
        key: String,
    },

    /// Stage depends on a per-item key instead of its aggregate
    #[error("state contract violation: {key} is a per-item key and cannot be read directly")]
    DynamicRead {
        /// Rendered key
        key: String,
    },

    /// Key not present
    #[error("state key not present: {key}")]
    Missing {
        /// Rendered key
        key: String,
    },

    /// Key present but holds another value kind
    #[error("state key {key} holds {found}, expected {expected}")]
    KindMismatch {
        /// Rendered key
        key: String,
        /// Expected value kind
        expected: &'static str,
        /// Actual value kind
        found: &'static str,
    },
}

impl StateError {
    /// Check if this error is a contract violation (fatal for the run)
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, Self::Missing { .. } | Self::KindMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violation_classification() {
        let conflict = StateError::ConflictingWrite { key: "a_b_output".into() };
        let missing = StateError::Missing { key: "a_b_output".into() };

        assert!(conflict.is_contract_violation());
        assert!(!missing.is_contract_violation());
        assert!(conflict.to_string().contains("contract violation"));
    }
}
