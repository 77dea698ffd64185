//! Document seed: what extraction hands to a run

use serde::{Deserialize, Serialize};
use vouch_state::{RawTable, StateError, StateKey, StateStore, StateValue};

/// Namespace of the seeded keys
pub const DOCUMENT: &str = "document";

/// Key holding the extracted text
#[must_use]
pub fn text_key() -> StateKey {
    StateKey::new(DOCUMENT, "text")
}

/// Key holding the extracted tables
#[must_use]
pub fn tables_key() -> StateKey {
    StateKey::new(DOCUMENT, "tables")
}

/// Extracted document content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSeed {
    /// Plain text of the document
    pub text: String,
    /// Extracted tables
    #[serde(default)]
    pub tables: Vec<RawTable>,
}

impl DocumentSeed {
    /// Create a seed
    #[must_use]
    pub fn new(text: impl Into<String>, tables: Vec<RawTable>) -> Self {
        Self {
            text: text.into(),
            tables,
        }
    }

    /// Write text and tables into a fresh store
    ///
    /// # Errors
    /// A state error if either key already holds something else.
    pub fn seed_into(&self, store: &StateStore) -> Result<(), StateError> {
        store.set(&text_key(), StateValue::Text(self.text.clone()))?;
        store.set(&tables_key(), StateValue::Tables(self.tables.clone()))
    }
}
