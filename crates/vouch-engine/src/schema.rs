//! Standard output schemas and their typed payloads

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use vouch_state::{Finding, Item};

/// `{ "findings": [Finding] }`
#[must_use]
pub fn findings_schema() -> Value {
    json!({
        "type": "object",
        "required": ["findings"],
        "properties": {
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["severity", "summary", "detail"],
                    "properties": {
                        "severity": { "enum": ["critical", "warning", "pass"] },
                        "summary": { "type": "string", "minLength": 1 },
                        "detail": { "type": "string" },
                        "subject": { "type": "string" },
                        "source_reference": { "type": "string" },
                        "reasoning": { "type": "string" }
                    }
                }
            }
        }
    })
}

/// `{ "items": [{ "id": string, ... }] }`
#[must_use]
pub fn items_schema() -> Value {
    json!({
        "type": "object",
        "required": ["items"],
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id"],
                    "properties": { "id": { "type": "string", "minLength": 1 } }
                }
            }
        }
    })
}

/// `{ "relevant": bool, "confidence": 0..=1, "reason"?: string }`
#[must_use]
pub fn classifier_schema() -> Value {
    json!({
        "type": "object",
        "required": ["relevant", "confidence"],
        "properties": {
            "relevant": { "type": "boolean" },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "reason": { "type": "string" }
        }
    })
}

/// Payload of [`findings_schema`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsOutput {
    /// Findings
    pub findings: Vec<Finding>,
}

/// Payload of [`items_schema`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsOutput {
    /// Discovered items; each object becomes an item payload
    pub items: Vec<Map<String, Value>>,
}

impl ItemsOutput {
    /// Convert to items, keyed by their `id` field
    #[must_use]
    pub fn into_items(self) -> Vec<Item> {
        self.items
            .into_iter()
            .filter_map(|object| {
                let id = object.get("id")?.as_str()?.to_string();
                Some(Item::new(id, Value::Object(object)))
            })
            .collect()
    }
}

/// Payload of [`classifier_schema`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Document is in scope
    pub relevant: bool,
    /// Confidence in `relevant`
    pub confidence: f64,
    /// Short justification
    #[serde(default)]
    pub reason: Option<String>,
}
