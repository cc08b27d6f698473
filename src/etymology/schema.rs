//! The structured etymology payload and its schema.
//!
//! [`EtymologyResult`] is what the model must produce, what the cache stores
//! and what a `HIT` response returns. Everything except `phonetic` is
//! required; an object that fails [`EtymologyResult::from_json_str`] is never
//! cached or delivered as complete.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EtymologyError, Result};

/// One step in the chronological evolution of a word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// e.g. "14th Century", "Old French".
    pub period: String,
    /// What happened to the word in this period.
    pub description: String,
}

/// A snapshot of the word as used in the requested era.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCapsule {
    pub era: String,
    pub usage_example: String,
    pub context_explanation: String,
}

/// A complete, validated etymology explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtymologyResult {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phonetic: Option<String>,
    pub origin_language: String,
    pub meaning: String,
    pub history: Vec<HistoryEntry>,
    pub fun_fact: String,
    pub related_words: Vec<String>,
    pub time_capsule: TimeCapsule,
}

impl EtymologyResult {
    /// Parse and validate model output.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let result: Self = serde_json::from_str(text)
            .map_err(|e| EtymologyError::Validation(format!("non-conforming output: {}", e)))?;
        result.validate()?;
        Ok(result)
    }

    /// Validate an already-decoded JSON value (e.g. a cached row).
    pub fn from_value(value: Value) -> Result<Self> {
        let result: Self = serde_json::from_value(value)
            .map_err(|e| EtymologyError::Validation(format!("non-conforming object: {}", e)))?;
        result.validate()?;
        Ok(result)
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.word.trim().is_empty() {
            return Err(EtymologyError::Validation("`word` must not be empty".into()));
        }
        Ok(())
    }
}

/// Gemini `responseSchema` (OpenAPI subset) describing [`EtymologyResult`].
///
/// `propertyOrdering` keeps streamed output in field order so the client can
/// render `word` and `meaning` before the longer sections arrive.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "word": { "type": "STRING" },
            "phonetic": { "type": "STRING" },
            "originLanguage": {
                "type": "STRING",
                "description": "The primary language of origin (e.g. Latin, Old English)"
            },
            "meaning": {
                "type": "STRING",
                "description": "The current meaning of the word"
            },
            "history": {
                "type": "ARRAY",
                "description": "Chronological evolution of the word",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "period": {
                            "type": "STRING",
                            "description": "e.g. \"14th Century\", \"Old French\""
                        },
                        "description": {
                            "type": "STRING",
                            "description": "What happened to the word in this period"
                        }
                    },
                    "required": ["period", "description"],
                    "propertyOrdering": ["period", "description"]
                }
            },
            "funFact": {
                "type": "STRING",
                "description": "A surprising or amusing fact about the word"
            },
            "relatedWords": {
                "type": "ARRAY",
                "description": "Cognates or words with shared roots",
                "items": { "type": "STRING" }
            },
            "timeCapsule": {
                "type": "OBJECT",
                "description": "A snapshot of the word in a specific time period",
                "properties": {
                    "era": {
                        "type": "STRING",
                        "description": "The historical era selected by the user (or best fit)"
                    },
                    "usageExample": {
                        "type": "STRING",
                        "description": "A sentence demonstrating how the word was used in that era. STRICTLY use the historical meaning."
                    },
                    "contextExplanation": {
                        "type": "STRING",
                        "description": "Explanation of why the usage is different from today (e.g., \"In the 1890s, gay meant carefree...\")"
                    }
                },
                "required": ["era", "usageExample", "contextExplanation"],
                "propertyOrdering": ["era", "usageExample", "contextExplanation"]
            }
        },
        "required": [
            "word", "originLanguage", "meaning", "history",
            "funFact", "relatedWords", "timeCapsule"
        ],
        "propertyOrdering": [
            "word", "phonetic", "originLanguage", "meaning", "history",
            "funFact", "relatedWords", "timeCapsule"
        ]
    })
}
