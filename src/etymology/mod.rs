//! Etymology domain types: request, result schema and prompt.

pub mod prompt;
pub mod schema;

use serde::{Deserialize, Serialize};

pub use prompt::{build_prompt, effective_era, DEFAULT_ERA};
pub use schema::{response_schema, EtymologyResult, HistoryEntry, TimeCapsule};

/// Era buttons offered by the client, in display order.
pub const ERA_PRESETS: [&str; 5] = [
    "Ancient Roots",
    "Medieval",
    "Victorian Era",
    "1920s Jazz Age",
    "Modern Day",
];

/// Era preselected by the client.
pub const CLIENT_DEFAULT_ERA: &str = "Victorian Era";

/// Body of `POST /etymology`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtymologyRequest {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub era: String,
}

impl EtymologyRequest {
    pub fn new(word: impl Into<String>, era: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            era: era.into(),
        }
    }
}
