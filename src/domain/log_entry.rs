use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic record of one remote classification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationLogEntry {
    pub ts: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub title: String,
    pub url: String,
    pub host: String,
    pub labels: Vec<String>,
    pub allow_new_labels: bool,
    pub custom_prompt: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
