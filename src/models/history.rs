use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

/// Contents of `history.yaml`: an append-only project log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct History {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(flatten)]
    pub extra: Mapping,
}

/// One line of project history, like a `git log` entry for the project
/// rather than for any single item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_sprints: Vec<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl HistoryEntry {
    /// An entry dated today.
    pub fn today(summary: impl Into<String>, related_sprints: Vec<String>) -> Self {
        Self {
            date: today(),
            summary: summary.into(),
            related_sprints,
            extra: Mapping::new(),
        }
    }
}

/// Current UTC date as `YYYY-MM-DD`.
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
