use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use super::{BacklogItem, HistoryEntry, Sprint, Story};

/// Contents of `work-index.yaml`: the project's identity and the ordered
/// list of its sprints. Each sprint lives in its own file so a write to one
/// sprint never rewrites the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkIndex {
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub sprints: Vec<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl WorkIndex {
    pub fn new(project: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            description: description.into(),
            sprints: Vec::new(),
            extra: Mapping::new(),
        }
    }

    pub fn has_sprint(&self, id: &str) -> bool {
        self.sprints.iter().any(|s| s == id)
    }
}

/// Everything stored for one project, loaded in index order.
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    pub index: WorkIndex,
    pub sprints: Vec<Sprint>,
    pub backlog: Vec<BacklogItem>,
    pub history: Vec<HistoryEntry>,
}

/// Registration input for a new project.
#[derive(Debug, Clone)]
pub struct RegisterProjectInput {
    /// Kebab-case project identifier.
    pub name: String,
    /// Path to the source repository; `~` is expanded.
    pub repo: String,
    pub description: String,
    /// Languages used by the repo. Detected from marker files when `None`.
    pub languages: Option<Vec<String>>,
}

// ============================================================
// Operation results
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub sprints: Vec<Sprint>,
    pub in_progress_stories: Vec<SprintStory>,
    pub in_progress_backlog: Vec<BacklogItem>,
    pub stats: BacklogStats,
}

/// A story together with the id of the sprint that holds it.
#[derive(Debug, Clone, Serialize)]
pub struct SprintStory {
    #[serde(flatten)]
    pub story: Story,
    pub sprint: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BacklogStats {
    pub total_backlog: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
}

/// Status for one project, or the reason it could not be loaded.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProjectStatusEntry {
    Loaded(ProjectStatus),
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryCompletion {
    pub updated_story: Story,
    pub sprint: String,
    pub history_entry: HistoryEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub registered: String,
    pub repo: String,
    pub description: String,
    pub languages_detected: Vec<String>,
    pub guidance_inherit: Vec<String>,
    pub created_dirs: Vec<String>,
    pub work_index: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Unregistration {
    pub unregistered: String,
    pub config_removed: Option<serde_yaml::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_deleted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_deleted: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub project: String,
    pub synced: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<SyncFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub project: String,
    pub error: String,
}
