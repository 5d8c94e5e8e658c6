//! Request and response types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ProjectConfig;

fn default_agent() -> String {
    "unknown".to_string()
}

fn default_backlog_status() -> String {
    "todo".to_string()
}

fn default_planned() -> String {
    "planned".to_string()
}

fn default_action() -> String {
    "list".to_string()
}

fn default_story_id() -> String {
    "STORY-1".to_string()
}

// ============================================================
// Request Types
// ============================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct StatusRequest {
    #[schemars(description = "Project name to filter. If omitted, shows all projects")]
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ProjectsRequest {
    #[schemars(description = "Specific project name. If omitted, lists all")]
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddBacklogRequest {
    #[schemars(description = "Project name (must exist in config.yaml)")]
    pub project: String,
    #[schemars(description = "Unique identifier, kebab-case (e.g. 'cicd-sha-pinning')")]
    pub id: String,
    #[schemars(description = "Short description of the work")]
    pub summary: String,
    #[schemars(description = "Category (e.g. 'security', 'devops', 'infrastructure')")]
    pub theme: String,
    #[schemars(description = "Initial status: todo, in_progress or done. Defaults to todo")]
    #[serde(default = "default_backlog_status")]
    pub status: String,
    #[schemars(description = "Sprint IDs this item relates to")]
    #[serde(default)]
    pub related_sprints: Vec<String>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateBacklogRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Backlog item ID to update")]
    pub id: String,
    #[schemars(description = "New status: todo, in_progress or done")]
    #[serde(default)]
    pub status: Option<String>,
    #[schemars(description = "New summary text")]
    #[serde(default)]
    pub summary: Option<String>,
    #[schemars(description = "New theme")]
    #[serde(default)]
    pub theme: Option<String>,
    #[schemars(description = "New related sprints list (replaces the existing one)")]
    #[serde(default)]
    pub related_sprints: Option<Vec<String>>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemoveBacklogRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Backlog item ID to remove")]
    pub id: String,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSprintRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Sprint identifier, kebab-case")]
    pub id: String,
    #[schemars(description = "Human-readable sprint title")]
    pub title: String,
    #[schemars(description = "What the sprint aims to achieve")]
    #[serde(default)]
    pub goal: String,
    #[schemars(description = "Cross-cutting themes this sprint relates to")]
    #[serde(default)]
    pub themes: Vec<String>,
    #[schemars(description = "Initial status: planned, active, reference or completed")]
    #[serde(default = "default_planned")]
    pub status: String,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateSprintRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Sprint ID to update")]
    pub id: String,
    #[schemars(description = "New status: planned, active, reference or completed")]
    #[serde(default)]
    pub status: Option<String>,
    #[schemars(description = "New title")]
    #[serde(default)]
    pub title: Option<String>,
    #[schemars(description = "New goal")]
    #[serde(default)]
    pub goal: Option<String>,
    #[schemars(description = "New themes list (replaces the existing one)")]
    #[serde(default)]
    pub themes: Option<Vec<String>>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddStoryRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Sprint to add the story to")]
    pub sprint_id: String,
    #[schemars(description = "Story identifier, uppercase (e.g. 'STORY-1')")]
    pub story_id: String,
    #[schemars(description = "Initial status: planned, in_progress or done")]
    #[serde(default = "default_planned")]
    pub status: String,
    #[schemars(description = "Optional notes about scope or context")]
    #[serde(default)]
    pub notes: String,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateStoryRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Sprint containing the story")]
    pub sprint_id: String,
    #[schemars(description = "Story ID to update")]
    pub story_id: String,
    #[schemars(description = "New status: planned, in_progress or done")]
    #[serde(default)]
    pub status: Option<String>,
    #[schemars(description = "Replacement notes")]
    #[serde(default)]
    pub notes: Option<String>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DoneRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "Story to mark as done")]
    pub story_id: String,
    #[schemars(description = "Completion notes")]
    #[serde(default)]
    pub notes: String,
    #[schemars(description = "Sprint containing the story. Searched in index order when omitted")]
    #[serde(default)]
    pub sprint_id: Option<String>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HistoryRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(description = "'list' to view, 'add' to append a new entry")]
    #[serde(default = "default_action")]
    pub action: String,
    #[schemars(description = "Summary text (required when action='add')")]
    #[serde(default)]
    pub summary: Option<String>,
    #[schemars(description = "Sprint IDs related to the entry")]
    #[serde(default)]
    pub related_sprints: Option<Vec<String>>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SyncRequest {
    #[schemars(description = "Specific project to sync. If omitted, syncs all")]
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GuidanceRequest {
    #[schemars(description = "Project name")]
    pub project: String,
    #[schemars(
        description = "Optional filter: general, golang, typescript, ai-collaboration, or a project-specific guidance name"
    )]
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegisterProjectRequest {
    #[schemars(description = "Project identifier, kebab-case (e.g. 'my-new-project')")]
    pub name: String,
    #[schemars(description = "Path to the source repository (e.g. '~/dev/my-project')")]
    pub repo: String,
    #[schemars(description = "Short project description")]
    #[serde(default)]
    pub description: String,
    #[schemars(
        description = "Languages used (e.g. ['golang', 'typescript']). Auto-detected from the repo when omitted"
    )]
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UnregisterProjectRequest {
    #[schemars(description = "Project name to unregister")]
    pub name: String,
    #[schemars(description = "Also delete the project data directory and vault notes. Default: false")]
    #[serde(default)]
    pub delete_data: bool,
    #[schemars(description = "Your agent name, for attribution")]
    #[serde(default = "default_agent")]
    pub agent: String,
}

// ============================================================
// Prompt Arguments
// ============================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct WorkStatusArgs {
    #[schemars(description = "Project name. If omitted, all projects")]
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct WorkSyncArgs {
    #[schemars(description = "Project name. If omitted, all projects")]
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkFocusArgs {
    #[schemars(description = "Story ID to focus on. Default: STORY-1")]
    #[serde(default = "default_story_id")]
    pub story_id: String,
    #[schemars(description = "Project containing the story, if known")]
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkDoneArgs {
    #[schemars(description = "Story ID to mark done. Default: STORY-1")]
    #[serde(default = "default_story_id")]
    pub story_id: String,
    #[schemars(description = "Completion notes")]
    #[serde(default)]
    pub notes: String,
    #[schemars(description = "Project containing the story, if known")]
    #[serde(default)]
    pub project: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct AddProjectArgs {
    #[schemars(description = "Project name (kebab-case)")]
    #[serde(default)]
    pub name: String,
    #[schemars(description = "Path to the project repository")]
    #[serde(default)]
    pub repo: String,
}

// ============================================================
// Response Types
// ============================================================

/// One registry entry, flattened under its name.
#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    pub project: String,
    #[serde(flatten)]
    pub config: ProjectConfig,
}
