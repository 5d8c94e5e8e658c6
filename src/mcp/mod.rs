//! MCP server exposing work-tracking tools to agents.

mod types;

use std::str::FromStr;

pub use types::*;

use rmcp::{
    handler::server::{router::prompt::PromptRouter, tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, GetPromptRequestParam, GetPromptResult, ListPromptsResult,
        PaginatedRequestParam, PromptMessage, PromptMessageRole, ServerInfo,
    },
    service::RequestContext,
    RoleServer,
    prompt, prompt_handler, prompt_router, tool, tool_handler, tool_router, ErrorData as McpError,
    ServerHandler, ServiceExt,
};
use serde::Serialize;
use serde_json::json;

use crate::error::Error;
use crate::models::*;
use crate::tracker::WorkTracker;

pub const INSTRUCTIONS: &str = r#"WorkSync is a shared work tracking system for multi-agent coordination with Obsidian vault sync.

## Data Model

Each project directory holds one YAML file per concept:

- **work-index.yaml**: project name, description and the ordered list of sprint ids
- **sprints/<id>.yaml**: a work iteration. Fields: id, title, file, status, goal, themes[], stories[]
- **backlog.yaml**: unscheduled work items. Fields: id, theme, summary, status, related_sprints[]
- **history.yaml**: append-only log. Fields: date, summary, related_sprints[]

## Statuses

| Entity  | Valid Statuses                        |
|---------|---------------------------------------|
| Sprint  | planned, active, reference, completed |
| Story   | planned, in_progress, done            |
| Backlog | todo, in_progress, done               |

## Conventions

- IDs are kebab-case (e.g. `cicd-sha-pinning`, `feature-sprint-1`)
- Story IDs are uppercase (e.g. `STORY-1`, `STORY-2`)
- Always pass your agent name in the `agent` parameter for attribution
- All mutations are atomic (validated YAML, atomic rename) with debounced vault sync

## Guardrails

- **All writes go through these tools.** Never write the YAML files directly.
- **Reads are allowed directly** via rg/grep on the projects directory for fast search.
- The server is single-writer per project. Concurrent tool calls on one project are serialized.
- Files edited by hand are detected by modification time. A mutation of a file changed
  behind the server's back is refused with a concurrent_modification error; call
  `worksync_status` or `worksync_history` to refresh, then retry.

## Typical Session Workflow

1. **Start**: Call `worksync_status()` to see active sprints and in-progress work
2. **Focus**: Read sprint/story context from the status response
3. **Work**: Update story status with `worksync_update_story()` as you progress
4. **Complete**: Call `worksync_done()` to mark stories done (auto-appends history)
5. **Sync**: The vault syncs after mutations. Call `worksync_sync()` to force.

## Guidance

Call `worksync_guidance(project)` to get coding guidance for a project. Guidance is
layered: foundational patterns (general, golang, typescript, ai-collaboration) merged
with project-specific docs from the repo."#;

#[derive(Clone)]
pub struct WorkSyncServer {
    tracker: WorkTracker,
    tool_router: ToolRouter<Self>,
    prompt_router: PromptRouter<Self>,
}

impl WorkSyncServer {
    pub fn new(tracker: WorkTracker) -> Self {
        Self {
            tracker,
            tool_router: Self::tool_router(),
            prompt_router: Self::prompt_router(),
        }
    }

    pub fn tracker(&self) -> &WorkTracker {
        &self.tracker
    }
}

/// Map an engine error onto an MCP error. Problems with the request keep
/// their message verbatim so agents can act on it.
pub fn to_mcp_error(error: Error) -> McpError {
    let data = Some(json!({ "kind": error.kind() }));
    if error.is_caller_error() {
        McpError::invalid_params(error.to_string(), data)
    } else {
        tracing::error!(error = %error, "Tool failed");
        McpError::internal_error(error.to_string(), data)
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn parse<T: FromStr<Err = Error>>(value: &str) -> Result<T, McpError> {
    T::from_str(value).map_err(to_mcp_error)
}

fn parse_opt<T: FromStr<Err = Error>>(value: Option<&str>) -> Result<Option<T>, McpError> {
    value.map(parse).transpose()
}

#[tool_router]
impl WorkSyncServer {
    #[tool(
        description = "Show active sprints and in-progress work. Returns per project: active sprints, in-progress stories (with their sprint id), in-progress backlog items and backlog stats. Reading acknowledges files edited by hand."
    )]
    pub async fn worksync_status(
        &self,
        params: Parameters<StatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let projects = self
            .tracker
            .status(req.project.as_deref())
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "projects": projects }))
    }

    #[tool(
        description = "List all registered projects or get details for one. Returns repo paths, descriptions and guidance config."
    )]
    pub async fn worksync_projects(
        &self,
        params: Parameters<ProjectsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        match req.project {
            Some(project) => {
                let config = self.tracker.project(&project).map_err(to_mcp_error)?;
                json_result(&ProjectDetail { project, config })
            }
            None => {
                let projects = self.tracker.projects().map_err(to_mcp_error)?;
                json_result(&json!({ "projects": projects }))
            }
        }
    }

    #[tool(
        description = "Add a new item to the project backlog. Rejects duplicate IDs and invalid statuses. Returns the created item."
    )]
    pub async fn worksync_add_backlog(
        &self,
        params: Parameters<AddBacklogRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let input = NewBacklogItem {
            id: req.id,
            summary: req.summary,
            theme: req.theme,
            status: parse(&req.status)?,
            related_sprints: req.related_sprints,
        };
        let item = self
            .tracker
            .add_backlog(&req.project, input, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "created": item }))
    }

    #[tool(
        description = "Update a backlog item. Only provided fields are changed; related_sprints replaces the whole list. Returns the updated item."
    )]
    pub async fn worksync_update_backlog(
        &self,
        params: Parameters<UpdateBacklogRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let update = BacklogUpdate {
            status: parse_opt(req.status.as_deref())?,
            summary: req.summary,
            theme: req.theme,
            related_sprints: req.related_sprints,
        };
        let item = self
            .tracker
            .update_backlog(&req.project, &req.id, update, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "updated": item }))
    }

    #[tool(description = "Remove a backlog item by ID. Returns the removed item for confirmation.")]
    pub async fn worksync_remove_backlog(
        &self,
        params: Parameters<RemoveBacklogRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let item = self
            .tracker
            .remove_backlog(&req.project, &req.id, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "removed": item }))
    }

    #[tool(
        description = "Create a new sprint. Its file name is the uppercased id plus '.md'; the id is appended to the work index. Returns the created sprint."
    )]
    pub async fn worksync_create_sprint(
        &self,
        params: Parameters<CreateSprintRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let input = NewSprint {
            id: req.id,
            title: req.title,
            goal: req.goal,
            themes: req.themes,
            status: parse(&req.status)?,
        };
        let sprint = self
            .tracker
            .create_sprint(&req.project, input, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "created": sprint }))
    }

    #[tool(
        description = "Update a sprint. Only provided fields are changed; themes replaces the whole list. Returns the updated sprint."
    )]
    pub async fn worksync_update_sprint(
        &self,
        params: Parameters<UpdateSprintRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let update = SprintUpdate {
            status: parse_opt(req.status.as_deref())?,
            title: req.title,
            goal: req.goal,
            themes: req.themes,
        };
        let sprint = self
            .tracker
            .update_sprint(&req.project, &req.id, update, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "updated": sprint }))
    }

    #[tool(description = "Add a story to a sprint. Rejects a story ID already in that sprint.")]
    pub async fn worksync_add_story(
        &self,
        params: Parameters<AddStoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let input = NewStory {
            id: req.story_id,
            status: parse(&req.status)?,
            notes: req.notes,
        };
        let story = self
            .tracker
            .add_story(&req.project, &req.sprint_id, input, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "created": story, "sprint": req.sprint_id }))
    }

    #[tool(description = "Update a story's status or notes within a sprint.")]
    pub async fn worksync_update_story(
        &self,
        params: Parameters<UpdateStoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let update = StoryUpdate {
            status: parse_opt(req.status.as_deref())?,
            notes: req.notes,
        };
        let story = self
            .tracker
            .update_story(&req.project, &req.sprint_id, &req.story_id, update, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&json!({ "updated": story, "sprint": req.sprint_id }))
    }

    #[tool(
        description = "Mark a story as done, set completion notes, and append a history entry. Searches all sprints when sprint_id is omitted. Returns the updated story, its sprint and the new history entry."
    )]
    pub async fn worksync_done(
        &self,
        params: Parameters<DoneRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let completion = self
            .tracker
            .done(
                &req.project,
                &req.story_id,
                &req.notes,
                req.sprint_id.as_deref(),
                &req.agent,
            )
            .await
            .map_err(to_mcp_error)?;
        json_result(&completion)
    }

    #[tool(
        description = "View or append project history. action='list' returns all entries; action='add' appends one dated today (requires summary)."
    )]
    pub async fn worksync_history(
        &self,
        params: Parameters<HistoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        match req.action.as_str() {
            "list" => {
                let history = self
                    .tracker
                    .history(&req.project)
                    .await
                    .map_err(to_mcp_error)?;
                json_result(&json!({ "history": history }))
            }
            "add" => {
                let entry = self
                    .tracker
                    .add_history(
                        &req.project,
                        req.summary.as_deref().unwrap_or_default(),
                        req.related_sprints.unwrap_or_default(),
                        &req.agent,
                    )
                    .await
                    .map_err(to_mcp_error)?;
                json_result(&json!({ "created": entry }))
            }
            other => Err(to_mcp_error(Error::rejected(format!(
                "Invalid action '{other}'. Must be 'list' or 'add'"
            )))),
        }
    }

    #[tool(
        description = "Regenerate the Obsidian vault from the YAML files right away, bypassing the debounce. Idempotent."
    )]
    pub async fn worksync_sync(
        &self,
        params: Parameters<SyncRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let report = self
            .tracker
            .sync(req.project.as_deref())
            .await
            .map_err(to_mcp_error)?;
        let status = if report.failed.is_empty() { "success" } else { "error" };
        json_result(&json!({ "status": status, "report": report }))
    }

    #[tool(
        description = "Get coding guidance for a project: foundational guidance (general, golang, typescript, ai-collaboration) merged with project-specific docs from the repo. Returns documents keyed by name."
    )]
    pub async fn worksync_guidance(
        &self,
        params: Parameters<GuidanceRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let guidance = self
            .tracker
            .guidance(&req.project, req.topic.as_deref())
            .map_err(to_mcp_error)?;
        json_result(&guidance)
    }

    #[tool(
        description = "Register a new project: creates its directory structure and entity files and adds it to config.yaml. Languages are detected from the repo when omitted and decide guidance inheritance."
    )]
    pub async fn worksync_register_project(
        &self,
        params: Parameters<RegisterProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let input = RegisterProjectInput {
            name: req.name,
            repo: req.repo,
            description: req.description,
            languages: req.languages,
        };
        let registration = self
            .tracker
            .register_project(input, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&registration)
    }

    #[tool(
        description = "Remove a project from config.yaml. With delete_data=true also deletes its data directory and vault notes."
    )]
    pub async fn worksync_unregister_project(
        &self,
        params: Parameters<UnregisterProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let result = self
            .tracker
            .unregister_project(&req.name, req.delete_data, &req.agent)
            .await
            .map_err(to_mcp_error)?;
        json_result(&result)
    }
}

fn user_prompt(text: String) -> Vec<PromptMessage> {
    vec![PromptMessage::new_text(PromptMessageRole::User, text)]
}

/// Workflow prompts agents discover on connect.
#[prompt_router]
impl WorkSyncServer {
    #[prompt(
        name = "work_status",
        description = "Check work status across projects. Shows active sprints, in-progress stories, and backlog stats."
    )]
    pub async fn work_status(
        &self,
        Parameters(args): Parameters<WorkStatusArgs>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let project_arg = if args.project.is_empty() {
            "no arguments (all projects)".to_string()
        } else {
            format!("project='{}'", args.project)
        };
        Ok(user_prompt(format!(
            "Call worksync_status with {project_arg}. \
             Display the results using this exact structure:\n\n\
             ```\n\
             ## <project-name>\n\
             \n\
             **Active Sprints:**\n  \
             <id> — <title> (<N stories, M in progress>)\n  \
             (or 'None' if no active sprints)\n\
             \n\
             **In Progress:**\n\
             | ID | Sprint | Notes |\n\
             |-----|---------|-------|\n\
             | STORY-1 | sprint-id | truncated notes... |\n  \
             (include in-progress backlog items with Sprint='backlog')\n  \
             (or 'None' if nothing in progress)\n\
             \n\
             **Backlog:** <total> total — <todo> todo, <in_progress> active, <done> done\n\
             \n\
             **Recent History:** (last 3 entries)\n  \
             - <date>: <summary>\n\
             ```\n\n\
             Rules:\n\
             - One section per project, separated by a horizontal rule\n\
             - Truncate notes to 60 chars max\n\
             - If no active sprints and no in-progress work, show a one-liner: \
             '<project>: idle — <N> backlog items'\n\
             - Keep it compact for CLI readability"
        )))
    }

    #[prompt(
        name = "work_sync",
        description = "Regenerate the Obsidian vault from YAML source files."
    )]
    pub async fn work_sync(
        &self,
        Parameters(args): Parameters<WorkSyncArgs>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let call = if args.project.is_empty() {
            "Call worksync_sync with no arguments to sync all projects.".to_string()
        } else {
            format!("Call worksync_sync with project='{}'.", args.project)
        };
        Ok(user_prompt(format!(
            "{call} Report whether the sync succeeded and summarize the output."
        )))
    }

    #[prompt(
        name = "work_focus",
        description = "Load context for a specific story to prepare for focused work."
    )]
    pub async fn work_focus(
        &self,
        Parameters(args): Parameters<WorkFocusArgs>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let story = &args.story_id;
        let project_hint = if args.project.is_empty() {
            String::new()
        } else {
            format!(" in project '{}'", args.project)
        };
        Ok(user_prompt(format!(
            "I want to focus on story {story}{project_hint}. \
             1. Call worksync_status to find which project and sprint contains {story}. \
             2. Extract the story notes, sprint goal, and themes. \
             3. Call worksync_guidance for the project to load coding context. \
             4. Present a summary: story status, sprint context, related work, and applicable guidance."
        )))
    }

    #[prompt(name = "work_done", description = "Mark a story as done with completion notes.")]
    pub async fn work_done(
        &self,
        Parameters(args): Parameters<WorkDoneArgs>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        let mut call = format!("story_id='{}'", args.story_id);
        if !args.project.is_empty() {
            call.push_str(&format!(", project='{}'", args.project));
        }
        if !args.notes.is_empty() {
            call.push_str(&format!(", notes='{}'", args.notes));
        }
        Ok(user_prompt(format!(
            "Call worksync_done with {call}. \
             The server will mark the story as done, append a history entry, and sync the vault. \
             Report the result and suggest the next story in the same sprint if one exists."
        )))
    }

    #[prompt(name = "add_project", description = "Register a new project for work tracking.")]
    pub async fn add_project(
        &self,
        Parameters(args): Parameters<AddProjectArgs>,
    ) -> Result<Vec<PromptMessage>, McpError> {
        Ok(user_prompt(format!(
            "Call worksync_register_project with name='{}', repo='{}'. \
             The tool handles everything: directory creation, work-index.yaml scaffold, \
             config.yaml update, language detection, and guidance inheritance. \
             Report what was created from the response.",
            args.name, args.repo
        )))
    }
}

#[tool_handler]
#[prompt_handler]
impl ServerHandler for WorkSyncServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "worksync".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .enable_prompts()
                .build(),
            instructions: Some(INSTRUCTIONS.into()),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(tracker: WorkTracker) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = WorkSyncServer::new(tracker);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
