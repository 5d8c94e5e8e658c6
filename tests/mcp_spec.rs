//! MCP server integration tests.
//!
//! Tools are called directly on the server; responses are the JSON text
//! agents receive.

use std::fs;
use std::path::Path;

use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, ErrorCode, PromptMessage, PromptMessageContent, PromptMessageRole};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::Value;
use tempfile::TempDir;
use worksync::config::ServerConfig;
use worksync::mcp::*;
use worksync::tracker::WorkTracker;

fn seed(root: &Path) {
    fs::write(
        root.join("config.yaml"),
        "vault_path: ./vault\nprojects:\n  alpha:\n    repo: /nonexistent/alpha\n    description: Alpha project\n",
    )
    .unwrap();
    let alpha = root.join("projects/alpha");
    fs::create_dir_all(alpha.join("sprints")).unwrap();
    fs::write(alpha.join("work-index.yaml"), "project: alpha\nsprints:\n- s1\n").unwrap();
    fs::write(
        alpha.join("sprints/s1.yaml"),
        "id: s1\ntitle: First sprint\nstatus: active\nstories:\n- id: ST-1\n  status: in_progress\n",
    )
    .unwrap();
    fs::write(
        alpha.join("backlog.yaml"),
        "backlog:\n- id: B-1\n  theme: core\n  summary: First\n  status: todo\n",
    )
    .unwrap();
    fs::write(alpha.join("history.yaml"), "history: []\n").unwrap();
}

/// Helper to create a test MCP server over a fresh data root.
fn setup() -> (WorkSyncServer, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    seed(dir.path());
    let config = ServerConfig {
        data_root: dir.path().to_path_buf(),
        auto_sync: false,
        ..ServerConfig::default()
    };
    (WorkSyncServer::new(WorkTracker::open(&config)), dir)
}

fn json_of(result: CallToolResult) -> Value {
    let text = &result.content[0]
        .as_text()
        .expect("Expected text content")
        .text;
    serde_json::from_str(text).expect("Expected JSON in text")
}

fn kind_of(error: &McpError) -> &str {
    error
        .data
        .as_ref()
        .and_then(|d| d.get("kind"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn add_backlog_request(id: &str, status: &str) -> AddBacklogRequest {
    AddBacklogRequest {
        project: "alpha".to_string(),
        id: id.to_string(),
        summary: "Fix parser".to_string(),
        theme: "parser".to_string(),
        status: status.to_string(),
        related_sprints: vec![],
        agent: "agent-a".to_string(),
    }
}

mod server_info {
    use super::*;

    #[test]
    fn advertises_tools_and_instructions() {
        let (server, _dir) = setup();

        let info = server.get_info();

        assert_eq!(info.server_info.name, "worksync");
        assert!(info.capabilities.tools.is_some());
        let instructions = info.instructions.expect("Expected instructions");
        assert!(instructions.contains("## Guardrails"));
        assert!(instructions.contains("in_progress"));
        assert!(info.capabilities.prompts.is_some());
    }
}

fn prompt_text(messages: Vec<PromptMessage>) -> String {
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, PromptMessageRole::User);
    match &messages[0].content {
        PromptMessageContent::Text { text } => text.clone(),
        other => panic!("expected text prompt, got {other:?}"),
    }
}

mod prompts {
    use super::*;

    #[tokio::test]
    async fn work_status_targets_one_or_all_projects() {
        let (server, _dir) = setup();

        let all = prompt_text(server.work_status(Parameters(WorkStatusArgs::default())).await.unwrap());
        assert!(all.starts_with("Call worksync_status with no arguments (all projects)."));
        assert!(all.contains("**Recent History:** (last 3 entries)"));
        assert!(all.contains("Truncate notes to 60 chars max"));

        let one = prompt_text(
            server
                .work_status(Parameters(WorkStatusArgs { project: "alpha".to_string() }))
                .await
                .unwrap(),
        );
        assert!(one.starts_with("Call worksync_status with project='alpha'."));
    }

    #[tokio::test]
    async fn work_sync_names_the_project_when_given() {
        let (server, _dir) = setup();

        let all = prompt_text(server.work_sync(Parameters(WorkSyncArgs::default())).await.unwrap());
        assert_eq!(
            all,
            "Call worksync_sync with no arguments to sync all projects. \
             Report whether the sync succeeded and summarize the output."
        );

        let one = prompt_text(
            server
                .work_sync(Parameters(WorkSyncArgs { project: "alpha".to_string() }))
                .await
                .unwrap(),
        );
        assert!(one.starts_with("Call worksync_sync with project='alpha'. Report"));
    }

    #[tokio::test]
    async fn work_focus_walks_through_status_and_guidance() {
        let (server, _dir) = setup();

        let text = prompt_text(
            server
                .work_focus(Parameters(WorkFocusArgs {
                    story_id: "ST-1".to_string(),
                    project: "alpha".to_string(),
                }))
                .await
                .unwrap(),
        );

        assert!(text.starts_with("I want to focus on story ST-1 in project 'alpha'."));
        assert!(text.contains("find which project and sprint contains ST-1"));
        assert!(text.contains("Call worksync_guidance"));
    }

    #[tokio::test]
    async fn work_done_includes_only_the_given_arguments() {
        let (server, _dir) = setup();

        let bare = prompt_text(
            server
                .work_done(Parameters(WorkDoneArgs {
                    story_id: "ST-1".to_string(),
                    notes: String::new(),
                    project: String::new(),
                }))
                .await
                .unwrap(),
        );
        assert!(bare.starts_with("Call worksync_done with story_id='ST-1'. The server"));

        let full = prompt_text(
            server
                .work_done(Parameters(WorkDoneArgs {
                    story_id: "ST-1".to_string(),
                    notes: "shipped".to_string(),
                    project: "alpha".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert!(full.starts_with("Call worksync_done with story_id='ST-1', project='alpha', notes='shipped'."));
        assert!(full.contains("suggest the next story in the same sprint"));
    }

    #[tokio::test]
    async fn add_project_passes_name_and_repo() {
        let (server, _dir) = setup();

        let text = prompt_text(
            server
                .add_project(Parameters(AddProjectArgs {
                    name: "gamma".to_string(),
                    repo: "/src/gamma".to_string(),
                }))
                .await
                .unwrap(),
        );

        assert!(text.starts_with("Call worksync_register_project with name='gamma', repo='/src/gamma'."));
        assert!(text.contains("language detection, and guidance inheritance"));
    }
}

mod status_tools {
    use super::*;

    #[tokio::test]
    async fn status_returns_projects_keyed_by_name() {
        let (server, _dir) = setup();

        let result = server
            .worksync_status(Parameters(StatusRequest { project: None }))
            .await
            .expect("Tool failed");
        let json = json_of(result);

        let alpha = &json["projects"]["alpha"];
        assert_eq!(alpha["sprints"][0]["id"], "s1");
        assert_eq!(alpha["in_progress_stories"][0]["id"], "ST-1");
        assert_eq!(alpha["in_progress_stories"][0]["sprint"], "s1");
        assert_eq!(alpha["stats"]["total_backlog"], 1);
    }

    #[tokio::test]
    async fn projects_lists_or_details() {
        let (server, _dir) = setup();

        let all = json_of(
            server
                .worksync_projects(Parameters(ProjectsRequest { project: None }))
                .await
                .unwrap(),
        );
        assert_eq!(all["projects"]["alpha"]["description"], "Alpha project");

        let one = json_of(
            server
                .worksync_projects(Parameters(ProjectsRequest {
                    project: Some("alpha".to_string()),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(one["project"], "alpha");
        assert_eq!(one["repo"], "/nonexistent/alpha");
    }

    #[tokio::test]
    async fn unknown_project_is_invalid_params() {
        let (server, _dir) = setup();

        let err = server
            .worksync_projects(Parameters(ProjectsRequest {
                project: Some("gamma".to_string()),
            }))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(kind_of(&err), "not_found");
    }
}

mod backlog_tools {
    use super::*;

    #[tokio::test]
    async fn add_returns_the_created_item() {
        let (server, dir) = setup();

        let json = json_of(
            server
                .worksync_add_backlog(Parameters(add_backlog_request("B-7", "todo")))
                .await
                .expect("Tool failed"),
        );

        assert_eq!(json["created"]["id"], "B-7");
        assert_eq!(json["created"]["status"], "todo");
        let text = fs::read_to_string(dir.path().join("projects/alpha/backlog.yaml")).unwrap();
        assert!(text.contains("B-7"));
    }

    #[tokio::test]
    async fn add_rejects_an_invalid_status_before_touching_files() {
        let (server, dir) = setup();
        let before = fs::read_to_string(dir.path().join("projects/alpha/backlog.yaml")).unwrap();

        let err = server
            .worksync_add_backlog(Parameters(add_backlog_request("B-7", "someday")))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(kind_of(&err), "rejected");
        assert!(err.message.contains("someday"));
        let after = fs::read_to_string(dir.path().join("projects/alpha/backlog.yaml")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_then_remove() {
        let (server, _dir) = setup();

        let updated = json_of(
            server
                .worksync_update_backlog(Parameters(UpdateBacklogRequest {
                    project: "alpha".to_string(),
                    id: "B-1".to_string(),
                    status: Some("in_progress".to_string()),
                    summary: None,
                    theme: None,
                    related_sprints: None,
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(updated["updated"]["status"], "in_progress");
        assert_eq!(updated["updated"]["summary"], "First");

        let removed = json_of(
            server
                .worksync_remove_backlog(Parameters(RemoveBacklogRequest {
                    project: "alpha".to_string(),
                    id: "B-1".to_string(),
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(removed["removed"]["id"], "B-1");
    }

    #[tokio::test]
    async fn hand_edit_surfaces_as_concurrent_modification() {
        let (server, dir) = setup();
        let path = dir.path().join("projects/alpha/backlog.yaml");
        server
            .worksync_add_backlog(Parameters(add_backlog_request("B-7", "todo")))
            .await
            .unwrap();

        fs::write(&path, "backlog: []\n").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(60))
            .unwrap();

        let err = server
            .worksync_add_backlog(Parameters(add_backlog_request("B-8", "todo")))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(kind_of(&err), "concurrent_modification");
    }
}

mod sprint_tools {
    use super::*;

    #[tokio::test]
    async fn create_sprint_add_story_and_complete_it() {
        let (server, _dir) = setup();

        let created = json_of(
            server
                .worksync_create_sprint(Parameters(CreateSprintRequest {
                    project: "alpha".to_string(),
                    id: "tooling-1".to_string(),
                    title: "Tooling".to_string(),
                    goal: String::new(),
                    themes: vec![],
                    status: "planned".to_string(),
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(created["created"]["file"], "TOOLING-1.md");

        let story = json_of(
            server
                .worksync_add_story(Parameters(AddStoryRequest {
                    project: "alpha".to_string(),
                    sprint_id: "tooling-1".to_string(),
                    story_id: "ST-9".to_string(),
                    status: "planned".to_string(),
                    notes: String::new(),
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(story["created"]["id"], "ST-9");
        assert_eq!(story["sprint"], "tooling-1");

        let updated = json_of(
            server
                .worksync_update_story(Parameters(UpdateStoryRequest {
                    project: "alpha".to_string(),
                    sprint_id: "tooling-1".to_string(),
                    story_id: "ST-9".to_string(),
                    status: Some("in_progress".to_string()),
                    notes: None,
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(updated["updated"]["status"], "in_progress");

        let done = json_of(
            server
                .worksync_done(Parameters(DoneRequest {
                    project: "alpha".to_string(),
                    story_id: "ST-9".to_string(),
                    notes: "Tools ready".to_string(),
                    sprint_id: None,
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(done["sprint"], "tooling-1");
        assert_eq!(done["updated_story"]["status"], "done");
        assert_eq!(done["history_entry"]["summary"], "Completed ST-9: Tools ready");
    }

    #[tokio::test]
    async fn update_sprint_rejects_an_invalid_status() {
        let (server, _dir) = setup();

        let err = server
            .worksync_update_sprint(Parameters(UpdateSprintRequest {
                project: "alpha".to_string(),
                id: "s1".to_string(),
                status: Some("finished".to_string()),
                title: None,
                goal: None,
                themes: None,
                agent: "agent-a".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(kind_of(&err), "rejected");
    }
}

mod history_tools {
    use super::*;

    fn request(action: &str, summary: Option<&str>) -> HistoryRequest {
        HistoryRequest {
            project: "alpha".to_string(),
            action: action.to_string(),
            summary: summary.map(str::to_string),
            related_sprints: None,
            agent: "agent-a".to_string(),
        }
    }

    #[tokio::test]
    async fn add_then_list() {
        let (server, _dir) = setup();

        let created = json_of(server.worksync_history(Parameters(request("add", Some("Did things")))).await.unwrap());
        assert_eq!(created["created"]["summary"], "Did things");

        let listed = json_of(server.worksync_history(Parameters(request("list", None))).await.unwrap());
        assert_eq!(listed["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_without_summary_is_rejected() {
        let (server, _dir) = setup();

        let err = server.worksync_history(Parameters(request("add", None))).await.unwrap_err();

        assert_eq!(err.message, "summary is required when action='add'");
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (server, _dir) = setup();

        let err = server.worksync_history(Parameters(request("purge", None))).await.unwrap_err();

        assert_eq!(err.message, "Invalid action 'purge'. Must be 'list' or 'add'");
    }
}

mod project_tools {
    use super::*;

    #[tokio::test]
    async fn register_sync_and_unregister() {
        let (server, dir) = setup();

        let registered = json_of(
            server
                .worksync_register_project(Parameters(RegisterProjectRequest {
                    name: "gamma".to_string(),
                    repo: "/nonexistent/gamma".to_string(),
                    description: "Gamma".to_string(),
                    languages: Some(vec!["typescript".to_string()]),
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(registered["registered"], "gamma");
        assert_eq!(registered["guidance_inherit"][1], "typescript");

        let synced = json_of(
            server
                .worksync_sync(Parameters(SyncRequest {
                    project: Some("gamma".to_string()),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(synced["status"], "success");
        assert!(dir.path().join("vault/projects/gamma/Dashboard.md").is_file());

        let removed = json_of(
            server
                .worksync_unregister_project(Parameters(UnregisterProjectRequest {
                    name: "gamma".to_string(),
                    delete_data: true,
                    agent: "agent-a".to_string(),
                }))
                .await
                .unwrap(),
        );
        assert_eq!(removed["unregistered"], "gamma");
        assert!(!dir.path().join("projects/gamma").exists());
        assert!(!dir.path().join("vault/projects/gamma").exists());
    }

    #[tokio::test]
    async fn guidance_without_documents_is_not_found() {
        let (server, _dir) = setup();

        let err = server
            .worksync_guidance(Parameters(GuidanceRequest {
                project: "alpha".to_string(),
                topic: None,
            }))
            .await
            .unwrap_err();

        assert_eq!(kind_of(&err), "not_found");
    }

    #[tokio::test]
    async fn guidance_returns_documents_by_name() {
        let (server, dir) = setup();
        fs::create_dir_all(dir.path().join("guidance")).unwrap();
        fs::write(dir.path().join("guidance/general.md"), "# General\n").unwrap();

        let json = json_of(
            server
                .worksync_guidance(Parameters(GuidanceRequest {
                    project: "alpha".to_string(),
                    topic: Some("general".to_string()),
                }))
                .await
                .unwrap(),
        );

        assert_eq!(json["guidance"]["general"], "# General\n");
    }
}
