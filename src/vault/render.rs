//! Markdown rendering of project state for the Obsidian vault.
//!
//! Everything here is pure: state in, file contents out. Notes carry YAML
//! frontmatter (for Dataview queries and graph filters) and `[[wiki-links]]`
//! between sprints, stories, backlog items and themes.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::WorkspaceConfig;
use crate::models::{BacklogItem, ProjectSnapshot, Sprint, Story};

/// Longest story note shown in a sprint's story table.
pub const NOTE_PREVIEW_CHARS: usize = 50;

/// A rendered note, relative to the project's vault directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFile {
    pub path: PathBuf,
    pub contents: String,
}

impl VaultFile {
    fn new(path: impl Into<PathBuf>, contents: String) -> Self {
        Self {
            path: path.into(),
            contents,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidanceSource {
    Foundational,
    Project,
}

impl GuidanceSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Project => "project",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuidanceDoc {
    pub name: String,
    pub source: GuidanceSource,
    pub text: String,
}

/// Guidance configured for a project and the documents that were found.
#[derive(Debug, Clone, Default)]
pub struct GuidanceInput {
    pub inherit: Vec<String>,
    pub project: Vec<String>,
    pub documents: Vec<GuidanceDoc>,
}

/// All notes for one project: sprints, stories, backlog items, themes, the
/// dashboard and guidance.
pub fn render_project(
    project: &str,
    snapshot: &ProjectSnapshot,
    guidance: &GuidanceInput,
    generated_at: &str,
) -> Vec<VaultFile> {
    let mut files = Vec::new();
    let mut themes = BTreeSet::new();

    for sprint in &snapshot.sprints {
        files.push(VaultFile::new(
            note_path("Sprints", &sprint.id),
            sprint_note(sprint, project),
        ));
        themes.extend(sprint.themes.iter().cloned());

        for story in sprint.stories() {
            files.push(VaultFile::new(
                note_path("Stories", &story.id),
                story_note(story, sprint, project),
            ));
        }
    }

    for item in &snapshot.backlog {
        files.push(VaultFile::new(
            note_path("Backlog", &item.id),
            backlog_note(item, project),
        ));
        if !item.theme.is_empty() {
            themes.insert(item.theme.clone());
        }
    }

    for theme in &themes {
        files.push(VaultFile::new(
            note_path("Themes", theme),
            theme_note(theme, project, snapshot),
        ));
    }

    files.push(VaultFile::new(
        "Dashboard.md",
        project_dashboard(project, generated_at),
    ));

    for doc in &guidance.documents {
        let tags = [project, "guidance", doc.source.as_str()];
        let contents = format!(
            "{}\n\n{}",
            frontmatter(&[
                ("type", "guidance".into()),
                ("id", doc.name.as_str().into()),
                ("project", project.into()),
                ("source", doc.source.as_str().into()),
                ("tags", Field::list(tags)),
            ]),
            doc.text
        );
        files.push(VaultFile::new(note_path("Guidance", &doc.name), contents));
    }
    if !guidance.documents.is_empty() {
        files.push(VaultFile::new(
            "Guidance/_index.md",
            guidance_index(project, guidance),
        ));
    }

    files
}

/// `Global Dashboard.md` at the vault root, linking every registered project.
pub fn render_global_dashboard(config: &WorkspaceConfig, generated_at: &str) -> String {
    let mut out = vec![
        "# WorkSync Global Dashboard".to_string(),
        String::new(),
        format!("*Generated: {generated_at}*"),
        String::new(),
        "## Projects".to_string(),
        String::new(),
    ];

    for (name, project) in &config.projects {
        out.push(format!(
            "- **[[{name} Dashboard|{name}]]** - {}",
            project.description
        ));
    }

    out.push(String::new());
    out.extend(dataview(
        "All Active Sprints",
        "TABLE project, status, goal",
        "projects",
        Some(r#"type = "sprint" AND status = "active""#),
    ));
    out.extend(dataview(
        "All In Progress Stories",
        "TABLE project, sprint, status",
        "projects",
        Some(r#"type = "story" AND status = "in_progress""#),
    ));
    out.extend([
        "## Recent History".to_string(),
        String::new(),
        "See individual project dashboards for history.".to_string(),
        String::new(),
    ]);

    out.join("\n")
}

fn sprint_note(sprint: &Sprint, project: &str) -> String {
    let mut tags = vec![project, "sprint", sprint.status.as_str()];
    tags.extend(sprint.themes.iter().map(String::as_str));

    let mut out = vec![
        frontmatter(&[
            ("type", "sprint".into()),
            ("id", sprint.id.as_str().into()),
            ("project", project.into()),
            ("status", sprint.status.as_str().into()),
            ("themes", Field::list(&sprint.themes)),
            ("tags", Field::list(tags)),
        ]),
        String::new(),
        format!("# {}", sprint.title),
        String::new(),
    ];

    if !sprint.goal.is_empty() {
        out.extend(section("Goal", &sprint.goal));
    }
    if let Some(notes) = sprint.notes.as_deref().filter(|n| !n.is_empty()) {
        out.extend(section("Notes", notes));
    }

    let mut stories = sprint.stories().peekable();
    if stories.peek().is_some() {
        out.extend([
            "## Stories".to_string(),
            String::new(),
            "| ID | Status | Notes |".to_string(),
            "|-----|--------|-------|".to_string(),
        ]);
        for story in stories {
            out.push(format!(
                "| [[{}]] | {} | {} |",
                story.id,
                story.status,
                preview(story.notes.as_deref().unwrap_or_default())
            ));
        }
        out.push(String::new());
    }

    if !sprint.themes.is_empty() {
        out.extend(section("Themes", &links(&sprint.themes)));
    }
    if let Some(file) = &sprint.file {
        out.extend(section("Source", &format!("Sprint doc: `{file}`")));
    }

    out.join("\n")
}

fn story_note(story: &Story, sprint: &Sprint, project: &str) -> String {
    let mut tags = vec![project, "story", story.status.as_str()];
    tags.extend(sprint.themes.iter().map(String::as_str));

    let theme_links = if sprint.themes.is_empty() {
        "None".to_string()
    } else {
        links(&sprint.themes)
    };

    let mut out = vec![
        frontmatter(&[
            ("type", "story".into()),
            ("id", story.id.as_str().into()),
            ("project", project.into()),
            ("sprint", sprint.id.as_str().into()),
            ("status", story.status.as_str().into()),
            ("themes", Field::list(&sprint.themes)),
            ("tags", Field::list(tags)),
        ]),
        String::new(),
        format!("# {}", story.id),
        String::new(),
        "## Overview".to_string(),
        String::new(),
        format!("**Sprint:** [[{}]]  ", sprint.id),
        format!("**Status:** {}  ", story.status),
        format!("**Themes:** {theme_links}"),
        String::new(),
    ];

    if let Some(notes) = story.notes.as_deref().filter(|n| !n.is_empty()) {
        out.extend(section("Notes", notes));
    }

    out.join("\n")
}

fn backlog_note(item: &BacklogItem, project: &str) -> String {
    let mut tags = vec![project, "backlog", item.status.as_str()];
    if !item.theme.is_empty() {
        tags.push(&item.theme);
    }

    let mut out = vec![
        frontmatter(&[
            ("type", "backlog".into()),
            ("id", item.id.as_str().into()),
            ("project", project.into()),
            ("status", item.status.as_str().into()),
            ("theme", item.theme.as_str().into()),
            ("tags", Field::list(tags)),
        ]),
        String::new(),
        format!("# {}", item.id),
        String::new(),
    ];
    out.extend(section("Summary", &item.summary));

    if !item.theme.is_empty() {
        out.extend([format!("**Theme:** [[{}]]", item.theme), String::new()]);
    }
    if !item.related_sprints.is_empty() {
        out.extend([
            format!("**Related Sprints:** {}", links(&item.related_sprints)),
            String::new(),
        ]);
    }

    out.join("\n")
}

fn theme_note(theme: &str, project: &str, snapshot: &ProjectSnapshot) -> String {
    let mut out = vec![
        frontmatter(&[
            ("type", "theme".into()),
            ("id", theme.into()),
            ("project", project.into()),
            ("tags", Field::list([project, "theme", theme])),
        ]),
        String::new(),
        format!("# Theme: {theme}"),
        String::new(),
    ];

    let sprints: Vec<&Sprint> = snapshot
        .sprints
        .iter()
        .filter(|s| s.themes.iter().any(|t| t == theme))
        .collect();

    if !sprints.is_empty() {
        out.extend(["## Sprints".to_string(), String::new()]);
        for sprint in &sprints {
            out.push(format!("- [[{}]] ({})", sprint.id, sprint.status));
        }
        out.push(String::new());
    }

    let stories: Vec<(&Story, &Sprint)> = sprints
        .iter()
        .flat_map(|sprint| sprint.stories().map(move |story| (story, *sprint)))
        .collect();
    if !stories.is_empty() {
        out.extend(["## Stories".to_string(), String::new()]);
        for (story, sprint) in stories {
            out.push(format!("- [[{}]] ({}) - {}", story.id, story.status, sprint.id));
        }
        out.push(String::new());
    }

    let backlog: Vec<&BacklogItem> = snapshot.backlog.iter().filter(|i| i.theme == theme).collect();
    if !backlog.is_empty() {
        out.extend(["## Backlog".to_string(), String::new()]);
        for item in backlog {
            out.push(format!("- [[{}]] ({})", item.id, item.status));
        }
        out.push(String::new());
    }

    out.join("\n")
}

fn project_dashboard(project: &str, generated_at: &str) -> String {
    let from = |folder: &str| format!("projects/{project}/{folder}");

    let mut out = vec![
        format!("# {project} Dashboard"),
        String::new(),
        format!("*Generated: {generated_at}*"),
        String::new(),
    ];
    out.extend(dataview("Active Sprints", "TABLE status, goal", &from("Sprints"), Some(r#"status = "active""#)));
    out.extend(dataview("In Progress", "TABLE sprint, status", &from("Stories"), Some(r#"status = "in_progress""#)));
    out.extend(dataview("Backlog (Todo)", "TABLE theme, status", &from("Backlog"), Some(r#"status = "todo""#)));
    out.extend(dataview_sorted("All Stories by Status", "TABLE sprint, status", &from("Stories"), "status ASC"));
    out.extend(dataview("Themes", "LIST", &from("Themes"), None));
    out.extend(dataview("Guidance", "LIST", &from("Guidance"), Some(r#"type = "guidance""#)));

    out.join("\n")
}

fn guidance_index(project: &str, guidance: &GuidanceInput) -> String {
    let mut out = vec![
        "---".to_string(),
        "type: guidance-index".to_string(),
        format!("project: {project}"),
        "---".to_string(),
        String::new(),
        format!("# {project} Guidance"),
        String::new(),
        "## Foundational (Inherited)".to_string(),
        String::new(),
    ];

    if guidance.inherit.is_empty() {
        out.push("*No inherited guidance*".to_string());
    } else {
        out.extend(guidance.inherit.iter().map(|name| format!("- [[{name}]]")));
    }

    out.extend([String::new(), "## Project-Specific".to_string(), String::new()]);
    if guidance.project.is_empty() {
        out.push("*No project-specific guidance*".to_string());
    } else {
        out.extend(guidance.project.iter().map(|name| format!("- [[{name}]]")));
    }
    out.push(String::new());

    out.join("\n")
}

// ============================================================
// Helpers
// ============================================================

enum Field {
    Text(String),
    List(Vec<String>),
}

impl Field {
    fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::List(items.into_iter().map(|s| s.as_ref().to_string()).collect())
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

fn frontmatter(fields: &[(&str, Field)]) -> String {
    let mut out = vec!["---".to_string()];
    for (key, value) in fields {
        match value {
            Field::List(items) => out.push(format!("{key}: [{}]", items.join(", "))),
            Field::Text(text) if text.contains('\n') => {
                out.push(format!("{key}: |"));
                out.extend(text.lines().map(|line| format!("  {line}")));
            }
            Field::Text(text) => out.push(format!("{key}: {text}")),
        }
    }
    out.push("---".to_string());
    out.join("\n")
}

fn section(title: &str, body: &str) -> [String; 4] {
    [format!("## {title}"), String::new(), body.to_string(), String::new()]
}

fn dataview(title: &str, query: &str, from: &str, filter: Option<&str>) -> Vec<String> {
    let mut out = vec![
        format!("## {title}"),
        String::new(),
        "```dataview".to_string(),
        query.to_string(),
        format!(r#"FROM "{from}""#),
    ];
    if let Some(filter) = filter {
        out.push(format!("WHERE {filter}"));
    }
    out.extend(["```".to_string(), String::new()]);
    out
}

fn dataview_sorted(title: &str, query: &str, from: &str, sort: &str) -> Vec<String> {
    let mut out = dataview(title, query, from, None);
    // Insert before the closing fence.
    out.insert(out.len() - 2, format!("SORT {sort}"));
    out
}

fn links(targets: &[String]) -> String {
    targets
        .iter()
        .map(|t| format!("[[{t}]]"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single-line preview of a story note for table cells.
fn preview(notes: &str) -> String {
    let short = if notes.chars().count() > NOTE_PREVIEW_CHARS {
        let cut: String = notes.chars().take(NOTE_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        notes.to_string()
    };
    short.replace('\n', " ")
}

/// File name for a note. Path separators in ids would escape the folder.
pub(crate) fn note_path(folder: &str, id: &str) -> PathBuf {
    let name: String = id
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '-' } else { c })
        .collect();
    PathBuf::from(folder).join(format!("{name}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BacklogStatus, SprintStatus, StoryEntry, StoryStatus, WorkIndex};
    use serde_yaml::Mapping;

    fn snapshot() -> ProjectSnapshot {
        let mut story = Story::new("STORY-1", StoryStatus::InProgress);
        story.notes = Some("x".repeat(60));

        ProjectSnapshot {
            index: WorkIndex::new("alpha", "Alpha project"),
            sprints: vec![Sprint {
                id: "tooling-1".into(),
                title: "Tooling".into(),
                file: Some("TOOLING-1.md".into()),
                status: SprintStatus::Active,
                goal: "Ship the parser".into(),
                notes: None,
                themes: vec!["parsing".into()],
                stories: vec![
                    StoryEntry::Story(story),
                    StoryEntry::Other(serde_yaml::Value::String("stray".into())),
                ],
                extra: Mapping::new(),
            }],
            backlog: vec![BacklogItem {
                id: "B-7".into(),
                theme: "parsing".into(),
                summary: "Fix parser".into(),
                status: BacklogStatus::Todo,
                related_sprints: vec!["tooling-1".into()],
                extra: Mapping::new(),
            }],
            history: Vec::new(),
        }
    }

    fn find<'a>(files: &'a [VaultFile], path: &str) -> &'a str {
        &files
            .iter()
            .find(|f| f.path == PathBuf::from(path))
            .unwrap_or_else(|| panic!("{path} not rendered"))
            .contents
    }

    #[test]
    fn renders_one_note_per_entity() {
        let files = render_project("alpha", &snapshot(), &GuidanceInput::default(), "2026-01-01 10:00");

        let mut paths: Vec<String> = files.iter().map(|f| f.path.display().to_string()).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "Backlog/B-7.md",
                "Dashboard.md",
                "Sprints/tooling-1.md",
                "Stories/STORY-1.md",
                "Themes/parsing.md",
            ]
        );
    }

    #[test]
    fn sprint_note_truncates_story_notes() {
        let files = render_project("alpha", &snapshot(), &GuidanceInput::default(), "now");
        let sprint = find(&files, "Sprints/tooling-1.md");

        assert!(sprint.starts_with("---\ntype: sprint\nid: tooling-1\n"));
        assert!(sprint.contains("tags: [alpha, sprint, active, parsing]"));
        assert!(sprint.contains(&format!("| [[STORY-1]] | in_progress | {}... |", "x".repeat(50))));
        assert!(sprint.contains("Sprint doc: `TOOLING-1.md`"));
        assert!(!sprint.contains("stray"));
    }

    #[test]
    fn theme_note_links_sprints_stories_and_backlog() {
        let files = render_project("alpha", &snapshot(), &GuidanceInput::default(), "now");
        let theme = find(&files, "Themes/parsing.md");

        assert!(theme.contains("- [[tooling-1]] (active)"));
        assert!(theme.contains("- [[STORY-1]] (in_progress) - tooling-1"));
        assert!(theme.contains("- [[B-7]] (todo)"));
    }

    #[test]
    fn guidance_notes_and_index() {
        let guidance = GuidanceInput {
            inherit: vec!["general".into()],
            project: Vec::new(),
            documents: vec![GuidanceDoc {
                name: "general".into(),
                source: GuidanceSource::Foundational,
                text: "# General\n".into(),
            }],
        };
        let files = render_project("alpha", &snapshot(), &guidance, "now");

        assert!(find(&files, "Guidance/general.md").contains("source: foundational"));
        let index = find(&files, "Guidance/_index.md");
        assert!(index.contains("- [[general]]"));
        assert!(index.contains("*No project-specific guidance*"));
    }

    #[test]
    fn dashboards_embed_dataview_queries() {
        let files = render_project("alpha", &snapshot(), &GuidanceInput::default(), "2026-01-01 10:00");
        let dashboard = find(&files, "Dashboard.md");
        assert!(dashboard.contains("*Generated: 2026-01-01 10:00*"));
        assert!(dashboard.contains("FROM \"projects/alpha/Stories\"\nSORT status ASC\n```"));

        let mut config = WorkspaceConfig::default();
        config.projects.insert(
            "alpha".into(),
            crate::config::ProjectConfig {
                description: "Alpha project".into(),
                ..Default::default()
            },
        );
        let global = render_global_dashboard(&config, "now");
        assert!(global.contains("- **[[alpha Dashboard|alpha]]** - Alpha project"));
    }

    #[test]
    fn ids_with_separators_stay_inside_their_folder() {
        assert_eq!(note_path("Stories", "a/b"), PathBuf::from("Stories/a-b.md"));
    }
}
