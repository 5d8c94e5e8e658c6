//! Work-tracking operations.
//!
//! Each operation validates its input, takes the project's write lock
//! through the [`Coordinator`], and applies a pure change to one or more
//! entities. Transports (MCP, CLI) only translate arguments and results.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{expand_home, GuidanceConfig, ProjectConfig, ServerConfig, WorkspaceConfig};
use crate::engine::{Coordinator, DebounceScheduler, EntityRef, MutationRecord, ProjectGuard, Regenerator};
use crate::error::{Error, Result};
use crate::guidance::{self, GuidanceSet};
use crate::models::{
    validate_id, Backlog, BacklogItem, BacklogStats, BacklogStatus, BacklogUpdate, History,
    HistoryEntry, NewBacklogItem, NewSprint, NewStory, ProjectStatus, ProjectStatusEntry,
    Registration, RegisterProjectInput, Sprint, SprintStatus, SprintStory, Story,
    StoryCompletion, StoryStatus, StoryUpdate, SprintUpdate, SyncFailure, SyncReport,
    Unregistration, WorkIndex,
};
use crate::vault::{VaultError, VaultRegenerator};
use crate::workspace::Workspace;

/// Subdirectories created for every registered project.
pub const PROJECT_SUBDIRS: [&str; 4] = ["BACKLOG", "COMPLETE", "PROMPTS", "SCHEMA"];

#[derive(Clone)]
pub struct WorkTracker {
    workspace: Workspace,
    coordinator: Coordinator,
    regenerator: Arc<dyn Regenerator>,
}

impl WorkTracker {
    pub fn new(
        workspace: Workspace,
        coordinator: Coordinator,
        regenerator: Arc<dyn Regenerator>,
    ) -> Self {
        Self {
            workspace,
            coordinator,
            regenerator,
        }
    }

    /// Wire up a tracker over `config.data_root` with the vault regenerator
    /// and, when auto-sync is on, a debounce scheduler.
    pub fn open(config: &ServerConfig) -> Self {
        let workspace = Workspace::new(&config.data_root);
        let regenerator: Arc<dyn Regenerator> = Arc::new(VaultRegenerator::new(workspace.clone()));

        let mut builder =
            Coordinator::builder(workspace.projects_root()).lock_timeout(config.lock_timeout);
        if config.auto_sync {
            builder = builder.scheduler(DebounceScheduler::new(
                config.sync_debounce,
                Arc::clone(&regenerator),
            ));
        }

        Self::new(workspace, builder.build(), regenerator)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Active sprints, in-progress work and backlog counts, per project.
    /// A project whose files cannot be read reports the error in its entry.
    pub async fn status(&self, project: Option<&str>) -> Result<BTreeMap<String, ProjectStatusEntry>> {
        let config = self.workspace.load_config()?;
        let names = select_projects(&config, project)?;

        let mut result = BTreeMap::new();
        for name in names {
            let entry = match self.project_status(&name).await {
                Ok(status) => ProjectStatusEntry::Loaded(status),
                Err(e) => {
                    tracing::warn!(project = %name, error = %e, "Failed to load project status");
                    ProjectStatusEntry::Failed {
                        error: e.to_string(),
                    }
                }
            };
            result.insert(name, entry);
        }
        Ok(result)
    }

    async fn project_status(&self, project: &str) -> Result<ProjectStatus> {
        let mut guard = self.coordinator.lock(project).await?;
        let index: WorkIndex = guard.read_as(&EntityRef::Index)?;

        let mut sprints = Vec::new();
        let mut in_progress_stories = Vec::new();
        for id in &index.sprints {
            let entity = EntityRef::sprint(id.as_str());
            if !guard.exists(&entity) {
                tracing::warn!(project, sprint = %id, "Sprint listed in index has no file");
                continue;
            }
            let sprint: Sprint = guard.read_as(&entity)?;
            in_progress_stories.extend(
                sprint
                    .stories()
                    .filter(|story| story.status == StoryStatus::InProgress)
                    .map(|story| SprintStory {
                        story: story.clone(),
                        sprint: sprint.id.clone(),
                    }),
            );
            if sprint.status == SprintStatus::Active {
                sprints.push(sprint);
            }
        }

        let backlog: Backlog = read_or_default(&mut guard, &EntityRef::Backlog)?;
        let in_progress_backlog: Vec<BacklogItem> = backlog
            .backlog
            .iter()
            .filter(|item| item.status == BacklogStatus::InProgress)
            .cloned()
            .collect();

        Ok(ProjectStatus {
            sprints,
            in_progress_stories,
            stats: BacklogStats {
                total_backlog: backlog.backlog.len(),
                todo: backlog.count(BacklogStatus::Todo),
                in_progress: in_progress_backlog.len(),
                done: backlog.count(BacklogStatus::Done),
            },
            in_progress_backlog,
        })
    }

    /// The project registry from `config.yaml`.
    pub fn projects(&self) -> Result<BTreeMap<String, ProjectConfig>> {
        Ok(self.workspace.load_config()?.projects)
    }

    pub fn project(&self, name: &str) -> Result<ProjectConfig> {
        self.workspace
            .load_config()?
            .projects
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("Project '{name}'")))
    }

    pub async fn history(&self, project: &str) -> Result<Vec<HistoryEntry>> {
        self.workspace.validate_project(project)?;
        let mut guard = self.coordinator.lock(project).await?;
        let history: History = read_or_default(&mut guard, &EntityRef::History)?;
        Ok(history.history)
    }

    pub fn guidance(&self, project: &str, topic: Option<&str>) -> Result<GuidanceSet> {
        let config = self.workspace.validate_project(project)?;
        guidance::load(&self.workspace.guidance_dir(), project, &config, topic)
    }

    // ============================================================
    // Backlog
    // ============================================================

    pub async fn add_backlog(&self, project: &str, input: NewBacklogItem, agent: &str) -> Result<BacklogItem> {
        validate_id("backlog item", &input.id)?;
        let mut guard = self.lock_valid(project).await?;
        ensure_exists(&mut guard, &EntityRef::Backlog, agent, &Backlog::default())?;

        let record = MutationRecord::new(EntityRef::Backlog, "add_backlog", agent);
        guard.mutate_as(&record, |backlog: &mut Backlog| {
            if backlog.get(&input.id).is_some() {
                return Err(Error::rejected(format!("Backlog item '{}' already exists", input.id)));
            }
            let item = BacklogItem::from(input);
            backlog.backlog.push(item.clone());
            Ok(item)
        })
    }

    pub async fn update_backlog(
        &self,
        project: &str,
        id: &str,
        update: BacklogUpdate,
        agent: &str,
    ) -> Result<BacklogItem> {
        let mut guard = self.lock_valid(project).await?;
        let record = MutationRecord::new(EntityRef::Backlog, "update_backlog", agent);

        guard.mutate_as(&record, |backlog: &mut Backlog| {
            let item = backlog
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("Backlog item '{id}'")))?;
            if let Some(status) = update.status {
                item.status = status;
            }
            if let Some(summary) = update.summary {
                item.summary = summary;
            }
            if let Some(theme) = update.theme {
                item.theme = theme;
            }
            if let Some(related) = update.related_sprints {
                item.related_sprints = related;
            }
            Ok(item.clone())
        })
    }

    pub async fn remove_backlog(&self, project: &str, id: &str, agent: &str) -> Result<BacklogItem> {
        let mut guard = self.lock_valid(project).await?;
        let record = MutationRecord::new(EntityRef::Backlog, "remove_backlog", agent);

        guard.mutate_as(&record, |backlog: &mut Backlog| {
            let position = backlog
                .backlog
                .iter()
                .position(|item| item.id == id)
                .ok_or_else(|| Error::NotFound(format!("Backlog item '{id}'")))?;
            Ok(backlog.backlog.remove(position))
        })
    }

    // ============================================================
    // Sprints and stories
    // ============================================================

    /// Create `sprints/<id>.yaml` and append the id to the index.
    pub async fn create_sprint(&self, project: &str, input: NewSprint, agent: &str) -> Result<Sprint> {
        validate_id("sprint", &input.id)?;
        let mut guard = self.lock_valid(project).await?;
        let entity = EntityRef::sprint(input.id.as_str());

        guard.check(&EntityRef::Index)?;
        let index: WorkIndex = guard.peek_as(&EntityRef::Index)?;
        if index.has_sprint(&input.id) || guard.exists(&entity) {
            return Err(Error::rejected(format!("Sprint '{}' already exists", input.id)));
        }

        let sprint = Sprint {
            file: Some(format!("{}.md", input.id.to_uppercase())),
            id: input.id,
            title: input.title,
            status: input.status,
            goal: input.goal,
            notes: None,
            themes: input.themes,
            stories: Vec::new(),
            extra: Default::default(),
        };

        guard.create_as(&MutationRecord::new(entity.clone(), "create_sprint", agent), &sprint)?;

        let record = MutationRecord::new(EntityRef::Index, "create_sprint", agent);
        let appended = guard.mutate_as(&record, |index: &mut WorkIndex| {
            index.sprints.push(sprint.id.clone());
            Ok(())
        });
        if let Err(e) = appended {
            // Without an index entry the sprint file would be invisible.
            let path = guard.path(&entity);
            if let Err(remove) = fs::remove_file(&path) {
                tracing::error!(path = %path.display(), error = %remove, "Failed to roll back sprint file");
            }
            return Err(e);
        }

        Ok(sprint)
    }

    pub async fn update_sprint(
        &self,
        project: &str,
        id: &str,
        update: SprintUpdate,
        agent: &str,
    ) -> Result<Sprint> {
        let mut guard = self.lock_valid(project).await?;
        let entity = existing_sprint(&guard, id)?;
        let record = MutationRecord::new(entity, "update_sprint", agent);

        guard.mutate_as(&record, |sprint: &mut Sprint| {
            if let Some(status) = update.status {
                sprint.status = status;
            }
            if let Some(title) = update.title {
                sprint.title = title;
            }
            if let Some(goal) = update.goal {
                sprint.goal = goal;
            }
            if let Some(themes) = update.themes {
                sprint.themes = themes;
            }
            Ok(sprint.clone())
        })
    }

    pub async fn add_story(&self, project: &str, sprint_id: &str, input: NewStory, agent: &str) -> Result<Story> {
        validate_id("story", &input.id)?;
        let mut guard = self.lock_valid(project).await?;
        let entity = existing_sprint(&guard, sprint_id)?;
        let record = MutationRecord::new(entity, "add_story", agent);

        guard.mutate_as(&record, |sprint: &mut Sprint| {
            if sprint.has_story(&input.id) {
                return Err(Error::rejected(format!(
                    "Story '{}' already exists in sprint '{sprint_id}'",
                    input.id
                )));
            }
            let mut story = Story::new(input.id, input.status);
            if !input.notes.is_empty() {
                story.notes = Some(input.notes);
            }
            sprint.stories.push(crate::models::StoryEntry::Story(story.clone()));
            Ok(story)
        })
    }

    pub async fn update_story(
        &self,
        project: &str,
        sprint_id: &str,
        story_id: &str,
        update: StoryUpdate,
        agent: &str,
    ) -> Result<Story> {
        let mut guard = self.lock_valid(project).await?;
        let entity = existing_sprint(&guard, sprint_id)?;
        let record = MutationRecord::new(entity, "update_story", agent);

        guard.mutate_as(&record, |sprint: &mut Sprint| {
            let story = sprint.story_mut(story_id).ok_or_else(|| {
                Error::NotFound(format!("Story '{story_id}' in sprint '{sprint_id}'"))
            })?;
            if let Some(status) = update.status {
                story.status = status;
            }
            if let Some(notes) = update.notes {
                story.notes = Some(notes);
            }
            Ok(story.clone())
        })
    }

    /// Mark a story done and log it in the history, under one lock.
    ///
    /// Without `sprint_id`, sprints are searched in index order and the
    /// first one holding the story wins.
    pub async fn done(
        &self,
        project: &str,
        story_id: &str,
        notes: &str,
        sprint_id: Option<&str>,
        agent: &str,
    ) -> Result<StoryCompletion> {
        let mut guard = self.lock_valid(project).await?;
        let index: WorkIndex = guard.peek_as(&EntityRef::Index)?;

        let mut found = None;
        for id in index.sprints.iter().filter(|id| sprint_id.map_or(true, |s| s == id.as_str())) {
            let entity = EntityRef::sprint(id.as_str());
            if !guard.exists(&entity) {
                continue;
            }
            let sprint: Sprint = guard.peek_as(&entity)?;
            if sprint.has_story(story_id) {
                found = Some(sprint.id);
                break;
            }
        }
        let Some(sprint) = found else {
            let scope = match sprint_id {
                Some(id) => format!("sprint '{id}'"),
                None => "any sprint".to_string(),
            };
            return Err(Error::NotFound(format!("Story '{story_id}' in {scope}")));
        };

        let sprint_entity = EntityRef::sprint(sprint.as_str());
        ensure_exists(&mut guard, &EntityRef::History, agent, &History::default())?;
        // Both entities must be clean before either is written.
        guard.check(&sprint_entity)?;
        guard.check(&EntityRef::History)?;

        let record = MutationRecord::new(sprint_entity, "done", agent);
        let updated_story = guard.mutate_as(&record, |doc: &mut Sprint| {
            let story = doc
                .story_mut(story_id)
                .ok_or_else(|| Error::NotFound(format!("Story '{story_id}' in sprint '{sprint}'")))?;
            story.status = StoryStatus::Done;
            if !notes.is_empty() {
                story.notes = Some(notes.to_string());
            }
            Ok(story.clone())
        })?;

        let summary = if notes.is_empty() {
            format!("Completed {story_id}")
        } else {
            format!("Completed {story_id}: {notes}")
        };
        let history_entry = HistoryEntry::today(summary, vec![sprint.clone()]);
        let record = MutationRecord::new(EntityRef::History, "done", agent);
        guard.mutate_as(&record, |history: &mut History| {
            history.history.push(history_entry.clone());
            Ok(())
        })?;

        Ok(StoryCompletion {
            updated_story,
            sprint,
            history_entry,
        })
    }

    pub async fn add_history(
        &self,
        project: &str,
        summary: &str,
        related_sprints: Vec<String>,
        agent: &str,
    ) -> Result<HistoryEntry> {
        if summary.trim().is_empty() {
            return Err(Error::rejected("summary is required when action='add'"));
        }
        let mut guard = self.lock_valid(project).await?;
        ensure_exists(&mut guard, &EntityRef::History, agent, &History::default())?;

        let entry = HistoryEntry::today(summary, related_sprints);
        let record = MutationRecord::new(EntityRef::History, "add_history", agent);
        guard.mutate_as(&record, |history: &mut History| {
            history.history.push(entry.clone());
            Ok(())
        })?;
        Ok(entry)
    }

    // ============================================================
    // Vault
    // ============================================================

    /// Regenerate the vault for one project, or for every registered one,
    /// right away.
    pub async fn sync(&self, project: Option<&str>) -> Result<SyncReport> {
        let config = self.workspace.load_config()?;
        let names = match project {
            Some(name) => {
                self.workspace.validate_project(name)?;
                vec![name.to_string()]
            }
            None => config.projects.keys().cloned().collect(),
        };

        let mut report = SyncReport {
            project: project.unwrap_or("all").to_string(),
            synced: Vec::new(),
            failed: Vec::new(),
        };
        for name in names {
            match self.regenerate_now(&name).await {
                Ok(()) => report.synced.push(name),
                Err(e) => {
                    tracing::error!(project = %name, error = %e, "Vault sync failed");
                    report.failed.push(SyncFailure {
                        project: name,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn regenerate_now(&self, project: &str) -> std::result::Result<(), VaultError> {
        if let Some(scheduler) = self.coordinator.scheduler() {
            return scheduler.regenerate_now(project).await;
        }
        let regenerator = Arc::clone(&self.regenerator);
        let name = project.to_string();
        tokio::task::spawn_blocking(move || regenerator.regenerate(&name))
            .await
            .map_err(|e| VaultError::Task(e.to_string()))?
    }

    // ============================================================
    // Registration
    // ============================================================

    /// Create a project's directories and entity files and add it to
    /// `config.yaml`. Entity files that already exist are kept.
    pub async fn register_project(&self, input: RegisterProjectInput, agent: &str) -> Result<Registration> {
        validate_id("project", &input.name)?;
        let _config_lock = self.workspace.lock_config().await;

        let mut config = self.workspace.load_config()?;
        if config.projects.contains_key(&input.name) {
            return Err(Error::rejected(format!("Project '{}' already registered", input.name)));
        }

        let repo_path = resolve_repo(&input.repo);
        let languages = match input.languages {
            Some(languages) => languages,
            None => detect_languages(&repo_path),
        };
        let inherit = guidance_inheritance(&languages);

        let project_dir = self.workspace.project_dir(&input.name);
        let mut created_dirs = Vec::with_capacity(PROJECT_SUBDIRS.len() + 1);
        for dir in std::iter::once(project_dir.clone())
            .chain(PROJECT_SUBDIRS.iter().map(|sub| project_dir.join(sub)))
        {
            fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
            created_dirs.push(dir.display().to_string());
        }

        let mut guard = self.coordinator.lock(&input.name).await?;
        let registered = HistoryEntry::today(format!("Registered {} in WorkSync.", input.name), Vec::new());

        ensure_exists(
            &mut guard,
            &EntityRef::Index,
            agent,
            &WorkIndex::new(input.name.as_str(), input.description.as_str()),
        )?;
        ensure_exists(&mut guard, &EntityRef::Backlog, agent, &Backlog::default())?;
        if guard.exists(&EntityRef::History) {
            let record = MutationRecord::new(EntityRef::History, "register_project", agent);
            guard.mutate_as(&record, |history: &mut History| {
                history.history.push(registered.clone());
                Ok(())
            })?;
        } else {
            let history = History {
                history: vec![registered],
                ..Default::default()
            };
            guard.create_as(&MutationRecord::new(EntityRef::History, "register_project", agent), &history)?;
        }

        config.projects.insert(
            input.name.clone(),
            ProjectConfig {
                repo: input.repo,
                description: input.description.clone(),
                guidance: GuidanceConfig {
                    inherit: Some(inherit.clone()),
                    project: Vec::new(),
                },
                extra: Default::default(),
            },
        );
        // Saved while the guard is held so the regeneration it schedules
        // sees the new config entry.
        self.workspace.save_config(&config)?;
        guard.mark_dirty();
        let work_index = guard.path(&EntityRef::Index);
        drop(guard);

        tracing::info!(project = %input.name, agent, languages = ?languages, "Registered project");

        Ok(Registration {
            registered: input.name,
            repo: repo_path.display().to_string(),
            description: input.description,
            languages_detected: languages,
            guidance_inherit: inherit,
            created_dirs,
            work_index: work_index.display().to_string(),
        })
    }

    /// Remove a project from `config.yaml` and, with `delete_data`, its data
    /// directory and vault notes.
    pub async fn unregister_project(&self, name: &str, delete_data: bool, agent: &str) -> Result<Unregistration> {
        validate_id("project", name)?;
        let _config_lock = self.workspace.lock_config().await;

        let mut config = self.workspace.load_config()?;
        let project_dir = self.workspace.project_dir(name);
        let vault_dir = self.workspace.vault_root(&config).join("projects").join(name);

        let in_config = config.projects.contains_key(name);
        let on_disk = project_dir.exists();
        let in_vault = vault_dir.exists();
        if !in_config && !on_disk && !in_vault {
            return Err(Error::NotFound(format!(
                "Project '{name}' (in config, data or vault)"
            )));
        }

        let mut result = Unregistration {
            unregistered: name.to_string(),
            config_removed: None,
            note: None,
            data_deleted: None,
            vault_deleted: None,
        };

        match config.projects.remove(name) {
            Some(entry) => {
                self.workspace.save_config(&config)?;
                result.config_removed = serde_yaml::to_value(&entry).ok();
            }
            None => {
                result.note =
                    Some("Was not in config (already unregistered). Cleaning orphaned data.".to_string());
            }
        }

        if delete_data && on_disk {
            // Wait for in-flight mutations before removing their files, and
            // forget the project before anyone else can lock it again.
            let guard = self.coordinator.lock(name).await?;
            fs::remove_dir_all(&project_dir).map_err(|e| Error::io(&project_dir, e))?;
            guard.forget();
            result.data_deleted = Some(project_dir.display().to_string());
        } else {
            self.coordinator.forget(name).await?;
        }
        if delete_data && in_vault {
            fs::remove_dir_all(&vault_dir).map_err(|e| Error::io(&vault_dir, e))?;
            result.vault_deleted = Some(vault_dir.display().to_string());
        }

        // Refresh the global dashboard without the project.
        if let Some(scheduler) = self.coordinator.scheduler() {
            scheduler.schedule(name);
        }

        tracing::info!(project = name, delete_data, agent, "Unregistered project");
        Ok(result)
    }

    async fn lock_valid(&self, project: &str) -> Result<ProjectGuard> {
        self.workspace.validate_project(project)?;
        self.coordinator.lock(project).await
    }
}

/// Languages inferred from marker files in the repository root.
pub fn detect_languages(repo: &Path) -> Vec<String> {
    let mut languages = Vec::new();
    if !repo.is_dir() {
        return languages;
    }
    if repo.join("go.mod").exists() {
        languages.push("golang".to_string());
    }
    if repo.join("package.json").exists() {
        languages.push("typescript".to_string());
    }
    if repo.join("pyproject.toml").exists() || repo.join("setup.py").exists() {
        languages.push("python".to_string());
    }
    languages
}

/// Foundational guidance for a project using `languages`: `general`, then
/// any language with its own guidance, then `ai-collaboration`.
pub fn guidance_inheritance(languages: &[String]) -> Vec<String> {
    let mut inherit = vec!["general".to_string()];
    inherit.extend(
        languages
            .iter()
            .filter(|lang| matches!(lang.as_str(), "golang" | "typescript"))
            .cloned(),
    );
    inherit.push("ai-collaboration".to_string());
    inherit
}

fn resolve_repo(repo: &str) -> PathBuf {
    let path = expand_home(repo);
    fs::canonicalize(&path).unwrap_or(path)
}

fn select_projects(config: &WorkspaceConfig, project: Option<&str>) -> Result<Vec<String>> {
    match project {
        Some(name) if config.projects.contains_key(name) => Ok(vec![name.to_string()]),
        Some(name) => Err(Error::NotFound(format!("Project '{name}'"))),
        None => Ok(config.projects.keys().cloned().collect()),
    }
}

fn existing_sprint(guard: &ProjectGuard, id: &str) -> Result<EntityRef> {
    validate_id("sprint", id)?;
    let entity = EntityRef::sprint(id);
    if guard.exists(&entity) {
        Ok(entity)
    } else {
        Err(Error::NotFound(format!("Sprint '{id}'")))
    }
}

/// Create `entity` from `initial` if the project does not have it yet.
fn ensure_exists<T: serde::Serialize>(
    guard: &mut ProjectGuard,
    entity: &EntityRef,
    agent: &str,
    initial: &T,
) -> Result<()> {
    if guard.exists(entity) {
        return Ok(());
    }
    guard.create_as(&MutationRecord::new(entity.clone(), "create", agent), initial)
}

fn read_or_default<T>(guard: &mut ProjectGuard, entity: &EntityRef) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match guard.read_as(entity) {
        Err(Error::NotFound(_)) => Ok(T::default()),
        other => other,
    }
}
