//! The Obsidian vault: a read-optimized, regenerable view of project state.
//!
//! The vault is never authoritative. It is rebuilt from the YAML files,
//! each note is replaced atomically, and notes whose entity no longer exists
//! are pruned.

mod render;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

pub use render::{
    render_global_dashboard, render_project, GuidanceDoc, GuidanceInput, GuidanceSource,
    VaultFile, NOTE_PREVIEW_CHARS,
};

use crate::config::{expand_home, ProjectConfig, WorkspaceConfig};
use crate::engine::Regenerator;
use crate::error::Error;
use crate::store::replace_file;
use crate::workspace::Workspace;

/// Folders under a project's vault directory that hold generated notes.
const GENERATED_DIRS: [&str; 5] = ["Sprints", "Stories", "Backlog", "Themes", "Guidance"];

pub const GLOBAL_DASHBOARD: &str = "Global Dashboard.md";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Store(#[from] Error),

    #[error("vault I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("regeneration task failed: {0}")]
    Task(String),
}

impl VaultError {
    fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Regenerates vault notes from the data root.
#[derive(Clone, Debug)]
pub struct VaultRegenerator {
    workspace: Workspace,
}

impl VaultRegenerator {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Where `project`'s notes are written.
    pub fn project_dir(&self, config: &WorkspaceConfig, project: &str) -> PathBuf {
        self.workspace
            .vault_root(config)
            .join("projects")
            .join(project)
    }

    /// Render and write one project's notes. Returns how many were written.
    pub fn sync_project(
        &self,
        config: &WorkspaceConfig,
        project: &str,
        project_config: &ProjectConfig,
    ) -> Result<usize, VaultError> {
        let snapshot = self.workspace.load_snapshot(project)?;
        let guidance = self.collect_guidance(project, project_config);
        let generated_at = Local::now().format("%Y-%m-%d %H:%M").to_string();

        let files = render_project(project, &snapshot, &guidance, &generated_at);
        let target = self.project_dir(config, project);

        for dir in &GENERATED_DIRS[..4] {
            let path = target.join(dir);
            fs::create_dir_all(&path).map_err(|e| VaultError::io(&path, e))?;
        }

        let mut written = HashSet::with_capacity(files.len());
        for file in &files {
            let path = target.join(&file.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| VaultError::io(parent, e))?;
            }
            replace_file(&path, file.contents.as_bytes())?;
            written.insert(path);
        }

        let pruned = prune(&target, &written)?;
        tracing::debug!(
            project,
            written = files.len(),
            pruned,
            sprints = snapshot.sprints.len(),
            backlog = snapshot.backlog.len(),
            "Rendered project notes"
        );
        Ok(files.len())
    }

    pub fn sync_global_dashboard(&self, config: &WorkspaceConfig) -> Result<(), VaultError> {
        let root = self.workspace.vault_root(config);
        fs::create_dir_all(&root).map_err(|e| VaultError::io(&root, e))?;

        let generated_at = Local::now().format("%Y-%m-%d %H:%M").to_string();
        let contents = render_global_dashboard(config, &generated_at);
        replace_file(&root.join(GLOBAL_DASHBOARD), contents.as_bytes())?;
        Ok(())
    }

    fn collect_guidance(&self, project: &str, config: &ProjectConfig) -> GuidanceInput {
        let inherit = config.guidance.inherited();
        let mut documents = Vec::new();

        let guidance_dir = self.workspace.guidance_dir();
        for name in &inherit {
            let path = guidance_dir.join(format!("{name}.md"));
            match fs::read_to_string(&path) {
                Ok(text) => documents.push(GuidanceDoc {
                    name: name.clone(),
                    source: GuidanceSource::Foundational,
                    text,
                }),
                Err(_) => tracing::warn!(project, guidance = %name, "Foundational guidance not found"),
            }
        }

        let repo = expand_home(&config.repo);
        for doc in config.guidance.project.iter().filter(|d| d.source == "repo") {
            let path = repo.join(&doc.path);
            match fs::read_to_string(&path) {
                Ok(text) => documents.push(GuidanceDoc {
                    name: doc.name.clone(),
                    source: GuidanceSource::Project,
                    text,
                }),
                Err(_) => tracing::warn!(
                    project,
                    guidance = %doc.name,
                    path = %path.display(),
                    "Project guidance not found"
                ),
            }
        }

        GuidanceInput {
            inherit,
            project: config.guidance.project.iter().map(|d| d.name.clone()).collect(),
            documents,
        }
    }
}

impl Regenerator for VaultRegenerator {
    fn regenerate(&self, project: &str) -> Result<(), VaultError> {
        let config = self.workspace.load_config()?;

        match config.projects.get(project) {
            Some(project_config) => {
                self.sync_project(&config, project, project_config)?;
            }
            None => tracing::debug!(project, "Project not registered, refreshing dashboard only"),
        }

        self.sync_global_dashboard(&config)
    }
}

/// Delete generated notes that were not part of this render.
fn prune(target: &Path, keep: &HashSet<PathBuf>) -> Result<usize, VaultError> {
    let mut removed = 0;
    for dir in GENERATED_DIRS {
        let dir = target.join(dir);
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_note = path.extension().is_some_and(|ext| ext == "md");
            if is_note && !keep.contains(&path) {
                fs::remove_file(&path).map_err(|e| VaultError::io(&path, e))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
