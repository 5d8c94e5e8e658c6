//! Layout of a WorkSync data root.
//!
//! ```text
//! <data_root>/
//!   config.yaml              project registry
//!   guidance/<name>.md       foundational guidance
//!   projects/<name>/         one directory per project
//!   vault/                   generated notes (configurable)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::{ProjectConfig, WorkspaceConfig};
use crate::engine::EntityRef;
use crate::error::{Error, Result};
use crate::models::{validate_id, Backlog, History, ProjectSnapshot, Sprint, WorkIndex};
use crate::store::{replace_file, Document, DocumentStore};

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Clone, Debug)]
pub struct Workspace {
    data_root: PathBuf,
    config_lock: Arc<Mutex<()>>,
}

impl Workspace {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            config_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn projects_root(&self) -> PathBuf {
        self.data_root.join("projects")
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.projects_root().join(name)
    }

    pub fn guidance_dir(&self) -> PathBuf {
        self.data_root.join("guidance")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_root.join(CONFIG_FILE)
    }

    /// Serializes read-modify-write cycles on `config.yaml`.
    pub async fn lock_config(&self) -> MutexGuard<'_, ()> {
        self.config_lock.lock().await
    }

    /// Load `config.yaml`. A data root without one has no projects yet.
    pub fn load_config(&self) -> Result<WorkspaceConfig> {
        let path = self.config_path();
        let document = match DocumentStore::new().read(&path) {
            Ok(stored) => stored.document,
            Err(Error::NotFound(_)) => {
                tracing::debug!(path = %path.display(), "No workspace config, starting empty");
                return Ok(WorkspaceConfig::default());
            }
            Err(e) => return Err(e),
        };
        document
            .decode()
            .map_err(|source| Error::Parse { path, source })
    }

    /// Atomically replace `config.yaml`, keeping any comment header it has.
    pub fn save_config(&self, config: &WorkspaceConfig) -> Result<()> {
        let path = self.config_path();
        let header = match DocumentStore::new().read(&path) {
            Ok(stored) => stored.document.header,
            Err(_) => String::new(),
        };

        let content = serde_yaml::to_value(config).map_err(|source| Error::Serialize {
            path: path.clone(),
            source,
        })?;
        let text = Document::with_header(header, content)
            .render()
            .map_err(|source| Error::Serialize {
                path: path.clone(),
                source,
            })?;

        std::fs::create_dir_all(&self.data_root).map_err(|e| Error::io(&self.data_root, e))?;
        replace_file(&path, text.as_bytes())
    }

    pub fn vault_root(&self, config: &WorkspaceConfig) -> PathBuf {
        let configured = Path::new(&config.vault_path);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            self.data_root.join(configured)
        }
    }

    /// A project is usable when it is registered in the config and its
    /// directory exists.
    pub fn validate_project(&self, name: &str) -> Result<ProjectConfig> {
        validate_id("project", name)?;
        let config = self.load_config()?;
        let Some(project) = config.projects.get(name) else {
            return Err(Error::NotFound(format!("Project '{name}' in {CONFIG_FILE}")));
        };
        if !self.project_dir(name).is_dir() {
            return Err(Error::NotFound(format!(
                "Project directory {}",
                self.project_dir(name).display()
            )));
        }
        Ok(project.clone())
    }

    /// Everything stored for `name`, read straight from disk. Used by
    /// renderers; never touches coordinator watermarks.
    ///
    /// Sprints listed in the index but missing on disk are skipped, as are
    /// a missing backlog or history.
    pub fn load_snapshot(&self, name: &str) -> Result<ProjectSnapshot> {
        let root = self.project_dir(name);
        let store = DocumentStore::new();

        let index: WorkIndex = read_as(&store, &root.join(EntityRef::Index.relative_path()))?;

        let mut sprints = Vec::with_capacity(index.sprints.len());
        for id in &index.sprints {
            let path = root.join(EntityRef::sprint(id.as_str()).relative_path());
            match read_as::<Sprint>(&store, &path) {
                Ok(sprint) => sprints.push(sprint),
                Err(Error::NotFound(_)) => {
                    tracing::warn!(project = name, sprint = %id, "Sprint listed in index has no file")
                }
                Err(e) => return Err(e),
            }
        }

        let backlog: Backlog =
            read_optional(&store, &root.join(EntityRef::Backlog.relative_path()))?;
        let history: History =
            read_optional(&store, &root.join(EntityRef::History.relative_path()))?;

        Ok(ProjectSnapshot {
            index,
            sprints,
            backlog: backlog.backlog,
            history: history.history,
        })
    }
}

fn read_as<T: serde::de::DeserializeOwned>(store: &DocumentStore, path: &Path) -> Result<T> {
    store
        .read(path)?
        .document
        .decode()
        .map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn read_optional<T>(store: &DocumentStore, path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match read_as(store, path) {
        Err(Error::NotFound(_)) => Ok(T::default()),
        other => other,
    }
}
