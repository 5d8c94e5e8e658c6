//! The mutation coordination engine.
//!
//! # Flow
//!
//! ```text
//! Coordinator::lock(project)      bounded wait, FIFO per project
//!   └─ ProjectGuard::mutate(record, op)
//!        1. watermark check       refuse external edits
//!        2. store read
//!        3. op(&mut document)     pure, may reject
//!        4. store write           atomic, expects the pre-read mtime
//!        5. watermark advance
//! drop(ProjectGuard)              schedules one debounced regeneration
//!                                 if anything was written
//! ```
//!
//! Mutations on different projects never wait for each other. The
//! [`DebounceScheduler`] runs regeneration outside the lock, so a mutation
//! returns as soon as its write is on disk.

pub mod debounce;
pub mod watermark;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use debounce::{DebounceScheduler, Regenerator, ShutdownPolicy, DEFAULT_QUIET};
pub use watermark::WatermarkTable;

use crate::error::{Error, Result};
use crate::models::validate_id;
use crate::store::{remove_stale_temp_files, Document, DocumentStore, Stored};

/// Default bound on how long a caller waits for a project's write lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// One YAML-backed entity of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Index,
    Sprint(String),
    Backlog,
    History,
}

impl EntityRef {
    pub fn sprint(id: impl Into<String>) -> Self {
        Self::Sprint(id.into())
    }

    /// Location of the entity file relative to the project directory.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Self::Index => PathBuf::from("work-index.yaml"),
            Self::Sprint(id) => Path::new("sprints").join(format!("{id}.yaml")),
            Self::Backlog => PathBuf::from("backlog.yaml"),
            Self::History => PathBuf::from("history.yaml"),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Sprint(id) => write!(f, "sprint:{id}"),
            Self::Backlog => f.write_str("backlog"),
            Self::History => f.write_str("history"),
        }
    }
}

/// What a mutation targets and who asked for it.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub entity: EntityRef,
    pub kind: &'static str,
    pub agent: String,
}

impl MutationRecord {
    pub fn new(entity: EntityRef, kind: &'static str, agent: impl Into<String>) -> Self {
        Self {
            entity,
            kind,
            agent: agent.into(),
        }
    }
}

/// Registry entry for one project. The watermark table doubles as the
/// project's write lock: holding it is holding the lock.
struct ProjectState {
    name: String,
    root: PathBuf,
    marks: Arc<Mutex<WatermarkTable>>,
}

/// Serializes mutations per project. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    projects_root: PathBuf,
    lock_timeout: Duration,
    store: DocumentStore,
    scheduler: Option<DebounceScheduler>,
    registry: RwLock<HashMap<String, Arc<ProjectState>>>,
}

pub struct CoordinatorBuilder {
    projects_root: PathBuf,
    lock_timeout: Duration,
    scheduler: Option<DebounceScheduler>,
}

impl CoordinatorBuilder {
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Scheduler that receives a regeneration request after every guard
    /// that wrote something. Without one, nothing is regenerated.
    pub fn scheduler(mut self, scheduler: DebounceScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            inner: Arc::new(Inner {
                projects_root: self.projects_root,
                lock_timeout: self.lock_timeout,
                store: DocumentStore::new(),
                scheduler: self.scheduler,
                registry: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl Coordinator {
    /// `projects_root` holds one directory per project.
    pub fn builder(projects_root: impl Into<PathBuf>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            projects_root: projects_root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            scheduler: None,
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.inner.projects_root
    }

    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    pub fn scheduler(&self) -> Option<&DebounceScheduler> {
        self.inner.scheduler.as_ref()
    }

    pub fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout
    }

    /// Acquire the write lock of `project`, waiting at most the configured
    /// lock timeout. Waiters are served in arrival order.
    pub async fn lock(&self, project: &str) -> Result<ProjectGuard> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.inner.lock_timeout;

        loop {
            let state = self.project(project)?;
            let guard = self.acquire(project, state, deadline).await?;
            // A waiter may be granted the lock of an entry that was forgotten
            // while it queued; retry against the current one.
            if self.is_current(&guard.state) {
                let waited = started.elapsed();
                if waited > Duration::from_millis(100) {
                    tracing::debug!(project, waited_ms = waited.as_millis() as u64, "Acquired project lock after waiting");
                }
                return Ok(guard);
            }
            tracing::debug!(project, "Project state was forgotten while waiting, retrying");
        }
    }

    async fn acquire(
        &self,
        project: &str,
        state: Arc<ProjectState>,
        deadline: tokio::time::Instant,
    ) -> Result<ProjectGuard> {
        let marks = tokio::time::timeout_at(deadline, Arc::clone(&state.marks).lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(project, waited_ms = self.inner.lock_timeout.as_millis() as u64, "Lock wait timed out");
                Error::LockTimeout {
                    project: project.to_string(),
                    waited: self.inner.lock_timeout,
                }
            })?;

        Ok(ProjectGuard {
            state,
            marks,
            coordinator: Arc::clone(&self.inner),
            dirty: false,
            acquired: Instant::now(),
        })
    }

    fn is_current(&self, state: &Arc<ProjectState>) -> bool {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&state.name)
            .is_some_and(|current| Arc::ptr_eq(current, state))
    }

    /// Lock `project`, apply one mutation, release.
    pub async fn mutate<T>(
        &self,
        project: &str,
        record: &MutationRecord,
        op: impl FnOnce(&mut Document) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock(project).await?;
        guard.mutate(record, op)
    }

    /// Read an entity under the project lock, acknowledging its current
    /// on-disk version.
    pub async fn read(&self, project: &str, entity: &EntityRef) -> Result<Document> {
        let mut guard = self.lock(project).await?;
        guard.read(entity)
    }

    /// Drop everything held for `project`: its registry entry, its
    /// watermarks and any pending regeneration.
    ///
    /// Waits for the project lock, so a mutation in flight finishes first
    /// and no later caller can hold the old lock alongside a new one.
    pub async fn forget(&self, project: &str) -> Result<bool> {
        let state = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned();

        match state {
            Some(state) => {
                let deadline = tokio::time::Instant::now() + self.inner.lock_timeout;
                let guard = self.acquire(project, state, deadline).await?;
                Ok(guard.forget())
            }
            None => {
                if let Some(scheduler) = &self.inner.scheduler {
                    scheduler.forget(project);
                }
                Ok(false)
            }
        }
    }

    /// Names of projects touched since startup.
    pub fn known_projects(&self) -> Vec<String> {
        let registry = self.inner.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    fn project(&self, name: &str) -> Result<Arc<ProjectState>> {
        if let Some(state) = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(state));
        }

        validate_id("project", name)?;
        let root = self.inner.projects_root.join(name);
        if !root.is_dir() {
            return Err(Error::NotFound(format!("Project '{name}'")));
        }

        let mut registry = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let state = registry.entry(name.to_string()).or_insert_with(|| {
            let removed =
                remove_stale_temp_files(&root) + remove_stale_temp_files(&root.join("sprints"));
            if removed > 0 {
                tracing::info!(project = name, removed, "Removed stale temp files");
            }
            tracing::debug!(project = name, "Registered project state");
            Arc::new(ProjectState {
                name: name.to_string(),
                root,
                marks: Arc::new(Mutex::new(WatermarkTable::new())),
            })
        });
        Ok(Arc::clone(state))
    }
}

/// Exclusive access to one project, released on drop.
///
/// A guard may read and mutate several entities; however many writes it
/// makes, dropping it requests at most one regeneration.
pub struct ProjectGuard {
    state: Arc<ProjectState>,
    marks: OwnedMutexGuard<WatermarkTable>,
    coordinator: Arc<Inner>,
    dirty: bool,
    acquired: Instant,
}

impl ProjectGuard {
    pub fn project(&self) -> &str {
        &self.state.name
    }

    pub fn root(&self) -> &Path {
        &self.state.root
    }

    pub fn path(&self, entity: &EntityRef) -> PathBuf {
        self.state.root.join(entity.relative_path())
    }

    pub fn exists(&self, entity: &EntityRef) -> bool {
        self.path(entity).is_file()
    }

    /// Whether this guard has written anything yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read an entity and acknowledge its on-disk version: the watermark is
    /// moved to what was just read, so a pending external edit is accepted.
    pub fn read(&mut self, entity: &EntityRef) -> Result<Document> {
        let Stored { document, modified } = self.coordinator.store.read(&self.path(entity))?;
        self.marks.observe(entity, modified);
        Ok(document)
    }

    pub fn read_as<T: DeserializeOwned>(&mut self, entity: &EntityRef) -> Result<T> {
        let path = self.path(entity);
        let document = self.read(entity)?;
        decode(&path, &document)
    }

    /// Read an entity without touching its watermark.
    pub fn peek(&self, entity: &EntityRef) -> Result<Document> {
        Ok(self.coordinator.store.read(&self.path(entity))?.document)
    }

    pub fn peek_as<T: DeserializeOwned>(&self, entity: &EntityRef) -> Result<T> {
        let path = self.path(entity);
        decode(&path, &self.peek(entity)?)
    }

    /// Run the conflict check alone, e.g. for every entity of a
    /// multi-entity operation before the first of them is written.
    pub fn check(&mut self, entity: &EntityRef) -> Result<()> {
        let path = self.path(entity);
        self.marks.check(entity, &path)
    }

    /// Apply `op` to the entity named by `record` and write the result.
    ///
    /// Nothing is written if the check, the read or `op` fails.
    pub fn mutate<T>(
        &mut self,
        record: &MutationRecord,
        op: impl FnOnce(&mut Document) -> Result<T>,
    ) -> Result<T> {
        let entity = &record.entity;
        let path = self.path(entity);

        self.marks.check(entity, &path)?;
        let Stored {
            mut document,
            modified,
        } = self.coordinator.store.read(&path)?;

        // The file may have been replaced between the check and the read.
        let held = self.marks.get(entity);
        if held != Some(modified) {
            tracing::warn!(project = %self.state.name, entity = %entity, "External edit detected during read");
            return Err(Error::ConcurrentModification {
                path,
                observed: Some(modified),
                expected: held,
            });
        }

        let value = op(&mut document)?;

        let written = self
            .coordinator
            .store
            .write(&path, &document, Some(modified))?;
        self.marks.observe(entity, written);
        self.dirty = true;

        tracing::info!(
            project = %self.state.name,
            entity = %entity,
            kind = record.kind,
            agent = %record.agent,
            "Mutation applied"
        );
        Ok(value)
    }

    /// Typed variant of [`mutate`](Self::mutate): the document is decoded
    /// into `D`, handed to `op`, and encoded back under the same header.
    pub fn mutate_as<D, T>(
        &mut self,
        record: &MutationRecord,
        op: impl FnOnce(&mut D) -> Result<T>,
    ) -> Result<T>
    where
        D: Serialize + DeserializeOwned,
    {
        let path = self.path(&record.entity);
        self.mutate(record, |document| {
            let mut value: D = decode(&path, document)?;
            let out = op(&mut value)?;
            document.encode(&value).map_err(|source| Error::Serialize {
                path: path.clone(),
                source,
            })?;
            Ok(out)
        })
    }

    /// Create a new entity file. Fails if the file already exists.
    pub fn create(&mut self, record: &MutationRecord, document: &Document) -> Result<()> {
        let path = self.path(&record.entity);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let written = self.coordinator.store.write(&path, document, None)?;
        self.marks.observe(&record.entity, written);
        self.dirty = true;

        tracing::info!(
            project = %self.state.name,
            entity = %record.entity,
            kind = record.kind,
            agent = %record.agent,
            "Entity created"
        );
        Ok(())
    }

    pub fn create_as<T: Serialize>(&mut self, record: &MutationRecord, value: &T) -> Result<()> {
        let document = Document::from_value(value).map_err(|source| Error::Serialize {
            path: self.path(&record.entity),
            source,
        })?;
        self.create(record, &document)
    }

    /// Request a regeneration on release even if nothing was written
    /// through this guard.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Remove this project from the coordinator while still holding its
    /// lock. Callers queued on the old lock re-resolve the project once it
    /// is released. Returns whether the registry entry was removed.
    pub fn forget(mut self) -> bool {
        self.dirty = false;
        let removed = {
            let mut registry = self
                .coordinator
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match registry.get(&self.state.name) {
                Some(current) if Arc::ptr_eq(current, &self.state) => {
                    registry.remove(&self.state.name);
                    true
                }
                _ => false,
            }
        };

        if let Some(scheduler) = &self.coordinator.scheduler {
            scheduler.forget(&self.state.name);
        }
        if removed {
            tracing::info!(project = %self.state.name, "Forgot project state");
        }
        removed
    }
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        tracing::trace!(
            project = %self.state.name,
            held_ms = self.acquired.elapsed().as_millis() as u64,
            "Released project lock"
        );
        if self.dirty {
            if let Some(scheduler) = &self.coordinator.scheduler {
                scheduler.schedule(&self.state.name);
            }
        }
    }
}

fn decode<T: DeserializeOwned>(path: &Path, document: &Document) -> Result<T> {
    document.decode().map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}
