//! Debounced vault regeneration.
//!
//! Agents tend to mutate in bursts (add a sprint, add five stories, mark one
//! in progress). Regenerating the vault after each write is wasted work, so
//! every request restarts a per-project countdown and the regenerator runs
//! once the project has been quiet for the configured interval.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::vault::VaultError;

/// Default quiet interval before a regeneration fires.
pub const DEFAULT_QUIET: Duration = Duration::from_secs(2);

/// Produces the derived view of one project.
///
/// Implementations run on the blocking thread pool and may take as long as
/// they need; the coordinator never waits for them.
pub trait Regenerator: Send + Sync + 'static {
    fn regenerate(&self, project: &str) -> Result<(), VaultError>;
}

/// What to do with countdowns that are still pending at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Fire every pending regeneration immediately and wait for it.
    #[default]
    Flush,
    /// Cancel pending regenerations, logging each one.
    Drop,
}

impl FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flush" => Ok(Self::Flush),
            "drop" => Ok(Self::Drop),
            other => Err(format!("invalid shutdown policy '{other}' (expected flush or drop)")),
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Flush => "flush",
            Self::Drop => "drop",
        })
    }
}

/// Per-project trailing-edge debouncer in front of a [`Regenerator`].
///
/// Cloning is cheap; clones share the same countdowns.
#[derive(Clone)]
pub struct DebounceScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    quiet: Duration,
    regenerator: Arc<dyn Regenerator>,
    pending: Mutex<HashMap<String, Countdown>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generation: AtomicU64,
}

struct Countdown {
    generation: u64,
    handle: JoinHandle<()>,
}

impl DebounceScheduler {
    pub fn new(quiet: Duration, regenerator: Arc<dyn Regenerator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                quiet,
                regenerator,
                pending: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn quiet(&self) -> Duration {
        self.inner.quiet
    }

    /// Request a regeneration of `project`, restarting its countdown.
    ///
    /// Returns immediately. Must be called from within a tokio runtime;
    /// outside one the request is logged and dropped.
    pub fn schedule(&self, project: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(project, "No async runtime, dropping vault regeneration request");
            return;
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.inner.lock_pending();

        if let Some(previous) = pending.remove(project) {
            previous.handle.abort();
            tracing::trace!(project, "Regeneration countdown restarted");
        }

        let inner = Arc::clone(&self.inner);
        let key = project.to_string();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(inner.quiet).await;
            if inner.claim(&key, generation) {
                inner.fire(&key).await;
            }
        });

        pending.insert(project.to_string(), Countdown { generation, handle });
    }

    /// Projects with a regeneration waiting for its quiet interval.
    pub fn pending(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.inner.lock_pending().keys().cloned().collect();
        projects.sort();
        projects
    }

    /// Cancel the countdown of one project without regenerating.
    pub fn cancel(&self, project: &str) -> bool {
        match self.inner.lock_pending().remove(project) {
            Some(countdown) => {
                countdown.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel the countdown of `project` and release its run gate. A gate
    /// still held by a running or waiting regeneration is kept so that runs
    /// of the project keep excluding each other.
    pub fn forget(&self, project: &str) -> bool {
        let cancelled = self.cancel(project);
        let mut gates = self.inner.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates.get(project).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(project);
        }
        cancelled
    }

    /// Projects holding a run gate, i.e. regenerated since startup and not
    /// forgotten since.
    pub fn gated(&self) -> Vec<String> {
        let gates = self.inner.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let mut projects: Vec<String> = gates.keys().cloned().collect();
        projects.sort();
        projects
    }

    /// Regenerate `project` right now, superseding any pending countdown.
    /// Unlike debounced runs, the regenerator's error is returned.
    pub async fn regenerate_now(&self, project: &str) -> Result<(), VaultError> {
        self.cancel(project);
        self.inner.run(project).await
    }

    /// Fire every pending regeneration immediately and wait until all
    /// regenerations, including ones already running, have finished.
    pub async fn flush(&self) {
        let drained: Vec<(String, Countdown)> = self.inner.lock_pending().drain().collect();
        for (project, countdown) in drained {
            countdown.handle.abort();
            tracing::info!(project = %project, "Flushing pending vault regeneration");
            self.inner.fire(&project).await;
        }

        let gates: Vec<Arc<tokio::sync::Mutex<()>>> = self
            .inner
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for gate in gates {
            let _ = gate.lock().await;
        }
    }

    /// Cancel every pending regeneration. Returns the affected projects.
    pub fn drop_pending(&self) -> Vec<String> {
        let drained: Vec<(String, Countdown)> = self.inner.lock_pending().drain().collect();
        let mut projects = Vec::with_capacity(drained.len());
        for (project, countdown) in drained {
            countdown.handle.abort();
            tracing::warn!(project = %project, "Dropped pending vault regeneration");
            projects.push(project);
        }
        projects.sort();
        projects
    }

    pub async fn shutdown(&self, policy: ShutdownPolicy) {
        match policy {
            ShutdownPolicy::Flush => self.flush().await,
            ShutdownPolicy::Drop => {
                self.drop_pending();
            }
        }
    }
}

impl Inner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Countdown>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the countdown for `project` if it is still the one identified
    /// by `generation`. A newer `schedule` call replaces the entry, so a
    /// superseded timer that wakes up late claims nothing.
    fn claim(&self, project: &str, generation: u64) -> bool {
        let mut pending = self.lock_pending();
        match pending.get(project) {
            Some(countdown) if countdown.generation == generation => {
                pending.remove(project);
                true
            }
            _ => false,
        }
    }

    fn gate(&self, project: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(project.to_string()).or_default())
    }

    /// Run a regeneration, logging and swallowing failures. A failed vault
    /// refresh never affects the mutation that requested it.
    async fn fire(&self, project: &str) {
        if let Err(e) = self.run(project).await {
            tracing::error!(project, error = %e, "Vault regeneration failed");
        }
    }

    /// Regenerations of the same project never overlap.
    async fn run(&self, project: &str) -> Result<(), VaultError> {
        let gate = self.gate(project);
        let _running = gate.lock().await;

        let regenerator = Arc::clone(&self.regenerator);
        let name = project.to_string();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || regenerator.regenerate(&name))
            .await
            .map_err(|e| VaultError::Task(e.to_string()))?;

        if result.is_ok() {
            tracing::info!(
                project,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Vault synced"
            );
        }
        result
    }
}
