//! Mutation coordinator integration tests.
//!
//! Covers the write lock (serialization, bounded wait, per-project
//! independence), external edit detection and the regeneration requests a
//! mutation leaves behind.

use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use worksync::engine::{Coordinator, DebounceScheduler, EntityRef, MutationRecord, Regenerator};
use worksync::models::{Backlog, BacklogItem, BacklogStatus, History, HistoryEntry, NewBacklogItem};
use worksync::vault::VaultError;
use worksync::Error;

const QUIET: Duration = Duration::from_millis(50);
const SETTLE: Duration = Duration::from_millis(400);

/// Records every regeneration it is asked for.
#[derive(Default)]
struct CountingRegenerator {
    calls: AtomicUsize,
    projects: Mutex<Vec<String>>,
}

impl CountingRegenerator {
    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn projects(&self) -> Vec<String> {
        self.projects.lock().unwrap().clone()
    }
}

impl Regenerator for CountingRegenerator {
    fn regenerate(&self, project: &str) -> Result<(), VaultError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.projects.lock().unwrap().push(project.to_string());
        Ok(())
    }
}

/// A data root with projects `alpha` and `beta`, each holding a backlog and
/// a history file.
fn setup_root() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for project in ["alpha", "beta"] {
        let root = dir.path().join(project);
        fs::create_dir_all(root.join("sprints")).unwrap();
        fs::write(
            root.join("backlog.yaml"),
            "# backlog header\n\nbacklog:\n- id: B-1\n  summary: Existing\n  status: todo\n",
        )
        .unwrap();
        fs::write(root.join("history.yaml"), "history: []\n").unwrap();
        backdate(&root.join("backlog.yaml"), 300);
        backdate(&root.join("history.yaml"), 300);
    }
    dir
}

fn setup() -> (TempDir, Coordinator, Arc<CountingRegenerator>) {
    let dir = setup_root();
    let regenerator = Arc::new(CountingRegenerator::default());
    let coordinator = Coordinator::builder(dir.path())
        .scheduler(DebounceScheduler::new(QUIET, regenerator.clone()))
        .build();
    (dir, coordinator, regenerator)
}

/// Simulate a hand edit that lands at a distinct, earlier modification time.
fn edit_externally(path: &Path, contents: &str, secs_ago: u64) {
    fs::write(path, contents).unwrap();
    backdate(path, secs_ago);
}

fn backdate(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

fn backlog_item(id: &str) -> BacklogItem {
    NewBacklogItem {
        id: id.to_string(),
        summary: format!("Item {id}"),
        theme: "testing".to_string(),
        status: BacklogStatus::Todo,
        related_sprints: Vec::new(),
    }
    .into()
}

async fn add_item(coordinator: &Coordinator, project: &str, id: &str) -> worksync::Result<()> {
    let mut guard = coordinator.lock(project).await?;
    let record = MutationRecord::new(EntityRef::Backlog, "add_backlog", "test-agent");
    let item = backlog_item(id);
    guard.mutate_as(&record, |backlog: &mut Backlog| {
        backlog.backlog.push(item);
        Ok(())
    })
}

fn read_backlog(dir: &TempDir, project: &str) -> Backlog {
    let text = fs::read_to_string(dir.path().join(project).join("backlog.yaml")).unwrap();
    serde_yaml::from_str(&text).unwrap()
}

mod mutations {
    use super::*;

    #[tokio::test]
    async fn writes_the_change_and_keeps_the_header() {
        let (dir, coordinator, _) = setup();

        add_item(&coordinator, "alpha", "B-2").await.expect("mutation failed");

        let text = fs::read_to_string(dir.path().join("alpha/backlog.yaml")).unwrap();
        assert!(text.starts_with("# backlog header\n\n"));
        let backlog = read_backlog(&dir, "alpha");
        assert_eq!(backlog.backlog.len(), 2);
        assert_eq!(backlog.backlog[1].id, "B-2");
    }

    #[tokio::test]
    async fn failing_operation_writes_nothing() {
        let (dir, coordinator, _) = setup();
        let before = fs::read_to_string(dir.path().join("alpha/backlog.yaml")).unwrap();

        let record = MutationRecord::new(EntityRef::Backlog, "add_backlog", "test-agent");
        let result: worksync::Result<()> = coordinator
            .mutate("alpha", &record, |_| Err(Error::rejected("nope")))
            .await;

        assert!(matches!(result, Err(Error::Rejected(_))));
        let after = fs::read_to_string(dir.path().join("alpha/backlog.yaml")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let (_dir, coordinator, _) = setup();

        let err = add_item(&coordinator, "gamma", "B-2").await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_entity_is_not_found() {
        let (_dir, coordinator, _) = setup();

        let record = MutationRecord::new(EntityRef::sprint("nope"), "update_sprint", "test-agent");
        let err = coordinator
            .mutate("alpha", &record, |_| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_entity_is_a_parse_error() {
        let (dir, coordinator, _) = setup();
        edit_externally(&dir.path().join("alpha/history.yaml"), "history: [oops\n", 120);

        let record = MutationRecord::new(EntityRef::History, "add_history", "test-agent");
        let err = coordinator
            .mutate("alpha", &record, |_| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Parse { .. }));
    }

    #[tokio::test]
    async fn create_refuses_an_existing_file() {
        let (_dir, coordinator, _) = setup();
        let mut guard = coordinator.lock("alpha").await.unwrap();

        let record = MutationRecord::new(EntityRef::History, "create", "test-agent");
        let err = guard.create_as(&record, &History::default()).unwrap_err();

        assert!(matches!(err, Error::ConcurrentModification { .. }));
    }
}

mod external_edits {
    use super::*;

    #[tokio::test]
    async fn mutation_after_an_external_edit_is_refused() {
        let (dir, coordinator, _) = setup();
        let path = dir.path().join("alpha/backlog.yaml");
        add_item(&coordinator, "alpha", "B-2").await.unwrap();

        let hand_edit = "backlog:\n- id: HAND\n  summary: Edited in an editor\n  status: todo\n";
        edit_externally(&path, hand_edit, 60);

        let err = add_item(&coordinator, "alpha", "B-3").await.unwrap_err();

        assert!(matches!(err, Error::ConcurrentModification { .. }));
        assert_eq!(err.kind(), "concurrent_modification");
        assert_eq!(fs::read_to_string(&path).unwrap(), hand_edit);
    }

    #[tokio::test]
    async fn refusal_repeats_until_the_edit_is_acknowledged() {
        let (dir, coordinator, _) = setup();
        let path = dir.path().join("alpha/backlog.yaml");
        add_item(&coordinator, "alpha", "B-2").await.unwrap();
        edit_externally(&path, "backlog: []\n", 60);

        assert!(add_item(&coordinator, "alpha", "B-3").await.is_err());
        assert!(add_item(&coordinator, "alpha", "B-3").await.is_err());

        coordinator.read("alpha", &EntityRef::Backlog).await.unwrap();
        add_item(&coordinator, "alpha", "B-3").await.expect("mutation after refresh failed");

        let ids: Vec<String> = read_backlog(&dir, "alpha").backlog.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["B-3"]);
    }

    #[tokio::test]
    async fn first_sight_of_a_file_adopts_its_version() {
        let (dir, coordinator, _) = setup();
        edit_externally(&dir.path().join("alpha/backlog.yaml"), "backlog: []\n", 90);

        add_item(&coordinator, "alpha", "B-9").await.expect("first mutation failed");

        assert_eq!(read_backlog(&dir, "alpha").backlog.len(), 1);
    }

    #[tokio::test]
    async fn edits_to_other_entities_do_not_interfere() {
        let (dir, coordinator, _) = setup();
        add_item(&coordinator, "alpha", "B-2").await.unwrap();
        edit_externally(&dir.path().join("alpha/history.yaml"), "history: []\n", 45);

        add_item(&coordinator, "alpha", "B-3").await.expect("backlog mutation failed");
    }

    #[tokio::test]
    async fn deleted_entity_is_not_found() {
        let (dir, coordinator, _) = setup();
        add_item(&coordinator, "alpha", "B-2").await.unwrap();
        fs::remove_file(dir.path().join("alpha/backlog.yaml")).unwrap();

        let err = add_item(&coordinator, "alpha", "B-3").await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }
}

mod locking {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_all_kept() {
        let (dir, coordinator, _) = setup();
        let agents = 20;

        let mut handles = Vec::new();
        for n in 0..agents {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let record = MutationRecord::new(EntityRef::History, "add_history", format!("agent-{n}"));
                coordinator
                    .mutate("alpha", &record, |doc| {
                        let mut history: History = doc.decode().unwrap();
                        history.history.push(HistoryEntry::today(format!("entry {n}"), vec![]));
                        doc.encode(&history).unwrap();
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().expect("append failed");
        }

        let text = fs::read_to_string(dir.path().join("alpha/history.yaml")).unwrap();
        let history: History = serde_yaml::from_str(&text).unwrap();
        assert_eq!(history.history.len(), agents);
        for n in 0..agents {
            let summary = format!("entry {n}");
            assert!(history.history.iter().any(|e| e.summary == summary), "missing {summary}");
        }
    }

    #[tokio::test]
    async fn lock_wait_is_bounded() {
        let dir = setup_root();
        let coordinator = Coordinator::builder(dir.path())
            .lock_timeout(Duration::from_millis(50))
            .build();

        let _held = coordinator.lock("alpha").await.unwrap();
        let err = coordinator.lock("alpha").await.err().expect("second lock should time out");

        match err {
            Error::LockTimeout { project, waited } => {
                assert_eq!(project, "alpha");
                assert_eq!(waited, Duration::from_millis(50));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn projects_are_locked_independently() {
        let dir = setup_root();
        let coordinator = Coordinator::builder(dir.path())
            .lock_timeout(Duration::from_millis(50))
            .build();

        let _alpha = coordinator.lock("alpha").await.unwrap();
        add_item(&coordinator, "beta", "B-2").await.expect("beta should not wait for alpha");
    }

    #[tokio::test]
    async fn lock_is_released_when_the_guard_drops() {
        let dir = setup_root();
        let coordinator = Coordinator::builder(dir.path())
            .lock_timeout(Duration::from_millis(50))
            .build();

        drop(coordinator.lock("alpha").await.unwrap());
        coordinator.lock("alpha").await.expect("lock should be free again");
    }

    #[tokio::test]
    async fn waiting_writer_sees_the_previous_write() {
        let (dir, coordinator, _) = setup();

        let mut guard = coordinator.lock("alpha").await.unwrap();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { add_item(&coordinator, "alpha", "B-3").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let record = MutationRecord::new(EntityRef::Backlog, "add_backlog", "first");
        guard
            .mutate_as(&record, |backlog: &mut Backlog| {
                backlog.backlog.push(backlog_item("B-2"));
                Ok(())
            })
            .unwrap();
        drop(guard);

        waiter.await.unwrap().expect("waiting writer failed");
        let ids: Vec<String> = read_backlog(&dir, "alpha").backlog.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["B-1", "B-2", "B-3"]);
    }

    #[tokio::test]
    async fn forget_waits_for_the_held_lock() {
        let dir = setup_root();
        let coordinator = Coordinator::builder(dir.path())
            .lock_timeout(Duration::from_millis(100))
            .build();

        let _first = coordinator.lock("alpha").await.unwrap();

        let err = coordinator.forget("alpha").await.err().expect("forget should wait for the holder");
        assert!(matches!(err, Error::LockTimeout { .. }));

        let err = coordinator.lock("alpha").await.err().expect("second lock should still wait");
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert_eq!(coordinator.known_projects(), vec!["alpha"]);
    }

    /// Hold the project lock for a while; returns whether another holder
    /// was active at the same time.
    async fn hold_lock(coordinator: Coordinator, holders: Arc<AtomicUsize>) -> worksync::Result<bool> {
        let _guard = coordinator.lock("alpha").await?;
        let overlapped = holders.fetch_add(1, Ordering::SeqCst) > 0;
        tokio::time::sleep(Duration::from_millis(100)).await;
        holders.fetch_sub(1, Ordering::SeqCst);
        Ok(overlapped)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_on_a_forgotten_lock_never_overlap_new_holders() {
        let dir = setup_root();
        let coordinator = Coordinator::builder(dir.path())
            .lock_timeout(Duration::from_secs(5))
            .build();
        let holders = Arc::new(AtomicUsize::new(0));

        let first = coordinator.lock("alpha").await.unwrap();
        let queued: Vec<_> = (0..3)
            .map(|_| tokio::spawn(hold_lock(coordinator.clone(), holders.clone())))
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(first.forget());
        let late: Vec<_> = (0..3)
            .map(|_| tokio::spawn(hold_lock(coordinator.clone(), holders.clone())))
            .collect();

        for handle in queued.into_iter().chain(late) {
            let overlapped = handle.await.unwrap().expect("lock failed");
            assert!(!overlapped, "two holders of one project at once");
        }
        assert_eq!(coordinator.known_projects(), vec!["alpha"]);
    }
}

mod regeneration {
    use super::*;

    #[tokio::test]
    async fn successful_mutation_requests_one_regeneration() {
        let (_dir, coordinator, regenerator) = setup();

        add_item(&coordinator, "alpha", "B-7").await.unwrap();
        tokio::time::sleep(SETTLE).await;

        assert_eq!(regenerator.count(), 1);
        assert_eq!(regenerator.projects(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn several_writes_under_one_guard_request_one_regeneration() {
        let (_dir, coordinator, regenerator) = setup();

        {
            let mut guard = coordinator.lock("alpha").await.unwrap();
            let record = MutationRecord::new(EntityRef::Backlog, "add_backlog", "test-agent");
            guard
                .mutate_as(&record, |b: &mut Backlog| {
                    b.backlog.push(backlog_item("B-2"));
                    Ok(())
                })
                .unwrap();
            let record = MutationRecord::new(EntityRef::History, "add_history", "test-agent");
            guard
                .mutate_as(&record, |h: &mut History| {
                    h.history.push(HistoryEntry::today("Added B-2", vec![]));
                    Ok(())
                })
                .unwrap();
        }
        tokio::time::sleep(SETTLE).await;

        assert_eq!(regenerator.count(), 1);
    }

    #[tokio::test]
    async fn failed_mutation_requests_nothing() {
        let (dir, coordinator, regenerator) = setup();
        add_item(&coordinator, "alpha", "B-2").await.unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(regenerator.count(), 1);

        edit_externally(&dir.path().join("alpha/backlog.yaml"), "backlog: []\n", 60);
        assert!(add_item(&coordinator, "alpha", "B-3").await.is_err());

        let record = MutationRecord::new(EntityRef::History, "add_history", "test-agent");
        let _ = coordinator
            .mutate("alpha", &record, |_| -> worksync::Result<()> { Err(Error::rejected("no")) })
            .await;
        tokio::time::sleep(SETTLE).await;

        assert_eq!(regenerator.count(), 1);
    }

    #[tokio::test]
    async fn reads_request_nothing() {
        let (_dir, coordinator, regenerator) = setup();

        coordinator.read("alpha", &EntityRef::Backlog).await.unwrap();
        tokio::time::sleep(SETTLE).await;

        assert_eq!(regenerator.count(), 0);
    }

    #[tokio::test]
    async fn burst_of_mutations_coalesces() {
        let (_dir, coordinator, regenerator) = setup();

        for n in 0..5 {
            add_item(&coordinator, "alpha", &format!("B-{}", n + 10)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(SETTLE).await;

        assert_eq!(regenerator.count(), 1);
    }

    #[tokio::test]
    async fn projects_regenerate_separately() {
        let (_dir, coordinator, regenerator) = setup();

        add_item(&coordinator, "alpha", "B-2").await.unwrap();
        add_item(&coordinator, "beta", "B-2").await.unwrap();
        tokio::time::sleep(SETTLE).await;

        let mut projects = regenerator.projects();
        projects.sort();
        assert_eq!(projects, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn forget_cancels_a_pending_regeneration() {
        let (_dir, coordinator, regenerator) = setup();

        add_item(&coordinator, "alpha", "B-2").await.unwrap();
        assert!(coordinator.forget("alpha").await.unwrap());
        tokio::time::sleep(SETTLE).await;

        assert_eq!(regenerator.count(), 0);
        assert!(coordinator.known_projects().is_empty());
    }
}
