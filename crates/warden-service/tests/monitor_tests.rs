//! End-to-end tests for the reconciliation loop.
//!
//! Tests cover:
//!  1. Scan → modify → delete → create flow through the monitor
//!  2. No-op writes stay silent
//!  3. Per-path alert ordering across shards
//!  4. Delivery failures are counted, not fatal
//!  5. Shutdown stops intake and drains accepted work
//!  6. Audit sweep catches changes the watcher never reported
//!  7. Live watcher delivers normalized events

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use warden_core::scanner::resolve_root;
use warden_core::{
    Alert, AlertKind, AlertSink, BaselineStore, FileHasher, FsEvent, Reconciler, Scanner,
};
use warden_service::audit::spawn_audit_loop;
use warden_service::monitor::{Monitor, MonitorOptions, MonitorStats};
use warden_service::watcher::FileWatcher;

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    fn kinds_for(&self, path: &Path) -> Vec<AlertKind> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.path == path)
            .map(|a| a.kind)
            .collect()
    }

    fn len(&self) -> usize {
        self.alerts.lock().len()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl AlertSink for FailingSink {
    async fn notify(&self, _alert: &Alert) -> Result<()> {
        Err(anyhow!("relay refused connection"))
    }
}

/// Holds every delivery until the gate is opened.
struct GatedSink {
    gate: Semaphore,
    entered: AtomicUsize,
    delivered: Mutex<Vec<Alert>>,
}

impl GatedSink {
    fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn open(&self) {
        self.gate.add_permits(64);
    }
}

#[async_trait]
impl AlertSink for GatedSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}

/// Scan `root` and build a reconciler seeded with the result.
fn seeded(root: &Path) -> (PathBuf, Scanner, Arc<Reconciler>) {
    let root = resolve_root(root).unwrap();
    let hasher = Arc::new(FileHasher::default());
    let scanner = Scanner::new(root.clone(), hasher.clone());
    let report = scanner.scan();
    assert!(report.errors.is_empty());
    let reconciler = Arc::new(Reconciler::new(
        root.clone(),
        BaselineStore::from_baseline(report.baseline),
        hasher,
    ));
    (root, scanner, reconciler)
}

async fn run_to_completion(
    reconciler: Arc<Reconciler>,
    sink: Arc<dyn AlertSink>,
    workers: usize,
    events: Vec<FsEvent>,
) -> MonitorStats {
    let (tx, rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Monitor::new(
        reconciler,
        sink,
        MonitorOptions {
            workers,
            queue_capacity: 16,
        },
    );
    let task = tokio::spawn(monitor.run(rx, shutdown_rx));
    for event in events {
        tx.send(event).await.unwrap();
    }
    drop(tx);
    task.await.unwrap()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ─── Test 1: full lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn test_lifecycle_through_monitor() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
    let (root, _, reconciler) = seeded(dir.path());
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let c = root.join("c.txt");

    fs::write(&a, b"alpha v2").unwrap();
    fs::remove_file(&b).unwrap();
    fs::write(&c, b"charlie").unwrap();

    let sink = Arc::new(RecordingSink::default());
    let stats = run_to_completion(
        reconciler.clone(),
        sink.clone(),
        4,
        vec![
            FsEvent::Modified(a.clone()),
            FsEvent::Deleted(b.clone()),
            FsEvent::Created {
                path: c.clone(),
                is_dir: false,
            },
        ],
    )
    .await;

    assert_eq!(stats.events, 3);
    assert_eq!(stats.alerts, 3);
    assert_eq!(sink.kinds_for(&a), vec![AlertKind::FileModified]);
    assert_eq!(sink.kinds_for(&b), vec![AlertKind::FileDeleted]);
    assert_eq!(sink.kinds_for(&c), vec![AlertKind::FileCreated]);

    let hasher = FileHasher::default();
    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[&a], hasher.digest_bytes(b"alpha v2"));
    assert_eq!(snapshot[&c], hasher.digest_bytes(b"charlie"));
}

// ─── Test 2: no-op writes ───────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_notifications_are_silent() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("same.txt"), b"unchanged").unwrap();
    let (root, _, reconciler) = seeded(dir.path());
    let path = root.join("same.txt");

    let sink = Arc::new(RecordingSink::default());
    let stats = run_to_completion(
        reconciler,
        sink.clone(),
        2,
        vec![
            FsEvent::Modified(path.clone()),
            FsEvent::Modified(path.clone()),
            FsEvent::Deleted(root.join("never-existed")),
        ],
    )
    .await;

    assert_eq!(sink.len(), 0);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(stats.ignored, 1);
}

// ─── Test 3: per-path ordering ──────────────────────────────────────────────

#[tokio::test]
async fn test_alerts_for_one_path_arrive_in_order() {
    let dir = tempdir().unwrap();
    let (root, _, reconciler) = seeded(dir.path());

    let mut events = Vec::new();
    let mut paths = Vec::new();
    for i in 0..20 {
        let path = root.join(format!("f{i}.txt"));
        fs::write(&path, format!("content {i}")).unwrap();
        events.push(FsEvent::Created {
            path: path.clone(),
            is_dir: false,
        });
        paths.push(path);
    }
    for path in &paths {
        events.push(FsEvent::Deleted(path.clone()));
    }

    let sink = Arc::new(RecordingSink::default());
    let stats = run_to_completion(reconciler.clone(), sink.clone(), 4, events).await;

    // a delete reconciled ahead of its create would be ignored and leave the
    // path tracked
    for path in &paths {
        assert_eq!(
            sink.kinds_for(path),
            vec![AlertKind::FileCreated, AlertKind::FileDeleted],
            "unexpected alerts for {}",
            path.display()
        );
    }
    assert_eq!(stats.events, 40);
    assert_eq!(reconciler.tracked(), 0);
}

#[tokio::test]
async fn test_create_then_delete_alerts_in_order() {
    let dir = tempdir().unwrap();
    let (root, _, reconciler) = seeded(dir.path());
    let path = root.join("transient.txt");
    fs::write(&path, b"short lived").unwrap();

    let sink = Arc::new(RecordingSink::default());
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(
        Monitor::new(reconciler.clone(), sink.clone(), MonitorOptions::default())
            .run(rx, shutdown_rx),
    );

    tx.send(FsEvent::Created {
        path: path.clone(),
        is_dir: false,
    })
    .await
    .unwrap();
    wait_for(|| sink.len() == 1).await;
    fs::remove_file(&path).unwrap();
    tx.send(FsEvent::Deleted(path.clone())).await.unwrap();
    drop(tx);
    task.await.unwrap();

    assert_eq!(
        sink.kinds_for(&path),
        vec![AlertKind::FileCreated, AlertKind::FileDeleted]
    );
    assert!(reconciler.digest_of(&path).is_none());
}

// ─── Test 4: delivery failures ──────────────────────────────────────────────

#[tokio::test]
async fn test_delivery_failure_does_not_affect_baseline() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("cfg.ini"), b"v1").unwrap();
    let (root, _, reconciler) = seeded(dir.path());
    let path = root.join("cfg.ini");
    fs::write(&path, b"v2").unwrap();

    let stats = run_to_completion(
        reconciler.clone(),
        Arc::new(FailingSink),
        1,
        vec![FsEvent::Modified(path.clone()), FsEvent::Modified(path.clone())],
    )
    .await;

    assert_eq!(stats.alerts, 1);
    assert_eq!(stats.delivery_failures, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(
        reconciler.digest_of(&path),
        Some(FileHasher::default().digest_bytes(b"v2"))
    );
}

// ─── Test 5: shutdown ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_events_processed_after_shutdown() {
    let dir = tempdir().unwrap();
    let (root, _, reconciler) = seeded(dir.path());
    let first = root.join("first.txt");
    let second = root.join("second.txt");
    fs::write(&first, b"1").unwrap();
    fs::write(&second, b"2").unwrap();

    let sink = Arc::new(RecordingSink::default());
    let (tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(
        Monitor::new(reconciler.clone(), sink.clone(), MonitorOptions::default())
            .run(rx, shutdown_rx),
    );

    tx.send(FsEvent::Created {
        path: first.clone(),
        is_dir: false,
    })
    .await
    .unwrap();
    wait_for(|| sink.len() == 1).await;

    shutdown_tx.send(true).unwrap();
    let stats = task.await.unwrap();

    // the monitor is gone; later events are never taken
    assert!(tx
        .send(FsEvent::Created {
            path: second.clone(),
            is_dir: false,
        })
        .await
        .is_err());
    assert_eq!(stats.events, 1);
    assert_eq!(sink.kinds_for(&first), vec![AlertKind::FileCreated]);
    assert!(reconciler.digest_of(&second).is_none());
}

#[tokio::test]
async fn test_shutdown_before_start_processes_nothing() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("x.txt"), b"x").unwrap();
    let (root, _, reconciler) = seeded(dir.path());

    let (tx, rx) = mpsc::channel(8);
    tx.send(FsEvent::Deleted(root.join("x.txt"))).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(true);

    let sink = Arc::new(RecordingSink::default());
    let stats = Monitor::new(reconciler.clone(), sink.clone(), MonitorOptions::default())
        .run(rx, shutdown_rx)
        .await;

    assert_eq!(stats, MonitorStats::default());
    assert_eq!(sink.len(), 0);
    assert_eq!(reconciler.tracked(), 1);
}

#[tokio::test]
async fn test_shutdown_while_shard_queue_is_full() {
    let dir = tempdir().unwrap();
    let (root, _, reconciler) = seeded(dir.path());
    let paths: Vec<PathBuf> = (0..3).map(|i| root.join(format!("q{i}.txt"))).collect();
    for path in &paths {
        fs::write(path, path.display().to_string()).unwrap();
    }

    let sink = Arc::new(GatedSink::closed());
    let (tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(
        Monitor::new(
            reconciler.clone(),
            sink.clone(),
            MonitorOptions {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .run(rx, shutdown_rx),
    );

    for path in &paths {
        tx.send(FsEvent::Created {
            path: path.clone(),
            is_dir: false,
        })
        .await
        .unwrap();
    }
    // first event stuck in the sink, second queued, third waiting on the queue
    wait_for(|| sink.entered.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    sink.open();

    let stats = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("monitor did not stop")
        .unwrap();

    assert_eq!(stats.events, 2);
    assert_eq!(stats.alerts, 2);
    assert_eq!(sink.delivered.lock().len(), 2);
    assert!(reconciler.digest_of(&paths[0]).is_some());
    assert!(reconciler.digest_of(&paths[1]).is_some());
    assert!(reconciler.digest_of(&paths[2]).is_none());
}

// ─── Test 6: audit sweep ────────────────────────────────────────────────────

#[tokio::test]
async fn test_audit_sweep_reports_missed_changes() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("kept.txt"), b"kept").unwrap();
    fs::write(dir.path().join("edited.txt"), b"before").unwrap();
    fs::write(dir.path().join("removed.txt"), b"bye").unwrap();
    let (root, scanner, reconciler) = seeded(dir.path());

    // changes made while nobody was listening
    fs::write(root.join("edited.txt"), b"after").unwrap();
    fs::remove_file(root.join("removed.txt")).unwrap();
    fs::write(root.join("added.txt"), b"new").unwrap();

    let sink = Arc::new(RecordingSink::default());
    let (tx, rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let wake = Arc::new(Notify::new());

    let monitor_task = tokio::spawn(
        Monitor::new(reconciler.clone(), sink.clone(), MonitorOptions::default())
            .run(rx, shutdown_rx.clone()),
    );
    let audit_task = spawn_audit_loop(
        scanner,
        reconciler.clone(),
        Duration::from_secs(3600),
        wake.clone(),
        tx,
        shutdown_rx,
    );

    wake.notify_one();
    wait_for(|| sink.len() == 3).await;
    shutdown_tx.send(true).unwrap();
    audit_task.await.unwrap();
    let stats = monitor_task.await.unwrap();

    assert_eq!(sink.kinds_for(&root.join("edited.txt")), vec![AlertKind::FileModified]);
    assert_eq!(sink.kinds_for(&root.join("removed.txt")), vec![AlertKind::FileDeleted]);
    assert_eq!(sink.kinds_for(&root.join("added.txt")), vec![AlertKind::FileCreated]);
    assert!(sink.kinds_for(&root.join("kept.txt")).is_empty());
    assert_eq!(stats.alerts, 3);
    assert_eq!(reconciler.tracked(), 3);
}

// ─── Test 7: live watcher ───────────────────────────────────────────────────

#[tokio::test]
async fn test_watcher_reports_new_file() {
    let dir = tempdir().unwrap();
    let root = resolve_root(dir.path()).unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    let watcher = FileWatcher::start(&root, tx, None).unwrap();

    let target = root.join("dropped.txt");
    fs::write(&target, b"payload").unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            if event.path() == target {
                return Some(event);
            }
        }
        None
    })
    .await
    .expect("no event for new file");

    assert!(matches!(
        seen,
        Some(FsEvent::Created { .. }) | Some(FsEvent::Modified(_))
    ));
    watcher.stop().unwrap();
}
