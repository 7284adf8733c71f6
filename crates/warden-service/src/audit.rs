//! Periodic audit sweep.
//!
//! Rewalks the watched root on an interval (or when the watcher reports that
//! it dropped events) and feeds synthetic events into the same channel the
//! watcher uses. The reconciler's digest check keeps a clean tree silent;
//! anything the watcher missed surfaces as a normal alert.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::{Baseline, FsEvent, Reconciler, Scanner};

/// Events that bring `baseline` in line with the files currently on disk.
///
/// The walk and the baseline are never taken at the same instant, so a
/// tracked path the walk missed may simply have been created after the walk
/// passed it. Those paths are re-verified with `Modified`: the reconciler
/// treats an `Absent` fingerprint as the deletion and a present, unchanged
/// file as a no-op.
pub fn audit_events(files: Vec<PathBuf>, baseline: &Baseline) -> Vec<FsEvent> {
    let on_disk: HashSet<&PathBuf> = files.iter().collect();
    let mut events: Vec<FsEvent> = baseline
        .keys()
        .filter(|path| !on_disk.contains(path))
        .cloned()
        .map(FsEvent::Modified)
        .collect();

    for path in files {
        if baseline.contains_key(&path) {
            events.push(FsEvent::Modified(path));
        } else {
            events.push(FsEvent::Created {
                path,
                is_dir: false,
            });
        }
    }
    events
}

/// Run [`audit_events`] sweeps every `interval`, or early when `wake` fires,
/// until `shutdown` flips to true or the monitor drops its receiver.
pub fn spawn_audit_loop(
    scanner: Scanner,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    wake: Arc<Notify>,
    events: mpsc::Sender<FsEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "audit loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake.notified() => {
                    debug!("audit loop woken early");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("audit loop shutting down");
                        return;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                return;
            }

            let walker = scanner.clone();
            let (files, errors) = match tokio::task::spawn_blocking(move || walker.list_files()).await
            {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(error = %e, "audit walk failed");
                    continue;
                }
            };
            for err in &errors {
                warn!(path = %err.path.display(), error = %err.error, "audit walk error");
            }

            // snapshot after the walk: a file deleted mid-walk and already
            // reconciled then shows up as a Created that fingerprints Absent
            let sweep = audit_events(files, &reconciler.snapshot());
            info!(events = sweep.len(), "audit sweep");
            for event in sweep {
                if events.send(event).await.is_err() {
                    debug!("monitor gone, audit loop exiting");
                    return;
                }
            }
        }
    })
}
