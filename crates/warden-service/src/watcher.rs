//! Real-time file system watcher using the `notify` crate.
//!
//! Watches the root recursively, normalizes raw notify events into
//! [`FsEvent`]s and forwards them through a bounded tokio channel. Dropping the
//! [`FileWatcher`] releases the OS subscription; the bridge thread then sees its
//! input channel close and exits.

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{mpsc as std_mpsc, Arc};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};
use warden_core::FsEvent;

/// Live OS subscription on the watched root.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Subscribe to changes under `root` and forward them into `events`.
    ///
    /// `rescan` is notified when the backend reports that it dropped events and
    /// the tree should be swept again.
    pub fn start(
        root: &Path,
        events: mpsc::Sender<FsEvent>,
        rescan: Option<Arc<Notify>>,
    ) -> Result<Self> {
        let (sync_tx, sync_rx) = std_mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = sync_tx.send(res);
            },
            Config::default(),
        )
        .context("failed to create file watcher")?;

        std::thread::Builder::new()
            .name("file-watcher-bridge".into())
            .spawn(move || bridge(sync_rx, events, rescan))
            .context("failed to spawn watcher bridge")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        info!(root = %root.display(), "watching");

        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }

    /// Release the subscription explicitly. Dropping the watcher does the same.
    pub fn stop(mut self) -> Result<()> {
        self.watcher.unwatch(&self.root)?;
        debug!(root = %self.root.display(), "unwatched");
        Ok(())
    }
}

fn bridge(
    sync_rx: std_mpsc::Receiver<notify::Result<Event>>,
    events: mpsc::Sender<FsEvent>,
    rescan: Option<Arc<Notify>>,
) {
    while let Ok(res) = sync_rx.recv() {
        match res {
            Ok(event) => {
                if event.need_rescan() {
                    warn!("watcher dropped events; requesting a rescan");
                    if let Some(rescan) = &rescan {
                        rescan.notify_one();
                    }
                }
                for change in classify_event(&event) {
                    trace!(?change, "forwarding change");
                    if events.blocking_send(change).is_err() {
                        debug!("event receiver dropped, stopping watcher bridge");
                        return;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "file watcher error");
            }
        }
    }
    debug!("watcher channel closed");
}

/// Normalize a raw notify event. Renames become a delete of the old path and a
/// create of the new one; access events are dropped.
pub fn classify_event(event: &Event) -> Vec<FsEvent> {
    let mut changes = Vec::new();

    match &event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                let is_dir = match kind {
                    CreateKind::Folder => true,
                    CreateKind::File => false,
                    _ => path.is_dir(),
                };
                changes.push(FsEvent::Created {
                    path: path.clone(),
                    is_dir,
                });
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                changes.push(FsEvent::Deleted(event.paths[0].clone()));
                changes.push(FsEvent::Created {
                    path: event.paths[1].clone(),
                    is_dir: event.paths[1].is_dir(),
                });
            }
            RenameMode::From => {
                changes.extend(event.paths.iter().cloned().map(FsEvent::Deleted));
            }
            RenameMode::To => {
                for path in &event.paths {
                    changes.push(FsEvent::Created {
                        path: path.clone(),
                        is_dir: path.is_dir(),
                    });
                }
            }
            _ => {
                // Backend could not tell which side of the rename this is.
                for path in &event.paths {
                    if path.exists() {
                        changes.push(FsEvent::Created {
                            path: path.clone(),
                            is_dir: path.is_dir(),
                        });
                    } else {
                        changes.push(FsEvent::Deleted(path.clone()));
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            // directories report child activity as modifications
            for path in event.paths.iter().filter(|p| !p.is_dir()) {
                changes.push(FsEvent::Modified(path.clone()));
            }
        }
        EventKind::Remove(_) => {
            changes.extend(event.paths.iter().cloned().map(FsEvent::Deleted));
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    changes
}
