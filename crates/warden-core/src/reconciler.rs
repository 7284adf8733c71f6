//! Event reconciliation.
//!
//! The reconciler owns the baseline and decides, for each normalized event,
//! whether content really changed. Per-path atomicity comes from a fixed set
//! of lock stripes: the read-compare-update for an event holds its path's
//! stripe across fingerprinting and the baseline write, so two events for the
//! same path never interleave. Alert delivery happens after `reconcile`
//! returns and is never done under a stripe.
//!
//! Symlinks follow the same rule as the initial scan
//! ([`crate::scanner::symlink_in_root`]): a link is tracked only while it
//! resolves to a regular file inside the watched root.

use crate::alert::{Alert, AlertKind};
use crate::baseline::{Baseline, BaselineStore};
use crate::digest::{Digest, Fingerprint, Fingerprinter};
use crate::event::FsEvent;
use crate::scanner::symlink_in_root;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const LOCK_STRIPES: usize = 64;

/// Stable partition of `path` into one of `partitions` buckets.
pub fn partition_for(path: &Path, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

/// What the reconciler decided for one event.
#[derive(Debug)]
pub enum Outcome {
    Alert(Alert),
    /// Content matches the baseline; nothing to report.
    Unchanged,
    /// Nothing to record: vanished before it could be read, or not tracked.
    Ignored,
    ReadFailed { path: PathBuf, error: io::Error },
}

/// Owns the baseline and turns events into [`Outcome`]s.
pub struct Reconciler {
    root: PathBuf,
    store: BaselineStore,
    fingerprinter: Arc<dyn Fingerprinter>,
    stripes: Box<[Mutex<()>]>,
}

impl Reconciler {
    /// `root` is the canonical watched root the store was seeded from; it
    /// bounds which symlinks may be tracked.
    pub fn new(
        root: PathBuf,
        store: BaselineStore,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            root,
            store,
            fingerprinter,
            stripes,
        }
    }

    /// Current baseline digest for `path`, if tracked.
    pub fn digest_of(&self, path: &Path) -> Option<Digest> {
        self.store.get(path)
    }

    /// Number of tracked files.
    pub fn tracked(&self) -> usize {
        self.store.len()
    }

    /// Point-in-time copy of the baseline for read-only consumers.
    pub fn snapshot(&self) -> Baseline {
        self.store.snapshot()
    }

    /// Apply one event to the baseline under its path's lock stripe.
    ///
    /// The returned alert has not been delivered; the caller owns that.
    pub fn reconcile(&self, event: &FsEvent) -> Outcome {
        let path = event.path();
        let _guard = self.stripes[partition_for(path, self.stripes.len())].lock();

        match event {
            FsEvent::Created { path, is_dir: true } => Outcome::Alert(Alert::new(
                AlertKind::DirectoryCreated,
                path.clone(),
                None,
                None,
            )),
            FsEvent::Created {
                path,
                is_dir: false,
            } => self.on_created(path),
            FsEvent::Modified(path) => self.on_modified(path),
            FsEvent::Deleted(path) => self.on_deleted(path),
        }
    }

    /// A symlink that the scan would have skipped.
    fn untrackable_link(&self, path: &Path) -> bool {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => !symlink_in_root(&self.root, path),
            _ => false,
        }
    }

    fn on_created(&self, path: &Path) -> Outcome {
        if self.untrackable_link(path) {
            return Outcome::Ignored;
        }
        match self.fingerprinter.fingerprint(path) {
            Fingerprint::Present(digest) => {
                // Duplicate creates overwrite and alert again.
                let previous = self.store.insert(path.to_path_buf(), digest);
                Outcome::Alert(Alert::new(
                    AlertKind::FileCreated,
                    path.to_path_buf(),
                    previous,
                    Some(digest),
                ))
            }
            Fingerprint::Absent => {
                debug!(path = %path.display(), "created file vanished before it was read");
                Outcome::Ignored
            }
            Fingerprint::ReadError(error) => Outcome::ReadFailed {
                path: path.to_path_buf(),
                error,
            },
        }
    }

    fn on_modified(&self, path: &Path) -> Outcome {
        // a tracked path that became an escaping link is no longer a file we watch
        if self.untrackable_link(path) {
            return self.on_deleted(path);
        }
        match self.fingerprinter.fingerprint(path) {
            Fingerprint::Present(digest) => {
                let previous = self.store.get(path);
                if previous == Some(digest) {
                    debug!(path = %path.display(), "content unchanged");
                    return Outcome::Unchanged;
                }
                self.store.insert(path.to_path_buf(), digest);
                Outcome::Alert(Alert::new(
                    AlertKind::FileModified,
                    path.to_path_buf(),
                    previous,
                    Some(digest),
                ))
            }
            Fingerprint::Absent => self.on_deleted(path),
            Fingerprint::ReadError(error) => Outcome::ReadFailed {
                path: path.to_path_buf(),
                error,
            },
        }
    }

    fn on_deleted(&self, path: &Path) -> Outcome {
        match self.store.remove(path) {
            Some(previous) => Outcome::Alert(Alert::new(
                AlertKind::FileDeleted,
                path.to_path_buf(),
                Some(previous),
                None,
            )),
            None => {
                debug!(path = %path.display(), "delete of untracked path");
                Outcome::Ignored
            }
        }
    }
}
