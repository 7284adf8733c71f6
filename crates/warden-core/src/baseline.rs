//! In-memory integrity baseline.
//!
//! Maps every tracked file to its last-known digest. The store is shared as
//! `Arc<BaselineStore>`; every method takes the inner lock for a single map
//! operation only, never across file I/O. Read-compare-update sequences on one
//! key are serialized by the reconciler, not by this store.

use crate::digest::Digest;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Absolute file path to last-known digest. A missing key means absent.
pub type Baseline = HashMap<PathBuf, Digest>;

/// Shared, lock-protected [`Baseline`].
#[derive(Debug, Default)]
pub struct BaselineStore {
    entries: RwLock<Baseline>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already built baseline, typically a [`crate::ScanReport`]'s.
    pub fn from_baseline(baseline: Baseline) -> Self {
        Self {
            entries: RwLock::new(baseline),
        }
    }

    /// Merge scan results into the store, overwriting existing keys.
    pub fn seed(&self, baseline: Baseline) {
        self.entries.write().extend(baseline);
    }

    /// Last-known digest for `path`.
    pub fn get(&self, path: &Path) -> Option<Digest> {
        self.entries.read().get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Record `digest` for `path`.
    ///
    /// Returns the digest previously stored for `path`, if any.
    pub fn insert(&self, path: PathBuf, digest: Digest) -> Option<Digest> {
        self.entries.write().insert(path, digest)
    }

    /// Forget `path`, returning the digest it had.
    pub fn remove(&self, path: &Path) -> Option<Digest> {
        self.entries.write().remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Point-in-time copy for read-only consumers.
    pub fn snapshot(&self) -> Baseline {
        self.entries.read().clone()
    }
}
