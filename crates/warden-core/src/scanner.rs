//! Initial baseline scan.
//!
//! Walks the watched root, fingerprints every regular file and produces the
//! seed baseline. Hashing fans out across files with rayon; each file writes a
//! distinct key so no coordination is needed. Unreadable files are reported,
//! not alerted on: there is no prior state to compare them against.

use crate::baseline::{Baseline, BaselineStore};
use crate::digest::{Fingerprint, Fingerprinter};
use crate::error::{Result, WardenError};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A file the walk or the hasher could not handle.
#[derive(Debug, Clone, Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub baseline: Baseline,
    pub errors: Vec<ScanError>,
}

/// Canonicalize the watched root and check that it is a directory.
pub fn resolve_root(root: &Path) -> Result<PathBuf> {
    let canonical = match root.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WardenError::RootMissing(root.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !canonical.is_dir() {
        return Err(WardenError::RootNotDirectory(root.to_path_buf()));
    }
    Ok(canonical)
}

/// Whether the link at `link` resolves to a regular file inside `root`.
///
/// This is the one symlink policy for the whole crate: the initial scan, the
/// audit walk and live events all track a link only when this holds.
/// Dangling links, links to directories and links that escape the root are
/// rejected and logged at debug level.
pub fn symlink_in_root(root: &Path, link: &Path) -> bool {
    let target = match fs::canonicalize(link) {
        Ok(t) => t,
        Err(e) => {
            debug!(path = %link.display(), error = %e, "skipping dangling symlink");
            return false;
        }
    };
    if !target.starts_with(root) {
        debug!(
            path = %link.display(),
            target = %target.display(),
            "skipping symlink that escapes the watched root"
        );
        return false;
    }
    match fs::metadata(&target) {
        Ok(meta) if meta.is_file() => true,
        _ => {
            debug!(path = %link.display(), "skipping symlink to non-file");
            false
        }
    }
}

/// Walks the watched root and builds the seed baseline.
#[derive(Clone)]
pub struct Scanner {
    root: PathBuf,
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl Scanner {
    /// `root` must already be canonical (see [`resolve_root`]) so that
    /// baseline keys line up with the paths reported by the watcher.
    pub fn new(root: PathBuf, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        Self {
            root,
            fingerprinter,
        }
    }

    /// The canonical watched root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate the regular files under the root.
    ///
    /// Symlinks are never descended into. A link is listed under its own
    /// path only when it resolves to a regular file inside the root.
    pub fn list_files(&self) -> (Vec<PathBuf>, Vec<ScanError>) {
        let mut files = Vec::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    errors.push(ScanError {
                        path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_file() {
                files.push(entry.into_path());
            } else if file_type.is_symlink() && symlink_in_root(&self.root, entry.path()) {
                files.push(entry.into_path());
            }
        }

        (files, errors)
    }

    /// Fingerprint every listed file in parallel.
    ///
    /// Unreadable files land in `errors`; files that vanish mid-scan are
    /// dropped silently.
    pub fn scan(&self) -> ScanReport {
        let started = Instant::now();
        info!(root = %self.root.display(), "starting initial scan");

        let (files, mut errors) = self.list_files();

        let results: Vec<(PathBuf, Fingerprint)> = files
            .into_par_iter()
            .map(|path| {
                let fp = self.fingerprinter.fingerprint(&path);
                (path, fp)
            })
            .collect();

        let mut baseline = Baseline::with_capacity(results.len());
        for (path, fp) in results {
            match fp {
                Fingerprint::Present(digest) => {
                    baseline.insert(path, digest);
                }
                Fingerprint::Absent => {
                    debug!(path = %path.display(), "file vanished during scan");
                }
                Fingerprint::ReadError(e) => {
                    errors.push(ScanError {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        for err in &errors {
            warn!(path = %err.path.display(), error = %err.error, "file omitted from baseline");
        }
        info!(
            files = baseline.len(),
            errors = errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "initial scan complete"
        );

        ScanReport { baseline, errors }
    }

    /// Scan and seed `store` with the result.
    pub fn seed(&self, store: &BaselineStore) -> Vec<ScanError> {
        let report = self.scan();
        store.seed(report.baseline);
        report.errors
    }
}
