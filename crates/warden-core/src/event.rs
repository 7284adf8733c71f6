use std::path::{Path, PathBuf};

/// A filesystem change, normalized from whatever the watch backend reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created { path: PathBuf, is_dir: bool },
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created { path, .. } | FsEvent::Modified(path) | FsEvent::Deleted(path) => path,
        }
    }
}
