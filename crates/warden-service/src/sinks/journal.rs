//! Append-only JSON-lines alert journal with size-based rotation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use warden_core::{Alert, AlertSink};

const MAX_ROTATIONS: usize = 5;

/// One line of the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub message: String,
    pub alert: Alert,
}

/// Appends alerts to a JSON-lines file, rotating it past `max_bytes`.
pub struct JournalSink {
    path: PathBuf,
    max_bytes: u64,
    last_seq: Mutex<u64>,
}

impl JournalSink {
    /// Open (or create) the journal at `path` and resume its sequence.
    pub fn new<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create journal directory {}", parent.display()))?;
        }
        let last_seq = Self::load_last_seq(&path)?;
        Ok(Self {
            path,
            max_bytes,
            last_seq: Mutex::new(last_seq),
        })
    }

    fn load_last_seq(path: &Path) -> Result<u64> {
        if !path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(File::open(path)?);
        let mut last = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .with_context(|| format!("corrupt journal line in {}", path.display()))?;
            last = entry.seq;
        }
        Ok(last)
    }

    /// Write `alert` with the next sequence number.
    pub fn append(&self, alert: &Alert) -> Result<JournalEntry> {
        let mut last_seq = self.last_seq.lock();
        self.rotate_if_needed()?;
        let entry = JournalEntry {
            seq: *last_seq + 1,
            message: alert.message(),
            alert: alert.clone(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        file.flush()?;
        // sequence stays monotonic across rotations
        *last_seq = entry.seq;
        Ok(entry)
    }

    /// Most recent entries of the live journal file, newest first.
    pub fn read_recent(&self, limit: Option<usize>) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str::<JournalEntry>(&line)?);
        }
        entries.reverse();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1))?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1))?;
        Ok(())
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{index}"));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AlertSink for JournalSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.append(alert)?;
        Ok(())
    }
}
