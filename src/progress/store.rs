use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use crate::errors::PocScanError;

/// One line of the progress log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub key: String,
    pub completed_at: DateTime<Utc>,
}

/// Durable set of completed work-item keys, stored as an append-only JSONL
/// log at `<dir>/<resume_id>.jsonl`. `mark_done` returns only after the
/// record has been synced to disk.
pub struct ProgressStore {
    resume_id: String,
    path: PathBuf,
    done: DashSet<String>,
    file: Mutex<tokio::fs::File>,
}

impl ProgressStore {
    /// Open (or create) the log for `resume_id` and replay it. A torn last
    /// line from a crash mid-write is ignored.
    pub async fn load(dir: &Path, resume_id: &str) -> Result<Self, PocScanError> {
        validate_resume_id(resume_id)?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| progress_err(&format!("cannot create {}", dir.display()), e))?;

        let path = dir.join(format!("{}.jsonl", resume_id));
        let done = DashSet::new();
        let mut needs_newline = false;

        if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| progress_err(&format!("cannot read {}", path.display()), e))?;
            let mut skipped = 0usize;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<ProgressRecord>(line) {
                    Ok(record) => {
                        done.insert(record.key);
                    }
                    Err(_) => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!(path = %path.display(), skipped, "Ignored malformed progress records");
            }
            needs_newline = !content.is_empty() && !content.ends_with('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| progress_err(&format!("cannot open {}", path.display()), e))?;
        if needs_newline {
            // Terminate a torn record so the next append starts clean
            file.write_all(b"\n")
                .await
                .map_err(|e| progress_err("cannot repair progress log", e))?;
        }

        info!(resume_id, path = %path.display(), completed = done.len(), "Progress store loaded");
        Ok(Self {
            resume_id: resume_id.to_string(),
            path,
            done,
            file: Mutex::new(file),
        })
    }

    pub fn resume_id(&self) -> &str {
        &self.resume_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Append `key` and sync before returning. Safe to call from many
    /// workers; marking an already-done key is a no-op.
    pub async fn mark_done(&self, key: &str) -> Result<(), PocScanError> {
        if self.done.contains(key) {
            return Ok(());
        }
        let record = ProgressRecord { key: key.to_string(), completed_at: Utc::now() };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| progress_err("append failed", e))?;
        file.flush().await.map_err(|e| progress_err("flush failed", e))?;
        file.sync_data().await.map_err(|e| progress_err("sync failed", e))?;
        self.done.insert(record.key);
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), PocScanError> {
        let mut file = self.file.lock().await;
        file.flush().await.map_err(|e| progress_err("flush failed", e))?;
        file.sync_all().await.map_err(|e| progress_err("sync failed", e))
    }
}

/// Resume ids become file names, so only `[A-Za-z0-9_.-]` is allowed and a
/// leading dot is rejected.
pub fn validate_resume_id(id: &str) -> Result<(), PocScanError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PocScanError::Config(format!("invalid resume id '{}'", id)))
    }
}

fn progress_err(context: &str, e: std::io::Error) -> PocScanError {
    PocScanError::Progress(format!("{}: {}", context, e))
}
