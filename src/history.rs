//! Per-user conversation records.
//!
//! Each identity owns one JSON file holding an ordered list of turns. Turns are
//! only ever appended; the record is reset by an explicit clear.

use crate::error::Result;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Longest sanitized identity kept in a record file name.
const MAX_NAME_CHARS: usize = 64;

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// File-backed history log, one file per identity.
pub struct HistoryStore {
    dir: PathBuf,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Path of the record backing `identity`.
    pub fn record_path(&self, identity: &str) -> PathBuf {
        self.dir.join(record_file_name(identity))
    }

    /// All turns for `identity`, oldest first. A missing or unreadable record
    /// reads as empty.
    pub async fn read_all(&self, identity: &str) -> Vec<Turn> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;
        self.read_unlocked(identity).await
    }

    /// Append one turn to the record.
    pub async fn append(&self, identity: &str, turn: Turn) -> Result<()> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let mut turns = self.read_unlocked(identity).await;
        turns.push(turn);
        self.write_unlocked(identity, &turns).await
    }

    /// Reset the record to an empty list.
    pub async fn clear(&self, identity: &str) -> Result<()> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        self.write_unlocked(identity, &[]).await?;
        tracing::info!(user = identity, "conversation history cleared");
        Ok(())
    }

    fn lock_for(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(record_file_name(identity))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_unlocked(&self, identity: &str) -> Vec<Turn> {
        let path = self.record_path(identity);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "failed to read history record");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Turn>>(&content) {
            Ok(turns) => turns,
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "history record is corrupt, treating as empty");
                Vec::new()
            }
        }
    }

    /// Write the full record through a temp file and rename it into place so
    /// readers never observe a half-written file.
    async fn write_unlocked(&self, identity: &str, turns: &[Turn]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(identity);
        let temp = temp_path(&path);
        let body = serde_json::to_vec_pretty(turns)?;

        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// `chat_memory_{readable}_{digest}.json`. The digest covers the raw identity,
/// so identities that sanitize alike still get distinct records.
fn record_file_name(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    let readable: String = sanitize_identity(identity)
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();
    format!("chat_memory_{readable}_{}.json", hex::encode(&digest[..8]))
}

/// Map an identity onto a safe file name component.
fn sanitize_identity(identity: &str) -> String {
    let sanitized: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        sanitized
    }
}
