//! Completed-generation history.
//!
//! A record is written only after a session completes, i.e. after the user
//! has seen the full output. Failed and cancelled sessions are never
//! recorded.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::io::AsyncWriteExt as _;

/// One completed generation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryRecord {
    pub session_id: uuid::Uuid,
    pub slot: String,
    pub backend: String,
    pub prompt: String,
    pub text: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for completed generations.
#[async_trait::async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, record: HistoryRecord) -> Result<(), HistoryError>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl HistorySink for JsonlHistory {
    async fn record(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
