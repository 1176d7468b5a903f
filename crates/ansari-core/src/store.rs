//! JSONL-based thread store — conversation rows as append-only JSONL files.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AnsariError, Result};
use crate::history::MessageRow;

/// Metadata for one conversation thread, stored in `threads.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMeta {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ThreadMeta {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: None,
            created_at: now,
            last_updated_at: now,
        }
    }
}

impl Default for ThreadMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A loaded thread: metadata plus its stored rows in order.
#[derive(Debug, Clone)]
pub struct ThreadRecord {
    pub meta: ThreadMeta,
    pub rows: Vec<MessageRow>,
}

/// Storage interface for conversation threads.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create(&self) -> Result<ThreadMeta>;
    async fn load(&self, id: Uuid) -> Result<Option<ThreadRecord>>;
    async fn append_row(&self, id: Uuid, row: &MessageRow) -> Result<()>;
    async fn list(&self) -> Result<Vec<ThreadMeta>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Fire-and-forget sink for closed messages. Implementations must contain
/// their own failures; the agent never aborts a conversation over logging.
#[async_trait]
pub trait MessageLogger: Send + Sync {
    async fn log(&self, row: &MessageRow);
}

/// A [`MessageLogger`] that appends rows to one thread of a store.
pub struct ThreadLogger {
    store: Arc<dyn ThreadStore>,
    thread_id: Uuid,
}

impl ThreadLogger {
    pub fn new(store: Arc<dyn ThreadStore>, thread_id: Uuid) -> Self {
        Self { store, thread_id }
    }
}

#[async_trait]
impl MessageLogger for ThreadLogger {
    async fn log(&self, row: &MessageRow) {
        if let Err(e) = self.store.append_row(self.thread_id, row).await {
            warn!(%e, thread = %self.thread_id, "Failed to persist message row");
        }
    }
}

/// File-based thread store.
///
/// Layout:
/// - `<base>/threads.json` — array of [`ThreadMeta`]
/// - `<base>/threads/<uuid>.jsonl` — one message row per line
pub struct JsonlThreadStore {
    base: PathBuf,
}

impl JsonlThreadStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("threads.json")
    }

    fn rows_dir(&self) -> PathBuf {
        self.base.join("threads")
    }

    fn rows_path(&self, id: Uuid) -> PathBuf {
        self.rows_dir().join(format!("{id}.jsonl"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::create_dir_all(self.rows_dir()).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<ThreadMeta>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let metas: Vec<ThreadMeta> = serde_json::from_str(&data)?;
        Ok(metas)
    }

    async fn save_index(&self, metas: &[ThreadMeta]) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(metas)?;
        let path = self.index_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_rows(&self, id: Uuid) -> Result<Vec<MessageRow>> {
        let path = self.rows_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut rows = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let row: MessageRow = serde_json::from_str(line)
                .map_err(|e| AnsariError::Thread(format!("corrupt thread line: {e}")))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl ThreadStore for JsonlThreadStore {
    async fn create(&self) -> Result<ThreadMeta> {
        let meta = ThreadMeta::new();
        let mut metas = self.load_index().await?;
        metas.push(meta.clone());
        self.save_index(&metas).await?;
        debug!(thread = %meta.id, "Created thread");
        Ok(meta)
    }

    async fn load(&self, id: Uuid) -> Result<Option<ThreadRecord>> {
        let metas = self.load_index().await?;
        match metas.into_iter().find(|m| m.id == id) {
            Some(meta) => {
                let rows = self.load_rows(id).await?;
                debug!(thread = %id, rows = rows.len(), "Loaded thread");
                Ok(Some(ThreadRecord { meta, rows }))
            }
            None => Ok(None),
        }
    }

    async fn append_row(&self, id: Uuid, row: &MessageRow) -> Result<()> {
        self.ensure_dirs().await?;

        let path = self.rows_path(id);
        let line = serde_json::to_string(row)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let mut metas = self.load_index().await?;
        if let Some(meta) = metas.iter_mut().find(|m| m.id == id) {
            meta.last_updated_at = Utc::now();
            self.save_index(&metas).await?;
        }

        Ok(())
    }

    async fn list(&self) -> Result<Vec<ThreadMeta>> {
        self.load_index().await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut metas = self.load_index().await?;
        metas.retain(|m| m.id != id);
        self.save_index(&metas).await?;

        let path = self.rows_path(id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }

        debug!(thread = %id, "Deleted thread");
        Ok(())
    }
}
