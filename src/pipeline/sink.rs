//! Downstream collaborators: record persistence and document indexing.
//!
//! Real storage engines live outside this crate. Two stores are provided:
//! an in-memory one for tests and embedding, and a JSON-lines file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::{SourceDocument, ValidatedRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store rejected records: {0}")]
    Rejected(String),
}

/// Persistence collaborator. Returns the stored record ids, in input order.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn store(&self, records: &[ValidatedRecord]) -> Result<Vec<String>, StoreError>;
}

/// Optional indexing collaborator. Returns how many documents were indexed.
#[async_trait]
pub trait DocumentIndexer: Send + Sync {
    async fn index(&self, documents: &[SourceDocument]) -> Result<usize, StoreError>;
}

// ═══════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<ValidatedRecord>>,
    documents: RwLock<HashSet<String>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ValidatedRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indexed_documents(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn store(&self, records: &[ValidatedRecord]) -> Result<Vec<String>, StoreError> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| StoreError::Rejected("record store lock poisoned".into()))?;

        // All-or-nothing: a duplicate id rejects the whole call.
        let mut incoming = HashSet::new();
        for record in records {
            let duplicate = !incoming.insert(record.id) || stored.iter().any(|r| r.id == record.id);
            if duplicate {
                return Err(StoreError::Rejected(format!("record {} already stored", record.id)));
            }
        }

        stored.extend(records.iter().cloned());
        Ok(records.iter().map(|r| r.id.to_string()).collect())
    }
}

#[async_trait]
impl DocumentIndexer for InMemoryRecordStore {
    async fn index(&self, documents: &[SourceDocument]) -> Result<usize, StoreError> {
        let mut indexed = self
            .documents
            .write()
            .map_err(|_| StoreError::Rejected("document index lock poisoned".into()))?;
        Ok(documents
            .iter()
            .filter(|d| indexed.insert(d.source_document_id.clone()))
            .count())
    }
}

// ═══════════════════════════════════════════════════════════
// JSON lines
// ═══════════════════════════════════════════════════════════

/// Appends one JSON object per record to a file.
pub struct JsonlRecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn store(&self, records: &[ValidatedRecord]) -> Result<Vec<String>, StoreError> {
        // Serialize everything first so a bad record writes nothing.
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        tracing::debug!(path = %self.path.display(), records = records.len(), "Records appended");
        Ok(records.iter().map(|r| r.id.to_string()).collect())
    }
}
