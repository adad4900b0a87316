//! Durable storage for image records
//!
//! This module provides:
//! 1. The `DurableStore` contract used by the record store
//! 2. A relational backend (SQLite) and a document backend (JSON lines)
//! 3. Backend selection from configuration, invisible to the pipeline

mod document;
mod schema;
mod sqlite;

#[cfg(test)]
mod tests;

pub use document::DocumentStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::repost::config_loader::{StoreBackend, StoreSettings};
use crate::repost::record_store::ImageRecord;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Duplicate image id: {0}")]
    Duplicate(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Everything loaded at startup: full records plus every known image id.
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<ImageRecord>,
    pub ids: Vec<String>,
}

/// Append-only durable record storage.
///
/// Implementations are blocking; callers run them on blocking threads.
pub trait DurableStore: Send + Sync {
    fn load_all(&self) -> PersistenceResult<LoadedRecords>;

    fn append(&self, record: &ImageRecord) -> PersistenceResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Open the backend named in the config.
pub fn open_store(settings: &StoreSettings) -> PersistenceResult<Arc<dyn DurableStore>> {
    if let Some(parent) = settings.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store: Arc<dyn DurableStore> = match settings.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&settings.path)?),
        StoreBackend::Document => Arc::new(DocumentStore::open(&settings.path)?),
    };

    info!(
        backend = store.backend_name(),
        path = %settings.path.display(),
        "Opened durable store"
    );
    Ok(store)
}
