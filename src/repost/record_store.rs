//! In-memory record set backed by a durable store
//!
//! This module provides:
//! 1. A segmented append-only log so snapshots are cheap and immutable
//! 2. O(1) "already seen" lookups by image id
//! 3. Persist-then-publish appends under a single writer lock
//! 4. A readiness flag so ingestion waits for the startup load

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::repost::config_loader::HashSize;
use crate::repost::database::{DurableStore, LoadedRecords, PersistenceError};
use crate::repost::supervisor::ShutdownSignal;

/// Records per sealed segment.
const SEGMENT_SIZE: usize = 1024;

/// Delay before retrying a failed startup load.
const LOAD_RETRY_DELAY: Duration = Duration::from_secs(10);

pub const GALLERY_BASE_URL: &str = "https://imgur.com/gallery";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record store is still loading")]
    NotReady,

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A fingerprinted image as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub url: String,
    pub author: String,
    pub submitted_at: DateTime<Utc>,
    pub hash16: String,
    pub hash64: String,
    pub hash256: String,
}

impl ImageRecord {
    pub fn fingerprint(&self, size: HashSize) -> &str {
        match size {
            HashSize::Hash16 => &self.hash16,
            HashSize::Hash64 => &self.hash64,
            HashSize::Hash256 => &self.hash256,
        }
    }

    pub fn gallery_url(&self) -> String {
        format!("{}/{}", GALLERY_BASE_URL, self.image_id)
    }
}

/// A request to scan the record set for one freshly stored image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintJob {
    pub trace_id: Uuid,
    pub fingerprint: String,
    /// Width of `fingerprint`, fixed when the job is created.
    pub hash_size: HashSize,
    pub image_id: String,
    pub author: String,
}

impl FingerprintJob {
    pub fn for_record(record: &ImageRecord, size: HashSize) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            fingerprint: record.fingerprint(size).to_string(),
            hash_size: size,
            image_id: record.image_id.clone(),
            author: record.author.clone(),
        }
    }
}

#[derive(Default)]
struct RecordLog {
    sealed: Vec<Arc<[ImageRecord]>>,
    tail: Vec<ImageRecord>,
    ids: HashSet<String>,
}

impl RecordLog {
    fn push(&mut self, record: ImageRecord) {
        self.ids.insert(record.image_id.clone());
        self.tail.push(record);
        if self.tail.len() >= SEGMENT_SIZE {
            let segment: Arc<[ImageRecord]> = std::mem::take(&mut self.tail).into();
            self.sealed.push(segment);
        }
    }

    fn len(&self) -> usize {
        self.sealed.len() * SEGMENT_SIZE + self.tail.len()
    }
}

/// Immutable point-in-time view of the record set.
#[derive(Clone, Default)]
pub struct RecordSnapshot {
    sealed: Vec<Arc<[ImageRecord]>>,
    tail: Arc<[ImageRecord]>,
}

impl RecordSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.sealed
            .iter()
            .flat_map(|segment| segment.iter())
            .chain(self.tail.iter())
    }

    pub fn len(&self) -> usize {
        self.sealed.iter().map(|s| s.len()).sum::<usize>() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<ImageRecord> for RecordSnapshot {
    fn from_iter<T: IntoIterator<Item = ImageRecord>>(iter: T) -> Self {
        let tail: Vec<ImageRecord> = iter.into_iter().collect();
        Self {
            sealed: Vec::new(),
            tail: tail.into(),
        }
    }
}

pub struct RecordStore {
    backend: Arc<dyn DurableStore>,
    log: RwLock<RecordLog>,
    append_lock: Mutex<()>,
    ready_tx: watch::Sender<bool>,
    capacity_warned: AtomicBool,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn DurableStore>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            backend,
            log: RwLock::new(RecordLog::default()),
            append_lock: Mutex::new(()),
            ready_tx,
            capacity_warned: AtomicBool::new(false),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Bulk load everything from the durable store and flip the ready flag.
    ///
    /// Blocking. Records already appended in memory are kept.
    pub fn load_all(&self) -> StoreResult<usize> {
        let LoadedRecords { records, ids } = self.backend.load_all()?;

        let _guard = self.append_lock.lock();
        let mut log = self.log.write();
        for record in records {
            if !log.ids.contains(&record.image_id) {
                log.push(record);
            }
        }
        // Ids whose rows could not be rebuilt still count as seen.
        log.ids.extend(ids);
        let loaded = log.len();
        drop(log);

        self.ready_tx.send_replace(true);
        info!(backend = self.backend_name(), records = loaded, "Record store ready");
        Ok(loaded)
    }

    /// Run [`load_all`](Self::load_all) on a blocking thread, retrying until it
    /// succeeds or shutdown is requested.
    pub async fn load_until_ready(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        loop {
            let store = self.clone();
            match tokio::task::spawn_blocking(move || store.load_all()).await {
                Ok(Ok(_)) => return,
                Ok(Err(e)) => error!("Failed to load records: {}", e),
                Err(e) => error!("Record load task failed: {}", e),
            }
            if !shutdown.sleep(LOAD_RETRY_DELAY).await {
                return;
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Wait until the startup load has completed.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.log.read().ids.contains(image_id)
    }

    /// Persist a record and make it visible.
    ///
    /// Returns `Ok(false)` if the id is already known. Blocking.
    pub fn append(&self, record: ImageRecord) -> StoreResult<bool> {
        if !self.is_ready() {
            return Err(StoreError::NotReady);
        }

        let _guard = self.append_lock.lock();
        if self.contains(&record.image_id) {
            return Ok(false);
        }

        match self.backend.append(&record) {
            Ok(()) => {}
            // Already on disk from an earlier run that never reached memory.
            Err(PersistenceError::Duplicate(_)) => {
                self.log.write().ids.insert(record.image_id);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        self.log.write().push(record);
        Ok(true)
    }

    /// Cheap immutable view: clones the sealed segment handles and the open tail.
    pub fn snapshot(&self) -> RecordSnapshot {
        let log = self.log.read();
        RecordSnapshot {
            sealed: log.sealed.clone(),
            tail: log.tail.as_slice().into(),
        }
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Log once when the record count passes the soft limit. Nothing is dropped.
    pub fn check_capacity(&self, limit: usize) {
        let len = self.len();
        if len > limit && !self.capacity_warned.swap(true, Ordering::Relaxed) {
            warn!(records = len, limit, "Record store passed its soft capacity");
        }
    }
}
