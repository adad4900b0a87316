//! Concurrent Append Test
//!
//! Many producers appending through the record store must never lose a
//! record or store one twice, whichever backend sits underneath.

use std::sync::Arc;

use tempfile::tempdir;

use crate::repost::config_loader::{StoreBackend, StoreSettings};
use crate::repost::database::open_store;
use crate::repost::record_store::RecordStore;
use crate::repost::record_store::tests::record;

async fn hammer(settings: StoreSettings) {
    let store = Arc::new(RecordStore::new(open_store(&settings).unwrap()));
    store.load_all().unwrap();

    // Every id is submitted twice by different tasks.
    let mut handles = vec![];
    for i in 0..100 {
        let store = store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let id = format!("img{}", i % 50);
            store.append(record(&id, "author", "0f0f0f0f0f0f0f0f", 0)).unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 50);
    assert_eq!(store.len(), 50);

    let reloaded = RecordStore::new(open_store(&settings).unwrap());
    assert_eq!(reloaded.load_all().unwrap(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_sqlite() {
    let temp_dir = tempdir().unwrap();
    hammer(StoreSettings {
        backend: StoreBackend::Sqlite,
        path: temp_dir.path().join("concurrent.db"),
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_document() {
    let temp_dir = tempdir().unwrap();
    hammer(StoreSettings {
        backend: StoreBackend::Document,
        path: temp_dir.path().join("concurrent.jsonl"),
    })
    .await;
}
