//! Document backend: one JSON document per line, append-only.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{DurableStore, LoadedRecords, PersistenceResult};
use crate::repost::record_store::ImageRecord;

pub struct DocumentStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl DocumentStore {
    pub fn open(path: &Path) -> PersistenceResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl DurableStore for DocumentStore {
    fn load_all(&self) -> PersistenceResult<LoadedRecords> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut loaded = LoadedRecords::default();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ImageRecord>(&line) {
                Ok(record) => {
                    loaded.ids.push(record.image_id.clone());
                    loaded.records.push(record);
                }
                Err(e) => warn!(line = line_no + 1, "Skipping corrupt document: {}", e),
            }
        }

        loaded.records.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        debug!("Loaded {} records from {}", loaded.records.len(), self.path.display());
        Ok(loaded)
    }

    fn append(&self, record: &ImageRecord) -> PersistenceResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        // A record only counts as persisted once it reached the file.
        writer.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "document"
    }
}
