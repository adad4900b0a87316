//! Relational backend on SQLite.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, params};
use tracing::{debug, warn};

use super::schema::initialize_schema;
use super::{DurableStore, LoadedRecords, PersistenceError, PersistenceResult};
use crate::repost::record_store::ImageRecord;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl DurableStore for SqliteStore {
    fn load_all(&self) -> PersistenceResult<LoadedRecords> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT image_id, url, author, submitted_at, hash16, hash64, hash256
             FROM image_records ORDER BY submitted_at ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut loaded = LoadedRecords::default();
        for row in rows {
            let (image_id, url, author, submitted_at, hash16, hash64, hash256) = row?;
            loaded.ids.push(image_id.clone());

            let submitted_at = match DateTime::parse_from_rfc3339(&submitted_at) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    // Still counts as seen, but cannot be ordered as a match.
                    warn!(image_id = %image_id, "Skipping record with bad timestamp: {}", e);
                    continue;
                }
            };

            loaded.records.push(ImageRecord {
                image_id,
                url,
                author,
                submitted_at,
                hash16,
                hash64,
                hash256,
            });
        }

        debug!("Loaded {} records from sqlite", loaded.records.len());
        Ok(loaded)
    }

    fn append(&self, record: &ImageRecord) -> PersistenceResult<()> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO image_records
             (image_id, url, author, submitted_at, hash16, hash64, hash256)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &record.image_id,
                &record.url,
                &record.author,
                record.submitted_at.to_rfc3339(),
                &record.hash16,
                &record.hash64,
                &record.hash256,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(PersistenceError::Duplicate(record.image_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
