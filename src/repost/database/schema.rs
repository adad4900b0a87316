//! SQLite schema management for image records.

use rusqlite::Connection;
use tracing::{debug, error, info};

use super::{PersistenceError, PersistenceResult};

/// Database schema version
const SCHEMA_VERSION: u32 = 1;

/// Create or verify the schema.
pub fn initialize_schema(conn: &Connection) -> PersistenceResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_initial_schema(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Database schema initialized to version {}", SCHEMA_VERSION);
    } else if current_version > SCHEMA_VERSION {
        error!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        );
        return Err(PersistenceError::Schema(
            "Database schema is newer than supported version".to_string(),
        ));
    }

    verify_schema(conn)
}

fn create_initial_schema(conn: &Connection) -> PersistenceResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS image_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            image_id TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            author TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            hash16 TEXT NOT NULL,
            hash64 TEXT NOT NULL,
            hash256 TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;
    debug!("Created image_records table");

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_records_submitted_at ON image_records(submitted_at)",
        "CREATE INDEX IF NOT EXISTS idx_records_author ON image_records(author)",
    ];
    for sql in indexes {
        conn.execute(sql, [])?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> PersistenceResult<u32> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| {
            let count: i64 = row.get(0)?;
            Ok(count > 0)
        },
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version: u32 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> PersistenceResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        [version],
    )?;
    Ok(())
}

fn verify_schema(conn: &Connection) -> PersistenceResult<()> {
    for table_name in ["image_records", "schema_version"] {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        if count != 1 {
            error!("Table {} was not created successfully", table_name);
            return Err(PersistenceError::Schema(format!(
                "Table {} not found after creation",
                table_name
            )));
        }
    }
    Ok(())
}
