use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

pub(crate) const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    dimensions TEXT NOT NULL,
    measures TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    source_file TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    sheet TEXT NOT NULL,
    row_index INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    revision INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp);
CREATE INDEX IF NOT EXISTS idx_records_source_file ON records(source_file);

CREATE TABLE IF NOT EXISTS batches (
    id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    schema_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    accepted INTEGER NOT NULL,
    updated INTEGER NOT NULL,
    unchanged INTEGER NOT NULL,
    rejected INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batches_checksum ON batches(checksum);

CREATE INDEX IF NOT EXISTS idx_records_campaign ON records(json_extract(dimensions, '$.campaign'));

CREATE TABLE IF NOT EXISTS campaign_classification (
    campaign TEXT PRIMARY KEY,
    campaign_type TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One row per change. NULL new values mean the classification was removed.
CREATE TABLE IF NOT EXISTS classification_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign TEXT NOT NULL,
    campaign_type TEXT,
    channel_type TEXT,
    previous_type TEXT,
    previous_channel TEXT,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_classification_history_campaign ON classification_history(campaign);
"#;

/// Create tables on a fresh file, check the version on an existing one.
pub(crate) fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;

    let version: Option<String> = tx
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()?;
    match version.as_deref().map(str::parse::<u32>) {
        None => {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            tx.execute("INSERT INTO meta (key, value) VALUES ('revision', '0')", [])?;
        }
        Some(Ok(v)) if v == SCHEMA_VERSION => {}
        Some(Ok(v)) => {
            return Err(StoreError::StoreUnavailable(format!(
                "store schema version {v} is not supported (expected {SCHEMA_VERSION})"
            )));
        }
        Some(Err(_)) => {
            return Err(StoreError::StoreUnavailable("store schema version is unreadable".into()));
        }
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn read_revision(conn: &Connection) -> Result<u64, StoreError> {
    let raw: String = conn.query_row("SELECT value FROM meta WHERE key = 'revision'", [], |row| row.get(0))?;
    raw.parse()
        .map_err(|_| StoreError::StoreUnavailable(format!("revision counter is unreadable: '{raw}'")))
}

pub(crate) fn write_revision(conn: &Connection, revision: u64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'revision'",
        params![revision.to_string()],
    )?;
    Ok(())
}
