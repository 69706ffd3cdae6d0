use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use kolet_core::{Batch, Provenance, Record, RecordId, TIMESTAMP_FORMAT};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::codec::{
    day_start, decode_batch, decode_record, encode_json, format_timestamp, BATCH_COLUMNS, RECORD_COLUMNS,
};
use crate::error::StoreError;
use crate::reader::Reader;
use crate::schema::{migrate, read_revision, write_revision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Store-wide counters for the import status panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: u64,
    pub batches: u64,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    /// Dimension name → number of distinct values.
    pub distinct_values: BTreeMap<String, u64>,
    pub file_size_bytes: u64,
    pub revision: u64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Single-file SQLite store. Owns the only writable connection.
pub struct Store {
    pub(crate) conn: Connection,
    path: PathBuf,
    config: StoreConfig,
}

impl Store {
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::StoreUnavailable(format!("{}: {e}", parent.display())))?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let mut conn = Connection::open_with_flags(path, flags)
            .map_err(|e| StoreError::StoreUnavailable(format!("{}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        migrate(&mut conn)?;

        log::debug!("opened store {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn revision(&self) -> Result<u64, StoreError> {
        read_revision(&self.conn)
    }

    /// Start the single write transaction. `IMMEDIATE` takes the write lock
    /// up front so a batch never fails half-way on lock upgrade.
    pub fn begin(&mut self) -> Result<WriteTxn<'_>, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let revision = read_revision(&tx)?;
        Ok(WriteTxn {
            tx,
            revision,
            dirty: false,
            seen: HashMap::new(),
        })
    }

    /// Separate read-only connection for snapshots.
    pub fn reader(&self) -> Result<Reader, StoreError> {
        Reader::open(&self.path, &self.config)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let records: i64 = self.conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        let batches: i64 = self.conn.query_row("SELECT COUNT(*) FROM batches", [], |r| r.get(0))?;
        let (first, last): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM records",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT je.key, COUNT(DISTINCT je.value)
             FROM records, json_each(records.dimensions) AS je
             GROUP BY je.key ORDER BY je.key",
        )?;
        let distinct_values = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?.max(0) as u64)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let parse = |raw: Option<String>| {
            raw.and_then(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok())
        };
        Ok(StoreStats {
            records: records.max(0) as u64,
            batches: batches.max(0) as u64,
            first_timestamp: parse(first),
            last_timestamp: parse(last),
            distinct_values,
            file_size_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            revision: self.revision()?,
        })
    }

    /// Import history, newest first.
    pub fn batches(&self, limit: usize) -> Result<Vec<Batch>, StoreError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches ORDER BY started_at DESC, rowid DESC LIMIT ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![limit.min(i64::MAX as usize) as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_batch(row)?);
        }
        Ok(out)
    }

    /// Delete records dated before `cutoff`. Batches stay as audit trail.
    /// Returns the number of deleted records.
    pub fn purge_before(&mut self, cutoff: NaiveDate) -> Result<u64, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute("DELETE FROM records WHERE timestamp < ?1", params![day_start(cutoff)])?;
        if deleted > 0 {
            let revision = read_revision(&tx)? + 1;
            write_revision(&tx, revision)?;
            log::info!("retention removed {deleted} records dated before {cutoff} (revision {revision})");
        }
        tx.commit()?;
        Ok(deleted as u64)
    }

    /// Consistent copy of the database via `VACUUM INTO`. The target must
    /// not exist.
    pub fn backup_to(&self, target: &Path) -> Result<(), StoreError> {
        if target.exists() {
            return Err(StoreError::StoreUnavailable(format!(
                "backup target {} already exists",
                target.display()
            )));
        }
        let target_str = target.to_string_lossy();
        self.conn.execute("VACUUM INTO ?1", params![target_str.as_ref()])?;
        log::info!("store backed up to {}", target.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Write transaction
// ---------------------------------------------------------------------------

/// The exclusive write transaction. Dropping it without `commit` rolls back.
pub struct WriteTxn<'s> {
    tx: Transaction<'s>,
    revision: u64,
    dirty: bool,
    seen: HashMap<RecordId, Provenance>,
}

impl WriteTxn<'_> {
    /// Insert, update or skip `record` by comparing content hashes. The
    /// record's own `revision` is ignored; the store assigns it.
    pub fn upsert(&mut self, record: &Record) -> Result<UpsertOutcome, StoreError> {
        if let Some(first) = self.seen.get(&record.id) {
            if !first.same_row(&record.provenance) {
                return Err(StoreError::ConstraintViolation {
                    id: record.id.to_string(),
                    first: first.clone(),
                    second: record.provenance.clone(),
                });
            }
        }
        self.seen.insert(record.id.clone(), record.provenance.clone());

        let hash = record.content_hash();
        let existing: Option<(String, i64)> = self
            .tx
            .query_row(
                "SELECT content_hash, revision FROM records WHERE id = ?1",
                params![record.id.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let dimensions = encode_json(&record.dimensions)?;
        let measures = encode_json(&record.measures)?;
        let now = Utc::now().to_rfc3339();
        let p = &record.provenance;

        match existing {
            None => {
                self.tx.execute(
                    "INSERT INTO records (id, dimensions, measures, timestamp, source_file, batch_id,
                        sheet, row_index, content_hash, revision, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)",
                    params![
                        record.id.as_str(),
                        dimensions,
                        measures,
                        format_timestamp(&record.timestamp),
                        p.source_file,
                        p.batch_id,
                        p.sheet,
                        p.row,
                        hash,
                        now,
                    ],
                )?;
                self.dirty = true;
                Ok(UpsertOutcome::Inserted)
            }
            Some((stored_hash, _)) if stored_hash == hash => Ok(UpsertOutcome::Unchanged),
            Some((_, revision)) => {
                self.tx.execute(
                    "UPDATE records SET dimensions = ?2, measures = ?3, timestamp = ?4, source_file = ?5,
                        batch_id = ?6, sheet = ?7, row_index = ?8, content_hash = ?9, revision = ?10,
                        updated_at = ?11
                     WHERE id = ?1",
                    params![
                        record.id.as_str(),
                        dimensions,
                        measures,
                        format_timestamp(&record.timestamp),
                        p.source_file,
                        p.batch_id,
                        p.sheet,
                        p.row,
                        hash,
                        revision + 1,
                        now,
                    ],
                )?;
                self.dirty = true;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// The record as stored, without its campaign classification.
    pub fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1");
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_record(row)?)),
            None => Ok(None),
        }
    }

    pub fn find_batch_by_checksum(&self, checksum: &str) -> Result<Option<Batch>, StoreError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE checksum = ?1 ORDER BY started_at LIMIT 1"
        );
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query(params![checksum])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_batch(row)?)),
            None => Ok(None),
        }
    }

    pub fn record_batch(&mut self, batch: &Batch) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO batches (id, file_name, checksum, schema_name, started_at, finished_at,
                accepted, updated, unchanged, rejected)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                batch.id,
                batch.file_name,
                batch.checksum,
                batch.schema,
                batch.started_at.to_rfc3339(),
                batch.finished_at.to_rfc3339(),
                batch.accepted as i64,
                batch.updated as i64,
                batch.unchanged as i64,
                batch.rejected as i64,
            ],
        )?;
        Ok(())
    }

    /// Revision the store will have once this transaction commits.
    pub fn pending_revision(&self) -> u64 {
        if self.dirty {
            self.revision + 1
        } else {
            self.revision
        }
    }

    /// Commit and return the store revision. The counter moves only if a
    /// record changed.
    pub fn commit(self) -> Result<u64, StoreError> {
        let revision = self.pending_revision();
        if self.dirty {
            write_revision(&self.tx, revision)?;
        }
        self.tx.commit()?;
        Ok(revision)
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}
