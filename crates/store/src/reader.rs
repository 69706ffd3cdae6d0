use std::path::Path;
use std::time::Duration;

use kolet_core::{Filter, Record, RecordId};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Rows, Statement, Transaction};

use crate::codec::{day_start, decode_classified_record, CLASSIFIED_RECORDS};
use crate::error::StoreError;
use crate::schema::read_revision;
use crate::store::StoreConfig;

/// Read-only connection. Cheap to open; one per evaluating thread.
pub struct Reader {
    conn: Connection,
}

impl Reader {
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| StoreError::StoreUnavailable(format!("{}: {e}", path.display())))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self { conn })
    }

    /// Begin a read transaction. Reading the revision inside it fixes the WAL
    /// snapshot: later commits by the writer are invisible to this snapshot.
    pub fn snapshot(&mut self) -> Result<Snapshot<'_>, StoreError> {
        let tx = self.conn.transaction()?;
        let revision = read_revision(&tx)?;
        Ok(Snapshot { tx, revision })
    }
}

/// Consistent view of the store at one revision.
pub struct Snapshot<'r> {
    tx: Transaction<'r>,
    revision: u64,
}

impl Snapshot<'_> {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record with its campaign classification applied.
    pub fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError> {
        let sql = format!("{CLASSIFIED_RECORDS} WHERE r.id = ?1");
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_classified_record(row)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self.tx.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Prepare a scan. Date and source-file predicates run in SQL; dimension
    /// predicates are checked while iterating, after the campaign
    /// classification is applied. Rows come in timestamp order.
    pub fn scan(&self, filter: &Filter) -> Result<ScanCursor<'_>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(from) = filter.from {
            values.push(day_start(from));
            clauses.push(format!("r.timestamp >= ?{}", values.len()));
        }
        if let Some(next_day) = filter.to.and_then(|to| to.succ_opt()) {
            values.push(day_start(next_day));
            clauses.push(format!("r.timestamp < ?{}", values.len()));
        }
        if let Some(file) = &filter.source_file {
            values.push(file.clone());
            clauses.push(format!("r.source_file = ?{}", values.len()));
        }

        let mut sql = CLASSIFIED_RECORDS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY r.timestamp, r.id");

        let stmt = self.tx.prepare(&sql)?;
        Ok(ScanCursor {
            stmt,
            values,
            filter: filter.clone(),
        })
    }
}

/// Prepared scan. Call [`ScanCursor::records`] to stream the matches.
pub struct ScanCursor<'s> {
    stmt: Statement<'s>,
    values: Vec<String>,
    filter: Filter,
}

impl ScanCursor<'_> {
    /// Lazy iterator; one row is decoded per `next`.
    pub fn records(&mut self) -> Result<RecordIter<'_>, StoreError> {
        let ScanCursor { stmt, values, filter } = self;
        let rows = stmt.query(params_from_iter(values.iter()))?;
        Ok(RecordIter { rows, filter })
    }
}

pub struct RecordIter<'c> {
    rows: Rows<'c>,
    filter: &'c Filter,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            };
            match decode_classified_record(row) {
                Ok(record) if self.filter.matches_dimensions(&record) => return Some(Ok(record)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
