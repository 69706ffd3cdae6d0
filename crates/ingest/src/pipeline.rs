use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kolet_core::{Batch, CancelToken, Provenance, Record};
use kolet_schema::{normalize_row, ColumnBinding, RawValue, RowIssue, RowOutcome, SchemaDefinition};
use kolet_store::{Store, UpsertOutcome, WriteTxn};
use serde::Serialize;
use uuid::Uuid;

use crate::checksum::file_checksum;
use crate::error::{FatalIngestionError, IngestError};
use crate::source::{SourceFile, SourceRow, DELIMITED_SHEET};

// ---------------------------------------------------------------------------
// Options + summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Rows searched for the header at the top of each sheet.
    pub header_scan_rows: usize,
    /// Files above this many bytes are refused.
    pub max_file_size: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            header_scan_rows: 20,
            max_file_size: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Committed,
    /// Byte-identical to the file of an earlier batch; nothing was written.
    Duplicate { previous: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub sheet: String,
    pub row: u32,
    pub issues: Vec<RowIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestWarning {
    /// Values found under a header the schema does not know.
    UnknownColumn { sheet: String, column: String, rows: u64 },
    /// Sheet had no recognizable header and was not read.
    SkippedSheet { sheet: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub file_name: String,
    pub checksum: String,
    pub schema: String,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accepted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub rejected: u64,
    pub errors: Vec<RowError>,
    pub warnings: Vec<IngestWarning>,
    /// Store revision after the batch.
    pub revision: u64,
}

impl BatchSummary {
    pub fn is_duplicate(&self) -> bool {
        matches!(self.status, BatchStatus::Duplicate { .. })
    }

    pub fn rows_read(&self) -> u64 {
        self.accepted + self.updated + self.unchanged + self.rejected
    }
}

// ---------------------------------------------------------------------------
// Single file
// ---------------------------------------------------------------------------

/// Ingest one file as one batch. Either every valid row and the batch row
/// commit together, or nothing is written.
pub fn ingest(
    store: &mut Store,
    path: &Path,
    schema: &SchemaDefinition,
    options: &IngestOptions,
    cancel: &CancelToken,
) -> Result<BatchSummary, IngestError> {
    let result = run_batch(store, path, schema, options, cancel);
    match &result {
        Ok(summary) if summary.is_duplicate() => {}
        Ok(summary) => log::info!(
            "{}: batch {} committed: {} new, {} updated, {} unchanged, {} rejected (revision {})",
            summary.file_name,
            summary.batch_id,
            summary.accepted,
            summary.updated,
            summary.unchanged,
            summary.rejected,
            summary.revision
        ),
        Err(IngestError::Fatal(e)) => log::warn!("{e}"),
        Err(e) => log::warn!("{}: {e}", path.display()),
    }
    result
}

fn run_batch(
    store: &mut Store,
    path: &Path,
    schema: &SchemaDefinition,
    options: &IngestOptions,
    cancel: &CancelToken,
) -> Result<BatchSummary, IngestError> {
    let started_at = Utc::now();
    let shown = path.display().to_string();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shown.clone());

    let size = std::fs::metadata(path)
        .map_err(|e| FatalIngestionError::Unreadable {
            path: shown.clone(),
            reason: e.to_string(),
        })?
        .len();
    if !SourceFile::is_supported(path) {
        return Err(FatalIngestionError::UnsupportedFormat {
            path: shown,
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
        .into());
    }
    if size > options.max_file_size {
        return Err(FatalIngestionError::TooLarge {
            path: shown,
            size,
            limit: options.max_file_size,
        }
        .into());
    }
    let checksum = file_checksum(path).map_err(|e| FatalIngestionError::Unreadable {
        path: shown.clone(),
        reason: e.to_string(),
    })?;

    let batch_id = Uuid::new_v4().to_string();
    log::info!("{file_name}: ingesting with schema '{}' as batch {batch_id}", schema.name);

    let mut tx = store.begin()?;
    if let Some(previous) = tx.find_batch_by_checksum(&checksum)? {
        tx.rollback()?;
        log::info!(
            "{file_name}: identical to '{}' (batch {}), skipped",
            previous.file_name,
            previous.id
        );
        let revision = store.revision()?;
        return Ok(BatchSummary {
            batch_id,
            file_name,
            checksum,
            schema: schema.name.clone(),
            status: BatchStatus::Duplicate { previous: previous.id },
            started_at,
            finished_at: Utc::now(),
            accepted: 0,
            updated: 0,
            unchanged: 0,
            rejected: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            revision,
        });
    }

    let mut source = SourceFile::open(path)?;
    let sheets = select_sheets(&source, schema, &shown)?;

    let mut batch = BatchState {
        schema,
        options,
        cancel,
        batch_id: &batch_id,
        file_name: &file_name,
        accepted: 0,
        updated: 0,
        unchanged: 0,
        rejected: 0,
        errors: Vec::new(),
        unknown: BTreeMap::new(),
        skipped: Vec::new(),
    };

    let mut any_header = false;
    for (sheet, required) in &sheets {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let found = batch.ingest_sheet(&mut tx, &mut source, sheet)?;
        if !found && *required {
            return Err(FatalIngestionError::NoHeader { path: shown }.into());
        }
        any_header |= found;
    }
    if !any_header {
        return Err(FatalIngestionError::NoHeader { path: shown }.into());
    }

    let finished_at = Utc::now();
    tx.record_batch(&Batch {
        id: batch_id.clone(),
        file_name: file_name.clone(),
        checksum: checksum.clone(),
        schema: schema.name.clone(),
        started_at,
        finished_at,
        accepted: batch.accepted,
        updated: batch.updated,
        unchanged: batch.unchanged,
        rejected: batch.rejected,
    })?;
    let revision = tx.commit()?;

    let mut warnings: Vec<IngestWarning> = batch
        .skipped
        .into_iter()
        .map(|sheet| IngestWarning::SkippedSheet { sheet })
        .collect();
    warnings.extend(
        batch
            .unknown
            .into_iter()
            .map(|((sheet, column), rows)| IngestWarning::UnknownColumn { sheet, column, rows }),
    );

    Ok(BatchSummary {
        batch_id: batch_id.clone(),
        file_name: file_name.clone(),
        checksum,
        schema: schema.name.clone(),
        status: BatchStatus::Committed,
        started_at,
        finished_at,
        accepted: batch.accepted,
        updated: batch.updated,
        unchanged: batch.unchanged,
        rejected: batch.rejected,
        errors: batch.errors,
        warnings,
        revision,
    })
}

/// Sheets to read and whether each must yield a header.
fn select_sheets(
    source: &SourceFile,
    schema: &SchemaDefinition,
    path: &str,
) -> Result<Vec<(String, bool)>, FatalIngestionError> {
    if matches!(source, SourceFile::Delimited { .. }) {
        return Ok(vec![(DELIMITED_SHEET.to_string(), true)]);
    }
    let available = source.sheet_names();
    if schema.sheets.is_empty() {
        return Ok(available.into_iter().map(|s| (s, false)).collect());
    }
    schema
        .sheets
        .iter()
        .map(|wanted| {
            available
                .iter()
                .find(|s| s.trim().eq_ignore_ascii_case(wanted.trim()))
                .map(|s| (s.clone(), true))
                .ok_or_else(|| FatalIngestionError::MissingSheet {
                    path: path.to_string(),
                    sheet: wanted.clone(),
                })
        })
        .collect()
}

/// First row among `rows` that binds every required field; failing that,
/// the row binding the most fields (at least two).
pub(crate) fn detect_header(schema: &SchemaDefinition, rows: &[SourceRow]) -> Option<(usize, ColumnBinding)> {
    let mut best: Option<(usize, ColumnBinding, usize)> = None;
    for (idx, (_, cells)) in rows.iter().enumerate() {
        if cells.iter().all(RawValue::is_empty) {
            continue;
        }
        let headers: Vec<String> = cells.iter().map(RawValue::to_text).collect();
        let binding = schema.resolve_columns(&headers);
        let bound = binding.bound_count();
        if bound > 0 && binding.missing_required(schema).is_empty() {
            return Some((idx, binding));
        }
        if bound >= 2 && best.as_ref().map_or(true, |(_, _, most)| bound > *most) {
            best = Some((idx, binding, bound));
        }
    }
    best.map(|(idx, binding, _)| (idx, binding))
}

struct BatchState<'a> {
    schema: &'a SchemaDefinition,
    options: &'a IngestOptions,
    cancel: &'a CancelToken,
    batch_id: &'a str,
    file_name: &'a str,
    accepted: u64,
    updated: u64,
    unchanged: u64,
    rejected: u64,
    errors: Vec<RowError>,
    /// (sheet, column) → rows carrying a value there.
    unknown: BTreeMap<(String, String), u64>,
    skipped: Vec<String>,
}

impl BatchState<'_> {
    /// Returns `false` when no header was found in the scanned rows.
    fn ingest_sheet(
        &mut self,
        tx: &mut WriteTxn<'_>,
        source: &mut SourceFile,
        sheet: &str,
    ) -> Result<bool, IngestError> {
        let mut rows = source.rows(sheet)?;
        let mut head = Vec::new();
        while head.len() < self.options.header_scan_rows.max(1) {
            match rows.next() {
                Some(row) => head.push(row?),
                None => break,
            }
        }

        let Some((header_idx, binding)) = detect_header(self.schema, &head) else {
            log::warn!("{}: sheet '{sheet}' has no recognizable header, skipped", self.file_name);
            self.skipped.push(sheet.to_string());
            return Ok(false);
        };
        log::debug!(
            "{}: sheet '{sheet}' header at row {}, {} fields bound",
            self.file_name,
            head[header_idx].0,
            binding.bound_count()
        );
        let missing = binding.missing_required(self.schema);
        if !missing.is_empty() {
            log::warn!("{}: sheet '{sheet}' lacks required columns {missing:?}", self.file_name);
        }
        for column in binding.unknown_columns() {
            log::warn!("{}: sheet '{sheet}' has unknown column '{column}'", self.file_name);
        }

        let remaining = head.into_iter().skip(header_idx + 1).map(Ok).chain(rows);
        for item in remaining {
            if self.cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let (number, cells) = item?;
            if cells.iter().all(RawValue::is_empty) {
                continue;
            }
            self.ingest_row(tx, sheet, &binding, number, &cells)?;
        }
        Ok(true)
    }

    fn ingest_row(
        &mut self,
        tx: &mut WriteTxn<'_>,
        sheet: &str,
        binding: &ColumnBinding,
        number: u32,
        cells: &[RawValue],
    ) -> Result<(), IngestError> {
        let row = match normalize_row(self.schema, binding, cells) {
            RowOutcome::Accepted(row) => row,
            RowOutcome::Rejected(issues) => {
                self.rejected += 1;
                self.errors.push(RowError {
                    sheet: sheet.to_string(),
                    row: number,
                    issues,
                });
                return Ok(());
            }
        };

        for warning in &row.warnings {
            if let RowIssue::UnknownColumn { column } = warning {
                *self
                    .unknown
                    .entry((sheet.to_string(), column.clone()))
                    .or_default() += 1;
            }
        }

        let provenance = Provenance {
            source_file: self.file_name.to_string(),
            batch_id: self.batch_id.to_string(),
            sheet: sheet.to_string(),
            row: number,
        };
        let record = Record {
            id: self.schema.record_id(&row, &provenance),
            dimensions: row.dimensions,
            measures: row.measures,
            timestamp: row.timestamp,
            provenance,
            revision: 0,
        };
        match tx.upsert(&record)? {
            UpsertOutcome::Inserted => self.accepted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Several files
// ---------------------------------------------------------------------------

/// Batches committed before a multi-file ingest stopped, plus the failure.
#[derive(Debug)]
pub struct IngestManyError {
    pub completed: Vec<BatchSummary>,
    pub failed: PathBuf,
    pub error: IngestError,
}

impl fmt::Display for IngestManyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stopped at {} after {} batch(es): {}",
            self.failed.display(),
            self.completed.len(),
            self.error
        )
    }
}

impl std::error::Error for IngestManyError {}

/// One batch per file, in order. Stops at the first failure; batches
/// already committed stay committed.
pub fn ingest_many<'s, P, F>(
    store: &mut Store,
    paths: &[P],
    mut schema_for: F,
    options: &IngestOptions,
    cancel: &CancelToken,
) -> Result<Vec<BatchSummary>, IngestManyError>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> Result<&'s SchemaDefinition, IngestError>,
{
    let mut completed = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let outcome = schema_for(path).and_then(|schema| ingest(store, path, schema, options, cancel));
        match outcome {
            Ok(summary) => completed.push(summary),
            Err(error) => {
                return Err(IngestManyError {
                    completed,
                    failed: path.to_path_buf(),
                    error,
                })
            }
        }
    }
    Ok(completed)
}
