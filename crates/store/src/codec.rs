//! Row <-> type conversions for the `records` and `batches` tables.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use kolet_core::{
    Batch, Provenance, Record, RecordId, CAMPAIGN_TYPE_DIMENSION, CHANNEL_TYPE_DIMENSION, TIMESTAMP_FORMAT,
};
use rust_decimal::Decimal;

use crate::error::StoreError;

pub(crate) const RECORD_COLUMNS: &str =
    "id, dimensions, measures, timestamp, source_file, batch_id, sheet, row_index, revision";

/// Records joined with their campaign classification. Record columns keep
/// the positions of [`RECORD_COLUMNS`]; the classification follows them.
pub(crate) const CLASSIFIED_RECORDS: &str = "SELECT r.id, r.dimensions, r.measures, r.timestamp, r.source_file,
        r.batch_id, r.sheet, r.row_index, r.revision, c.campaign_type, c.channel_type
    FROM records r
    LEFT JOIN campaign_classification c ON c.campaign = json_extract(r.dimensions, '$.campaign')";

pub(crate) const BATCH_COLUMNS: &str =
    "id, file_name, checksum, schema_name, started_at, finished_at, accepted, updated, unchanged, rejected";

pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Lower bound for `timestamp >= ?` covering the whole day.
pub(crate) fn day_start(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn decode_record(row: &rusqlite::Row<'_>) -> Result<Record, StoreError> {
    let id: String = row.get(0)?;
    let corrupt = |reason: String| StoreError::Corrupt { id: id.clone(), reason };

    let dimensions: String = row.get(1)?;
    let dimensions: BTreeMap<String, String> =
        serde_json::from_str(&dimensions).map_err(|e| corrupt(format!("dimensions: {e}")))?;
    let measures: String = row.get(2)?;
    let measures: BTreeMap<String, Decimal> =
        serde_json::from_str(&measures).map_err(|e| corrupt(format!("measures: {e}")))?;
    let timestamp: String = row.get(3)?;
    let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| corrupt(format!("timestamp '{timestamp}': {e}")))?;
    let row_index: i64 = row.get(7)?;
    let revision: i64 = row.get(8)?;

    Ok(Record {
        id: RecordId::from_stored(id.clone()),
        dimensions,
        measures,
        timestamp,
        provenance: Provenance {
            source_file: row.get(4)?,
            batch_id: row.get(5)?,
            sheet: row.get(6)?,
            row: u32::try_from(row_index).map_err(|_| corrupt(format!("row index {row_index}")))?,
        },
        revision: u64::try_from(revision).map_err(|_| corrupt(format!("revision {revision}")))?,
    })
}

/// Decode a [`CLASSIFIED_RECORDS`] row. A stored classification replaces
/// any `campaign_type`/`channel_type` the source file carried.
pub(crate) fn decode_classified_record(row: &rusqlite::Row<'_>) -> Result<Record, StoreError> {
    let mut record = decode_record(row)?;
    let campaign_type: Option<String> = row.get(9)?;
    let channel_type: Option<String> = row.get(10)?;
    if let Some(value) = campaign_type {
        record.dimensions.insert(CAMPAIGN_TYPE_DIMENSION.to_string(), value);
    }
    if let Some(value) = channel_type {
        record.dimensions.insert(CHANNEL_TYPE_DIMENSION.to_string(), value);
    }
    Ok(record)
}

pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(StoreError::unavailable)
}

pub(crate) fn decode_batch(row: &rusqlite::Row<'_>) -> Result<Batch, StoreError> {
    let id: String = row.get(0)?;
    let parse_time = |raw: String| -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                id: id.clone(),
                reason: format!("batch time '{raw}': {e}"),
            })
    };
    let count = |idx: usize| -> Result<u64, StoreError> {
        let n: i64 = row.get(idx)?;
        Ok(n.max(0) as u64)
    };
    Ok(Batch {
        id: id.clone(),
        file_name: row.get(1)?,
        checksum: row.get(2)?,
        schema: row.get(3)?,
        started_at: parse_time(row.get(4)?)?,
        finished_at: parse_time(row.get(5)?)?,
        accepted: count(6)?,
        updated: count(7)?,
        unchanged: count(8)?,
        rejected: count(9)?,
    })
}
