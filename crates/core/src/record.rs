use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::TIMESTAMP_FORMAT;

/// Stable record identifier: 32 hex chars of a SHA-256 over identity parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Derive an id from ordered identity parts. Parts are separated by a
    /// unit separator so `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn derive<S: AsRef<str>>(parts: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update([0x1f]);
            }
            hasher.update(part.as_ref().as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..32].to_string())
    }

    /// Wrap an id read back from storage.
    pub fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_file: String,
    pub batch_id: String,
    pub sheet: String,
    /// 1-based physical row number in the sheet (header rows included).
    pub row: u32,
}

impl Provenance {
    /// Same physical source row, regardless of which batch read it.
    pub fn same_row(&self, other: &Provenance) -> bool {
        self.source_file == other.source_file && self.sheet == other.sheet && self.row == other.row
    }
}

/// One normalized business fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub dimensions: BTreeMap<String, String>,
    pub measures: BTreeMap<String, Decimal>,
    pub timestamp: NaiveDateTime,
    pub provenance: Provenance,
    /// 1 on first insert, +1 on every content change.
    pub revision: u64,
}

impl Record {
    /// Hash over the business content only (timestamp, dimensions, measures).
    ///
    /// Provenance and revision are excluded, so the same fact read from a
    /// different batch hashes identically. Decimals are normalized first:
    /// `10.50` and `10.5` are the same content.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.format(TIMESTAMP_FORMAT).to_string().as_bytes());
        for (name, value) in &self.dimensions {
            hasher.update(b"\nd:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        for (name, value) in &self.measures {
            hasher.update(b"\nm:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.normalize().to_string().as_bytes());
        }
        format!("sha256:{:x}", hasher.finalize())
    }

    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }

    pub fn measure(&self, name: &str) -> Option<Decimal> {
        self.measures.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn record(cost: &str, batch: &str) -> Record {
        Record {
            id: RecordId::derive(&["file.csv", "Sheet1", "2"]),
            dimensions: BTreeMap::from([("region".to_string(), "north".to_string())]),
            measures: BTreeMap::from([("cost".to_string(), Decimal::from_str(cost).unwrap())]),
            timestamp: NaiveDate::from_ymd_opt(2025, 5, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            provenance: Provenance {
                source_file: "file.csv".into(),
                batch_id: batch.into(),
                sheet: "Sheet1".into(),
                row: 2,
            },
            revision: 1,
        }
    }

    #[test]
    fn derive_is_stable_and_separated() {
        let a = RecordId::derive(&["ab", "c"]);
        let b = RecordId::derive(&["a", "bc"]);
        assert_ne!(a, b);
        assert_eq!(a, RecordId::derive(&["ab", "c"]));
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn content_hash_ignores_provenance_and_scale() {
        let first = record("10.50", "batch-1");
        let second = record("10.5", "batch-2");
        assert_eq!(first.content_hash(), second.content_hash());

        let changed = record("10.51", "batch-1");
        assert_ne!(first.content_hash(), changed.content_hash());
    }
}
