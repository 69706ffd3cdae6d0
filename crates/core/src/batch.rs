use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One committed ingestion run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub file_name: String,
    /// `sha256:<hex>` of the source file bytes.
    pub checksum: String,
    pub schema: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Rows inserted as new records.
    pub accepted: u64,
    /// Rows that changed an existing record.
    pub updated: u64,
    /// Rows identical to the stored record.
    pub unchanged: u64,
    pub rejected: u64,
}

impl Batch {
    pub fn rows_read(&self) -> u64 {
        self.accepted + self.updated + self.unchanged + self.rejected
    }
}
