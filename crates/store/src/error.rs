use std::fmt;

use kolet_core::Provenance;

#[derive(Debug)]
pub enum StoreError {
    /// Cannot open, migrate, read or write the database file. Fatal.
    StoreUnavailable(String),
    /// The same record id was written twice in one transaction from two
    /// different source rows.
    ConstraintViolation {
        id: String,
        first: Provenance,
        second: Provenance,
    },
    /// A stored row could not be decoded.
    Corrupt { id: String, reason: String },
    /// No stored record carries this campaign name.
    UnknownCampaign(String),
}

impl StoreError {
    pub(crate) fn unavailable(err: impl fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::ConstraintViolation { id, first, second } => write!(
                f,
                "record {id} written twice in one batch: {}!{} row {} and {}!{} row {}",
                first.source_file, first.sheet, first.row, second.source_file, second.sheet, second.row
            ),
            Self::Corrupt { id, reason } => write!(f, "stored record {id} is corrupt: {reason}"),
            Self::UnknownCampaign(name) => write!(f, "no records for campaign '{name}'"),
        }
    }
}

impl std::error::Error for StoreError {}
