//! Persistent store for normalized records and ingestion batches.
//!
//! One SQLite file in WAL mode. [`Store`] owns the single writable
//! connection and hands out [`WriteTxn`]s; readers open their own
//! connections and work on [`Snapshot`]s pinned to one revision.
//!
//! Campaign classifications live in their own tables and are applied to
//! records on read, as the `campaign_type` and `channel_type` dimensions.

pub mod classify;
mod codec;
pub mod error;
pub mod reader;
mod schema;
pub mod store;

pub use classify::{
    CampaignSearch, CampaignSummary, ClassificationChange, ClassificationFailure, ClassificationStats, ClassifyReport,
};
pub use error::StoreError;
pub use reader::{Reader, RecordIter, ScanCursor, Snapshot};
pub use store::{Store, StoreConfig, StoreStats, UpsertOutcome, WriteTxn};
