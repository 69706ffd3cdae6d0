//! Spreadsheet ingestion for the Kolet data layer.
//!
//! One file becomes one batch: the file is checksummed, skipped when an
//! identical file was already committed, read sheet by sheet, normalized
//! row by row against a schema, and upserted into the store in a single
//! transaction.

pub mod checksum;
pub mod error;
pub mod pipeline;
pub mod source;

pub use checksum::file_checksum;
pub use error::{FatalIngestionError, IngestError};
pub use pipeline::{
    ingest, ingest_many, BatchStatus, BatchSummary, IngestManyError, IngestOptions, IngestWarning, RowError,
};
pub use source::{peek_rows, SourceFile, DELIMITED_SHEET};
