use std::fmt;

use kolet_store::StoreError;

/// Structural failure: the file cannot be ingested at all. Nothing is applied.
#[derive(Debug)]
pub enum FatalIngestionError {
    Unreadable { path: String, reason: String },
    UnsupportedFormat { path: String, extension: String },
    CorruptWorkbook { path: String, reason: String },
    MissingSheet { path: String, sheet: String },
    NoHeader { path: String },
    TooLarge { path: String, size: u64, limit: u64 },
}

impl fmt::Display for FatalIngestionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, reason } => write!(f, "{path}: cannot read file: {reason}"),
            Self::UnsupportedFormat { path, extension } => {
                write!(f, "{path}: unsupported file type '{extension}'")
            }
            Self::CorruptWorkbook { path, reason } => write!(f, "{path}: corrupt workbook: {reason}"),
            Self::MissingSheet { path, sheet } => write!(f, "{path}: required sheet '{sheet}' not found"),
            Self::NoHeader { path } => write!(f, "{path}: no header row matches the schema"),
            Self::TooLarge { path, size, limit } => {
                write!(f, "{path}: file is {size} bytes, limit is {limit}")
            }
        }
    }
}

impl std::error::Error for FatalIngestionError {}

#[derive(Debug)]
pub enum IngestError {
    Fatal(FatalIngestionError),
    /// The batch was rolled back, e.g. on a constraint violation.
    Store(StoreError),
    Cancelled,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "batch rolled back: {e}"),
            Self::Cancelled => write!(f, "ingestion cancelled"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fatal(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

impl From<FatalIngestionError> for IngestError {
    fn from(e: FatalIngestionError) -> Self {
        Self::Fatal(e)
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
