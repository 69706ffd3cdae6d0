use std::fmt;

use kolet_config::ConfigError;
use kolet_ingest::IngestError;
use kolet_query::QueryError;
use kolet_schema::SchemaError;
use kolet_store::StoreError;

#[derive(Debug)]
pub enum DashboardError {
    Config(ConfigError),
    Schema(SchemaError),
    /// No schema of that name in the catalog.
    UnknownSchema(String),
    Store(StoreError),
    Ingest(IngestError),
    Query(QueryError),
    Io { path: String, reason: String },
    /// A classification CSV could not be read or written.
    Csv { reason: String },
}

impl fmt::Display for DashboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Schema(e) => write!(f, "{e}"),
            Self::UnknownSchema(name) => write!(f, "no schema named '{name}'"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Ingest(e) => write!(f, "{e}"),
            Self::Query(e) => write!(f, "{e}"),
            Self::Io { path, reason } => write!(f, "{path}: {reason}"),
            Self::Csv { reason } => write!(f, "classification CSV: {reason}"),
        }
    }
}

impl std::error::Error for DashboardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Schema(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Ingest(e) => Some(e),
            Self::Query(e) => Some(e),
            Self::UnknownSchema(_) | Self::Io { .. } | Self::Csv { .. } => None,
        }
    }
}

impl From<ConfigError> for DashboardError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SchemaError> for DashboardError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

impl From<StoreError> for DashboardError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<IngestError> for DashboardError {
    fn from(e: IngestError) -> Self {
        Self::Ingest(e)
    }
}

impl From<QueryError> for DashboardError {
    fn from(e: QueryError) -> Self {
        Self::Query(e)
    }
}

impl From<csv::Error> for DashboardError {
    fn from(e: csv::Error) -> Self {
        Self::Csv { reason: e.to_string() }
    }
}
