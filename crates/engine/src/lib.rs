//! Aggregation over the Kolet record store.
//!
//! [`AggregationEngine::evaluate`] runs an [`AggregationQuery`] against one
//! consistent store snapshot and returns a shared [`ResultTable`]. Results are
//! cached per (query, revision); any committed write bumps the revision and
//! retires older entries.
//!
//! [`AggregationQuery`]: kolet_core::AggregationQuery
//! [`ResultTable`]: kolet_core::ResultTable

pub mod aggregate;
pub mod cache;
pub mod engine;
pub mod error;

pub use aggregate::{
    aggregate, output_kind, result_columns, MeasureKinds, CANCEL_CHECK_INTERVAL, PERIOD_COLUMN,
    RECORD_COUNT_COLUMN,
};
pub use cache::{CacheKey, CacheStats, QueryCache};
pub use engine::{AggregationEngine, DEFAULT_CACHE_CAPACITY};
pub use error::EngineError;
