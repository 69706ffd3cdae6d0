//! `kolet-core`: shared types for the Kolet dashboard data layer.
//!
//! Nothing in here touches the filesystem or the database. The store, the
//! ingestion pipeline, the aggregation engine and the query façade all speak
//! in these types.

pub mod batch;
pub mod cancel;
pub mod classification;
pub mod query;
pub mod record;
pub mod table;
pub mod value;

pub use batch::Batch;
pub use cancel::CancelToken;
pub use classification::{
    CampaignType, ChannelType, Classification, ClassificationUpdate, ParseClassificationError,
    CAMPAIGN_TYPE_DIMENSION, CHANNEL_TYPE_DIMENSION,
};
pub use query::{AggFn, AggregationQuery, Filter, MeasureSpec, TimeBucket};
pub use record::{Provenance, Record, RecordId};
pub use table::{Column, ResultTable, Row};
pub use value::{Value, ValueKind};

/// Format used for timestamps persisted as text. Lexicographic order equals
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
