//! Kolet dashboard data layer.
//!
//! [`Dashboard`] owns the store and the schema catalog, routes files to the
//! ingestion pipeline, and hands queries to the shared aggregation engine
//! through the [`QueryFacade`](kolet_query::QueryFacade). Campaign
//! classifications are managed here too, including CSV import and export.

pub mod classification;
pub mod dashboard;
pub mod error;

pub use dashboard::Dashboard;
pub use error::DashboardError;
