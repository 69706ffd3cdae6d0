//! Schema definitions and the row normalizer.
//!
//! A [`SchemaDefinition`] is declared in TOML and maps raw spreadsheet
//! headers onto canonical fields. Headers are bound once per sheet into a
//! [`ColumnBinding`]; each row then goes through [`normalize_row`], which is
//! pure and returns [`RowOutcome::Accepted`] or [`RowOutcome::Rejected`].

pub mod binding;
pub mod catalog;
pub mod coerce;
pub mod definition;
pub mod error;
pub mod normalize;

pub use binding::{normalize_header, ColumnBinding, ColumnSlot};
pub use catalog::SchemaCatalog;
pub use coerce::{excel_serial_to_datetime, parse_date, parse_decimal, NumberLocale};
pub use definition::{
    CasePolicy, DerivedMetric, FieldDef, FieldRole, Rule, SchemaDefinition, UnknownColumnPolicy,
};
pub use error::SchemaError;
pub use normalize::{normalize_row, NormalizedRow, RawValue, RowIssue, RowOutcome};
