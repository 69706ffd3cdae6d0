use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::record::Record;

// ---------------------------------------------------------------------------
// Aggregation functions + buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl AggFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl std::fmt::Display for AggFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar bucket for time series. Boundaries follow the calendar, never
/// rolling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Day,
    /// ISO week, keyed by its Monday.
    Week,
    /// Calendar month, keyed by its first day.
    Month,
}

impl TimeBucket {
    /// First day of the bucket containing `date`.
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => {
                let back = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(back)).unwrap_or(date)
            }
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Conjunctive record filter. Every populated part must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Inclusive lower bound on the record date.
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on the record date.
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub source_file: Option<String>,
    /// Dimension name → accepted values.
    #[serde(default)]
    pub dimensions: BTreeMap<String, BTreeSet<String>>,
}

impl Filter {
    pub fn between(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    pub fn with_dimension<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_none()
            && self.to.is_none()
            && self.source_file.is_none()
            && self.dimensions.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        let date = record.timestamp.date();
        if self.from.is_some_and(|from| date < from) {
            return false;
        }
        if self.to.is_some_and(|to| date > to) {
            return false;
        }
        if let Some(ref file) = self.source_file {
            if &record.provenance.source_file != file {
                return false;
            }
        }
        self.matches_dimensions(record)
    }

    /// Dimension predicates only. The store pushes the date and file parts
    /// into SQL and applies this part while iterating.
    pub fn matches_dimensions(&self, record: &Record) -> bool {
        self.dimensions.iter().all(|(name, accepted)| {
            record
                .dimension(name)
                .is_some_and(|value| accepted.contains(value))
        })
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasureSpec {
    pub field: String,
    pub func: AggFn,
}

impl MeasureSpec {
    pub fn new(field: &str, func: AggFn) -> Self {
        Self {
            field: field.to_string(),
            func,
        }
    }

    /// Result column name, e.g. `sum_cost`.
    pub fn column_name(&self) -> String {
        format!("{}_{}", self.func, self.field)
    }
}

/// Declarative grouping/aggregation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationQuery {
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub measures: Vec<MeasureSpec>,
    #[serde(default)]
    pub bucket: Option<TimeBucket>,
    #[serde(default)]
    pub filter: Filter,
    /// Append a `record_count` column counting matched records per group.
    #[serde(default)]
    pub record_count: bool,
}

impl AggregationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_by(mut self, dimension: &str) -> Self {
        self.dimensions.push(dimension.to_string());
        self
    }

    pub fn measure(mut self, field: &str, func: AggFn) -> Self {
        self.measures.push(MeasureSpec::new(field, func));
        self
    }

    pub fn bucket(mut self, bucket: TimeBucket) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn count_records(mut self) -> Self {
        self.record_count = true;
        self
    }

    /// Canonical serialization used for cache keys.
    ///
    /// Struct fields serialize in declaration order and the filter uses
    /// sorted maps/sets, so equal queries always produce equal strings.
    /// Dimension and measure order is preserved: it shapes the output.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Grouped queries produce one row per group; ungrouped ones exactly one row.
    pub fn is_grouped(&self) -> bool {
        !self.dimensions.is_empty() || self.bucket.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn week_bucket_starts_monday() {
        // 2025-05-04 is a Sunday
        assert_eq!(TimeBucket::Week.start_of(date(2025, 5, 4)), date(2025, 4, 28));
        assert_eq!(TimeBucket::Week.start_of(date(2025, 5, 5)), date(2025, 5, 5));
    }

    #[test]
    fn month_bucket_is_calendar_month() {
        assert_eq!(TimeBucket::Month.start_of(date(2025, 1, 31)), date(2025, 1, 1));
        assert_eq!(TimeBucket::Month.start_of(date(2024, 2, 29)), date(2024, 2, 1));
        assert_eq!(TimeBucket::Day.start_of(date(2024, 2, 29)), date(2024, 2, 29));
    }

    #[test]
    fn canonical_json_ignores_filter_insertion_order() {
        let a = AggregationQuery::new()
            .group_by("region")
            .measure("cost", AggFn::Sum)
            .filter(Filter::default().with_dimension("source", ["b", "a"]));
        let b = AggregationQuery::new()
            .group_by("region")
            .measure("cost", AggFn::Sum)
            .filter(Filter::default().with_dimension("source", ["a", "b"]));
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());

        let reordered = AggregationQuery::new()
            .measure("cost", AggFn::Sum)
            .group_by("platform");
        assert_ne!(a.canonical_json().unwrap(), reordered.canonical_json().unwrap());
    }

    #[test]
    fn column_name_prefixes_function() {
        assert_eq!(MeasureSpec::new("cost", AggFn::Mean).column_name(), "mean_cost");
    }
}
