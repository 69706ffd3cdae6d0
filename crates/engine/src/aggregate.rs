//! Grouping and reduction over a stream of records.
//!
//! [`aggregate`] is a pure function of the query and the records it is fed:
//! input order does not affect the output. Groups are collected in a hash map
//! and sorted once at the end, so output rows are ascending by
//! `(period, dimension values...)`. A record missing a grouped dimension lands
//! in the `None` group, which sorts first and reports `Value::Null`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use kolet_core::{AggFn, AggregationQuery, CancelToken, Column, Record, ResultTable, Row, Value, ValueKind};
use kolet_store::StoreError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::error::EngineError;

/// Records scanned between cancel-token checks.
pub const CANCEL_CHECK_INTERVAL: usize = 256;

/// Name of the bucket column in bucketed results.
pub const PERIOD_COLUMN: &str = "period";

/// Name of the per-group record count column.
pub const RECORD_COUNT_COLUMN: &str = "record_count";

/// Declared kind of each measure field. Unlisted measures are decimals.
pub type MeasureKinds = BTreeMap<String, ValueKind>;

type GroupKey = (Option<NaiveDate>, Vec<Option<String>>);

#[derive(Debug, Clone)]
struct Group {
    records: u64,
    measures: Vec<Accumulator>,
}

impl Group {
    fn new(measures: usize) -> Self {
        Self {
            records: 0,
            measures: vec![Accumulator::default(); measures],
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    sum: Decimal,
    count: u64,
    min: Option<Decimal>,
    max: Option<Decimal>,
}

impl Accumulator {
    fn push(&mut self, value: Decimal, measure: &str) -> Result<(), EngineError> {
        self.sum = self.sum.checked_add(value).ok_or_else(|| overflow(measure))?;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        Ok(())
    }

    fn finish(&self, func: AggFn, kind: ValueKind, measure: &str) -> Result<Value, EngineError> {
        let number = match func {
            AggFn::Count => {
                let count = i64::try_from(self.count).map_err(|_| overflow(measure))?;
                return Ok(Value::Integer(count));
            }
            AggFn::Mean => {
                if self.count == 0 {
                    return Ok(Value::Null);
                }
                let mean = self
                    .sum
                    .checked_div(Decimal::from(self.count))
                    .ok_or_else(|| overflow(measure))?;
                return Ok(Value::Decimal(mean.normalize()));
            }
            AggFn::Sum => Some(self.sum),
            AggFn::Min => self.min,
            AggFn::Max => self.max,
        };
        match number {
            None => Ok(Value::Null),
            Some(n) if kind == ValueKind::Integer => n.to_i64().map(Value::Integer).ok_or_else(|| overflow(measure)),
            Some(n) => Ok(Value::Decimal(n.normalize())),
        }
    }
}

fn overflow(measure: &str) -> EngineError {
    EngineError::Overflow {
        measure: measure.to_string(),
    }
}

/// Column type for `func` applied to a measure of kind `measure`.
pub fn output_kind(func: AggFn, measure: ValueKind) -> ValueKind {
    match func {
        AggFn::Count => ValueKind::Integer,
        AggFn::Mean => ValueKind::Decimal,
        AggFn::Sum | AggFn::Min | AggFn::Max => measure,
    }
}

/// Output columns of `query`: period, dimensions, measures, record count.
pub fn result_columns(query: &AggregationQuery, kinds: &MeasureKinds) -> Vec<Column> {
    let mut columns = Vec::with_capacity(1 + query.dimensions.len() + query.measures.len());
    if query.bucket.is_some() {
        columns.push(Column::new(PERIOD_COLUMN, ValueKind::Date));
    }
    for dimension in &query.dimensions {
        columns.push(Column::new(dimension.as_str(), ValueKind::Text));
    }
    for spec in &query.measures {
        let kind = kinds.get(&spec.field).copied().unwrap_or(ValueKind::Decimal);
        columns.push(Column::new(spec.column_name(), output_kind(spec.func, kind)));
    }
    if query.record_count {
        columns.push(Column::new(RECORD_COUNT_COLUMN, ValueKind::Integer));
    }
    columns
}

/// Group and reduce `records` for `query`. Records failing the query filter
/// are skipped, so unfiltered input is fine.
pub fn aggregate<I>(
    query: &AggregationQuery,
    kinds: &MeasureKinds,
    records: I,
    revision: u64,
    cancel: &CancelToken,
) -> Result<ResultTable, EngineError>
where
    I: IntoIterator<Item = Result<Record, StoreError>>,
{
    let mut groups: FxHashMap<GroupKey, Group> = FxHashMap::default();

    for (scanned, record) in records.into_iter().enumerate() {
        if scanned % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let record = record?;
        if !query.filter.matches(&record) {
            continue;
        }
        let period = query.bucket.map(|b| b.start_of(record.timestamp.date()));
        let values = query
            .dimensions
            .iter()
            .map(|d| record.dimension(d).map(str::to_string))
            .collect();
        let group = groups
            .entry((period, values))
            .or_insert_with(|| Group::new(query.measures.len()));
        group.records += 1;
        for (acc, spec) in group.measures.iter_mut().zip(&query.measures) {
            if let Some(value) = record.measure(&spec.field) {
                acc.push(value, &spec.field)?;
            }
        }
    }
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    if !query.is_grouped() && groups.is_empty() {
        groups.insert((None, Vec::new()), Group::new(query.measures.len()));
    }

    let mut keyed: Vec<(GroupKey, Group)> = groups.into_iter().collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut table = ResultTable::new(result_columns(query, kinds), revision);
    for ((period, values), group) in keyed {
        let mut row = Row::new();
        if let Some(period) = period {
            row.insert(PERIOD_COLUMN.to_string(), Value::Date(period));
        }
        for (name, value) in query.dimensions.iter().zip(values) {
            row.insert(name.clone(), value.map_or(Value::Null, Value::Text));
        }
        for (acc, spec) in group.measures.iter().zip(&query.measures) {
            let kind = kinds.get(&spec.field).copied().unwrap_or(ValueKind::Decimal);
            row.insert(spec.column_name(), acc.finish(spec.func, kind, &spec.field)?);
        }
        if query.record_count {
            let records = i64::try_from(group.records).map_err(|_| overflow(RECORD_COUNT_COLUMN))?;
            row.insert(RECORD_COUNT_COLUMN.to_string(), Value::Integer(records));
        }
        table.rows.push(row);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kolet_core::{Filter, Provenance, RecordId, TimeBucket};
    use proptest::prelude::*;
    use std::str::FromStr;

    fn record(row: u32, day: u32, region: Option<&str>, cost: Option<&str>) -> Record {
        let mut dimensions = BTreeMap::new();
        if let Some(region) = region {
            dimensions.insert("region".to_string(), region.to_string());
        }
        let mut measures = BTreeMap::new();
        if let Some(cost) = cost {
            measures.insert("cost".to_string(), Decimal::from_str(cost).unwrap());
        }
        Record {
            id: RecordId::derive(&[row.to_string()]),
            dimensions,
            measures,
            timestamp: NaiveDate::from_ymd_opt(2025, 5, day).unwrap().and_hms_opt(9, 30, 0).unwrap(),
            provenance: Provenance {
                source_file: "t.csv".into(),
                batch_id: "b".into(),
                sheet: "Sheet1".into(),
                row,
            },
            revision: 1,
        }
    }

    fn run(query: &AggregationQuery, records: Vec<Record>) -> ResultTable {
        aggregate(query, &MeasureKinds::new(), records.into_iter().map(Ok), 1, &CancelToken::new()).unwrap()
    }

    fn dec(s: &str) -> Value {
        Value::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn groups_sorted_by_key() {
        let query = AggregationQuery::new().group_by("region").measure("cost", AggFn::Sum);
        let table = run(
            &query,
            vec![
                record(1, 1, Some("B"), Some("5")),
                record(2, 1, Some("A"), Some("10")),
                record(3, 2, Some("A"), Some("3")),
            ],
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "region"), Some(&Value::Text("A".into())));
        assert_eq!(table.get(0, "sum_cost"), Some(&dec("13")));
        assert_eq!(table.get(1, "region"), Some(&Value::Text("B".into())));
        assert_eq!(table.get(1, "sum_cost"), Some(&dec("5")));
    }

    #[test]
    fn missing_dimension_sorts_first_as_null() {
        let query = AggregationQuery::new().group_by("region").measure("cost", AggFn::Count);
        let table = run(
            &query,
            vec![record(1, 1, Some("A"), Some("1")), record(2, 1, None, Some("2"))],
        );
        assert_eq!(table.get(0, "region"), Some(&Value::Null));
        assert_eq!(table.get(0, "count_cost"), Some(&Value::Integer(1)));
    }

    #[test]
    fn record_count_includes_rows_without_the_measure() {
        let query = AggregationQuery::new()
            .measure("cost", AggFn::Count)
            .count_records();
        let table = run(
            &query,
            vec![record(1, 1, Some("A"), Some("1")), record(2, 1, Some("A"), None)],
        );
        assert_eq!(table.get(0, "count_cost"), Some(&Value::Integer(1)));
        assert_eq!(table.get(0, RECORD_COUNT_COLUMN), Some(&Value::Integer(2)));
        assert_eq!(table.column(RECORD_COUNT_COLUMN).unwrap().kind, ValueKind::Integer);
    }

    #[test]
    fn empty_group_mean_is_null_and_sum_is_zero() {
        let query = AggregationQuery::new()
            .group_by("region")
            .measure("cost", AggFn::Mean)
            .measure("cost", AggFn::Sum)
            .measure("cost", AggFn::Max)
            .measure("cost", AggFn::Count);
        let table = run(&query, vec![record(1, 1, Some("A"), None)]);
        assert_eq!(table.get(0, "mean_cost"), Some(&Value::Null));
        assert_eq!(table.get(0, "max_cost"), Some(&Value::Null));
        assert_eq!(table.get(0, "sum_cost"), Some(&Value::Decimal(Decimal::ZERO)));
        assert_eq!(table.get(0, "count_cost"), Some(&Value::Integer(0)));
    }

    #[test]
    fn decimal_results_drop_trailing_zeros() {
        let query = AggregationQuery::new()
            .measure("cost", AggFn::Sum)
            .measure("cost", AggFn::Max)
            .measure("cost", AggFn::Mean);
        let table = run(
            &query,
            vec![record(1, 1, None, Some("1.50")), record(2, 1, None, Some("2.50"))],
        );
        let shown = |column: &str| match table.get(0, column) {
            Some(Value::Decimal(d)) => d.to_string(),
            other => panic!("{column}: {other:?}"),
        };
        assert_eq!(shown("sum_cost"), "4");
        assert_eq!(shown("max_cost"), "2.5");
        assert_eq!(shown("mean_cost"), "2");
    }

    #[test]
    fn ungrouped_query_always_has_one_row() {
        let query = AggregationQuery::new().measure("cost", AggFn::Sum).measure("cost", AggFn::Mean);
        let table = run(&query, Vec::new());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0, "sum_cost"), Some(&Value::Decimal(Decimal::ZERO)));
        assert_eq!(table.get(0, "mean_cost"), Some(&Value::Null));

        let grouped = AggregationQuery::new().group_by("region").measure("cost", AggFn::Sum);
        assert!(run(&grouped, Vec::new()).is_empty());
    }

    #[test]
    fn weekly_buckets_key_on_monday() {
        // 2025-05-04 is a Sunday, 2025-05-05 the following Monday.
        let query = AggregationQuery::new()
            .bucket(TimeBucket::Week)
            .measure("cost", AggFn::Sum);
        let table = run(
            &query,
            vec![
                record(1, 4, None, Some("1")),
                record(2, 5, None, Some("2")),
                record(3, 11, None, Some("4")),
            ],
        );
        let periods: Vec<Option<NaiveDate>> = table.column_values(PERIOD_COLUMN).iter().map(|v| v.as_date()).collect();
        assert_eq!(
            periods,
            vec![
                NaiveDate::from_ymd_opt(2025, 4, 28),
                NaiveDate::from_ymd_opt(2025, 5, 5),
            ]
        );
        assert_eq!(table.get(1, "sum_cost"), Some(&dec("6")));
    }

    #[test]
    fn integer_measures_stay_integer() {
        let mut kinds = MeasureKinds::new();
        kinds.insert("cost".into(), ValueKind::Integer);
        let query = AggregationQuery::new()
            .measure("cost", AggFn::Sum)
            .measure("cost", AggFn::Mean);
        let records = vec![record(1, 1, None, Some("2")), record(2, 1, None, Some("3"))];
        let table = aggregate(&query, &kinds, records.into_iter().map(Ok), 1, &CancelToken::new()).unwrap();
        assert_eq!(table.column("sum_cost").unwrap().kind, ValueKind::Integer);
        assert_eq!(table.get(0, "sum_cost"), Some(&Value::Integer(5)));
        assert_eq!(table.column("mean_cost").unwrap().kind, ValueKind::Decimal);
        assert_eq!(table.get(0, "mean_cost"), Some(&dec("2.5")));
    }

    #[test]
    fn filter_applies_to_unfiltered_input() {
        let query = AggregationQuery::new()
            .measure("cost", AggFn::Sum)
            .filter(Filter::default().with_dimension("region", ["A"]));
        let table = run(
            &query,
            vec![record(1, 1, Some("A"), Some("1")), record(2, 1, Some("B"), Some("7"))],
        );
        assert_eq!(table.get(0, "sum_cost"), Some(&dec("1")));
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let query = AggregationQuery::new().measure("cost", AggFn::Sum);
        let records = vec![record(1, 1, None, Some("1"))];
        let err = aggregate(&query, &MeasureKinds::new(), records.into_iter().map(Ok), 1, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn overflow_is_reported() {
        let query = AggregationQuery::new().measure("cost", AggFn::Sum);
        let max = Decimal::MAX.to_string();
        let records = vec![record(1, 1, None, Some(&max)), record(2, 1, None, Some(&max))];
        let err = aggregate(&query, &MeasureKinds::new(), records.into_iter().map(Ok), 1, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Overflow { ref measure } if measure == "cost"));
    }

    fn proptest_config() -> ProptestConfig {
        let cases = std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64);
        ProptestConfig::with_cases(cases)
    }

    proptest! {
        #![proptest_config(proptest_config())]

        #[test]
        fn input_order_does_not_matter(
            rows in prop::collection::vec((1u32..28, 0usize..3, -500i64..500), 0..40),
            seed in any::<u64>(),
        ) {
            let regions = ["A", "B", "C"];
            let records: Vec<Record> = rows
                .iter()
                .enumerate()
                .map(|(i, (day, region, cents))| {
                    let cost = Decimal::new(*cents, 2).to_string();
                    record(i as u32, *day, Some(regions[*region]), Some(&cost))
                })
                .collect();
            let mut shuffled = records.clone();
            // Deterministic rotation plus reversal stands in for a shuffle.
            if !shuffled.is_empty() {
                let by = (seed as usize) % shuffled.len();
                shuffled.rotate_left(by);
            }
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            let query = AggregationQuery::new()
                .bucket(TimeBucket::Week)
                .group_by("region")
                .measure("cost", AggFn::Sum)
                .measure("cost", AggFn::Min)
                .measure("cost", AggFn::Count);
            prop_assert_eq!(run(&query, records), run(&query, shuffled));
        }
    }
}
