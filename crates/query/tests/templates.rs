use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use kolet_core::{AggFn, AggregationQuery, Filter, Provenance, Record, RecordId, Value, ValueKind};
use kolet_engine::AggregationEngine;
use kolet_query::{measure_kinds, QueryError, QueryFacade, TemplateParams};
use kolet_schema::SchemaCatalog;
use kolet_store::{Store, StoreConfig};
use rust_decimal::Decimal;
use tempfile::TempDir;

struct Row<'a> {
    day: u32,
    month: u32,
    source: &'a str,
    campaign: &'a str,
    cost: &'a str,
    clicks: i64,
    impressions: i64,
    installs: i64,
}

fn record(n: u32, row: &Row<'_>) -> Record {
    Record {
        id: RecordId::derive(&["fixture", n.to_string().as_str()]),
        dimensions: BTreeMap::from([
            ("source".to_string(), row.source.to_string()),
            ("campaign".to_string(), row.campaign.to_string()),
        ]),
        measures: BTreeMap::from([
            ("cost".to_string(), Decimal::from_str(row.cost).unwrap()),
            ("clicks".to_string(), Decimal::from(row.clicks)),
            ("impressions".to_string(), Decimal::from(row.impressions)),
            ("installs".to_string(), Decimal::from(row.installs)),
        ]),
        timestamp: NaiveDate::from_ymd_opt(2025, row.month, row.day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        provenance: Provenance {
            source_file: "fixture.csv".into(),
            batch_id: "b1".into(),
            sheet: "Sheet1".into(),
            row: n + 2,
        },
        revision: 0,
    }
}

fn setup() -> (TempDir, QueryFacade) {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(&dir.path().join("kolet.db"), StoreConfig::default()).unwrap();
    let rows = [
        Row { day: 1, month: 4, source: "Google Ads", campaign: "Brand", cost: "10", clicks: 20, impressions: 400, installs: 4 },
        Row { day: 15, month: 4, source: "Branch.io", campaign: "Spring", cost: "0", clicks: 5, impressions: 0, installs: 0 },
        Row { day: 2, month: 5, source: "Google Ads", campaign: "Brand", cost: "40", clicks: 10, impressions: 100, installs: 6 },
        Row { day: 3, month: 5, source: "Apple Search Ads", campaign: "Apple Search Ads Campaign", cost: "25.50", clicks: 30, impressions: 600, installs: 5 },
        Row { day: 5, month: 5, source: "Branch.io", campaign: "Spring", cost: "40", clicks: 8, impressions: 0, installs: 2 },
    ];
    let mut tx = store.begin().unwrap();
    for (n, row) in rows.iter().enumerate() {
        tx.upsert(&record(n as u32, row)).unwrap();
    }
    tx.commit().unwrap();

    let schema = SchemaCatalog::builtin().unwrap().get("marketing").unwrap().clone();
    let engine = AggregationEngine::for_store(&store, 16).with_measure_kinds(measure_kinds(&schema));
    (dir, QueryFacade::new(Arc::new(engine), schema))
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn dec(s: &str) -> Value {
    Value::Decimal(Decimal::from_str(s).unwrap())
}

#[test]
fn lists_every_template() {
    let (_dir, facade) = setup();
    let names: Vec<&str> = facade.list_templates().iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec!["monthly_totals_by_category", "top_n_by_measure", "daily_series", "weekly_series", "totals", "kpi_by_dimension"]
    );
}

#[test]
fn monthly_totals_by_source() {
    let (_dir, facade) = setup();
    let params = TemplateParams::new().set("category", "source").set("measures", "cost,clicks");
    let table = facade.run_template("monthly_totals_by_category", &params).unwrap();

    let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["period", "source", "sum_cost", "sum_clicks"]);
    assert_eq!(table.column("sum_clicks").unwrap().kind, ValueKind::Integer);
    assert_eq!(table.len(), 5);

    // April first, then May; sources ascending within a month.
    assert_eq!(table.get(0, "period"), Some(&Value::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())));
    assert_eq!(table.get(0, "source"), Some(&text("Branch.io")));
    assert_eq!(table.get(2, "source"), Some(&text("Apple Search Ads")));
    assert_eq!(table.get(2, "sum_cost"), Some(&dec("25.50")));
    assert_eq!(table.get(4, "source"), Some(&text("Google Ads")));
    assert_eq!(table.get(4, "sum_clicks"), Some(&Value::Integer(10)));
}

#[test]
fn top_n_ranks_descending_and_truncates() {
    let (_dir, facade) = setup();
    let params = TemplateParams::new()
        .set("dimension", "source")
        .set("measure", "cost")
        .set("n", "2");
    let table = facade.run_template("top_n_by_measure", &params).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(0, "source"), Some(&text("Google Ads")));
    assert_eq!(table.get(0, "sum_cost"), Some(&dec("50")));
    assert_eq!(table.get(1, "source"), Some(&text("Branch.io")));

    let may_only = params.clone().set("from", "2025-05-01").set("n", "10");
    let table = facade.run_template("top_n_by_measure", &may_only).unwrap();
    let order: Vec<_> = table.column_values("source").into_iter().cloned().collect();
    // Branch.io and Google Ads tie at 40 in May; ties go by name.
    assert_eq!(order, vec![text("Branch.io"), text("Google Ads"), text("Apple Search Ads")]);
}

#[test]
fn weekly_series_with_breakdown() {
    let (_dir, facade) = setup();
    let params = TemplateParams::new()
        .set("measures", "installs")
        .set("dimension", "source")
        .set("from", "2025-05-01")
        .set("to", "2025-05-31");
    let table = facade.run_template("weekly_series", &params).unwrap();
    // 2025-05-02, 05-03 fall in the week of Monday 04-28; 05-05 starts a new week.
    let periods: Vec<_> = table.column_values("period").into_iter().filter_map(Value::as_date).collect();
    assert_eq!(
        periods,
        vec![
            NaiveDate::from_ymd_opt(2025, 4, 28).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 28).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 5).unwrap(),
        ]
    );
    assert_eq!(table.get(2, "sum_installs"), Some(&Value::Integer(2)));
}

#[test]
fn daily_series_needs_measures() {
    let (_dir, facade) = setup();
    let err = facade.run_template("daily_series", &TemplateParams::new()).unwrap_err();
    assert!(matches!(err, QueryError::MissingParam { ref param, .. } if param == "measures"));
}

#[test]
fn totals_sum_everything() {
    let (_dir, facade) = setup();
    let table = facade.run_template("totals", &TemplateParams::new()).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(0, "sum_cost"), Some(&dec("115.50")));
    assert_eq!(table.get(0, "sum_installs"), Some(&Value::Integer(17)));
    assert_eq!(table.get(0, "record_count"), Some(&Value::Integer(5)));
    // Measures no record carries still sum to zero.
    assert_eq!(table.get(0, "sum_revenue"), Some(&dec("0")));

    let empty = facade
        .run_template("totals", &TemplateParams::new().set("from", "2030-01-01"))
        .unwrap();
    assert_eq!(empty.get(0, "record_count"), Some(&Value::Integer(0)));
}

#[test]
fn kpis_per_source() {
    let (_dir, facade) = setup();
    let params = TemplateParams::new()
        .set("dimension", "source")
        .set("metrics", "ctr,cpa");
    let table = facade.run_template("kpi_by_dimension", &params).unwrap();
    assert_eq!(table.column("ctr").unwrap().kind, ValueKind::Decimal);

    // Apple Search Ads: 30 clicks / 600 impressions.
    assert_eq!(table.get(0, "source"), Some(&text("Apple Search Ads")));
    assert_eq!(table.get(0, "ctr"), Some(&dec("5")));
    assert_eq!(table.get(0, "cpa"), Some(&dec("5.1")));
    // Branch.io reports no impressions.
    assert_eq!(table.get(1, "ctr"), Some(&Value::Null));
    assert_eq!(table.get(1, "cpa"), Some(&dec("20")));
    // Google Ads: 30 clicks / 500 impressions, 50 cost / 10 installs.
    assert_eq!(table.get(2, "ctr"), Some(&dec("6")));
    assert_eq!(table.get(2, "cpa"), Some(&dec("5")));
}

#[test]
fn bad_requests_fail_before_scanning() {
    let (_dir, facade) = setup();

    let unknown = facade.run_template("monthly", &TemplateParams::new()).unwrap_err();
    assert!(matches!(unknown, QueryError::UnknownTemplate(_)));

    let wrong_role = TemplateParams::new().set("dimension", "cost").set("measure", "cost");
    assert!(matches!(
        facade.run_template("top_n_by_measure", &wrong_role),
        Err(QueryError::UnknownField { expected: "dimension", .. })
    ));

    let bad_n = TemplateParams::new().set("dimension", "source").set("measure", "cost").set("n", "lots");
    assert!(matches!(
        facade.run_template("top_n_by_measure", &bad_n),
        Err(QueryError::InvalidParam { .. })
    ));

    let bad_metric = TemplateParams::new().set("dimension", "source").set("metrics", "ltv");
    assert!(matches!(
        facade.run_template("kpi_by_dimension", &bad_metric),
        Err(QueryError::UnknownField { expected: "derived metric", .. })
    ));

    let raw = AggregationQuery::new()
        .measure("cost", AggFn::Sum)
        .filter(Filter::default().with_dimension("country", ["FR"]));
    assert!(matches!(facade.raw_query(&raw), Err(QueryError::UnknownField { .. })));

    assert_eq!(facade.engine().cache_stats().misses, 0);
}

#[test]
fn raw_query_is_cached() {
    let (_dir, facade) = setup();
    let query = AggregationQuery::new().group_by("campaign").measure("clicks", AggFn::Max);
    let first = facade.raw_query(&query).unwrap();
    let second = facade.raw_query(&query).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.get(0, "campaign"), Some(&text("Apple Search Ads Campaign")));
    assert_eq!(first.get(0, "max_clicks"), Some(&Value::Integer(30)));
}
