use std::path::{Path, PathBuf};
use std::str::FromStr;

use kolet_core::{CancelToken, Filter};
use kolet_ingest::{
    ingest, ingest_many, BatchStatus, FatalIngestionError, IngestError, IngestOptions, IngestWarning,
};
use kolet_schema::{RowIssue, SchemaCatalog, SchemaDefinition};
use kolet_store::{Store, StoreConfig, StoreError};
use rust_decimal::Decimal;
use tempfile::TempDir;

const SALES: &str = r#"
name = "sales"

[fields.day]
type = "date"

[fields.region]
type = "text"
rule = "required"

[fields.product]
type = "text"

[fields.amount]
type = "decimal"
rule = "required"

[fields.units]
type = "integer"
default = 0
"#;

fn sales() -> SchemaDefinition {
    SchemaDefinition::from_toml(SALES).unwrap()
}

fn sales_by_key() -> SchemaDefinition {
    let mut schema = sales();
    schema.identity = vec!["day".into(), "region".into(), "product".into()];
    schema.validate().unwrap();
    schema
}

fn open_store(dir: &TempDir) -> Store {
    Store::open(&dir.path().join("kolet.db"), StoreConfig::default()).unwrap()
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn run(store: &mut Store, path: &Path, schema: &SchemaDefinition) -> Result<kolet_ingest::BatchSummary, IngestError> {
    ingest(store, path, schema, &IngestOptions::default(), &CancelToken::new())
}

fn record_count(store: &Store) -> u64 {
    let mut reader = store.reader().unwrap();
    let snapshot = reader.snapshot().unwrap();
    snapshot.count().unwrap()
}

#[test]
fn bad_row_is_rejected_and_siblings_commit() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let path = write(
        &dir,
        "may.csv",
        "day,region,product,amount,units\n\
         2025-05-01,north,tea,10.50,3\n\
         2025-05-01,south,tea,4,\n\
         2025-05-02,north,coffee,7.25,1\n\
         2025-05-02,south,coffee,abc,2\n",
    );

    let summary = run(&mut store, &path, &sales()).unwrap();
    assert_eq!(summary.status, BatchStatus::Committed);
    assert_eq!((summary.accepted, summary.rejected), (3, 1));
    assert_eq!(summary.revision, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].sheet, "Sheet1");
    assert_eq!(summary.errors[0].row, 5);
    assert!(matches!(
        &summary.errors[0].issues[..],
        [RowIssue::TypeMismatch { field, value, .. }] if field == "amount" && value == "abc"
    ));
    assert_eq!(record_count(&store), 3);

    let history = store.batches(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, summary.batch_id);
    assert_eq!(history[0].rejected, 1);
}

#[test]
fn identical_file_under_new_name_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let content = "day,region,amount\n2025-05-01,north,10\n2025-05-02,north,12\n";
    let first = write(&dir, "may.csv", content);
    let second = write(&dir, "may (1).csv", content);

    let committed = run(&mut store, &first, &sales()).unwrap();
    let again = run(&mut store, &second, &sales()).unwrap();

    assert!(again.is_duplicate());
    assert_eq!(
        again.status,
        BatchStatus::Duplicate {
            previous: committed.batch_id.clone()
        }
    );
    assert_eq!(again.checksum, committed.checksum);
    assert_eq!(again.rows_read(), 0);
    assert_eq!(again.revision, 1);
    assert_eq!(record_count(&store), 2);
    assert_eq!(store.batches(10).unwrap().len(), 1);
}

#[test]
fn changed_export_updates_by_natural_key() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let schema = sales_by_key();

    let first = write(&dir, "week1.csv", "day,region,product,amount\n2025-05-01,north,tea,10\n2025-05-01,south,tea,4\n");
    let second = write(
        &dir,
        "week1-fixed.csv",
        "day,region,product,amount\n2025-05-01,south,tea,4.00\n2025-05-01,north,tea,12\n2025-05-02,north,tea,1\n",
    );

    run(&mut store, &first, &schema).unwrap();
    let summary = run(&mut store, &second, &schema).unwrap();
    assert_eq!((summary.accepted, summary.updated, summary.unchanged), (1, 1, 1));
    assert_eq!(summary.revision, 2);
    assert_eq!(record_count(&store), 3);
}

#[test]
fn duplicate_key_in_one_file_rolls_back_the_batch() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let schema = sales_by_key();
    let seed = write(&dir, "seed.csv", "day,region,product,amount\n2025-04-30,east,tea,1\n");
    run(&mut store, &seed, &schema).unwrap();

    let path = write(
        &dir,
        "dupes.csv",
        "day,region,product,amount\n\
         2025-05-01,north,tea,10\n\
         2025-05-02,north,tea,3\n\
         2025-05-01,north,tea,11\n",
    );
    let err = run(&mut store, &path, &schema).unwrap_err();
    match err {
        IngestError::Store(StoreError::ConstraintViolation { first, second, .. }) => {
            assert_eq!((first.row, second.row), (2, 4));
        }
        other => panic!("expected constraint violation, got {other}"),
    }

    assert_eq!(record_count(&store), 1);
    assert_eq!(store.revision().unwrap(), 1);
    assert_eq!(store.batches(10).unwrap().len(), 1);
}

#[test]
fn workbook_with_title_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("report.xlsx");
    {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Data").unwrap();
        sheet.write_string(0, 0, "Monthly sales report").unwrap();
        sheet.write_string(2, 0, "Day").unwrap();
        sheet.write_string(2, 1, "Region").unwrap();
        sheet.write_string(2, 2, "Amount").unwrap();
        sheet.write_string(3, 0, "2025-05-01").unwrap();
        sheet.write_string(3, 1, "North").unwrap();
        sheet.write_number(3, 2, 10.5).unwrap();
        sheet.write_string(4, 0, "2025-05-02").unwrap();
        sheet.write_string(4, 1, "South").unwrap();
        sheet.write_number(4, 2, 3.0).unwrap();
        workbook.save(&path).unwrap();
    }

    let mut store = open_store(&dir);
    let summary = run(&mut store, &path, &sales()).unwrap();
    assert_eq!((summary.accepted, summary.rejected), (2, 0));

    let mut reader = store.reader().unwrap();
    let snapshot = reader.snapshot().unwrap();
    let mut cursor = snapshot.scan(&Filter::default()).unwrap();
    let records: Vec<_> = cursor.records().unwrap().map(Result::unwrap).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].provenance.sheet, "Data");
    assert_eq!(records[0].provenance.row, 4);
    assert_eq!(records[0].dimension("region"), Some("north"));
    assert_eq!(records[0].measure("amount"), Some(Decimal::from_str("10.5").unwrap()));
    assert_eq!(records[1].timestamp.date().to_string(), "2025-05-02");
}

#[test]
fn required_sheet_must_exist() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.xlsx");
    {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Day").unwrap();
        workbook.save(&path).unwrap();
    }
    let mut schema = sales();
    schema.sheets = vec!["Totals".into()];

    let mut store = open_store(&dir);
    let err = run(&mut store, &path, &schema).unwrap_err();
    assert!(matches!(
        err,
        IngestError::Fatal(FatalIngestionError::MissingSheet { ref sheet, .. }) if sheet == "Totals"
    ));
    assert_eq!(store.revision().unwrap(), 0);
}

#[test]
fn structural_failures_write_nothing() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let no_header = write(&dir, "notes.csv", "hello,world\nfoo,bar\n");
    assert!(matches!(
        run(&mut store, &no_header, &sales()),
        Err(IngestError::Fatal(FatalIngestionError::NoHeader { .. }))
    ));

    let pdf = write(&dir, "report.pdf", "%PDF-1.4");
    assert!(matches!(
        run(&mut store, &pdf, &sales()),
        Err(IngestError::Fatal(FatalIngestionError::UnsupportedFormat { .. }))
    ));

    let big = write(&dir, "big.csv", "day,region,amount\n2025-05-01,north,10\n");
    let options = IngestOptions {
        max_file_size: 8,
        ..IngestOptions::default()
    };
    assert!(matches!(
        ingest(&mut store, &big, &sales(), &options, &CancelToken::new()),
        Err(IngestError::Fatal(FatalIngestionError::TooLarge { limit: 8, .. }))
    ));

    assert_eq!(store.revision().unwrap(), 0);
    assert!(store.batches(10).unwrap().is_empty());
}

#[test]
fn cancelled_batch_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let path = write(&dir, "may.csv", "day,region,amount\n2025-05-01,north,10\n");
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = ingest(&mut store, &path, &sales(), &IngestOptions::default(), &cancel).unwrap_err();
    assert!(matches!(err, IngestError::Cancelled));
    assert_eq!(record_count(&store), 0);
    assert!(store.batches(10).unwrap().is_empty());
}

#[test]
fn unknown_columns_are_counted_per_sheet() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let path = write(
        &dir,
        "may.csv",
        "day,region,amount,Notes\n2025-05-01,north,10,late\n2025-05-02,north,12,\n2025-05-03,north,1,ok\n",
    );

    let summary = run(&mut store, &path, &sales()).unwrap();
    assert_eq!(summary.accepted, 3);
    assert_eq!(
        summary.warnings,
        vec![IngestWarning::UnknownColumn {
            sheet: "Sheet1".into(),
            column: "Notes".into(),
            rows: 2,
        }]
    );
}

#[test]
fn google_dashboard_export_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let catalog = SchemaCatalog::builtin().unwrap();
    let path = write(
        &dir,
        "Dashboard May.tsv",
        "Campaign performance\n\
         May 1, 2025 - May 31, 2025\n\
         Campaign\tDay\tCost\tImpr.\tClicks\n\
         UAC iOS FR\t2025-05-01\t12.40\t900\t31\n\
         Brand search\t2025-05-01\t3,50\t120\t9\n",
    );
    let schema = catalog.detect_by_name("Dashboard May.tsv").unwrap();
    assert_eq!(schema.name, "google_ads");

    let summary = run(&mut store, &path, schema).unwrap();
    assert_eq!((summary.accepted, summary.rejected), (2, 0));

    let mut reader = store.reader().unwrap();
    let snapshot = reader.snapshot().unwrap();
    let mut cursor = snapshot.scan(&Filter::default()).unwrap();
    let mut platforms: Vec<String> = cursor
        .records()
        .unwrap()
        .map(|r| r.unwrap().dimension("platform").unwrap_or_default().to_string())
        .collect();
    platforms.sort();
    assert_eq!(platforms, vec!["Web", "iOS"]);
}

#[test]
fn many_files_stop_at_first_failure() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let schema = sales();
    let good = write(&dir, "a.csv", "day,region,amount\n2025-05-01,north,10\n");
    let bad = write(&dir, "b.pdf", "%PDF");
    let never = write(&dir, "c.csv", "day,region,amount\n2025-05-02,north,10\n");

    let err = ingest_many(
        &mut store,
        &[good, bad.clone(), never],
        |_| Ok(&schema),
        &IngestOptions::default(),
        &CancelToken::new(),
    )
    .unwrap_err();
    assert_eq!(err.completed.len(), 1);
    assert_eq!(err.failed, bad);
    assert_eq!(record_count(&store), 1);
}
