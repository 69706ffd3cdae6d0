use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use kolet_core::{Provenance, RecordId, ValueKind, TIMESTAMP_FORMAT};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::binding::{ColumnBinding, ColumnSlot};
use crate::coerce::{decimal_from_f64, excel_serial_to_datetime, parse_date, parse_decimal};
use crate::definition::{FieldDef, FieldRole, Rule, SchemaDefinition, UnknownColumnPolicy};

// ---------------------------------------------------------------------------
// Input + output types
// ---------------------------------------------------------------------------

/// One cell as read from a workbook or delimited file.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
    Int(i64),
    Bool(bool),
    /// A cell the reader already recognized as a date.
    DateTime(NaiveDateTime),
}

impl RawValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display text, integers without a trailing `.0`.
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => format!("{n}"),
            Self::Int(n) => n.to_string(),
            Self::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::DateTime(dt) => dt.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Row-level validation failure. Recoverable: the row is skipped (or, for
/// warnings, kept) and ingestion continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowIssue {
    MissingField { field: String },
    TypeMismatch { field: String, expected: ValueKind, value: String },
    UnparsableDate { field: String, value: String },
    UnknownColumn { column: String },
    OutOfRange { field: String, value: Decimal, min: Option<Decimal>, max: Option<Decimal> },
    NotAllowed { field: String, value: String },
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing value for '{field}'"),
            Self::TypeMismatch { field, expected, value } => {
                write!(f, "'{field}': expected {expected}, got '{value}'")
            }
            Self::UnparsableDate { field, value } => {
                write!(f, "'{field}': cannot parse date '{value}'")
            }
            Self::UnknownColumn { column } => write!(f, "unknown column '{column}'"),
            Self::OutOfRange { field, value, min, max } => {
                let lo = min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".into());
                let hi = max.map(|v| v.to_string()).unwrap_or_else(|| "+inf".into());
                write!(f, "'{field}': {value} outside [{lo}, {hi}]")
            }
            Self::NotAllowed { field, value } => {
                write!(f, "'{field}': value '{value}' is not allowed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub dimensions: BTreeMap<String, String>,
    pub measures: BTreeMap<String, Decimal>,
    pub timestamp: NaiveDateTime,
    /// Non-fatal findings, e.g. values in unknown columns under `warn`.
    pub warnings: Vec<RowIssue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(NormalizedRow),
    Rejected(Vec<RowIssue>),
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Coerce and validate one raw row. Pure: depends only on its arguments.
///
/// Cells beyond the binding are ignored; missing trailing cells count as
/// empty. Every issue in the row is collected, not just the first.
pub fn normalize_row(schema: &SchemaDefinition, binding: &ColumnBinding, raw: &[RawValue]) -> RowOutcome {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut by_field: BTreeMap<&str, &RawValue> = BTreeMap::new();

    for (slot, value) in binding.slots().iter().zip(raw.iter()) {
        match slot {
            ColumnSlot::Field(name) => {
                by_field.insert(name.as_str(), value);
            }
            ColumnSlot::Unknown(column) if !value.is_empty() => {
                let issue = RowIssue::UnknownColumn { column: column.clone() };
                match schema.unknown_columns {
                    UnknownColumnPolicy::Reject => issues.push(issue),
                    UnknownColumnPolicy::Warn => warnings.push(issue),
                    UnknownColumnPolicy::Ignore => {}
                }
            }
            _ => {}
        }
    }

    let mut dimensions = BTreeMap::new();
    let mut measures = BTreeMap::new();
    let mut timestamp = None;

    for (name, field) in &schema.fields {
        if schema.constants.contains_key(name) {
            continue;
        }
        let value = by_field.get(name.as_str()).copied().unwrap_or(&RawValue::Empty);
        match field.role() {
            FieldRole::Dimension => match coerce_text(name, field, value) {
                Ok(Some(text)) => {
                    dimensions.insert(name.clone(), text);
                }
                Ok(None) => {}
                Err(issue) => issues.push(issue),
            },
            FieldRole::Measure => match coerce_number(schema, name, field, value) {
                Ok(Some(number)) => {
                    measures.insert(name.clone(), number);
                }
                Ok(None) => {}
                Err(issue) => issues.push(issue),
            },
            FieldRole::Timestamp => match coerce_timestamp(name, field, value) {
                Ok(dt) => timestamp = Some(dt),
                Err(issue) => issues.push(issue),
            },
        }
    }

    for (name, value) in &schema.constants {
        if let Some(field) = schema.field(name) {
            dimensions.insert(name.clone(), field.canonical_text(value));
        }
    }
    for (name, rule) in &schema.infer {
        if dimensions.contains_key(name) {
            continue;
        }
        let source = dimensions.get(&rule.from).map(String::as_str);
        if let Some(value) = rule.resolve(source) {
            dimensions.insert(name.clone(), value);
        }
    }

    match timestamp {
        Some(timestamp) if issues.is_empty() => RowOutcome::Accepted(NormalizedRow {
            dimensions,
            measures,
            timestamp,
            warnings,
        }),
        _ => RowOutcome::Rejected(issues),
    }
}

fn coerce_text(name: &str, field: &FieldDef, value: &RawValue) -> Result<Option<String>, RowIssue> {
    let text = if value.is_empty() {
        match field.default_text() {
            Some(default) => default,
            None if field.is_required() => {
                return Err(RowIssue::MissingField { field: name.to_string() })
            }
            None => return Ok(None),
        }
    } else {
        value.to_text()
    };

    let canonical = field.canonical_text(&text);
    if let Rule::OneOf(allowed) = &field.rule {
        let ok = allowed
            .iter()
            .any(|a| *a == canonical || field.canonical_text(a) == canonical);
        if !ok {
            return Err(RowIssue::NotAllowed {
                field: name.to_string(),
                value: canonical,
            });
        }
    }
    Ok(Some(canonical))
}

fn coerce_number(
    schema: &SchemaDefinition,
    name: &str,
    field: &FieldDef,
    value: &RawValue,
) -> Result<Option<Decimal>, RowIssue> {
    let parsed = match value {
        _ if value.is_empty() => None,
        RawValue::Number(n) => decimal_from_f64(*n),
        RawValue::Int(n) => Some(Decimal::from(*n)),
        RawValue::Text(s) => parse_decimal(s, schema.locale),
        RawValue::Bool(_) | RawValue::DateTime(_) | RawValue::Empty => None,
    };

    let number = match (parsed, field.default_decimal()) {
        (Some(n), _) => n,
        (None, Some(default)) => default,
        (None, None) if value.is_empty() => {
            if field.is_required() {
                return Err(RowIssue::MissingField { field: name.to_string() });
            }
            return Ok(None);
        }
        (None, None) => {
            return Err(RowIssue::TypeMismatch {
                field: name.to_string(),
                expected: field.kind,
                value: value.to_text(),
            })
        }
    };

    if field.kind == ValueKind::Integer && !number.fract().is_zero() {
        return Err(RowIssue::TypeMismatch {
            field: name.to_string(),
            expected: ValueKind::Integer,
            value: value.to_text(),
        });
    }

    if let Rule::Range { min, max } = &field.rule {
        let below = min.is_some_and(|lo| number < lo);
        let above = max.is_some_and(|hi| number > hi);
        if below || above {
            return Err(RowIssue::OutOfRange {
                field: name.to_string(),
                value: number,
                min: *min,
                max: *max,
            });
        }
    }
    Ok(Some(number))
}

fn coerce_timestamp(name: &str, field: &FieldDef, value: &RawValue) -> Result<NaiveDateTime, RowIssue> {
    let parsed = match value {
        _ if value.is_empty() => {
            return Err(RowIssue::MissingField { field: name.to_string() });
        }
        RawValue::DateTime(dt) => Some(*dt),
        RawValue::Number(serial) => excel_serial_to_datetime(*serial),
        RawValue::Int(serial) => excel_serial_to_datetime(*serial as f64),
        RawValue::Text(s) => parse_date(s, &field.formats),
        RawValue::Bool(_) | RawValue::Empty => None,
    };
    match parsed {
        Some(dt) if field.kind == ValueKind::Date => Ok(dt.date().and_time(chrono::NaiveTime::MIN)),
        Some(dt) => Ok(dt),
        None => Err(RowIssue::UnparsableDate {
            field: name.to_string(),
            value: value.to_text(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

impl SchemaDefinition {
    /// Record id for a normalized row: the natural key when the schema
    /// declares `identity`, otherwise the physical source position.
    pub fn record_id(&self, row: &NormalizedRow, provenance: &Provenance) -> RecordId {
        if self.identity.is_empty() {
            let row_number = provenance.row.to_string();
            return RecordId::derive(&[
                provenance.source_file.as_str(),
                provenance.sheet.as_str(),
                row_number.as_str(),
            ]);
        }
        let (ts_name, _) = self.timestamp_field();
        let mut parts = vec![self.name.clone()];
        for field in &self.identity {
            let value = if field == ts_name {
                row.timestamp.format(TIMESTAMP_FORMAT).to_string()
            } else if let Some(dim) = row.dimensions.get(field) {
                dim.clone()
            } else if let Some(measure) = row.measures.get(field) {
                measure.normalize().to_string()
            } else {
                String::new()
            };
            parts.push(format!("{field}={value}"));
        }
        RecordId::derive(&parts)
    }
}
