use std::collections::{BTreeMap, BTreeSet, HashMap};

use kolet_core::ValueKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::binding::normalize_header;
use crate::coerce::{parse_decimal, NumberLocale};
use crate::error::SchemaError;

// ---------------------------------------------------------------------------
// Top-level definition
// ---------------------------------------------------------------------------

/// Declarative mapping from raw spreadsheet columns to canonical fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub fields: BTreeMap<String, FieldDef>,
    #[serde(default)]
    pub unknown_columns: UnknownColumnPolicy,
    /// Raw headers dropped without a warning.
    #[serde(default)]
    pub ignore_columns: Vec<String>,
    /// Natural key. When empty, record ids derive from provenance.
    #[serde(default)]
    pub identity: Vec<String>,
    /// Sheets that must exist. When empty, every sheet with a header is read.
    #[serde(default)]
    pub sheets: Vec<String>,
    /// Dimension values filled after coercion, overriding the file.
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    /// Keyword-based dimension inference for fields left empty by the file.
    #[serde(default)]
    pub infer: BTreeMap<String, InferRule>,
    #[serde(default)]
    pub locale: NumberLocale,
    /// Case-insensitive substrings of the file name that select this schema.
    #[serde(default)]
    pub hints: Vec<String>,
    /// Normalized headers that must all be present for content detection.
    /// A trailing `*` matches by prefix.
    #[serde(default)]
    pub signature: Vec<String>,
    #[serde(default)]
    pub derived: Vec<DerivedMetric>,

    #[serde(skip)]
    alias_index: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub rule: Rule,
    #[serde(default)]
    pub default: Option<Scalar>,
    /// chrono format strings tried in order; empty means the built-in list.
    #[serde(default)]
    pub formats: Vec<String>,
    /// Raw value → canonical value, matched case-insensitively.
    #[serde(default)]
    pub value_map: BTreeMap<String, String>,
    #[serde(default)]
    pub case: CasePolicy,
}

/// Role a field plays in a record, implied by its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Dimension,
    Measure,
    Timestamp,
}

impl FieldDef {
    pub fn role(&self) -> FieldRole {
        match self.kind {
            ValueKind::Text => FieldRole::Dimension,
            ValueKind::Integer | ValueKind::Decimal => FieldRole::Measure,
            ValueKind::Date | ValueKind::DateTime => FieldRole::Timestamp,
        }
    }

    /// Range and one-of rules need a value to check, so they imply presence.
    pub fn is_required(&self) -> bool {
        self.role() == FieldRole::Timestamp || !matches!(self.rule, Rule::Optional)
    }

    pub fn default_text(&self) -> Option<String> {
        self.default.as_ref().map(Scalar::to_text)
    }

    pub fn default_decimal(&self) -> Option<Decimal> {
        self.default_text()
            .and_then(|text| parse_decimal(&text, NumberLocale::Dot))
    }

    /// Canonical form of a categorical value: value map first, case policy otherwise.
    pub fn canonical_text(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        let key = trimmed.to_lowercase();
        for (from, to) in &self.value_map {
            if from.trim().to_lowercase() == key {
                return to.clone();
            }
        }
        self.case.apply(trimmed)
    }
}

/// Validation rule. Exactly one per field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    #[default]
    Optional,
    Required,
    Range {
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
    OneOf(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePolicy {
    #[default]
    Lower,
    Upper,
    Preserve,
}

impl CasePolicy {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::Lower => value.to_lowercase(),
            Self::Upper => value.to_uppercase(),
            Self::Preserve => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownColumnPolicy {
    Ignore,
    #[default]
    Warn,
    Reject,
}

/// Default value as written in TOML (`default = 0`, `default = "n/a"`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn to_text(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferRule {
    /// Dimension whose canonical value is inspected.
    pub from: String,
    pub rules: Vec<InferCase>,
    /// Value when no case matches. `None` leaves the field empty.
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferCase {
    /// Case-insensitive substrings; any match selects `value`.
    pub contains: Vec<String>,
    pub value: String,
}

impl InferRule {
    pub fn resolve(&self, source: Option<&str>) -> Option<String> {
        let Some(source) = source else {
            return self.fallback.clone();
        };
        let haystack = source.to_lowercase();
        self.rules
            .iter()
            .find(|case| {
                case.contains
                    .iter()
                    .any(|needle| haystack.contains(&needle.to_lowercase()))
            })
            .map(|case| case.value.clone())
            .or_else(|| self.fallback.clone())
    }
}

/// Ratio KPI computed from two summed measures, e.g. CTR.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DerivedMetric {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
    #[serde(default = "default_scale")]
    pub scale: Decimal,
    #[serde(default)]
    pub description: String,
}

fn default_scale() -> Decimal {
    Decimal::ONE
}

impl DerivedMetric {
    /// `numerator / denominator * scale`, `None` when the denominator is zero.
    pub fn compute(&self, numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
        if denominator.is_zero() {
            return None;
        }
        numerator
            .checked_div(denominator)
            .and_then(|ratio| ratio.checked_mul(self.scale))
            .map(|v| v.round_dp(4).normalize())
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl SchemaDefinition {
    pub fn from_toml(input: &str) -> Result<Self, SchemaError> {
        let mut schema: SchemaDefinition =
            toml::from_str(input).map_err(|e| SchemaError::Parse(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check invariants and build the alias index.
    pub fn validate(&mut self) -> Result<(), SchemaError> {
        let name = self.name.clone();
        if name.trim().is_empty() {
            return Err(SchemaError::validation("<unnamed>", "name must not be empty"));
        }

        let temporal: Vec<&String> = self
            .fields
            .iter()
            .filter(|(_, f)| f.role() == FieldRole::Timestamp)
            .map(|(n, _)| n)
            .collect();
        if temporal.len() != 1 {
            return Err(SchemaError::validation(
                &name,
                format!("exactly one date/datetime field is required, found {}", temporal.len()),
            ));
        }

        for (field_name, field) in &self.fields {
            validate_field(&name, field_name, field)?;
        }

        // Every alias (the field name included) maps to one field.
        let mut index: HashMap<String, String> = HashMap::new();
        for (field_name, field) in &self.fields {
            let claims = std::iter::once(field_name).chain(field.aliases.iter());
            for alias in claims {
                let key = normalize_header(alias);
                match index.get(&key) {
                    Some(existing) if existing != field_name => {
                        return Err(SchemaError::DuplicateAlias {
                            alias: key,
                            first: existing.clone(),
                            second: field_name.clone(),
                        });
                    }
                    _ => {
                        index.insert(key, field_name.clone());
                    }
                }
            }
        }
        for ignored in &self.ignore_columns {
            let key = normalize_header(ignored);
            if let Some(owner) = index.get(&key) {
                return Err(SchemaError::validation(
                    &name,
                    format!("ignored column '{ignored}' is also an alias of '{owner}'"),
                ));
            }
        }

        for field_name in &self.identity {
            self.require_field(&format!("schema '{name}' identity"), field_name)?;
        }

        for field_name in self.constants.keys().chain(self.infer.keys()) {
            let field = self.require_field(&format!("schema '{name}' constants"), field_name)?;
            if field.role() != FieldRole::Dimension {
                return Err(SchemaError::validation(
                    &name,
                    format!("'{field_name}' is not a text field and cannot be filled by constants or inference"),
                ));
            }
        }
        for (field_name, rule) in &self.infer {
            let source = self.require_field(&format!("schema '{name}' infer.{field_name}"), &rule.from)?;
            if source.role() != FieldRole::Dimension {
                return Err(SchemaError::validation(
                    &name,
                    format!("infer.{field_name}: source '{}' is not a text field", rule.from),
                ));
            }
        }

        let mut derived_names = BTreeSet::new();
        for metric in &self.derived {
            if !derived_names.insert(metric.name.as_str()) || self.fields.contains_key(&metric.name) {
                return Err(SchemaError::validation(
                    &name,
                    format!("derived metric '{}' collides with another name", metric.name),
                ));
            }
            for part in [&metric.numerator, &metric.denominator] {
                let field = self.require_field(&format!("derived metric '{}'", metric.name), part)?;
                if field.role() != FieldRole::Measure {
                    return Err(SchemaError::validation(
                        &name,
                        format!("derived metric '{}': '{part}' is not a measure", metric.name),
                    ));
                }
            }
            if metric.scale.is_zero() {
                return Err(SchemaError::validation(
                    &name,
                    format!("derived metric '{}': scale must not be zero", metric.name),
                ));
            }
        }

        self.alias_index = index;
        Ok(())
    }

    fn require_field(&self, context: &str, field: &str) -> Result<&FieldDef, SchemaError> {
        self.fields.get(field).ok_or_else(|| SchemaError::UnknownField {
            context: context.to_string(),
            field: field.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn role_of(&self, name: &str) -> Option<FieldRole> {
        self.fields.get(name).map(FieldDef::role)
    }

    /// Canonical field for a raw header, if any.
    pub fn field_for_header(&self, header: &str) -> Option<&str> {
        self.alias_index
            .get(&normalize_header(header))
            .map(String::as_str)
    }

    pub fn is_ignored_header(&self, header: &str) -> bool {
        let key = normalize_header(header);
        self.ignore_columns
            .iter()
            .any(|ignored| normalize_header(ignored) == key)
    }

    /// The single timestamp field.
    pub fn timestamp_field(&self) -> (&str, &FieldDef) {
        self.fields
            .iter()
            .find(|(_, f)| f.role() == FieldRole::Timestamp)
            .map(|(n, f)| (n.as_str(), f))
            .unwrap_or(("", &FALLBACK_TIMESTAMP))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields_with_role(FieldRole::Dimension)
    }

    pub fn measures(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields_with_role(FieldRole::Measure)
    }

    fn fields_with_role(&self, role: FieldRole) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields
            .iter()
            .filter(move |(_, f)| f.role() == role)
            .map(|(n, f)| (n.as_str(), f))
    }

    /// Fields a header row must bind: required without a default, and not
    /// filled by a constant.
    pub fn required_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(name, f)| {
                f.is_required() && f.default.is_none() && !self.constants.contains_key(*name)
            })
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn derived_metric(&self, name: &str) -> Option<&DerivedMetric> {
        self.derived.iter().find(|m| m.name == name)
    }
}

static FALLBACK_TIMESTAMP: FieldDef = FieldDef {
    kind: ValueKind::Date,
    aliases: Vec::new(),
    rule: Rule::Required,
    default: None,
    formats: Vec::new(),
    value_map: BTreeMap::new(),
    case: CasePolicy::Preserve,
};

fn validate_field(schema: &str, name: &str, field: &FieldDef) -> Result<(), SchemaError> {
    let role = field.role();
    match &field.rule {
        Rule::Range { min, max } => {
            if role != FieldRole::Measure {
                return Err(SchemaError::validation(
                    schema,
                    format!("field '{name}': range rule needs a numeric field"),
                ));
            }
            if let (Some(lo), Some(hi)) = (min, max) {
                if lo > hi {
                    return Err(SchemaError::validation(
                        schema,
                        format!("field '{name}': range min {lo} exceeds max {hi}"),
                    ));
                }
            }
        }
        Rule::OneOf(values) => {
            if role != FieldRole::Dimension {
                return Err(SchemaError::validation(
                    schema,
                    format!("field '{name}': one_of rule needs a text field"),
                ));
            }
            if values.is_empty() {
                return Err(SchemaError::validation(
                    schema,
                    format!("field '{name}': one_of needs at least one value"),
                ));
            }
        }
        Rule::Optional | Rule::Required => {}
    }

    if let Some(default) = &field.default {
        let text = default.to_text();
        let ok = match role {
            FieldRole::Measure => match parse_decimal(&text, NumberLocale::Dot) {
                Some(v) => field.kind != ValueKind::Integer || v.fract().is_zero(),
                None => false,
            },
            FieldRole::Dimension => true,
            FieldRole::Timestamp => false,
        };
        if !ok {
            return Err(SchemaError::validation(
                schema,
                format!("field '{name}': default '{text}' is not a valid {}", field.kind),
            ));
        }
    }

    if !field.formats.is_empty() && role != FieldRole::Timestamp {
        return Err(SchemaError::validation(
            schema,
            format!("field '{name}': formats only apply to date fields"),
        ));
    }
    if !field.value_map.is_empty() && role != FieldRole::Dimension {
        return Err(SchemaError::validation(
            schema,
            format!("field '{name}': value_map only applies to text fields"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name = "sales"

[fields.date]
type = "date"
aliases = ["Day"]

[fields.region]
type = "text"
rule = "required"
value_map = { "N" = "north" }

[fields.amount]
type = "decimal"
aliases = ["Amount (EUR)"]
default = 0
rule = { range = { min = 0 } }
"#;

    #[test]
    fn parse_minimal() {
        let schema = SchemaDefinition::from_toml(MINIMAL).unwrap();
        assert_eq!(schema.name, "sales");
        assert_eq!(schema.timestamp_field().0, "date");
        assert_eq!(schema.unknown_columns, UnknownColumnPolicy::Warn);
        assert_eq!(schema.field_for_header("  amount   (eur) "), Some("amount"));
        assert_eq!(schema.field_for_header("DAY"), Some("date"));
        assert_eq!(schema.required_columns(), vec!["date", "region"]);
        assert_eq!(
            schema.field("amount").unwrap().rule,
            Rule::Range { min: Some(Decimal::ZERO), max: None }
        );
    }

    #[test]
    fn value_map_wins_over_case_policy() {
        let schema = SchemaDefinition::from_toml(MINIMAL).unwrap();
        let region = schema.field("region").unwrap();
        assert_eq!(region.canonical_text(" n "), "north");
        assert_eq!(region.canonical_text("SOUTH"), "south");
    }

    #[test]
    fn rejects_two_timestamps() {
        let input = format!("{MINIMAL}\n[fields.other]\ntype = \"datetime\"\n");
        let err = SchemaDefinition::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("exactly one"), "{err}");
    }

    #[test]
    fn rejects_shared_alias() {
        let input = format!("{MINIMAL}\n[fields.total]\ntype = \"decimal\"\naliases = [\"amount (eur)\"]\n");
        let err = SchemaDefinition::from_toml(&input).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateAlias { .. }), "{err}");
    }

    #[test]
    fn rejects_range_on_text() {
        let input = MINIMAL.replace(
            "rule = \"required\"",
            "rule = { range = { min = 1 } }",
        );
        assert!(SchemaDefinition::from_toml(&input).is_err());
    }

    #[test]
    fn rejects_bad_integer_default() {
        let input = format!("{MINIMAL}\n[fields.units]\ntype = \"integer\"\ndefault = 1.5\n");
        assert!(SchemaDefinition::from_toml(&input).is_err());
    }

    #[test]
    fn derived_metric_must_reference_measures() {
        let input = format!(
            "{MINIMAL}\n[[derived]]\nname = \"share\"\nnumerator = \"amount\"\ndenominator = \"region\"\n"
        );
        assert!(SchemaDefinition::from_toml(&input).is_err());
    }

    #[test]
    fn derived_metric_null_on_zero_denominator() {
        let metric = DerivedMetric {
            name: "ctr".into(),
            numerator: "clicks".into(),
            denominator: "impressions".into(),
            scale: Decimal::from(100),
            description: String::new(),
        };
        assert_eq!(metric.compute(Decimal::from(5), Decimal::ZERO), None);
        assert_eq!(
            metric.compute(Decimal::from(5), Decimal::from(200)),
            Some(Decimal::new(25, 1))
        );
    }

    #[test]
    fn infer_rule_first_match_then_fallback() {
        let rule = InferRule {
            from: "campaign".into(),
            rules: vec![
                InferCase { contains: vec!["ios".into(), "iphone".into()], value: "iOS".into() },
                InferCase { contains: vec!["app".into()], value: "App".into() },
            ],
            fallback: Some("Web".into()),
        };
        assert_eq!(rule.resolve(Some("Summer iPhone promo")).as_deref(), Some("iOS"));
        assert_eq!(rule.resolve(Some("Brand app")).as_deref(), Some("App"));
        assert_eq!(rule.resolve(Some("Brand search")).as_deref(), Some("Web"));
        assert_eq!(rule.resolve(None).as_deref(), Some("Web"));
    }
}
