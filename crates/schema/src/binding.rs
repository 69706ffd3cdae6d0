use std::collections::BTreeSet;

use crate::definition::{SchemaDefinition, UnknownColumnPolicy};

/// Header key used for alias matching: trimmed, lowercased, inner
/// whitespace collapsed to single spaces, BOM stripped.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSlot {
    /// Column feeds a canonical field.
    Field(String),
    /// Listed in `ignore_columns`, blank header, a repeat of an already
    /// bound field, or unknown under the `ignore` policy.
    Ignored,
    /// Header not known to the schema.
    Unknown(String),
}

/// Raw column positions resolved against a schema, once per sheet.
#[derive(Debug, Clone)]
pub struct ColumnBinding {
    slots: Vec<ColumnSlot>,
}

impl SchemaDefinition {
    pub fn resolve_columns<S: AsRef<str>>(&self, headers: &[S]) -> ColumnBinding {
        let mut bound = BTreeSet::new();
        let slots = headers
            .iter()
            .map(|header| {
                let header = header.as_ref();
                if header.trim().is_empty() || self.is_ignored_header(header) {
                    return ColumnSlot::Ignored;
                }
                match self.field_for_header(header) {
                    Some(field) if bound.insert(field.to_string()) => {
                        ColumnSlot::Field(field.to_string())
                    }
                    Some(field) => {
                        log::debug!("column '{header}' repeats field '{field}', ignored");
                        ColumnSlot::Ignored
                    }
                    None if self.unknown_columns == UnknownColumnPolicy::Ignore => ColumnSlot::Ignored,
                    None => ColumnSlot::Unknown(header.trim().to_string()),
                }
            })
            .collect();
        ColumnBinding { slots }
    }
}

impl ColumnBinding {
    pub fn slots(&self) -> &[ColumnSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn bound_fields(&self) -> BTreeSet<&str> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                ColumnSlot::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn bound_count(&self) -> usize {
        self.bound_fields().len()
    }

    pub fn unknown_columns(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                ColumnSlot::Unknown(header) => Some(header.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Required fields with no column in this binding.
    pub fn missing_required<'a>(&self, schema: &'a SchemaDefinition) -> Vec<&'a str> {
        let bound = self.bound_fields();
        schema
            .required_columns()
            .into_iter()
            .filter(|field| !bound.contains(field))
            .collect()
    }

    /// Column index bound to `field`.
    pub fn position(&self, field: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, ColumnSlot::Field(name) if name == field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
name = "ads"
ignore_columns = ["Notes"]

[fields.date]
type = "date"
aliases = ["Day"]

[fields.cost]
type = "decimal"
aliases = ["Spend", "Cost (EUR)"]
rule = "required"
"#;

    #[test]
    fn normalizes_headers() {
        assert_eq!(normalize_header("\u{feff}  Conv.   Value "), "conv. value");
        assert_eq!(normalize_header("Impr."), "impr.");
    }

    #[test]
    fn binds_aliases_and_flags_unknowns() {
        let schema = SchemaDefinition::from_toml(SCHEMA).unwrap();
        let binding = schema.resolve_columns(&["Day", "", "Spend", "Notes", "Region", "cost"]);
        assert_eq!(
            binding.slots(),
            &[
                ColumnSlot::Field("date".into()),
                ColumnSlot::Ignored,
                ColumnSlot::Field("cost".into()),
                ColumnSlot::Ignored,
                ColumnSlot::Unknown("Region".into()),
                ColumnSlot::Ignored,
            ]
        );
        assert_eq!(binding.unknown_columns(), vec!["Region"]);
        assert!(binding.missing_required(&schema).is_empty());
        assert_eq!(binding.position("cost"), Some(2));
    }

    #[test]
    fn ignore_policy_drops_unknowns() {
        let input = format!("unknown_columns = \"ignore\"\n{SCHEMA}");
        let schema = SchemaDefinition::from_toml(&input).unwrap();
        let binding = schema.resolve_columns(&["Day", "Region"]);
        assert!(binding.unknown_columns().is_empty());
        assert_eq!(binding.missing_required(&schema), vec!["cost"]);
    }
}
