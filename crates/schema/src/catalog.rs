use std::collections::BTreeMap;
use std::path::Path;

use crate::binding::normalize_header;
use crate::definition::SchemaDefinition;
use crate::error::SchemaError;

const PRESETS: &[(&str, &str)] = &[
    ("marketing", include_str!("../presets/marketing.toml")),
    ("google_ads", include_str!("../presets/google_ads.toml")),
    ("apple_search_ads", include_str!("../presets/apple_search_ads.toml")),
    ("branch_io", include_str!("../presets/branch_io.toml")),
];

/// Named schema definitions plus source detection.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, SchemaDefinition>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in presets.
    pub fn builtin() -> Result<Self, SchemaError> {
        let mut catalog = Self::new();
        for (name, source) in PRESETS {
            let schema = SchemaDefinition::from_toml(source)
                .map_err(|e| SchemaError::Parse(format!("preset '{name}': {e}")))?;
            catalog.insert(schema);
        }
        Ok(catalog)
    }

    /// Add or replace a schema by name.
    pub fn insert(&mut self, schema: SchemaDefinition) {
        if self.schemas.contains_key(&schema.name) {
            log::debug!("schema '{}' replaced", schema.name);
        }
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Load every `*.toml` in `dir`. Files override presets of the same name.
    /// Returns the number of schemas loaded.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, SchemaError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SchemaError::Io(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("toml")))
            .collect();
        paths.sort();

        for path in &paths {
            let input = std::fs::read_to_string(path)
                .map_err(|e| SchemaError::Io(format!("{}: {e}", path.display())))?;
            let schema = SchemaDefinition::from_toml(&input)
                .map_err(|e| SchemaError::Parse(format!("{}: {e}", path.display())))?;
            log::info!("loaded schema '{}' from {}", schema.name, path.display());
            self.insert(schema);
        }
        Ok(paths.len())
    }

    pub fn get(&self, name: &str) -> Option<&SchemaDefinition> {
        self.schemas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Pick a schema for a file: filename hints first, then header signature.
    /// Schemas are tried in name order.
    pub fn detect<S: AsRef<str>>(&self, file_name: &str, headers: &[S]) -> Option<&SchemaDefinition> {
        self.detect_by_name(file_name)
            .or_else(|| self.detect_by_headers(headers))
    }

    pub fn detect_by_name(&self, file_name: &str) -> Option<&SchemaDefinition> {
        let lowered = file_name.to_lowercase();
        self.schemas.values().find(|schema| {
            schema
                .hints
                .iter()
                .any(|hint| !hint.is_empty() && lowered.contains(&hint.to_lowercase()))
        })
    }

    pub fn detect_by_headers<S: AsRef<str>>(&self, headers: &[S]) -> Option<&SchemaDefinition> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        self.schemas.values().find(|schema| {
            !schema.signature.is_empty()
                && schema
                    .signature
                    .iter()
                    .all(|wanted| signature_matches(wanted, &normalized))
        })
    }
}

fn signature_matches(wanted: &str, headers: &[String]) -> bool {
    let wanted = normalize_header(wanted);
    match wanted.strip_suffix('*') {
        Some(prefix) => headers.iter().any(|h| h.starts_with(prefix)),
        None => headers.iter().any(|h| *h == wanted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["apple_search_ads", "branch_io", "google_ads", "marketing"]);
    }

    #[test]
    fn presets_share_canonical_fields() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let report = catalog.get("marketing").unwrap();
        for name in ["google_ads", "apple_search_ads", "branch_io"] {
            let schema = catalog.get(name).unwrap();
            for field in schema.fields.keys() {
                assert!(report.field(field).is_some(), "{name}.{field} missing from marketing");
            }
        }
    }

    #[test]
    fn detects_by_filename_in_order() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let none: &[&str] = &[];
        assert_eq!(catalog.detect("ASA_may.csv", none).unwrap().name, "apple_search_ads");
        assert_eq!(catalog.detect("Export 2025-05.csv", none).unwrap().name, "branch_io");
        assert_eq!(catalog.detect("Dashboard report.csv", none).unwrap().name, "google_ads");
        // "apple" wins over "export" like the hint order says.
        assert_eq!(catalog.detect("apple_export.csv", none).unwrap().name, "apple_search_ads");
        assert!(catalog.detect("misc.csv", none).is_none());
    }

    #[test]
    fn detects_by_headers() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let asa = ["Day", "Spend", "Impressions", "Taps", "Installs (Tap-Through)"];
        assert_eq!(catalog.detect("q2.csv", &asa).unwrap().name, "apple_search_ads");
        let branch = ["campaign", "day", "platform", "ad partner", "unified installs"];
        assert_eq!(catalog.detect("q2.csv", &branch).unwrap().name, "branch_io");
        let google = ["Campaign", "Day", "Cost", "Impr.", "Clicks"];
        assert_eq!(catalog.detect("q2.csv", &google).unwrap().name, "google_ads");
    }

    #[test]
    fn load_dir_overrides_presets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("google.toml"),
            "name = \"google_ads\"\nhints = [\"adwords\"]\n[fields.date]\ntype = \"date\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a schema").unwrap();

        let mut catalog = SchemaCatalog::builtin().unwrap();
        assert_eq!(catalog.load_dir(dir.path()).unwrap(), 1);
        assert_eq!(catalog.len(), 4);
        let none: &[&str] = &[];
        assert_eq!(catalog.detect("adwords.csv", none).unwrap().name, "google_ads");
    }
}
