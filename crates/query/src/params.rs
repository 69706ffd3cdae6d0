use std::collections::BTreeMap;

use chrono::NaiveDate;
use kolet_core::Filter;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Template arguments as strings, the way a form or URL query delivers them.
///
/// Dates are `YYYY-MM-DD`; lists are comma separated. Blank values count as
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateParams(BTreeMap<String, String>);

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&self, template: &str, name: &str) -> Result<&str, QueryError> {
        self.get(name).ok_or_else(|| QueryError::MissingParam {
            template: template.to_string(),
            param: name.to_string(),
        })
    }

    pub(crate) fn date(&self, name: &str) -> Result<Option<NaiveDate>, QueryError> {
        self.get(name)
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| QueryError::invalid(name, raw, "expected YYYY-MM-DD"))
            })
            .transpose()
    }

    /// Positive integer, `default` when absent.
    pub(crate) fn count(&self, name: &str, default: usize) -> Result<usize, QueryError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) | Err(_) => Err(QueryError::invalid(name, raw, "expected a positive integer")),
                Ok(n) => Ok(n),
            },
        }
    }

    pub(crate) fn list(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// Inclusive `from`/`to` window as a filter.
    pub(crate) fn date_range(&self) -> Result<Filter, QueryError> {
        let from = self.date("from")?;
        let to = self.date("to")?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(QueryError::invalid("to", &to.to_string(), format!("before 'from' ({from})")));
            }
        }
        Ok(Filter::between(from, to))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TemplateParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
