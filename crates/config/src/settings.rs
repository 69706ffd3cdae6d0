// Application settings
// Loaded from <config_dir>/kolet/settings.toml, then KOLET_* environment overrides

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Variables read by [`Settings::apply_env`].
pub const ENV_DB_PATH: &str = "KOLET_DB_PATH";
pub const ENV_MAX_FILE_SIZE: &str = "KOLET_MAX_FILE_SIZE";
pub const ENV_RETENTION_DAYS: &str = "KOLET_RETENTION_DAYS";
pub const ENV_CACHE_CAPACITY: &str = "KOLET_CACHE_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Extra schema definitions (`*.toml`). `None` = `<config_dir>/kolet/schemas`.
    pub schema_dir: Option<PathBuf>,

    /// Schema queries are validated against.
    pub report_schema: String,

    /// Cached aggregation results kept at once.
    pub cache_capacity: usize,

    /// Files above this size are refused.
    pub max_file_size_mb: u64,

    /// Records older than this many days are purged by retention.
    pub retention_days: u32,

    /// Rows searched for a header at the top of each sheet.
    pub header_scan_rows: usize,

    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,

    /// Where backups are written.
    pub backup_dir: PathBuf,

    /// Backups kept; older ones are deleted after a new backup.
    pub max_backups: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = Self::data_dir();
        Self {
            database_path: data_dir.join("kolet.db"),
            schema_dir: None,
            report_schema: "marketing".to_string(),
            cache_capacity: 64,
            max_file_size_mb: 50,
            retention_days: 365,
            header_scan_rows: 20,
            busy_timeout_ms: 5_000,
            backup_dir: data_dir.join("backups"),
            max_backups: 10,
        }
    }
}

impl Settings {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kolet")
    }

    fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kolet")
    }

    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("settings.toml")
    }

    /// Settings file (if any) plus process environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::load_from(&Self::config_path())?;
        settings.apply_env(std::env::vars())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let settings = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        log::info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            path: "<input>".to_string(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `KOLET_*` overrides from `vars`. Unrelated variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in vars {
            match var.as_str() {
                ENV_DB_PATH => self.database_path = PathBuf::from(&value),
                ENV_MAX_FILE_SIZE => self.max_file_size_mb = parse_env(&var, &value)?,
                ENV_RETENTION_DAYS => self.retention_days = parse_env(&var, &value)?,
                ENV_CACHE_CAPACITY => self.cache_capacity = parse_env(&var, &value)?,
                _ => continue,
            }
            log::debug!("{var} overrides settings");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("cache_capacity", self.cache_capacity as u64),
            ("max_file_size_mb", self.max_file_size_mb),
            ("retention_days", u64::from(self.retention_days)),
            ("header_scan_rows", self.header_scan_rows as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be at least 1"));
            }
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(invalid("database_path", "must not be empty"));
        }
        if self.report_schema.trim().is_empty() {
            return Err(invalid("report_schema", "must name a schema"));
        }
        Ok(())
    }

    /// Save to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |e: std::io::Error| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, text).map_err(io)
    }

    pub fn effective_schema_dir(&self) -> PathBuf {
        self.schema_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("schemas"))
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = Settings::from_toml("cache_capacity = 8\nretention_days = 30\n").unwrap();
        assert_eq!(settings.cache_capacity, 8);
        assert_eq!(settings.retention_days, 30);
        assert_eq!(settings.max_file_size_mb, 50);
        assert_eq!(settings.report_schema, "marketing");
    }

    #[test]
    fn env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(vars(&[
                ("KOLET_DB_PATH", "/tmp/k.db"),
                ("KOLET_MAX_FILE_SIZE", "5"),
                ("KOLET_RETENTION_DAYS", "90"),
                ("HOME", "/root"),
            ]))
            .unwrap();
        assert_eq!(settings.database_path, PathBuf::from("/tmp/k.db"));
        assert_eq!(settings.max_file_size_bytes(), 5 * 1024 * 1024);
        assert_eq!(settings.retention_days, 90);

        let err = settings.apply_env(vars(&[("KOLET_CACHE_CAPACITY", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "KOLET_CACHE_CAPACITY"));
    }

    #[test]
    fn rejects_zero_limits() {
        let err = Settings::from_toml("header_scan_rows = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "header_scan_rows"));
        assert!(matches!(
            Settings::from_toml("cache_capacity = \"lots\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            schema_dir: Some(dir.path().join("schemas")),
            max_backups: 3,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
        assert_eq!(settings.effective_schema_dir(), dir.path().join("schemas"));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
