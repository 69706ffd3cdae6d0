use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use kolet_config::Settings;
use kolet_core::{Batch, CancelToken};
use kolet_engine::AggregationEngine;
use kolet_ingest::{
    ingest, ingest_many, peek_rows, BatchSummary, FatalIngestionError, IngestError, IngestManyError,
    IngestOptions,
};
use kolet_query::{measure_kinds, QueryFacade};
use kolet_schema::{SchemaCatalog, SchemaDefinition};
use kolet_store::{Store, StoreConfig, StoreStats};
use parking_lot::Mutex;

use crate::error::DashboardError;

const BACKUP_PREFIX: &str = "kolet_backup_";
const BACKUP_SUFFIX: &str = ".db";

/// The data layer behind the dashboard: one store, one schema catalog, one
/// shared engine, one query facade.
///
/// Ingestion batches serialize on the store mutex. Queries go through the
/// facade and never take that lock; they read their own snapshots.
pub struct Dashboard {
    settings: Settings,
    catalog: SchemaCatalog,
    pub(crate) store: Mutex<Store>,
    engine: Arc<AggregationEngine>,
    facade: QueryFacade,
}

impl Dashboard {
    /// Built-in presets, then the schema directory, then the store.
    pub fn open(settings: Settings) -> Result<Self, DashboardError> {
        settings.validate()?;

        let mut catalog = SchemaCatalog::builtin()?;
        let schema_dir = settings.effective_schema_dir();
        if schema_dir.is_dir() {
            catalog.load_dir(&schema_dir)?;
        }
        let report = catalog
            .get(&settings.report_schema)
            .cloned()
            .ok_or_else(|| DashboardError::UnknownSchema(settings.report_schema.clone()))?;

        let store = Store::open(
            &settings.database_path,
            StoreConfig {
                busy_timeout_ms: settings.busy_timeout_ms,
            },
        )?;
        let engine = Arc::new(
            AggregationEngine::for_store(&store, settings.cache_capacity).with_measure_kinds(measure_kinds(&report)),
        );
        let facade = QueryFacade::new(Arc::clone(&engine), report);

        log::info!(
            "dashboard opened: {} ({} schemas, report schema '{}')",
            settings.database_path.display(),
            catalog.len(),
            settings.report_schema
        );
        Ok(Self {
            settings,
            catalog,
            store: Mutex::new(store),
            engine,
            facade,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn facade(&self) -> &QueryFacade {
        &self.facade
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            header_scan_rows: self.settings.header_scan_rows,
            max_file_size: self.settings.max_file_size_bytes(),
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Schema for `path`: file name hints first, then the header signature of
    /// any of the first rows, then the report schema.
    pub fn detect_schema(&self, path: &Path) -> Result<&SchemaDefinition, FatalIngestionError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(schema) = self.catalog.detect_by_name(&file_name) {
            log::debug!("{file_name}: schema '{}' from file name", schema.name);
            return Ok(schema);
        }
        for row in peek_rows(path, self.settings.header_scan_rows)? {
            if let Some(schema) = self.catalog.detect_by_headers(&row) {
                log::debug!("{file_name}: schema '{}' from headers", schema.name);
                return Ok(schema);
            }
        }
        log::debug!("{file_name}: no source recognized, using '{}'", self.facade.schema().name);
        Ok(self.facade.schema())
    }

    /// Ingest one file with a detected schema.
    pub fn ingest(&self, path: &Path, cancel: &CancelToken) -> Result<BatchSummary, DashboardError> {
        let schema = self.detect_schema(path).map_err(IngestError::from)?;
        let mut store = self.store.lock();
        Ok(ingest(&mut store, path, schema, &self.ingest_options(), cancel)?)
    }

    /// Ingest one file with a named schema.
    pub fn ingest_with(&self, path: &Path, schema: &str, cancel: &CancelToken) -> Result<BatchSummary, DashboardError> {
        let schema = self
            .catalog
            .get(schema)
            .ok_or_else(|| DashboardError::UnknownSchema(schema.to_string()))?;
        let mut store = self.store.lock();
        Ok(ingest(&mut store, path, schema, &self.ingest_options(), cancel)?)
    }

    /// One batch per file, schemas detected per file. Stops at the first failure.
    pub fn ingest_many<P: AsRef<Path>>(
        &self,
        paths: &[P],
        cancel: &CancelToken,
    ) -> Result<Vec<BatchSummary>, IngestManyError> {
        let options = self.ingest_options();
        let mut store = self.store.lock();
        ingest_many(
            &mut store,
            paths,
            |path: &Path| self.detect_schema(path).map_err(IngestError::from),
            &options,
            cancel,
        )
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Result<StoreStats, DashboardError> {
        Ok(self.store.lock().stats()?)
    }

    /// Import history, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<Batch>, DashboardError> {
        Ok(self.store.lock().batches(limit)?)
    }

    /// Purge records older than `retention_days` before `today`. Returns the
    /// number of records removed.
    pub fn apply_retention(&self, today: NaiveDate) -> Result<u64, DashboardError> {
        let days = u64::from(self.settings.retention_days);
        let cutoff = today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        Ok(self.store.lock().purge_before(cutoff)?)
    }

    /// Write a backup into `backup_dir`, then prune to `max_backups`.
    pub fn backup(&self) -> Result<PathBuf, DashboardError> {
        self.backup_at(Utc::now())
    }

    pub fn backup_at(&self, now: DateTime<Utc>) -> Result<PathBuf, DashboardError> {
        let dir = &self.settings.backup_dir;
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        let target = dir.join(format!(
            "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
            now.format("%Y%m%d_%H%M%S%3f")
        ));
        self.store.lock().backup_to(&target)?;
        self.prune_backups()?;
        Ok(target)
    }

    /// Backup files in `backup_dir`, newest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>, DashboardError> {
        let dir = &self.settings.backup_dir;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX))
            })
            .collect();
        // Timestamped names sort chronologically.
        found.sort();
        found.reverse();
        Ok(found)
    }

    fn prune_backups(&self) -> Result<(), DashboardError> {
        let keep = self.settings.max_backups.max(1);
        for old in self.backups()?.into_iter().skip(keep) {
            std::fs::remove_file(&old).map_err(|e| io_error(&old, e))?;
            log::info!("removed old backup {}", old.display());
        }
        Ok(())
    }
}

pub(crate) fn io_error(path: &Path, e: std::io::Error) -> DashboardError {
    DashboardError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
