use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{MetricDefinition, MetricPatch};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const DEFAULT_CATALOG_JSON: &str = include_str!("default_catalog.json");

pub fn default_catalog() -> AppResult<Vec<MetricDefinition>> {
    let definitions: Vec<MetricDefinition> = serde_json::from_str(DEFAULT_CATALOG_JSON)?;
    validate(&definitions)?;
    Ok(definitions)
}

/// The JSON catalog file is the durable source of truth; the `chart_data`
/// table is a projection rebuilt from it at startup.
#[derive(Debug)]
pub struct MetricCatalog {
    path: PathBuf,
    metrics: RwLock<Vec<MetricDefinition>>,
}

impl MetricCatalog {
    /// Reads the catalog file, writing the built-in catalog there first if it does not exist.
    pub fn load_or_seed(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            let seeded = default_catalog()?;
            write_json_file(path, &seeded)?;
            tracing::info!(
                path = %path.to_string_lossy(),
                metrics = seeded.len(),
                "seeded metric catalog from built-in defaults"
            );
            return Ok(Self::new(path.to_path_buf(), seeded));
        }

        let bytes = fs::read(path).map_err(|error| AppError::Io(error.to_string()))?;
        let definitions: Vec<MetricDefinition> = serde_json::from_slice(&bytes).map_err(|error| {
            AppError::Config(format!("invalid catalog {}: {}", path.to_string_lossy(), error))
        })?;
        validate(&definitions)?;
        Ok(Self::new(path.to_path_buf(), definitions))
    }

    pub fn new(path: PathBuf, definitions: Vec<MetricDefinition>) -> Self {
        Self {
            path,
            metrics: RwLock::new(definitions),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The full catalog in round-robin order.
    pub fn list_metrics(&self) -> AppResult<Vec<MetricDefinition>> {
        let metrics = self
            .metrics
            .read()
            .map_err(|_| AppError::Internal("catalog lock poisoned".to_string()))?;
        Ok(metrics.clone())
    }

    pub fn get(&self, id: &str) -> AppResult<Option<MetricDefinition>> {
        let metrics = self
            .metrics
            .read()
            .map_err(|_| AppError::Internal("catalog lock poisoned".to_string()))?;
        Ok(metrics.iter().find(|metric| metric.id == id).cloned())
    }

    pub fn len(&self) -> usize {
        self.metrics.read().map(|metrics| metrics.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the cache projection from the catalog. Never the other way round.
    pub fn sync_to(&self, db: &Database) -> AppResult<usize> {
        let definitions = self.list_metrics()?;
        db.sync_catalog(&definitions)
    }

    /// Applies an admin edit: catalog file first, then the cache store.
    ///
    /// The two writes are not atomic. If the cache write fails the file still
    /// holds the edit and the next startup sync restores the projection.
    pub fn update_metric(&self, db: &Database, id: &str, patch: &MetricPatch) -> AppResult<MetricDefinition> {
        let updated = {
            let mut metrics = self
                .metrics
                .write()
                .map_err(|_| AppError::Internal("catalog lock poisoned".to_string()))?;
            let mut next = metrics.clone();
            let target = next
                .iter_mut()
                .find(|metric| metric.id == id)
                .ok_or_else(|| AppError::NotFound(format!("metric {} not found", id)))?;
            target.apply_patch(patch);
            let updated = target.clone();

            write_json_file(&self.path, &next)?;
            *metrics = next;
            updated
        };

        if let Err(error) = db.save_definition(&updated) {
            tracing::warn!(
                metric_id = %id,
                error = %error,
                "catalog file updated but cache projection write failed"
            );
            return Err(error);
        }
        tracing::info!(metric_id = %id, "metric definition updated");
        Ok(updated)
    }
}

/// Writes the cache store's current definitions out in catalog file format.
pub fn export_definitions(db: &Database, path: &Path) -> AppResult<usize> {
    let definitions = db.list_definitions()?;
    write_json_file(path, &definitions)?;
    Ok(definitions.len())
}

fn validate(definitions: &[MetricDefinition]) -> AppResult<()> {
    let mut seen = HashSet::new();
    for definition in definitions {
        if definition.id.trim().is_empty() {
            return Err(AppError::Config("catalog entry with empty id".to_string()));
        }
        if !seen.insert(definition.id.as_str()) {
            return Err(AppError::Config(format!("duplicate metric id {}", definition.id)));
        }
    }
    Ok(())
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
        }
    }
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    fs::write(path, bytes).map_err(|error| AppError::Io(error.to_string()))
}
