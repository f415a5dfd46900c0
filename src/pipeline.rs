use crate::adapters::ConnectionResolver;
use crate::db::{CacheError, CacheUpdate, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{MetricDefinition, MetricRunResponse, MetricValue, RefreshMode, ResultRow};
use crate::normalize::{normalize_scalar, Normalized};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The metric has no SQL text for the active mode.
    NoQueryForMode,
    UnknownServer,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoQueryForMode => "no_query_for_mode",
            Self::UnknownServer => "unknown_server",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated(Normalized),
    Failed { message: String, error_type: String },
    Skipped(SkipReason),
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated(_) => "updated",
            Self::Failed { .. } => "failed",
            Self::Skipped(_) => "skipped",
        }
    }

    fn failed(error: &AppError) -> Self {
        Self::Failed {
            message: error.to_string(),
            error_type: error.error_type().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub metric_id: String,
    pub mode: RefreshMode,
    pub outcome: RefreshOutcome,
    pub rows: Vec<ResultRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RefreshSummary {
    fn record(&mut self, outcome: &RefreshOutcome) {
        match outcome {
            RefreshOutcome::Updated(_) => self.updated += 1,
            RefreshOutcome::Failed { .. } => self.failed += 1,
            RefreshOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Resolve, execute, normalize, write: one metric at a time.
///
/// Every failure is caught at the row boundary and recorded on that row only.
/// In test mode a failed row is set to `NoData`; in production mode it keeps
/// its previous value.
#[derive(Clone)]
pub struct RefreshPipeline {
    db: Arc<Database>,
    resolver: ConnectionResolver,
}

impl RefreshPipeline {
    pub fn new(db: Arc<Database>, resolver: ConnectionResolver) -> Self {
        Self { db, resolver }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn refresh_metric(&self, definition: &MetricDefinition, mode: RefreshMode) -> RefreshReport {
        let mut report = RefreshReport {
            metric_id: definition.id.clone(),
            mode,
            outcome: RefreshOutcome::Skipped(SkipReason::NoQueryForMode),
            rows: Vec::new(),
        };

        let Some(query) = definition.active_query(mode) else {
            tracing::debug!(metric_id = %definition.id, mode = %mode, "no SQL for active mode; skipping");
            return report;
        };

        let executed = self.resolver.resolve(&definition.server_name, mode).and_then(|mut handle| {
            tracing::debug!(
                metric_id = %definition.id,
                server = %definition.server_name,
                handle = handle.kind(),
                "executing metric query"
            );
            handle.execute(query.sql())
        });

        let timestamp = Utc::now();
        let update = match executed {
            Ok(None) => {
                report.outcome = RefreshOutcome::Skipped(SkipReason::UnknownServer);
                return report;
            }
            Ok(Some(rows)) => {
                let normalized = normalize_scalar(&rows);
                if normalized.is_low_confidence() {
                    tracing::debug!(
                        metric_id = %definition.id,
                        source = ?normalized.source,
                        "result has no value column; using fallback"
                    );
                }
                report.rows = rows;
                report.outcome = RefreshOutcome::Updated(normalized);
                CacheUpdate {
                    id: definition.id.clone(),
                    value: Some(normalized.value),
                    timestamp,
                    error: None,
                }
            }
            Err(error) => {
                tracing::warn!(
                    metric_id = %definition.id,
                    server = %definition.server_name,
                    mode = %mode,
                    error = %error,
                    "metric refresh failed"
                );
                report.outcome = RefreshOutcome::failed(&error);
                CacheUpdate {
                    id: definition.id.clone(),
                    value: match mode {
                        RefreshMode::Test => Some(MetricValue::NoData),
                        RefreshMode::Production => None,
                    },
                    timestamp,
                    error: Some(CacheError::from_app_error(&error)),
                }
            }
        };

        match self.db.upsert_value(&update) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(metric_id = %definition.id, "metric has no cache row; value not stored");
            }
            Err(error) => {
                tracing::warn!(metric_id = %definition.id, error = %error, "cache write failed");
                report.outcome = RefreshOutcome::failed(&error);
            }
        }
        report
    }

    /// One sequential pass over `definitions` in order.
    pub fn refresh_all(&self, definitions: &[MetricDefinition], mode: RefreshMode) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        for definition in definitions {
            let report = self.refresh_metric(definition, mode);
            summary.record(&report.outcome);
        }
        tracing::info!(
            mode = %mode,
            updated = summary.updated,
            failed = summary.failed,
            skipped = summary.skipped,
            "refresh pass complete"
        );
        summary
    }

    /// Refreshes one metric and reports the raw rows alongside the stored value.
    pub fn run_metric(&self, definition: &MetricDefinition, mode: RefreshMode) -> AppResult<MetricRunResponse> {
        let report = self.refresh_metric(definition, mode);
        let row = self
            .db
            .get_row(&definition.id)?
            .ok_or_else(|| AppError::NotFound(format!("metric {} has no cache row", definition.id)))?;
        let error = match &report.outcome {
            RefreshOutcome::Failed { message, .. } => Some(message.clone()),
            _ => None,
        };
        Ok(MetricRunResponse {
            metric_id: report.metric_id,
            mode,
            outcome: report.outcome.as_str().to_string(),
            value: row.value.as_number(),
            value_state: row.value.state_str(),
            rows: report.rows,
            error,
        })
    }
}
