use crate::catalog::MetricCatalog;
use crate::errors::{AppError, AppResult};
use crate::models::{MetricRunResponse, RefreshMode};
use crate::pipeline::{RefreshPipeline, RefreshReport, RefreshSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverStatus {
    Idle,
    Running,
}

impl DriverStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
        }
    }
}

/// Snapshot of the refresh driver. Transitions return a new snapshot and never
/// touch the cache store; side effects are the controller's job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverState {
    pub status: DriverStatus,
    pub mode: RefreshMode,
    pub cursor: usize,
    pub ticks: u64,
    pub last_metric_id: Option<String>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl DriverState {
    pub fn new(mode: RefreshMode) -> Self {
        Self {
            status: DriverStatus::Idle,
            mode,
            cursor: 0,
            ticks: 0,
            last_metric_id: None,
            last_tick_at: None,
        }
    }

    pub fn start(&self) -> Self {
        if self.status == DriverStatus::Running {
            return self.clone();
        }
        Self {
            status: DriverStatus::Running,
            cursor: 0,
            ..self.clone()
        }
    }

    pub fn stop(&self) -> Self {
        Self {
            status: DriverStatus::Idle,
            ..self.clone()
        }
    }

    /// Returns the next state and whether the cache must be reset before the
    /// next tick. Only a switch from test into production resets.
    pub fn set_mode(&self, mode: RefreshMode) -> (Self, bool) {
        let reset = self.mode == RefreshMode::Test && mode == RefreshMode::Production;
        (Self { mode, ..self.clone() }, reset)
    }

    /// Picks the catalog index for this tick and moves the cursor on, wrapping
    /// modulo `catalog_len`. `None` for an empty catalog.
    pub fn advance(&self, catalog_len: usize, at: DateTime<Utc>) -> (Self, Option<usize>) {
        if catalog_len == 0 {
            return (self.clone(), None);
        }
        let index = self.cursor % catalog_len;
        let next = Self {
            cursor: (index + 1) % catalog_len,
            ticks: self.ticks + 1,
            last_tick_at: Some(at),
            ..self.clone()
        };
        (next, Some(index))
    }
}

/// Owns the driver state and the timer task. One metric per tick, one tick in
/// flight at a time. There is no timeout on a tick: a hung backend call stalls
/// the loop until it returns.
#[derive(Clone)]
pub struct RefreshController {
    state: Arc<Mutex<DriverState>>,
    // Held for the whole of a tick and of a mode switch, so a reset can never
    // interleave with a write from the previous mode.
    tick_lock: Arc<Mutex<()>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    catalog: Arc<MetricCatalog>,
    pipeline: RefreshPipeline,
    tick_interval: Duration,
}

impl RefreshController {
    pub fn new(
        catalog: Arc<MetricCatalog>,
        pipeline: RefreshPipeline,
        mode: RefreshMode,
        tick_interval: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState::new(mode))),
            tick_lock: Arc::new(Mutex::new(())),
            task: Arc::new(Mutex::new(None)),
            catalog,
            pipeline,
            tick_interval,
        }
    }

    pub fn catalog(&self) -> &Arc<MetricCatalog> {
        &self.catalog
    }

    pub fn pipeline(&self) -> &RefreshPipeline {
        &self.pipeline
    }

    pub async fn snapshot(&self) -> DriverState {
        self.state.lock().await.clone()
    }

    pub async fn mode(&self) -> RefreshMode {
        self.state.lock().await.mode
    }

    pub async fn start(&self) -> DriverState {
        let mut task = self.task.lock().await;
        let snapshot = {
            let mut state = self.state.lock().await;
            if state.status == DriverStatus::Running && task.is_some() {
                return state.clone();
            }
            *state = state.start();
            state.clone()
        };

        let controller = self.clone();
        *task = Some(tokio::spawn(async move {
            controller.run_loop().await;
        }));
        tracing::info!(
            mode = %snapshot.mode,
            interval_ms = self.tick_interval.as_millis() as u64,
            "refresh driver started"
        );
        snapshot
    }

    /// Cancels the timer. A query already running finishes and is written.
    pub async fn stop(&self) -> DriverState {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        let mut state = self.state.lock().await;
        *state = state.stop();
        tracing::info!(ticks = state.ticks, "refresh driver stopped");
        state.clone()
    }

    pub async fn set_mode(&self, mode: RefreshMode) -> AppResult<DriverState> {
        let _tick = self.tick_lock.lock().await;
        let (next, reset) = {
            let state = self.state.lock().await;
            state.set_mode(mode)
        };
        if reset {
            let db = self.pipeline.db().clone();
            let cleared = tokio::task::spawn_blocking(move || db.reset_values())
                .await
                .map_err(|error| AppError::Internal(format!("reset task failed: {}", error)))??;
            tracing::info!(rows = cleared, "cache values reset for production mode");
        }
        let mut state = self.state.lock().await;
        state.mode = next.mode;
        tracing::info!(mode = %mode, "refresh mode changed");
        Ok(state.clone())
    }

    /// Refreshes the metric under the cursor and advances it. Runs whether or
    /// not the timer is active.
    pub async fn tick_once(&self) -> AppResult<Option<RefreshReport>> {
        // Moved into the blocking task: an aborted loop must not release it
        // while the query is still running.
        let tick = self.tick_lock.clone().lock_owned().await;
        let definitions = self.catalog.list_metrics()?;
        let (index, mode) = {
            let mut state = self.state.lock().await;
            let (next, index) = state.advance(definitions.len(), Utc::now());
            *state = next;
            (index, state.mode)
        };
        let Some(index) = index else {
            return Ok(None);
        };

        let definition = definitions[index].clone();
        tracing::debug!(metric_id = %definition.id, cursor = index, mode = %mode, "refresh tick");
        let pipeline = self.pipeline.clone();
        let report = tokio::task::spawn_blocking(move || {
            let _tick = tick;
            pipeline.refresh_metric(&definition, mode)
        })
        .await
        .map_err(|error| AppError::Internal(format!("refresh task failed: {}", error)))?;

        self.state.lock().await.last_metric_id = Some(report.metric_id.clone());
        Ok(Some(report))
    }

    /// Admin run-and-save for one metric, serialized with ticks and mode
    /// switches. A requested mode other than the driver's current one is
    /// rejected so a test value can never land in a production cache.
    pub async fn run_metric(&self, id: &str, requested: Option<RefreshMode>) -> AppResult<MetricRunResponse> {
        let tick = self.tick_lock.clone().lock_owned().await;
        let mode = self.mode().await;
        if let Some(requested) = requested {
            if requested != mode {
                return Err(AppError::Invalid(format!(
                    "driver is in {} mode; cannot run metric {} in {} mode",
                    mode, id, requested
                )));
            }
        }
        let definition = self
            .catalog
            .get(id)?
            .ok_or_else(|| AppError::NotFound(format!("metric {} not found", id)))?;

        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let _tick = tick;
            pipeline.run_metric(&definition, mode)
        })
        .await
        .map_err(|error| AppError::Internal(format!("run task failed: {}", error)))?
    }

    /// One full pass over the catalog in the current mode, serialized with ticks.
    pub async fn refresh_all(&self) -> AppResult<RefreshSummary> {
        let tick = self.tick_lock.clone().lock_owned().await;
        let definitions = self.catalog.list_metrics()?;
        let mode = self.state.lock().await.mode;
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let _tick = tick;
            pipeline.refresh_all(&definitions, mode)
        })
        .await
        .map_err(|error| AppError::Internal(format!("refresh pass failed: {}", error)))
    }

    async fn run_loop(self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.state.lock().await.status != DriverStatus::Running {
                break;
            }
            if let Err(error) = self.tick_once().await {
                tracing::warn!(error = %error, "refresh tick failed");
            }
        }
    }
}
