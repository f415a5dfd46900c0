pub mod access_sql;
pub mod adapters;
pub mod catalog;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod driver;
pub mod errors;
pub mod http;
pub mod models;
pub mod normalize;
pub mod pipeline;

use crate::adapters::ConnectionResolver;
use crate::catalog::MetricCatalog;
use crate::config::AppConfig;
use crate::dashboard::DashboardCache;
use crate::db::Database;
use crate::driver::RefreshController;
use crate::errors::{AppError, AppResult};
use crate::http::HttpState;
use crate::pipeline::RefreshPipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Everything a host needs: the controller owns catalog, pipeline and driver state.
#[derive(Clone)]
pub struct App {
    pub config: AppConfig,
    pub controller: RefreshController,
    pub dashboard: Arc<DashboardCache>,
}

impl App {
    pub fn http_state(&self) -> HttpState {
        HttpState {
            controller: self.controller.clone(),
            dashboard: self.dashboard.clone(),
        }
    }

    pub fn router(&self) -> axum::Router {
        http::build_router(self.http_state())
    }
}

pub fn bootstrap(config: AppConfig) -> AppResult<App> {
    let resolver = ConnectionResolver::from_config(&config);
    bootstrap_with_resolver(config, resolver)
}

/// Opens the cache store, loads (or seeds) the catalog file and rebuilds the
/// cache projection from it.
pub fn bootstrap_with_resolver(config: AppConfig, resolver: ConnectionResolver) -> AppResult<App> {
    let db = Arc::new(Database::new(&config.cache_db_path)?);
    let catalog = Arc::new(MetricCatalog::load_or_seed(&config.catalog_path)?);
    let synced = catalog.sync_to(&db)?;
    tracing::info!(
        metrics = synced,
        catalog = %catalog.path().to_string_lossy(),
        cache = %db.path().to_string_lossy(),
        "cache projection rebuilt from catalog"
    );

    let pipeline = RefreshPipeline::new(db, resolver);
    let controller = RefreshController::new(
        catalog,
        pipeline,
        config.initial_mode,
        Duration::from_millis(config.tick_interval_ms),
    );
    let dashboard = Arc::new(DashboardCache::new(Duration::from_millis(config.read_cache_ttl_ms)));
    Ok(App {
        config,
        controller,
        dashboard,
    })
}

/// Serves HTTP until ctrl-c, then stops the driver.
pub async fn serve(app: App) -> AppResult<()> {
    if app.config.warm_up_on_start {
        let controller = app.controller.clone();
        let dashboard = app.dashboard.clone();
        tokio::spawn(async move {
            match controller.refresh_all().await {
                Ok(summary) => {
                    dashboard.invalidate();
                    tracing::info!(
                        updated = summary.updated,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "warm-up refresh pass finished"
                    );
                }
                Err(error) => tracing::warn!(error = %error, "warm-up refresh pass failed"),
            }
        });
    }
    if app.config.autostart_driver {
        app.controller.start().await;
    }
    let listener = tokio::net::TcpListener::bind(&app.config.bind_addr)
        .await
        .map_err(|error| AppError::Config(format!("cannot bind {}: {}", app.config.bind_addr, error)))?;
    tracing::info!(addr = %app.config.bind_addr, "dashboard server listening");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|error| AppError::Io(error.to_string()))?;

    app.controller.stop().await;
    Ok(())
}

pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
