use crate::dashboard::{DashboardCache, DashboardData};
use crate::driver::{DriverState, RefreshController};
use crate::errors::{AppError, AppResult};
use crate::models::{BooleanResponse, CacheRowView, MetricPatch, MetricRunResponse, RefreshMode};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct HttpState {
    pub controller: RefreshController,
    pub dashboard: Arc<DashboardCache>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    /// Must match the driver's current mode when given.
    pub mode: Option<String>,
}

/// Dashboard read path plus the admin routes for the refresh controller. The
/// read path only touches the SQLite cache.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/dashboard/data", get(dashboard_data))
        .route("/api/dashboard/refresh", get(refresh_dashboard))
        .route("/api/admin/metrics", get(list_metrics))
        .route("/api/admin/metrics/:id", patch(update_metric))
        .route("/api/admin/metrics/:id/run", post(run_metric))
        .route("/api/admin/driver", get(driver_status))
        .route("/api/admin/driver/start", post(start_driver))
        .route("/api/admin/driver/stop", post(stop_driver))
        .route("/api/admin/driver/mode", post(set_driver_mode))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(error: AppError) -> (StatusCode, String) {
    let status = match &error {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Invalid(_) | AppError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }
    (status, error.to_string())
}

/// Runs cache-store work off the async runtime.
async fn blocking<T, F>(work: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| AppError::Internal(format!("blocking task failed: {}", error)))?
}

fn parse_mode(raw: &str) -> AppResult<RefreshMode> {
    RefreshMode::parse(raw).ok_or_else(|| AppError::Invalid(format!("unknown refresh mode '{}'", raw)))
}

async fn health() -> &'static str {
    "ok"
}

async fn dashboard_data(State(state): State<HttpState>) -> ApiResult<DashboardData> {
    let db = state.controller.pipeline().db().clone();
    let cache = state.dashboard.clone();
    let data = blocking(move || cache.load(&db)).await.map_err(error_response)?;
    Ok(Json(data.as_ref().clone()))
}

/// Invalidates the read-path cache. Does not query any backend.
async fn refresh_dashboard(State(state): State<HttpState>) -> Json<BooleanResponse> {
    state.dashboard.invalidate();
    Json(BooleanResponse { success: true })
}

async fn list_metrics(State(state): State<HttpState>) -> ApiResult<Vec<CacheRowView>> {
    let db = state.controller.pipeline().db().clone();
    let rows = blocking(move || db.read_all()).await.map_err(error_response)?;
    Ok(Json(rows.iter().map(CacheRowView::from).collect()))
}

async fn update_metric(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Json(patch): Json<MetricPatch>,
) -> ApiResult<CacheRowView> {
    let catalog = state.controller.catalog().clone();
    let db = state.controller.pipeline().db().clone();
    let row = blocking(move || {
        catalog.update_metric(&db, &id, &patch)?;
        db.get_row(&id)?
            .ok_or_else(|| AppError::NotFound(format!("metric {} has no cache row", id)))
    })
    .await
    .map_err(error_response)?;
    state.dashboard.invalidate();
    Ok(Json(CacheRowView::from(&row)))
}

async fn run_metric(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Query(query): Query<RunQuery>,
) -> ApiResult<MetricRunResponse> {
    let requested = query.mode.as_deref().map(parse_mode).transpose().map_err(error_response)?;
    let response = state
        .controller
        .run_metric(&id, requested)
        .await
        .map_err(error_response)?;
    state.dashboard.invalidate();
    Ok(Json(response))
}

async fn driver_status(State(state): State<HttpState>) -> Json<DriverState> {
    Json(state.controller.snapshot().await)
}

async fn start_driver(State(state): State<HttpState>) -> Json<DriverState> {
    Json(state.controller.start().await)
}

async fn stop_driver(State(state): State<HttpState>) -> Json<DriverState> {
    Json(state.controller.stop().await)
}

async fn set_driver_mode(
    State(state): State<HttpState>,
    Json(request): Json<ModeRequest>,
) -> ApiResult<DriverState> {
    let mode = parse_mode(&request.mode).map_err(error_response)?;
    let snapshot = state.controller.set_mode(mode).await.map_err(error_response)?;
    state.dashboard.invalidate();
    Ok(Json(snapshot))
}
