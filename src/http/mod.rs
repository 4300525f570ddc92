//! Thin Axum binding over [`InstanceService`](crate::instance_service::InstanceService).
//! Routes do request-shape/JSON decoding only; every business decision
//! (validation, dedup, state transitions) lives in the service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::instance_service::types::{
    CreateInstanceRequest, ListInstancesQuery, StartInstanceOptions, WebhookOverride,
};
use crate::instance_service::InstanceService;

pub fn router(service: Arc<InstanceService>) -> Router {
    Router::new()
        .route("/instances", post(create_instance).get(list_instances))
        .route("/instances/stop-all", post(stop_all))
        .route("/instances/{id}", get(get_instance).delete(delete_instance))
        .route("/instances/{id}/start", post(start_instance))
        .route("/instances/{id}/stop", post(stop_instance))
        .route("/instances/{id}/last-used", post(update_last_used))
        .route("/auto-stop/trigger", post(trigger_auto_stop))
        .route("/auto-stop/stats", get(auto_stop_stats))
        .route("/sync", post(sync_now))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .route("/admin/hard-reset", post(hard_reset))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(service)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code: code.as_str(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

type ApiResult<T> = Result<Json<T>, AppError>;

async fn create_instance(
    State(service): State<Arc<InstanceService>>,
    Json(req): Json<CreateInstanceRequest>,
) -> ApiResult<crate::instance_service::types::IntentResult> {
    Ok(Json(service.create_instance(req).await?))
}

async fn get_instance(
    State(service): State<Arc<InstanceService>>,
    Path(id): Path<String>,
) -> ApiResult<crate::model::Instance> {
    Ok(Json(service.get_instance(&id).await?))
}

async fn list_instances(
    State(service): State<Arc<InstanceService>>,
    Query(query): Query<ListInstancesQuery>,
) -> ApiResult<crate::instance_service::types::ListInstancesResult> {
    Ok(Json(service.list_instances(query).await?))
}

async fn start_instance(
    State(service): State<Arc<InstanceService>>,
    Path(id): Path<String>,
    Json(opts): Json<StartInstanceOptions>,
) -> ApiResult<crate::instance_service::types::IntentResult> {
    Ok(Json(service.start_instance(&id, opts).await?))
}

async fn stop_instance(
    State(service): State<Arc<InstanceService>>,
    Path(id): Path<String>,
    Json(opts): Json<WebhookOverride>,
) -> ApiResult<crate::instance_service::types::IntentResult> {
    Ok(Json(service.stop_instance(&id, opts).await?))
}

async fn delete_instance(
    State(service): State<Arc<InstanceService>>,
    Path(id): Path<String>,
    Json(opts): Json<WebhookOverride>,
) -> ApiResult<crate::instance_service::types::IntentResult> {
    Ok(Json(service.delete_instance(&id, opts).await?))
}

#[derive(Debug, Deserialize, Default)]
struct UpdateLastUsedRequest {
    last_used_at: Option<DateTime<Utc>>,
}

async fn update_last_used(
    State(service): State<Arc<InstanceService>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateLastUsedRequest>,
) -> Result<StatusCode, AppError> {
    service.update_last_used(&id, body.last_used_at).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TriggerAutoStopRequest {
    #[serde(default = "default_true")]
    dry_run: bool,
}

impl Default for TriggerAutoStopRequest {
    fn default() -> Self {
        Self { dry_run: true }
    }
}

fn default_true() -> bool {
    true
}

async fn trigger_auto_stop(
    State(service): State<Arc<InstanceService>>,
    Json(body): Json<TriggerAutoStopRequest>,
) -> ApiResult<crate::instance_service::types::AutoStopStats> {
    Ok(Json(service.trigger_auto_stop(body.dry_run).await?))
}

async fn auto_stop_stats(
    State(service): State<Arc<InstanceService>>,
) -> ApiResult<crate::instance_service::types::AutoStopStats> {
    Ok(Json(service.get_auto_stop_stats().await?))
}

async fn sync_now(
    State(service): State<Arc<InstanceService>>,
) -> ApiResult<crate::controllers::reconciler::ReconcileSummary> {
    Ok(Json(service.sync_now().await?))
}

async fn stop_all(
    State(service): State<Arc<InstanceService>>,
) -> ApiResult<Vec<crate::instance_service::types::IntentResult>> {
    Ok(Json(service.stop_all().await?))
}

async fn cache_stats(
    State(service): State<Arc<InstanceService>>,
) -> ApiResult<Vec<crate::instance_service::types::CacheStatsEntry>> {
    Ok(Json(service.get_cache_stats().await?))
}

#[derive(Debug, Deserialize, Default)]
struct ClearCacheRequest {
    cache_name: Option<String>,
}

async fn clear_cache(
    State(service): State<Arc<InstanceService>>,
    Json(body): Json<ClearCacheRequest>,
) -> Result<StatusCode, AppError> {
    service.clear_cache(body.cache_name.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Destructive: purges the entire KV namespace. No confirmation step
/// lives at this layer — callers are expected to gate access to this
/// route (auth is explicitly out of scope here).
async fn hard_reset(State(service): State<Arc<InstanceService>>) -> Result<StatusCode, AppError> {
    service.hard_reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(
    State(service): State<Arc<InstanceService>>,
) -> ApiResult<crate::instance_service::types::HealthReport> {
    Ok(Json(service.get_health().await?))
}

async fn metrics(
    State(service): State<Arc<InstanceService>>,
) -> ApiResult<crate::instance_service::types::MetricsReport> {
    Ok(Json(service.get_metrics().await?))
}
