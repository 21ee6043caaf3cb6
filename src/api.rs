use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::health::{HealthMonitor, HealthReport};
use crate::metrics::Metrics;
use crate::model::{PushKind, TriggerSource};
use crate::push::{PushOrchestrator, PushOutcome};
use crate::scheduler::DigestScheduler;
use crate::security::redact;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub orchestrator: Arc<PushOrchestrator>,
    pub health: Arc<HealthMonitor>,
    /// Absent when cron jobs are not running (tests, one-off tools).
    pub scheduler: Option<Arc<DigestScheduler>>,
}

/// Operational routes; `/metrics` is mounted when a recorder is installed.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/industries/{id}/push/{kind}", post(trigger_push))
        .route("/industries/{id}/reset-seen", post(reset_seen))
        .route("/sources/health-check", post(health_check))
        .route("/schedules/reload", post(reload_schedules))
        .route("/push-log/{id}/preview", get(preview))
        .with_state(state);
    if let Some(m) = metrics {
        app = app.merge(m.router());
    }
    app.layer(CorsLayer::very_permissive())
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(e) => {
                let text = redact(&format!("{e:#}"));
                tracing::error!(error = %text, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, text)
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

async fn trigger_push(
    State(state): State<AppState>,
    Path((id, kind)): Path<(i64, String)>,
) -> Result<Json<PushOutcome>, ApiError> {
    let kind: PushKind = kind
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown push kind {kind:?}")))?;
    state
        .orchestrator
        .run(id, kind, TriggerSource::Manual)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("industry {id} not found")))
}

async fn reset_seen(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.store.industry(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("industry {id} not found")));
    }
    let removed = state.store.reset_seen_for_industry(id).await?;
    tracing::info!(industry_id = id, removed, "delivery history reset");
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Default, serde::Deserialize)]
struct HealthCheckReq {
    #[serde(default)]
    ids: Vec<i64>,
}

/// Empty or absent `ids` runs the full sweep.
async fn health_check(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<HealthReport>>, ApiError> {
    let req: HealthCheckReq = if body.iter().all(u8::is_ascii_whitespace) {
        HealthCheckReq::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let reports = if req.ids.is_empty() {
        state.health.check_all().await?
    } else {
        state.health.check_sources(&req.ids).await?
    };
    Ok(Json(reports))
}

async fn reload_schedules(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(scheduler) = state.scheduler.as_ref() else {
        return Err(ApiError::Unavailable("scheduler is not running".into()));
    };
    let registered = scheduler.reload_schedules().await?;
    Ok(Json(json!({ "registered": registered })))
}

async fn preview(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Html<String>, ApiError> {
    let audit = state
        .store
        .audit(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("push log {id} not found")))?;
    match audit.html_snapshot {
        Some(html) if !html.is_empty() => Ok(Html(html)),
        _ => {
            let reason = audit.error.as_deref().unwrap_or("no snapshot kept");
            Ok(Html(format!(
                "<p>No preview for push #{id} (status: {}, reason: {})</p>",
                audit.status.as_str(),
                html_escape::encode_text(reason)
            )))
        }
    }
}
