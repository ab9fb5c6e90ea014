//! Router and handlers.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use coindash::refresh::{RefreshOutcome, RefreshTrigger};
use coindash::store::{is_safe_asset_id, AssetSnapshot, HistoryRecord};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::require_bearer;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CoinsResponse {
    pub message: String,
    pub count: usize,
    pub source: &'static str,
    pub data: Vec<AssetSnapshot>,
}

impl From<RefreshOutcome> for CoinsResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        Self {
            message: outcome.message(),
            count: outcome.count(),
            source: outcome.origin.label(),
            data: outcome.snapshots,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub message: String,
    pub count: usize,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/api/coins", get(list_coins))
        .route("/api/coins/history", post(capture_history))
        .route("/api/coins/history/{asset_id}", get(asset_history))
        .route_layer(from_fn_with_state(state.clone(), require_bearer));

    let public = Router::new()
        .route("/", get(health))
        .route("/api/debug/upstream", get(upstream_check));

    public
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_coins(State(state): State<AppState>) -> Result<Json<CoinsResponse>, ApiError> {
    let outcome = state.service.current().await?;
    Ok(Json(outcome.into()))
}

async fn capture_history(
    State(state): State<AppState>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let outcome = state.service.refresh(RefreshTrigger::History).await?;
    info!(
        fetched = outcome.count(),
        appended = outcome.persistence.history_appended,
        "history capture requested"
    );
    Ok(Json(CaptureResponse {
        message: outcome.message(),
        count: outcome.persistence.history_appended,
    }))
}

async fn asset_history(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    if !is_safe_asset_id(&asset_id) {
        return Err(ApiError::invalid_asset_id(&asset_id));
    }
    let records = state.service.history(&asset_id).await?;
    Ok(Json(records))
}

async fn upstream_check(State(state): State<AppState>) -> Response {
    let source = state.service.primary();
    let started = Instant::now();
    match source.ping().await {
        Ok(status) => Json(json!({
            "ok": true,
            "endpoint": source.name(),
            "status": status,
            "durationMs": started.elapsed().as_millis() as u64,
        }))
        .into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "ok": false, "message": err.to_string() })),
        )
            .into_response(),
    }
}
