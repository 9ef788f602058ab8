use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use shared::models::{HealthResponse, OkResponse};
use tracing::warn;

use super::AppState;
use super::errors::service_unavailable_response;

pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_id: state.model_id.clone(),
        }),
    )
}

pub(super) async fn readyz(State(state): State<AppState>) -> Response {
    match state.services.sessions.ping_mirror().await {
        Ok(()) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        Err(err) => {
            warn!("readiness check failed: {err}");
            service_unavailable_response(
                "session_store_unavailable",
                "Session store mirror not ready",
            )
        }
    }
}
