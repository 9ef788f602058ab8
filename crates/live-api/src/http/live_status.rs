use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use shared::models::{LiveSessionsResponse, LiveStatusResponse};

use super::AppState;

pub(super) async fn live_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(LiveStatusResponse {
        service: "Live Mode".to_string(),
        status: "active".to_string(),
        active_sessions: state.live.registry().active_count(),
    })
}

pub(super) async fn live_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.live.registry().snapshot();
    Json(LiveSessionsResponse {
        total: sessions.len(),
        sessions,
    })
}
