use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};

use crate::live::{self, LiveRegistry, LiveSessionManager};
use crate::services::Services;

mod chat;
mod detection;
mod errors;
mod health;
mod live_status;
mod observability;
mod tts;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub live: LiveSessionManager,
    pub max_upload_bytes: usize,
    pub model_id: String,
}

impl AppState {
    pub fn new(
        services: Arc<Services>,
        registry: LiveRegistry,
        max_upload_bytes: usize,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            live: LiveSessionManager::new(services.clone(), registry),
            services,
            max_upload_bytes,
            model_id: model_id.into(),
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let upload_limit = app_state
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health::health))
        .route("/readyz", get(health::readyz))
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/chat/history/{session_id}",
            get(chat::chat_history),
        )
        .route(
            "/api/chat/session/{session_id}",
            delete(chat::clear_session),
        )
        .route(
            "/api/detect-pest",
            post(detection::detect_pest).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/model-status", get(detection::model_status))
        .route("/api/live/status", get(live_status::live_status))
        .route("/api/live/sessions", get(live_status::live_sessions))
        .route("/api/live/tts/{session_id}", get(tts::live_tts_audio))
        .route("/api/ws/live", get(live::live_socket))
        .route(
            "/api/ws/live/{session_id}",
            get(live::live_socket_for_session),
        )
        .layer(middleware::from_fn(
            observability::request_observability_middleware,
        ))
        .with_state(app_state)
}
