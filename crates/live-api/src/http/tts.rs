use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use shared::tts::AUDIO_MIME;
use tracing::debug;

use super::AppState;
use super::errors::not_found_response;

/// Serves the pending reply audio for a session once; the file is gone afterwards.
pub(super) async fn live_tts_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let audio = match state.services.audio.as_ref() {
        Some(store) => store.take(&session_id).await,
        None => None,
    };
    let Some(audio) = audio else {
        debug!(session_id = %session_id, "no pending audio for session");
        return not_found_response("audio_not_found", "No audio available for this session");
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, AUDIO_MIME),
            (header::CACHE_CONTROL, "no-store"),
        ],
        audio,
    )
        .into_response()
}
