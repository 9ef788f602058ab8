use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shared::llm::LlmGatewayRequest;
use shared::models::{ChatHistoryResponse, ChatRequest, ChatResponse, ClearSessionResponse};
use shared::session::{Language, Role};
use tracing::{info, warn};

use super::AppState;
use super::errors::{bad_gateway_response, bad_request_response, not_found_response};

pub(super) async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let message = req.message.trim();
    if message.is_empty() {
        return bad_request_response("invalid_message", "Message must not be empty");
    }

    let services = &state.services;
    let mut session = services
        .sessions
        .get_or_create(req.session_id.as_deref())
        .await;
    if req.language.is_some() {
        session.language = Language::from_client(req.language.as_deref());
    }
    if let Some(crop_type) = non_blank(req.crop_type) {
        session.crop_type = Some(crop_type);
    }
    if let Some(region) = non_blank(req.region) {
        session.region = Some(region);
    }

    let messages = services.context.build_context(message, &session);
    let request = LlmGatewayRequest::new(messages).with_requester_id(session.id());
    let reply = match services.llm.generate(request).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "chat reply failed");
            return bad_gateway_response(
                "llm_unavailable",
                "The assistant could not generate a response",
            );
        }
    };

    session.add_message(Role::User, message);
    session.add_message(Role::Assistant, reply.content.as_str());
    services.sessions.save(&session).await;
    info!(
        session_id = %session.id(),
        model = %reply.model,
        message_count = session.messages.len(),
        "chat reply generated"
    );

    (
        StatusCode::OK,
        Json(ChatResponse {
            success: true,
            response: reply.content,
            session_id: session.id().to_string(),
            detected_pests: session.detected_pests().to_vec(),
        }),
    )
        .into_response()
}

pub(super) async fn chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.services.sessions.get(&session_id).await else {
        return not_found_response("session_not_found", "Session not found");
    };

    (
        StatusCode::OK,
        Json(ChatHistoryResponse {
            session_id: session.id().to_string(),
            detected_pests: session.detected_pests().to_vec(),
            created_at: session.created_at(),
            messages: session.messages,
        }),
    )
        .into_response()
}

pub(super) async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if !state.services.sessions.delete(&session_id).await {
        return not_found_response("session_not_found", "Session not found");
    }
    if let Some(audio) = state.services.audio.as_ref() {
        audio.discard(&session_id).await;
    }

    (
        StatusCode::OK,
        Json(ClearSessionResponse {
            success: true,
            message: "Session cleared".to_string(),
        }),
    )
        .into_response()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
