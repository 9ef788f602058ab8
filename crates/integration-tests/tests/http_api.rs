mod support;

use axum::body::to_bytes;
use axum::http::{Method, StatusCode, header};
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

use support::upstream::{DEFAULT_LLM_REPLY, MockReply};
use support::{MODEL_ID, error_code, request, send_json, spawn_app};

#[tokio::test]
#[serial]
async fn health_reports_version_and_model() {
    let app = spawn_app().await;

    let response = send_json(&app.router, request(Method::GET, "/health", None)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["model_id"], MODEL_ID);
    assert_eq!(response.body["version"], env!("CARGO_PKG_VERSION"));
    assert!(response.body["timestamp"].is_string());
}

#[tokio::test]
#[serial]
async fn readiness_is_ok_without_a_mirror() {
    let app = spawn_app().await;

    let response = send_json(&app.router, request(Method::GET, "/readyz", None)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"ok": true}));
}

#[tokio::test]
#[serial]
async fn request_ids_are_echoed_or_generated() {
    let app = spawn_app().await;

    let mut tagged = request(Method::GET, "/health", None);
    tagged.headers_mut().insert(
        "x-request-id",
        "field-visit-7".parse().expect("header value should parse"),
    );
    let response = app
        .router
        .clone()
        .oneshot(tagged)
        .await
        .expect("request should succeed");
    assert_eq!(
        response.headers().get("x-request-id").map(|value| value.as_bytes()),
        Some(b"field-visit-7".as_slice())
    );

    let response = app
        .router
        .clone()
        .oneshot(request(Method::GET, "/health", None))
        .await
        .expect("request should succeed");
    let generated = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("generated request id should be present");
    assert_eq!(generated.len(), 36);
}

#[tokio::test]
#[serial]
async fn chat_round_trip_is_recorded_in_history_until_cleared() {
    let app = spawn_app().await;

    let chat = send_json(
        &app.router,
        request(
            Method::POST,
            "/api/chat",
            Some(json!({
                "message": "How do I control aphids on mustard?",
                "language": "english",
                "crop_type": "mustard",
                "region": "Rajasthan"
            })),
        ),
    )
    .await;
    assert_eq!(chat.status, StatusCode::OK);
    assert_eq!(chat.body["success"], true);
    assert_eq!(chat.body["response"], DEFAULT_LLM_REPLY);
    let session_id = chat.body["session_id"]
        .as_str()
        .expect("session id should be returned")
        .to_string();

    let payloads = app.upstream.llm_payloads().await;
    assert_eq!(payloads.len(), 1);
    let system_prompt = payloads[0]["messages"][0]["content"]
        .as_str()
        .expect("system prompt should be a string");
    assert!(system_prompt.contains("Crop Type: mustard"));
    assert!(system_prompt.contains("Region: Rajasthan"));

    let follow_up = send_json(
        &app.router,
        request(
            Method::POST,
            "/api/chat",
            Some(json!({
                "message": "Is it safe before harvest?",
                "session_id": session_id,
                "language": "english"
            })),
        ),
    )
    .await;
    assert_eq!(follow_up.status, StatusCode::OK);
    assert_eq!(follow_up.body["session_id"], session_id.as_str());

    let history = send_json(
        &app.router,
        request(
            Method::GET,
            &format!("/api/chat/history/{session_id}"),
            None,
        ),
    )
    .await;
    assert_eq!(history.status, StatusCode::OK);
    let messages = history.body["messages"]
        .as_array()
        .expect("messages should be an array");
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "How do I control aphids on mustard?");
    assert_eq!(messages[3]["role"], "assistant");

    let cleared = send_json(
        &app.router,
        request(
            Method::DELETE,
            &format!("/api/chat/session/{session_id}"),
            None,
        ),
    )
    .await;
    assert_eq!(cleared.status, StatusCode::OK);
    assert_eq!(cleared.body["success"], true);

    let history = send_json(
        &app.router,
        request(
            Method::GET,
            &format!("/api/chat/history/{session_id}"),
            None,
        ),
    )
    .await;
    assert_eq!(history.status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&history.body), Some("session_not_found"));
}

#[tokio::test]
#[serial]
async fn chat_rejects_blank_messages_before_calling_the_model() {
    let app = spawn_app().await;

    let response = send_json(
        &app.router,
        request(Method::POST, "/api/chat", Some(json!({"message": "   "}))),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&response.body), Some("invalid_message"));
    assert!(app.upstream.llm_payloads().await.is_empty());
}

#[tokio::test]
#[serial]
async fn chat_maps_model_failure_to_bad_gateway() {
    let app = spawn_app().await;
    app.upstream
        .queue_llm(MockReply::status(StatusCode::UNAUTHORIZED))
        .await;

    let response = send_json(
        &app.router,
        request(
            Method::POST,
            "/api/chat",
            Some(json!({"message": "What is eating my okra?"})),
        ),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&response.body), Some("llm_unavailable"));
}

#[tokio::test]
#[serial]
async fn unknown_sessions_are_not_found() {
    let app = spawn_app().await;

    for (method, path) in [
        (Method::GET, "/api/chat/history/no-such-session"),
        (Method::DELETE, "/api/chat/session/no-such-session"),
        (Method::GET, "/api/live/tts/no-such-session"),
    ] {
        let response = send_json(&app.router, request(method, path, None)).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
#[serial]
async fn live_status_reports_no_sessions_when_idle() {
    let app = spawn_app().await;

    let status = send_json(&app.router, request(Method::GET, "/api/live/status", None)).await;
    assert_eq!(status.status, StatusCode::OK);
    assert_eq!(
        status.body,
        json!({"service": "Live Mode", "status": "active", "active_sessions": 0})
    );

    let sessions =
        send_json(&app.router, request(Method::GET, "/api/live/sessions", None)).await;
    assert_eq!(sessions.status, StatusCode::OK);
    assert_eq!(sessions.body, json!({"total": 0, "sessions": []}));
}

#[tokio::test]
#[serial]
async fn pending_audio_is_served_once() {
    let app = spawn_app().await;
    let audio = app
        .services
        .audio
        .as_ref()
        .expect("audio store should be configured");
    audio
        .store("session-with-audio", b"ID3-audio")
        .await
        .expect("audio should store");

    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            "/api/live/tts/session-with-audio",
            None,
        ))
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|value| value.as_bytes()),
        Some(b"audio/mpeg".as_slice())
    );
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("audio body should read");
    assert_eq!(body.as_ref(), b"ID3-audio");

    let again = send_json(
        &app.router,
        request(Method::GET, "/api/live/tts/session-with-audio", None),
    )
    .await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}
