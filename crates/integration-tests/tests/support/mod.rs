#![allow(dead_code)]

pub mod upstream;

use std::io::Cursor;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use live_api::{AppState, LiveRegistry, Services, build_router};
use serde_json::{Value, json};
use shared::config::LiveApiConfig;
use shared::detector::DetectorConfig;
use shared::intent::IntentWeights;
use shared::llm::{ChatCompletionsConfig, ContextAssembler, ModelRoute};
use shared::pest::SeverityThresholds;
use shared::session_store::SessionStore;
use shared::triage::TriageConfig;
use shared::tts::{DEFAULT_AUDIO_FORMAT, TtsConfig};
use tempfile::TempDir;
use tower::ServiceExt;

use upstream::MockUpstream;

pub const MODEL_ID: &str = "test/pest-model";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub struct TestApp {
    pub router: Router,
    pub services: Arc<Services>,
    pub registry: LiveRegistry,
    pub upstream: MockUpstream,
    _scratch: TempDir,
}

pub struct TestAppOptions {
    pub max_upload_bytes: usize,
    pub with_detector: bool,
    pub with_speech: bool,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            with_detector: true,
            with_speech: true,
        }
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(TestAppOptions::default()).await
}

pub async fn spawn_app_with(options: TestAppOptions) -> TestApp {
    let upstream = MockUpstream::start().await;
    let scratch = tempfile::tempdir().expect("scratch dir should be created");
    let config = test_config(&upstream, &scratch, &options);

    let services = Arc::new(
        Services::from_config(&config, SessionStore::in_memory(config.session_ttl_seconds))
            .expect("services should build against mock upstreams"),
    );
    let registry = LiveRegistry::new();
    let router = build_router(AppState::new(
        services.clone(),
        registry.clone(),
        config.max_upload_bytes,
        MODEL_ID,
    ));

    TestApp {
        router,
        services,
        registry,
        upstream,
        _scratch: scratch,
    }
}

fn test_config(
    upstream: &MockUpstream,
    scratch: &TempDir,
    options: &TestAppOptions,
) -> LiveApiConfig {
    LiveApiConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        session_ttl_seconds: 3_600,
        redis_url: None,
        context: ContextAssembler::default(),
        llm: ChatCompletionsConfig {
            chat_completions_url: upstream.url("/v1/chat/completions"),
            api_key: "test-llm-key".to_string(),
            timeout_ms: 5_000,
            max_retries: 0,
            retry_base_backoff_ms: 0,
            temperature: 0.7,
            max_tokens: 1_000,
            model_route: ModelRoute {
                primary_model: "test-llm".to_string(),
                fallback_model: None,
            },
        },
        detector: DetectorConfig {
            endpoint_url: options.with_detector.then(|| upstream.url("/predict")),
            api_token: Some("test-hf-token".to_string()),
            model_id: MODEL_ID.to_string(),
            timeout_ms: 5_000,
            deadline_ms: 10_000,
            max_retries: 0,
            retry_base_backoff_ms: 0,
            scratch_dir: scratch.path().to_path_buf(),
            severity: SeverityThresholds::default(),
        },
        triage: TriageConfig {
            classifier_url: None,
            api_token: None,
            budget_ms: 800,
            min_label_score: 0.1,
        },
        tts: TtsConfig {
            endpoint_url: options.with_speech.then(|| upstream.url("/tts")),
            api_key: Some("test-tts-key".to_string()),
            timeout_ms: 5_000,
            max_retries: 0,
            retry_base_backoff_ms: 0,
            audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            audio_dir: scratch.path().join("audio"),
            audio_ttl_seconds: 600,
        },
        intent_weights: IntentWeights::default(),
        max_upload_bytes: options.max_upload_bytes,
        sweep_interval_seconds: 300,
        log_json: false,
    }
}

pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub async fn send_json(app: &Router, request: Request<Body>) -> JsonResponse {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read");
    let body = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));

    JsonResponse { status, body }
}

pub fn request(method: Method, path: &str, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::ACCEPT, "application/json");

    let request_body = body
        .map(|value| serde_json::to_vec(&value).expect("json body should serialize"))
        .unwrap_or_default();
    if !request_body.is_empty() {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }

    builder
        .body(Body::from(request_body))
        .expect("integration request should build")
}

const BOUNDARY: &str = "croplens-test-boundary";

/// Builds a multipart upload carrying one part named `field_name`.
pub fn upload_request(
    path: &str,
    field_name: &str,
    file_name: &str,
    content_type: &str,
    bytes: &[u8],
) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field_name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("upload request should build")
}

pub fn solid_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([58, 125, 68]));
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, image::ImageFormat::Jpeg)
        .expect("fixture jpeg should encode");
    bytes.into_inner()
}

pub fn error_code(body: &Value) -> Option<&str> {
    body.get("error")?.get("code")?.as_str()
}
