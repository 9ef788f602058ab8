use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

pub const MOCK_AUDIO: &[u8] = b"ID3\x04mock-mp3-frames";
pub const DEFAULT_LLM_REPLY: &str = "Spray neem oil (5 ml per litre) on both sides of the leaves.";

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: Value,
}

impl MockReply {
    pub fn llm_content(content: &str) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({
                "id": "mock-completion",
                "model": "test-llm",
                "choices": [{"message": {"role": "assistant", "content": content}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: json!({"error": {"code": "mock_failure"}}),
        }
    }
}

#[derive(Debug, Clone)]
struct UpstreamState {
    llm_replies: Arc<Mutex<VecDeque<MockReply>>>,
    detector_replies: Arc<Mutex<VecDeque<MockReply>>>,
    llm_payloads: Arc<Mutex<Vec<Value>>>,
    detector_uploads: Arc<Mutex<Vec<usize>>>,
    tts_payloads: Arc<Mutex<Vec<Value>>>,
}

/// One in-process server standing in for the language model, the pest detector and
/// the speech service. Unqueued calls get a default success reply.
pub struct MockUpstream {
    base_url: String,
    state: UpstreamState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = UpstreamState {
            llm_replies: Arc::new(Mutex::new(VecDeque::new())),
            detector_replies: Arc::new(Mutex::new(VecDeque::new())),
            llm_payloads: Arc::new(Mutex::new(Vec::new())),
            detector_uploads: Arc::new(Mutex::new(Vec::new())),
            tts_payloads: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .route("/predict", post(predict_handler))
            .route("/tts", post(tts_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let local_addr = listener
            .local_addr()
            .expect("listener address should resolve");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

            server.await.expect("mock upstream should run");
        });

        Self {
            base_url: format!("http://{local_addr}"),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn queue_llm(&self, reply: MockReply) {
        self.state.llm_replies.lock().await.push_back(reply);
    }

    pub async fn queue_detector(&self, reply: MockReply) {
        self.state.detector_replies.lock().await.push_back(reply);
    }

    pub async fn llm_payloads(&self) -> Vec<Value> {
        self.state.llm_payloads.lock().await.clone()
    }

    pub async fn detector_uploads(&self) -> Vec<usize> {
        self.state.detector_uploads.lock().await.clone()
    }

    pub async fn tts_payloads(&self) -> Vec<Value> {
        self.state.tts_payloads.lock().await.clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

async fn chat_completions_handler(
    State(state): State<UpstreamState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.llm_payloads.lock().await.push(payload);
    let reply = state
        .llm_replies
        .lock()
        .await
        .pop_front()
        .unwrap_or_else(|| MockReply::llm_content(DEFAULT_LLM_REPLY));
    (reply.status, Json(reply.body))
}

async fn predict_handler(
    State(state): State<UpstreamState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut size = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        size += field.bytes().await.map(|bytes| bytes.len()).unwrap_or(0);
    }
    state.detector_uploads.lock().await.push(size);

    let reply = state
        .detector_replies
        .lock()
        .await
        .pop_front()
        .unwrap_or_else(|| MockReply {
            status: StatusCode::OK,
            body: json!({"label": "Aphid", "confidence": 0.87}),
        });
    (reply.status, Json(reply.body))
}

async fn tts_handler(
    State(state): State<UpstreamState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Vec<u8>) {
    state.tts_payloads.lock().await.push(payload);
    (StatusCode::OK, MOCK_AUDIO.to_vec())
}
