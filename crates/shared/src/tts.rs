use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::session::Language;

pub const DEFAULT_AUDIO_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";
pub const AUDIO_MIME: &str = "audio/mpeg";

pub type TtsFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, TtsError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    #[default]
    Female,
    Male,
}

impl VoiceGender {
    pub fn from_client(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("male") => Self::Male,
            _ => Self::Female,
        }
    }
}

pub fn voice_for(language: Language, gender: VoiceGender) -> &'static str {
    match (language, gender) {
        (Language::English, VoiceGender::Female) => "en-IN-NeerjaNeural",
        (Language::English, VoiceGender::Male) => "en-IN-PrabhatNeural",
        (Language::Hindi, VoiceGender::Female) => "hi-IN-SwaraNeural",
        (Language::Hindi, VoiceGender::Male) => "hi-IN-MadhurNeural",
    }
}

/// Drops markdown emphasis and heading characters that would otherwise be read aloud.
pub fn strip_markup(text: &str) -> String {
    text.chars()
        .filter(|ch| !matches!(ch, '*' | '_' | '#'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("nothing to synthesize")]
    EmptyText,
    #[error("speech service is rate limiting requests (status {0})")]
    RateLimited(u16),
    #[error("speech service returned status {0}")]
    Status(u16),
    #[error("speech service request timed out")]
    Timeout,
    #[error("speech service request failed: {0}")]
    Transport(String),
    #[error("speech service returned no audio")]
    EmptyAudio,
    #[error("failed to build speech client: {0}")]
    Client(String),
}

impl TtsError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        language: Language,
        gender: VoiceGender,
    ) -> TtsFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
    pub audio_format: String,
    pub audio_dir: PathBuf,
    pub audio_ttl_seconds: u64,
}

/// Posts `{text, voice, format}` to a speech endpoint and returns the raw audio body.
#[derive(Clone)]
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: Option<String>,
    audio_format: String,
    retry_policy: RetryPolicy,
}

impl HttpSpeechSynthesizer {
    /// Returns `Ok(None)` when no endpoint is configured.
    pub fn from_config(config: &TtsConfig) -> Result<Option<Self>, TtsError> {
        let Some(endpoint_url) = config.endpoint_url.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| TtsError::Client(err.to_string()))?;

        Ok(Some(Self {
            client,
            endpoint_url,
            api_key: config.api_key.clone(),
            audio_format: config.audio_format.clone(),
            retry_policy: RetryPolicy::new(config.max_retries, config.retry_base_backoff_ms),
        }))
    }

    async fn send_once(&self, text: &str, voice: &str) -> Result<Vec<u8>, TtsError> {
        let mut request = self.client.post(&self.endpoint_url).json(&json!({
            "text": text,
            "voice": voice,
            "format": self.audio_format,
        }));
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                TtsError::Timeout
            } else {
                TtsError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        if matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN) {
            return Err(TtsError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(TtsError::Status(status.as_u16()));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|err| TtsError::Transport(err.to_string()))?;
        if audio.is_empty() {
            return Err(TtsError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }
}

impl SpeechSynthesizer for HttpSpeechSynthesizer {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        language: Language,
        gender: VoiceGender,
    ) -> TtsFuture<'a> {
        Box::pin(async move {
            let clean = strip_markup(text);
            if clean.is_empty() {
                return Err(TtsError::EmptyText);
            }

            let started = Instant::now();
            let voice = voice_for(language, gender);
            let audio = retry_with_backoff(&self.retry_policy, TtsError::is_rate_limited, |_| {
                self.send_once(&clean, voice)
            })
            .await?;

            debug!(
                voice,
                audio_bytes = audio.len(),
                tts_ms = started.elapsed().as_millis() as u64,
                "speech synthesized"
            );
            Ok(audio)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::sync::{Mutex, oneshot};

    use super::{
        HttpSpeechSynthesizer, SpeechSynthesizer, TtsConfig, TtsError, VoiceGender, strip_markup,
        voice_for,
    };
    use crate::session::Language;

    #[derive(Clone)]
    struct SpeechServerState {
        statuses: Arc<Mutex<VecDeque<StatusCode>>>,
        seen_bodies: Arc<Mutex<Vec<Value>>>,
    }

    #[test]
    fn voice_table_covers_languages_and_genders() {
        assert_eq!(voice_for(Language::English, VoiceGender::Female), "en-IN-NeerjaNeural");
        assert_eq!(voice_for(Language::English, VoiceGender::Male), "en-IN-PrabhatNeural");
        assert_eq!(voice_for(Language::Hindi, VoiceGender::Female), "hi-IN-SwaraNeural");
        assert_eq!(voice_for(Language::Hindi, VoiceGender::Male), "hi-IN-MadhurNeural");
        assert_eq!(VoiceGender::from_client(Some("MALE")), VoiceGender::Male);
        assert_eq!(VoiceGender::from_client(None), VoiceGender::Female);
    }

    #[test]
    fn markup_is_stripped_before_speaking() {
        assert_eq!(
            strip_markup("## **Aphid** control: use _neem_ oil "),
            "Aphid control: use neem oil"
        );
    }

    #[tokio::test]
    async fn retries_rate_limited_requests_then_returns_audio() {
        let state = SpeechServerState {
            statuses: Arc::new(Mutex::new(VecDeque::from(vec![
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::FORBIDDEN,
                StatusCode::OK,
            ]))),
            seen_bodies: Arc::new(Mutex::new(Vec::new())),
        };
        let (url, shutdown_tx, server_task) = spawn_speech_server(state.clone()).await;

        let synthesizer = HttpSpeechSynthesizer::from_config(&config_for(url, 3))
            .expect("synthesizer should build")
            .expect("endpoint should be configured");
        let audio = synthesizer
            .synthesize("**Use** neem oil", Language::Hindi, VoiceGender::Female)
            .await
            .expect("third attempt should succeed");

        shutdown_tx.send(()).expect("shutdown signal should send");
        server_task.await.expect("server task should join");

        assert_eq!(audio, b"ID3-fake-mp3".to_vec());
        let bodies = state.seen_bodies.lock().await.clone();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["text"], "Use neem oil");
        assert_eq!(bodies[0]["voice"], "hi-IN-SwaraNeural");
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let state = SpeechServerState {
            statuses: Arc::new(Mutex::new(VecDeque::from(vec![
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::OK,
            ]))),
            seen_bodies: Arc::new(Mutex::new(Vec::new())),
        };
        let (url, shutdown_tx, server_task) = spawn_speech_server(state.clone()).await;

        let synthesizer = HttpSpeechSynthesizer::from_config(&config_for(url, 3))
            .expect("synthesizer should build")
            .expect("endpoint should be configured");
        let err = synthesizer
            .synthesize("hello", Language::English, VoiceGender::Male)
            .await
            .expect_err("server errors should surface");

        shutdown_tx.send(()).expect("shutdown signal should send");
        server_task.await.expect("server task should join");

        assert!(matches!(err, TtsError::Status(500)), "unexpected error {err:?}");
        assert_eq!(state.seen_bodies.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn markup_only_text_is_rejected_without_a_request() {
        let synthesizer = HttpSpeechSynthesizer::from_config(&config_for(
            "http://127.0.0.1:9/tts".to_string(),
            0,
        ))
        .expect("synthesizer should build")
        .expect("endpoint should be configured");

        let err = synthesizer
            .synthesize("** ## __", Language::English, VoiceGender::Female)
            .await
            .expect_err("empty text should fail");
        assert!(matches!(err, TtsError::EmptyText));
    }

    #[test]
    fn missing_endpoint_disables_synthesizer() {
        let mut config = config_for(String::new(), 0);
        config.endpoint_url = None;
        assert!(
            HttpSpeechSynthesizer::from_config(&config)
                .expect("config should be accepted")
                .is_none()
        );
    }

    fn config_for(url: String, max_retries: u32) -> TtsConfig {
        TtsConfig {
            endpoint_url: Some(url),
            api_key: Some("test-tts-key".to_string()),
            timeout_ms: 5_000,
            max_retries,
            retry_base_backoff_ms: 0,
            audio_format: super::DEFAULT_AUDIO_FORMAT.to_string(),
            audio_dir: PathBuf::from("unused"),
            audio_ttl_seconds: 600,
        }
    }

    async fn spawn_speech_server(
        state: SpeechServerState,
    ) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route("/tts", post(speech_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let local_addr = listener
            .local_addr()
            .expect("listener address should resolve");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

            server.await.expect("test server should run");
        });

        (format!("http://{local_addr}/tts"), shutdown_tx, server_task)
    }

    async fn speech_handler(
        State(state): State<SpeechServerState>,
        Json(payload): Json<Value>,
    ) -> (StatusCode, Vec<u8>) {
        state.seen_bodies.lock().await.push(payload);
        let status = state
            .statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_success() {
            (status, b"ID3-fake-mp3".to_vec())
        } else {
            (status, Vec::new())
        }
    }
}
