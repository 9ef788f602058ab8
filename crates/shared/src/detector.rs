use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::pest::{PestDetectionRecord, SeverityThresholds};
use crate::retry::{RetryPolicy, retry_with_backoff};

const BARE_LABEL_CONFIDENCE: f32 = 0.8;
const MAX_BARE_LABEL_CHARS: usize = 80;

static DETECTION_LINE: LazyLock<Result<Regex, String>> = LazyLock::new(|| {
    Regex::new(r"-?\s*\*\*([^*]+)\*\*\s*\(Confidence:\s*(\d+(?:\.\d+)?)%\)")
        .map_err(|err| err.to_string())
});

const STATUS_CHECK_TIMEOUT_MS: u64 = 5_000;

pub type DetectFuture<'a> = Pin<Box<dyn Future<Output = PestDetectionRecord> + Send + 'a>>;
pub type HealthFuture<'a> = Pin<Box<dyn Future<Output = DetectorHealth> + Send + 'a>>;

/// Remote pest classifier. Implementations always produce a record; failures are
/// reported through sentinel records, never through `Err` or panics.
pub trait PestDetector: Send + Sync {
    fn detect<'a>(&'a self, image_bytes: &'a [u8]) -> DetectFuture<'a>;

    /// Cheap reachability check that never uploads an image.
    fn check_health(&self) -> HealthFuture<'_>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorHealth {
    pub reachable: bool,
    pub error: Option<String>,
}

impl DetectorHealth {
    pub fn reachable() -> Self {
        Self {
            reachable: true,
            error: None,
        }
    }

    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            reachable: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub endpoint_url: Option<String>,
    pub api_token: Option<String>,
    pub model_id: String,
    pub timeout_ms: u64,
    pub deadline_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
    pub scratch_dir: PathBuf,
    pub severity: SeverityThresholds,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector request timed out")]
    Timeout,
    #[error("detector request failed: {0}")]
    Transport(String),
    #[error("detector rejected credentials (status {0})")]
    Unauthorized(u16),
    #[error("detector model not found")]
    NotFound,
    #[error("detector returned status {0}")]
    Status(u16),
    #[error("failed to stage image for upload: {0}")]
    Artifact(String),
    #[error("failed to build detector client: {0}")]
    Client(String),
}

impl DetectorError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(status) => matches!(*status, 502..=504),
            _ => false,
        }
    }
}

/// Normalized view of the shapes the classifier has been seen to answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorPayload {
    Structured {
        label: String,
        confidence: Option<f32>,
    },
    Pair(String, f32),
    Ranked(Vec<(String, f32)>),
    Text(String),
    Unrecognized,
}

impl DetectorPayload {
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                if let Some(Value::Array(items)) = map.get("data")
                    && let Some(first) = items.first()
                {
                    return Self::parse(first);
                }

                let label = ["label", "pest_name", "prediction"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str));
                match label {
                    Some(label) => Self::Structured {
                        label: label.to_string(),
                        confidence: ["confidence", "score"]
                            .iter()
                            .find_map(|key| map.get(*key).and_then(Value::as_f64))
                            .map(|value| value as f32),
                    },
                    None => Self::Unrecognized,
                }
            }
            Value::Array(items) => {
                if let [Value::String(label), Value::Number(confidence)] = items.as_slice() {
                    return Self::Pair(label.clone(), confidence.as_f64().unwrap_or(0.0) as f32);
                }

                let ranked = items
                    .iter()
                    .filter_map(|item| match Self::parse(item) {
                        Self::Structured { label, confidence } => {
                            Some((label, confidence.unwrap_or(0.0)))
                        }
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                if ranked.is_empty() {
                    Self::Unrecognized
                } else {
                    Self::Ranked(ranked)
                }
            }
            Value::String(text) => Self::Text(text.clone()),
            _ => Self::Unrecognized,
        }
    }

    pub fn into_record(self, thresholds: &SeverityThresholds) -> PestDetectionRecord {
        match self {
            Self::Structured { label, confidence } => labelled_record(
                &label,
                confidence.unwrap_or(BARE_LABEL_CONFIDENCE),
                thresholds,
            ),
            Self::Pair(label, confidence) => labelled_record(&label, confidence, thresholds),
            Self::Ranked(candidates) => candidates
                .into_iter()
                .filter(|(label, _)| is_usable_label(label))
                .max_by(|a, b| normalize_confidence(a.1).total_cmp(&normalize_confidence(b.1)))
                .map(|(label, confidence)| labelled_record(&label, confidence, thresholds))
                .unwrap_or_else(PestDetectionRecord::unknown),
            Self::Text(text) => record_from_text(&text, thresholds),
            Self::Unrecognized => PestDetectionRecord::unknown(),
        }
    }
}

fn labelled_record(
    label: &str,
    confidence: f32,
    thresholds: &SeverityThresholds,
) -> PestDetectionRecord {
    let label = label.trim();
    if !is_usable_label(label) {
        return PestDetectionRecord::unknown();
    }
    PestDetectionRecord::detected(label, normalize_confidence(confidence), thresholds)
}

fn record_from_text(text: &str, thresholds: &SeverityThresholds) -> PestDetectionRecord {
    if let Ok(pattern) = DETECTION_LINE.as_ref() {
        let best = pattern
            .captures_iter(text)
            .filter_map(|captures| {
                let name = captures.get(1)?.as_str().trim().to_string();
                let percent = captures.get(2)?.as_str().parse::<f32>().ok()?;
                is_usable_label(&name).then_some((name, percent / 100.0))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((name, confidence)) = best {
            return PestDetectionRecord::detected(name, confidence, thresholds);
        }
    }

    let trimmed = text.trim();
    if trimmed.lines().count() == 1 && trimmed.chars().count() <= MAX_BARE_LABEL_CHARS {
        return labelled_record(trimmed, BARE_LABEL_CONFIDENCE, thresholds);
    }
    PestDetectionRecord::unknown()
}

fn is_usable_label(label: &str) -> bool {
    let label = label.trim();
    if label.is_empty() || label.contains('/') || label.contains('\\') {
        return false;
    }
    let lowered = label.to_ascii_lowercase();
    ![".jpg", ".jpeg", ".png", ".webp"]
        .iter()
        .any(|extension| lowered.ends_with(extension))
}

fn normalize_confidence(confidence: f32) -> f32 {
    if !confidence.is_finite() {
        return 0.0;
    }
    if confidence > 1.0 && confidence <= 100.0 {
        return confidence / 100.0;
    }
    confidence.clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct RemotePestDetector {
    client: reqwest::Client,
    endpoint_url: String,
    config: DetectorConfig,
}

impl RemotePestDetector {
    /// Returns `Ok(None)` when no endpoint is configured.
    pub fn from_config(config: DetectorConfig) -> Result<Option<Self>, DetectorError> {
        let Some(endpoint_url) = config.endpoint_url.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| DetectorError::Client(err.to_string()))?;

        Ok(Some(Self {
            client,
            endpoint_url,
            config,
        }))
    }

    async fn detect_staged(&self, image_bytes: &[u8]) -> Result<Value, DetectorError> {
        let mut artifact = tempfile::Builder::new()
            .prefix("croplens-frame-")
            .suffix(".jpg")
            .tempfile_in(&self.config.scratch_dir)
            .map_err(|err| DetectorError::Artifact(err.to_string()))?;
        artifact
            .write_all(image_bytes)
            .and_then(|()| artifact.flush())
            .map_err(|err| DetectorError::Artifact(err.to_string()))?;

        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_base_backoff_ms);
        let artifact_path = artifact.path().to_path_buf();
        let result = retry_with_backoff(&policy, DetectorError::is_transient, |_| {
            self.send_once(&artifact_path)
        })
        .await;

        // Deletes the artifact.
        drop(artifact);
        result
    }

    async fn send_once(&self, artifact_path: &Path) -> Result<Value, DetectorError> {
        let bytes = tokio::fs::read(artifact_path)
            .await
            .map_err(|err| DetectorError::Artifact(err.to_string()))?;
        let part = Part::bytes(bytes)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|err| DetectorError::Artifact(err.to_string()))?;
        let form = Form::new().part("file", part);

        let mut request = self.client.post(&self.endpoint_url).multipart(form);
        if let Some(token) = self.config.api_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                DetectorError::Timeout
            } else {
                DetectorError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(DetectorError::Unauthorized(status.as_u16()));
            }
            StatusCode::NOT_FOUND => return Err(DetectorError::NotFound),
            _ if !status.is_success() => return Err(DetectorError::Status(status.as_u16())),
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|err| DetectorError::Transport(err.to_string()))?;
        Ok(serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body)))
    }

    fn record_for_error(&self, err: &DetectorError) -> PestDetectionRecord {
        match err {
            DetectorError::Unauthorized(status) => PestDetectionRecord::configuration_error(format!(
                "Pest detection service rejected the API token (status {status}). Check HUGGINGFACE_API_TOKEN."
            )),
            DetectorError::NotFound => PestDetectionRecord::configuration_error(format!(
                "Pest detection model '{}' was not found (404). Check HUGGINGFACE_MODEL_ID and DETECTOR_URL.",
                self.config.model_id
            )),
            DetectorError::Timeout => PestDetectionRecord::configuration_error(
                "Pest detection timed out while waiting for the model to respond.",
            ),
            other => PestDetectionRecord::failed(other.to_string()),
        }
    }
}

impl PestDetector for RemotePestDetector {
    fn check_health(&self) -> HealthFuture<'_> {
        Box::pin(async move {
            let timeout = STATUS_CHECK_TIMEOUT_MS.min(self.config.timeout_ms);
            let mut request = self
                .client
                .get(&self.endpoint_url)
                .timeout(Duration::from_millis(timeout));
            if let Some(token) = self.config.api_token.as_deref() {
                request = request.bearer_auth(token);
            }

            let failure = match request.send().await {
                Ok(response) => match response.status() {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        Some(DetectorError::Unauthorized(response.status().as_u16()))
                    }
                    StatusCode::NOT_FOUND => Some(DetectorError::NotFound),
                    status if status.is_server_error() => {
                        Some(DetectorError::Status(status.as_u16()))
                    }
                    _ => None,
                },
                Err(err) if err.is_timeout() => Some(DetectorError::Timeout),
                Err(err) => Some(DetectorError::Transport(err.to_string())),
            };

            match failure {
                None => DetectorHealth::reachable(),
                Some(err) => {
                    warn!(
                        error = %err,
                        model_id = %self.config.model_id,
                        "pest detector health check failed"
                    );
                    DetectorHealth::unreachable(err.to_string())
                }
            }
        })
    }

    fn detect<'a>(&'a self, image_bytes: &'a [u8]) -> DetectFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let deadline = Duration::from_millis(self.config.deadline_ms);

            let record = match tokio::time::timeout(deadline, self.detect_staged(image_bytes)).await
            {
                Ok(Ok(payload)) => {
                    DetectorPayload::parse(&payload).into_record(&self.config.severity)
                }
                Ok(Err(err)) => {
                    warn!(error = %err, model_id = %self.config.model_id, "pest detection failed");
                    self.record_for_error(&err)
                }
                Err(_) => {
                    warn!(
                        deadline_ms = self.config.deadline_ms,
                        model_id = %self.config.model_id,
                        "pest detection exceeded deadline"
                    );
                    self.record_for_error(&DetectorError::Timeout)
                }
            };

            info!(
                pest_name = %record.pest_name,
                confidence = record.confidence,
                severity = record.severity.as_str(),
                detection_ms = started.elapsed().as_millis() as u64,
                "heavy detection complete"
            );
            record
        })
    }
}
