use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const RELEVANT_OBJECTS: &[&str] = &[
    "plant",
    "leaf",
    "flower",
    "insect",
    "bug",
    "beetle",
    "caterpillar",
    "aphid",
    "crop",
    "tree",
    "grass",
    "vegetation",
    "agriculture",
    "corn",
    "wheat",
    "rice",
    "potato",
    "tomato",
];
const HEURISTIC_CONFIDENCE: f32 = 0.5;
const MAX_DESCRIBED_LABELS: usize = 3;

pub type ClassifierFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<LabelScore>, ClassifierError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("image classifier request failed: {0}")]
    Request(String),
    #[error("image classifier returned status {0}")]
    Status(u16),
    #[error("image classifier returned an invalid payload: {0}")]
    InvalidPayload(String),
}

/// Cheap remote labeller consulted before falling back to local heuristics.
pub trait ImageClassifier: Send + Sync {
    fn classify<'a>(&'a self, image_bytes: &'a [u8]) -> ClassifierFuture<'a>;
}

#[derive(Debug, Clone, Serialize)]
pub struct VisionTriageResult {
    pub has_relevant_content: bool,
    pub confidence: f32,
    pub description: String,
    pub labels: Vec<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
}

impl VisionTriageResult {
    pub fn new(
        has_relevant_content: bool,
        confidence: f32,
        description: impl Into<String>,
        labels: Vec<String>,
        image_bytes: Vec<u8>,
    ) -> Self {
        Self {
            has_relevant_content,
            confidence: confidence.clamp(0.0, 1.0),
            description: description.into(),
            labels,
            captured_at: Utc::now(),
            image_bytes,
        }
    }

    fn undecodable() -> Self {
        Self::new(false, 0.0, "Unable to analyze image", Vec::new(), Vec::new())
    }

    fn heuristic(width: u32, height: u32, image_bytes: Vec<u8>) -> Self {
        Self::new(
            true,
            HEURISTIC_CONFIDENCE,
            format!("Image captured ({width}x{height})"),
            Vec::new(),
            image_bytes,
        )
    }
}

#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub classifier_url: Option<String>,
    pub api_token: Option<String>,
    pub budget_ms: u64,
    pub min_label_score: f32,
}

#[derive(Clone)]
pub struct VisionTriage {
    classifier: Option<Arc<dyn ImageClassifier>>,
    budget: Duration,
    min_label_score: f32,
}

impl VisionTriage {
    pub fn new(
        classifier: Option<Arc<dyn ImageClassifier>>,
        budget: Duration,
        min_label_score: f32,
    ) -> Self {
        Self {
            classifier,
            budget,
            min_label_score,
        }
    }

    pub fn from_config(config: &TriageConfig) -> Result<Self, ClassifierError> {
        let budget = Duration::from_millis(config.budget_ms);
        let classifier = match config.classifier_url.clone() {
            Some(url) => Some(Arc::new(HttpImageClassifier::new(
                url,
                config.api_token.clone(),
                budget,
            )?) as Arc<dyn ImageClassifier>),
            None => None,
        };
        Ok(Self::new(classifier, budget, config.min_label_score))
    }

    pub fn heuristic_only() -> Self {
        Self::new(None, Duration::from_millis(0), 0.1)
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Produces a verdict for one frame. Never fails: undecodable frames are reported
    /// as irrelevant, and any classifier trouble degrades to the size heuristic.
    pub async fn quick_analyze(&self, image_bytes: Vec<u8>) -> VisionTriageResult {
        let started = Instant::now();
        let Some((width, height)) = read_dimensions(&image_bytes) else {
            debug!(frame_bytes = image_bytes.len(), "frame could not be decoded");
            return VisionTriageResult::undecodable();
        };

        if let Some(classifier) = self.classifier.as_ref() {
            match tokio::time::timeout(self.budget, classifier.classify(&image_bytes)).await {
                Ok(Ok(labels)) => {
                    if let Some(result) =
                        self.result_from_labels(labels, image_bytes.clone())
                    {
                        debug!(
                            triage_ms = started.elapsed().as_millis() as u64,
                            relevant = result.has_relevant_content,
                            "triage classified frame"
                        );
                        return result;
                    }
                    debug!("triage classifier returned no confident labels");
                }
                Ok(Err(err)) => warn!(error = %err, "triage classifier failed"),
                Err(_) => debug!(
                    budget_ms = self.budget.as_millis() as u64,
                    "triage classifier exceeded budget"
                ),
            }
        }

        VisionTriageResult::heuristic(width, height, image_bytes)
    }

    fn result_from_labels(
        &self,
        mut labels: Vec<LabelScore>,
        image_bytes: Vec<u8>,
    ) -> Option<VisionTriageResult> {
        labels.retain(|label| label.score > self.min_label_score && label.score.is_finite());
        if labels.is_empty() {
            return None;
        }
        labels.sort_by(|a, b| b.score.total_cmp(&a.score));

        let relevant = labels
            .iter()
            .filter(|label| is_relevant_label(&label.label))
            .collect::<Vec<_>>();
        let label_names = labels.iter().map(|label| label.label.clone()).collect();

        if relevant.is_empty() {
            let top = &labels[0];
            return Some(VisionTriageResult::new(
                false,
                top.score,
                format!("Scene detected: {}", top.label),
                label_names,
                image_bytes,
            ));
        }

        let description = relevant
            .iter()
            .take(MAX_DESCRIBED_LABELS)
            .map(|label| label.label.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Some(VisionTriageResult::new(
            true,
            relevant[0].score,
            format!("Detected: {description}"),
            label_names,
            image_bytes,
        ))
    }
}

fn is_relevant_label(label: &str) -> bool {
    let label = label.to_lowercase();
    RELEVANT_OBJECTS.iter().any(|object| label.contains(object))
}

/// Reads width and height from the image header without decoding pixel data.
fn read_dimensions(image_bytes: &[u8]) -> Option<(u32, u32)> {
    if image_bytes.is_empty() {
        return None;
    }
    image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Image-classification endpoint that accepts raw image bytes and answers with a
/// ranked `[{label, score}]` list.
#[derive(Clone)]
pub struct HttpImageClassifier {
    client: reqwest::Client,
    url: String,
    api_token: Option<String>,
}

impl HttpImageClassifier {
    pub fn new(url: String, api_token: Option<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClassifierError::Request(err.to_string()))?;
        Ok(Self {
            client,
            url,
            api_token,
        })
    }
}

impl ImageClassifier for HttpImageClassifier {
    fn classify<'a>(&'a self, image_bytes: &'a [u8]) -> ClassifierFuture<'a> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(image_bytes.to_vec());
            if let Some(token) = self.api_token.as_deref() {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|err| ClassifierError::Request(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ClassifierError::Status(status.as_u16()));
            }

            response
                .json::<Vec<LabelScore>>()
                .await
                .map_err(|err| ClassifierError::InvalidPayload(err.to_string()))
        })
    }
}
