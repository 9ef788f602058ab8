use std::sync::Arc;

use shared::audio_store::{AudioStore, AudioStoreError};
use shared::config::LiveApiConfig;
use shared::detector::{DetectorError, PestDetector, RemotePestDetector};
use shared::intent::IntentWeights;
use shared::llm::chat_completions::ChatCompletionsBuildError;
use shared::llm::{ChatCompletionsGateway, ContextAssembler, LlmGateway};
use shared::session_store::SessionStore;
use shared::triage::{ClassifierError, VisionTriage};
use shared::tts::{HttpSpeechSynthesizer, SpeechSynthesizer, TtsError};
use thiserror::Error;
use tracing::{info, warn};

/// Everything a request or live turn needs to reach. Optional adapters stay `None`
/// when their endpoint is not configured and callers degrade accordingly.
pub struct Services {
    pub sessions: SessionStore,
    pub triage: VisionTriage,
    pub detector: Option<Arc<dyn PestDetector>>,
    pub llm: Arc<dyn LlmGateway>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub audio: Option<AudioStore>,
    pub context: ContextAssembler,
    pub intent_weights: IntentWeights,
}

#[derive(Debug, Error)]
pub enum ServiceBuildError {
    #[error("failed to build llm gateway: {0}")]
    Llm(#[from] ChatCompletionsBuildError),
    #[error("failed to build pest detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("failed to build triage classifier: {0}")]
    Triage(#[from] ClassifierError),
    #[error("failed to build speech synthesizer: {0}")]
    Speech(#[from] TtsError),
    #[error("failed to prepare audio directory: {0}")]
    Audio(#[from] AudioStoreError),
}

impl Services {
    pub fn from_config(
        config: &LiveApiConfig,
        sessions: SessionStore,
    ) -> Result<Self, ServiceBuildError> {
        let llm: Arc<dyn LlmGateway> = Arc::new(ChatCompletionsGateway::new(config.llm.clone())?);

        let detector = RemotePestDetector::from_config(config.detector.clone())?
            .map(|detector| Arc::new(detector) as Arc<dyn PestDetector>);
        if detector.is_none() {
            warn!("DETECTOR_URL is not set; pest detection will report a configuration error");
        }

        let triage = VisionTriage::from_config(&config.triage)?;
        if !triage.has_classifier() {
            info!("TRIAGE_CLASSIFIER_URL is not set; frames use the size heuristic");
        }

        let speech = HttpSpeechSynthesizer::from_config(&config.tts)?
            .map(|speech| Arc::new(speech) as Arc<dyn SpeechSynthesizer>);
        let audio = match speech {
            Some(_) => Some(AudioStore::new(
                config.tts.audio_dir.clone(),
                config.tts.audio_ttl_seconds,
            )?),
            None => {
                warn!("TTS_URL is not set; live replies will be text only");
                None
            }
        };

        Ok(Self {
            sessions,
            triage,
            detector,
            llm,
            speech,
            audio,
            context: config.context,
            intent_weights: config.intent_weights,
        })
    }
}
