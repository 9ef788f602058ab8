use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use shared::intent::match_intent;
use shared::knowledge::enrich_record;
use shared::llm::prompts::DETECTOR_NOT_CONFIGURED;
use shared::llm::{ChatMessage, LlmGatewayRequest, template_for_language};
use shared::pest::PestDetectionRecord;
use shared::session::{Language, Role, Session};
use shared::triage::VisionTriageResult;
use shared::tts::{AUDIO_MIME, VoiceGender};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::protocol::{FrameAnalysis, InboundError, InboundEvent, OutboundEvent, parse_inbound};
use super::registry::{LiveRegistry, LiveSummary};
use crate::services::Services;

const NOT_INITIALIZED: &str = "Session not initialized. Send init message first.";
const ALREADY_ACTIVE: &str = "This session already has an active live connection.";
const INVALID_FORMAT: &str = "Invalid message format";
const GENERIC_FAILURE: &str = "Sorry, I encountered an error processing your request.";
const TTS_UNAVAILABLE: &str = "TTS temporarily unavailable - showing text only";
const LISTENING: &str = "Listening...";

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("live connection outbound channel is closed")]
    OutboundClosed,
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
struct LiveSession {
    session_id: String,
    language: Language,
    voice_gender: VoiceGender,
    last_triage: Option<VisionTriageResult>,
}

/// Per-socket state machine. Inbound events are handled one at a time, so every
/// side effect for a session happens in arrival order.
pub struct LiveConnection {
    services: Arc<Services>,
    registry: LiveRegistry,
    connection_id: u64,
    requested_session_id: Option<String>,
    outbound: mpsc::Sender<OutboundEvent>,
    session: Option<LiveSession>,
}

impl LiveConnection {
    pub(super) fn new(
        services: Arc<Services>,
        registry: LiveRegistry,
        connection_id: u64,
        requested_session_id: Option<String>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            services,
            registry,
            connection_id,
            requested_session_id,
            outbound,
            session: None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|live| live.session_id.as_str())
    }

    /// Handles one text frame from the client. Only a closed outbound channel is
    /// returned as an error; everything else is reported to the client as an event.
    pub async fn handle_text(&mut self, raw: &str) -> Result<(), LiveError> {
        let event = match parse_inbound(raw) {
            Ok(event) => event,
            Err(InboundError::MalformedJson) => {
                warn!(connection_id = self.connection_id, "malformed live message");
                return self.send(OutboundEvent::error(INVALID_FORMAT)).await;
            }
            Err(err @ (InboundError::MissingType | InboundError::UnknownType(_))) => {
                warn!(connection_id = self.connection_id, error = %err, "ignoring live message");
                return Ok(());
            }
            Err(err @ InboundError::InvalidFields { .. }) => {
                warn!(connection_id = self.connection_id, error = %err, "invalid live message");
                return self.send(OutboundEvent::error(INVALID_FORMAT)).await;
            }
        };

        let kind = event.kind();
        match self.dispatch(event).await {
            Ok(()) => Ok(()),
            Err(LiveError::OutboundClosed) => Err(LiveError::OutboundClosed),
            Err(LiveError::Internal(message)) => {
                error!(
                    connection_id = self.connection_id,
                    session_id = self.session_id().unwrap_or_default(),
                    event = kind,
                    error = %message,
                    "live event failed"
                );
                self.send(OutboundEvent::error(GENERIC_FAILURE)).await
            }
        }
    }

    /// Marks the connection inactive. The stored session is kept until its TTL.
    pub fn close(&mut self) {
        if let Some(live) = self.session.take() {
            self.registry.remove(&live.session_id, self.connection_id);
            info!(session_id = %live.session_id, "live session disconnected");
        }
    }

    async fn dispatch(&mut self, event: InboundEvent) -> Result<(), LiveError> {
        if self.session.is_none() && !matches!(event, InboundEvent::Init { .. }) {
            return self.send(OutboundEvent::error(NOT_INITIALIZED)).await;
        }

        match event {
            InboundEvent::Init {
                language,
                voice_gender,
            } => {
                self.handle_init(
                    Language::from_client(language.as_deref()),
                    VoiceGender::from_client(voice_gender.as_deref()),
                )
                .await
            }
            InboundEvent::Frame { image, data } => self.handle_frame(image.or(data)).await,
            InboundEvent::Voice { text, transcript } => {
                let utterance = text
                    .filter(|text| !text.trim().is_empty())
                    .or(transcript)
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty());
                match utterance {
                    Some(utterance) => self.handle_voice(utterance).await,
                    None => {
                        warn!(
                            session_id = self.session_id().unwrap_or_default(),
                            "ignoring blank voice message"
                        );
                        Ok(())
                    }
                }
            }
            InboundEvent::Interrupt => {
                debug!(
                    session_id = self.session_id().unwrap_or_default(),
                    "speech interrupted"
                );
                self.send(OutboundEvent::StopTts {
                    message: LISTENING.to_string(),
                })
                .await
            }
            InboundEvent::Ping => self.send(OutboundEvent::Pong).await,
        }
    }

    async fn handle_init(
        &mut self,
        language: Language,
        voice_gender: VoiceGender,
    ) -> Result<(), LiveError> {
        if let Some(live) = self.session.as_mut() {
            live.language = language;
            live.voice_gender = voice_gender;
            let session_id = live.session_id.clone();
            if let Some(mut session) = self.services.sessions.get(&session_id).await {
                session.language = language;
                self.services.sessions.save(&session).await;
            }
            self.registry
                .update(&session_id, |summary| summary.language = language);
            return self.send_welcome(language, session_id).await;
        }

        let mut session = self
            .services
            .sessions
            .get_or_create(self.requested_session_id.as_deref())
            .await;
        let summary = LiveSummary {
            language,
            created_at: session.created_at(),
            has_frame: false,
            message_count: session.messages.len(),
        };
        if let Err(err) = self
            .registry
            .register(session.id(), self.connection_id, summary)
        {
            warn!(session_id = %session.id(), error = %err, "refusing duplicate live connection");
            return self.send(OutboundEvent::error(ALREADY_ACTIVE)).await;
        }

        session.language = language;
        self.services.sessions.save(&session).await;
        let session_id = session.id().to_string();
        self.session = Some(LiveSession {
            session_id: session_id.clone(),
            language,
            voice_gender,
            last_triage: None,
        });
        info!(
            session_id = %session_id,
            language = language.as_str(),
            "live session initialized"
        );

        self.send_welcome(language, session_id).await
    }

    async fn send_welcome(&self, language: Language, session_id: String) -> Result<(), LiveError> {
        self.send(OutboundEvent::Welcome {
            message: template_for_language(language).welcome.to_string(),
            session_id,
        })
        .await
    }

    async fn handle_frame(&mut self, encoded: Option<String>) -> Result<(), LiveError> {
        let session_id = self.session_id().unwrap_or_default().to_string();
        let Some(encoded) = encoded.filter(|encoded| !encoded.trim().is_empty()) else {
            warn!(session_id = %session_id, "frame message carried no image");
            return Ok(());
        };

        let image_bytes = match decode_frame(&encoded) {
            Ok(image_bytes) => image_bytes,
            Err(reason) => {
                warn!(session_id = %session_id, error = %reason, "failed to decode frame");
                return Ok(());
            }
        };

        let triage = self.services.triage.quick_analyze(image_bytes).await;
        debug!(
            session_id = %session_id,
            relevant = triage.has_relevant_content,
            confidence = triage.confidence,
            "frame triaged"
        );
        let analysis = FrameAnalysis {
            description: triage.description.clone(),
            has_relevant_content: triage.has_relevant_content,
            confidence: triage.confidence,
        };

        if let Some(live) = self.session.as_mut() {
            live.last_triage = Some(triage);
        }
        self.registry
            .update(&session_id, |summary| summary.has_frame = true);

        self.send(OutboundEvent::FrameProcessed { analysis }).await
    }

    async fn handle_voice(&mut self, utterance: String) -> Result<(), LiveError> {
        let started = Instant::now();
        let session = self.current_session().await?;
        let Some(live) = self.session.as_ref() else {
            return Err(LiveError::Internal("voice handled before init".to_string()));
        };

        let intent = match_intent(
            &utterance,
            live.last_triage.as_ref(),
            &self.services.intent_weights,
        );
        info!(
            session_id = %live.session_id,
            should_escalate = intent.should_escalate,
            score = intent.score,
            reason = intent.reason.as_str(),
            "voice intent matched"
        );

        let voice_gender = live.voice_gender;
        if intent.should_escalate {
            let image = live
                .last_triage
                .as_ref()
                .map(|triage| triage.image_bytes.as_slice())
                .unwrap_or_default();
            self.escalate(session, &utterance, image, voice_gender, started)
                .await
        } else {
            let visual = live
                .last_triage
                .as_ref()
                .map(|triage| triage.description.as_str());
            self.fast_path(session, &utterance, visual, voice_gender, started)
                .await
        }
    }

    /// Loads the stored session behind this connection. If it expired while the socket
    /// was open, a fresh session takes its place and the registry follows it.
    async fn current_session(&mut self) -> Result<Session, LiveError> {
        let Some(live) = self.session.as_mut() else {
            return Err(LiveError::Internal("no live session".to_string()));
        };
        if let Some(session) = self.services.sessions.get(&live.session_id).await {
            return Ok(session);
        }

        let mut session = self.services.sessions.get_or_create(None).await;
        session.language = live.language;
        self.services.sessions.save(&session).await;
        self.registry
            .rekey(&live.session_id, session.id(), session.created_at());
        info!(
            previous_session_id = %live.session_id,
            session_id = %session.id(),
            "live session expired; continuing with a new session"
        );
        live.session_id = session.id().to_string();
        Ok(session)
    }

    async fn escalate(
        &self,
        mut session: Session,
        utterance: &str,
        image: &[u8],
        voice_gender: VoiceGender,
        started: Instant,
    ) -> Result<(), LiveError> {
        if image.is_empty() {
            return Err(LiveError::Internal(
                "cached frame has no image bytes".to_string(),
            ));
        }

        let template = template_for_language(session.language);
        self.send(OutboundEvent::Status {
            message: template.analyzing.to_string(),
            is_analyzing: true,
        })
        .await?;

        let detection_started = Instant::now();
        let record = match self.services.detector.as_ref() {
            Some(detector) => detector.detect(image).await,
            None => PestDetectionRecord::configuration_error("Pest detector is not configured"),
        };
        let record = enrich_record(record, session.language);
        let detection_ms = detection_started.elapsed().as_millis() as u64;

        let llm_started = Instant::now();
        let reply = if record.is_configuration_error() {
            DETECTOR_NOT_CONFIGURED.to_string()
        } else {
            if record.is_identified() {
                session.add_detected_pest(record.clone());
            }
            let messages = self
                .services
                .context
                .build_escalation_context(utterance, &record, &session);
            self.generate_reply(&session, messages).await
        };
        let llm_ms = llm_started.elapsed().as_millis() as u64;

        self.record_exchange(&mut session, utterance, &reply).await;
        self.send(OutboundEvent::Response {
            text: reply.clone(),
            pest_detection: Some(record.clone()),
        })
        .await?;

        let speech_started = Instant::now();
        self.speak(&session, &reply, voice_gender).await?;
        let speech_ms = speech_started.elapsed().as_millis() as u64;

        info!(
            session_id = %session.id(),
            pest_name = %record.pest_name,
            detection_ms,
            llm_ms,
            speech_ms,
            total_turn_ms = started.elapsed().as_millis() as u64,
            "escalated turn latency breakdown"
        );
        Ok(())
    }

    async fn fast_path(
        &self,
        mut session: Session,
        utterance: &str,
        visual_description: Option<&str>,
        voice_gender: VoiceGender,
        started: Instant,
    ) -> Result<(), LiveError> {
        let llm_started = Instant::now();
        let messages = self.services.context.build_fast_path_context(
            utterance,
            visual_description,
            &session,
        );
        let reply = self.generate_reply(&session, messages).await;
        let llm_ms = llm_started.elapsed().as_millis() as u64;

        self.record_exchange(&mut session, utterance, &reply).await;
        self.send(OutboundEvent::Response {
            text: reply.clone(),
            pest_detection: None,
        })
        .await?;

        let speech_started = Instant::now();
        self.speak(&session, &reply, voice_gender).await?;
        let speech_ms = speech_started.elapsed().as_millis() as u64;

        info!(
            session_id = %session.id(),
            llm_ms,
            speech_ms,
            total_turn_ms = started.elapsed().as_millis() as u64,
            "fast path turn latency breakdown"
        );
        Ok(())
    }

    async fn generate_reply(&self, session: &Session, messages: Vec<ChatMessage>) -> String {
        let request = LlmGatewayRequest::new(messages).with_requester_id(session.id());
        match self.services.llm.generate(request).await {
            Ok(response) => response.content,
            Err(err) => {
                warn!(session_id = %session.id(), error = %err, "llm reply failed");
                template_for_language(session.language)
                    .llm_failure
                    .to_string()
            }
        }
    }

    async fn record_exchange(&self, session: &mut Session, utterance: &str, reply: &str) {
        session.add_message(Role::User, utterance);
        session.add_message(Role::Assistant, reply);
        self.services.sessions.save(session).await;
        let message_count = session.messages.len();
        self.registry
            .update(session.id(), |summary| summary.message_count = message_count);
    }

    async fn speak(
        &self,
        session: &Session,
        text: &str,
        voice_gender: VoiceGender,
    ) -> Result<(), LiveError> {
        let Some(speech) = self.services.speech.as_ref() else {
            return self.send_text_only(text).await;
        };

        let audio = match speech.synthesize(text, session.language, voice_gender).await {
            Ok(audio) => audio,
            Err(err) => {
                warn!(session_id = %session.id(), error = %err, "speech synthesis failed");
                return self.send_text_only(text).await;
            }
        };

        let stored = match self.services.audio.as_ref() {
            Some(store) => store
                .store(session.id(), &audio)
                .await
                .map_err(|err| err.to_string()),
            None => Err("audio store is not configured".to_string()),
        };

        let event = match stored {
            Ok(stored) => OutboundEvent::TtsAudio {
                tts_url: Some(format!(
                    "/api/live/tts/{}?v={}",
                    session.id(),
                    Utc::now().timestamp()
                )),
                audio: None,
                mime: AUDIO_MIME.to_string(),
                size: stored.size,
            },
            Err(reason) => {
                warn!(session_id = %session.id(), error = %reason, "sending audio inline");
                OutboundEvent::TtsAudio {
                    tts_url: None,
                    audio: Some(STANDARD.encode(&audio)),
                    mime: AUDIO_MIME.to_string(),
                    size: audio.len(),
                }
            }
        };
        self.send(event).await
    }

    async fn send_text_only(&self, text: &str) -> Result<(), LiveError> {
        self.send(OutboundEvent::TextOnly {
            text: text.to_string(),
            error: TTS_UNAVAILABLE.to_string(),
        })
        .await
    }

    async fn send(&self, event: OutboundEvent) -> Result<(), LiveError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| LiveError::OutboundClosed)
    }
}

/// Accepts bare base64 or a `data:image/...;base64,` URI.
fn decode_frame(encoded: &str) -> Result<Vec<u8>, String> {
    let payload = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, payload)| payload)
        .trim();
    let bytes = STANDARD.decode(payload).map_err(|err| err.to_string())?;
    if bytes.is_empty() {
        return Err("frame decoded to zero bytes".to_string());
    }
    Ok(bytes)
}
