use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::pest::PestDetectionRecord;
use thiserror::Error;

/// Client → server events. `type` selects the variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Init {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        voice_gender: Option<String>,
    },
    Frame {
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        data: Option<String>,
    },
    Voice {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },
    Interrupt,
    Ping,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Frame { .. } => "frame",
            Self::Voice { .. } => "voice",
            Self::Interrupt => "interrupt",
            Self::Ping => "ping",
        }
    }
}

const KNOWN_TYPES: &[&str] = &["init", "frame", "voice", "interrupt", "ping"];

#[derive(Debug, Error, PartialEq)]
pub enum InboundError {
    #[error("message is not valid JSON")]
    MalformedJson,
    #[error("message has no type")]
    MissingType,
    #[error("unknown message type {0}")]
    UnknownType(String),
    #[error("invalid {kind} message: {message}")]
    InvalidFields { kind: String, message: String },
}

pub fn parse_inbound(raw: &str) -> Result<InboundEvent, InboundError> {
    let value = serde_json::from_str::<Value>(raw).map_err(|_| InboundError::MalformedJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(InboundError::MissingType)?
        .to_string();
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(InboundError::UnknownType(kind));
    }

    serde_json::from_value::<InboundEvent>(value).map_err(|err| InboundError::InvalidFields {
        kind,
        message: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameAnalysis {
    pub description: String,
    pub has_relevant_content: bool,
    pub confidence: f32,
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Welcome {
        message: String,
        session_id: String,
    },
    FrameProcessed {
        analysis: FrameAnalysis,
    },
    Status {
        message: String,
        is_analyzing: bool,
    },
    Response {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pest_detection: Option<PestDetectionRecord>,
    },
    TtsAudio {
        #[serde(skip_serializing_if = "Option::is_none")]
        tts_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        mime: String,
        size: usize,
    },
    TextOnly {
        text: String,
        error: String,
    },
    StopTts {
        message: String,
    },
    Pong,
    Error {
        message: String,
    },
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::FrameProcessed { .. } => "frame_processed",
            Self::Status { .. } => "status",
            Self::Response { .. } => "response",
            Self::TtsAudio { .. } => "tts_audio",
            Self::TextOnly { .. } => "text_only",
            Self::StopTts { .. } => "stop_tts",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}
