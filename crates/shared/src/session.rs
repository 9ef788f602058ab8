use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pest::PestDetectionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Hindi,
}

impl Language {
    /// Lenient parse used for client-supplied language fields. Anything that is not
    /// recognizably Hindi is treated as English.
    pub fn from_client(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("hindi" | "hi" | "hi-in") => Self::Hindi,
            _ => Self::English,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Hindi => "hindi",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hindi => "hi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    pub language: Language,
    pub messages: Vec<SessionMessage>,
    detected_pests: Vec<String>,
    pub latest_pest_info: Option<PestDetectionRecord>,
    pub crop_type: Option<String>,
    pub region: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at,
            language: Language::default(),
            messages: Vec::new(),
            detected_pests: Vec::new(),
            latest_pest_info: None,
            crop_type: None,
            region: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn detected_pests(&self) -> &[String] {
        &self.detected_pests
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(SessionMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    /// Records a detection as the latest pest context. The name joins
    /// `detected_pests` only if it is not already present.
    pub fn add_detected_pest(&mut self, record: PestDetectionRecord) {
        if !self
            .detected_pests
            .iter()
            .any(|existing| existing == &record.pest_name)
        {
            self.detected_pests.push(record.pest_name.clone());
        }
        self.latest_pest_info = Some(record);
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > ttl
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
