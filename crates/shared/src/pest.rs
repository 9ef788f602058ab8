use serde::{Deserialize, Serialize};

pub const ERROR_PEST_NAME: &str = "Error";
pub const CONFIGURATION_ERROR_PEST_NAME: &str = "Configuration Error";
pub const UNKNOWN_PEST_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Unknown,
    Beneficial,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Unknown => "unknown",
            Self::Beneficial => "beneficial",
        }
    }
}

/// Confidence cut-offs used to grade a detection. A confidence strictly above
/// `high` is high severity, strictly above `medium` is medium, anything else is low.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    pub high: f32,
    pub medium: f32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.5,
        }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, confidence: f32) -> Severity {
        if confidence > self.high {
            Severity::High
        } else if confidence > self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PestDetectionRecord {
    pub pest_name: String,
    pub confidence: f32,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub affected_crops: Vec<String>,
    #[serde(default)]
    pub spread_method: Option<String>,
    #[serde(default)]
    pub precautions: Vec<String>,
}

impl PestDetectionRecord {
    pub fn detected(name: impl Into<String>, confidence: f32, thresholds: &SeverityThresholds) -> Self {
        let pest_name = name.into();
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            description: format!(
                "Detected {pest_name} with {} confidence",
                format_percent(confidence)
            ),
            severity: thresholds.classify(confidence),
            pest_name,
            confidence,
            scientific_name: None,
            affected_crops: Vec::new(),
            spread_method: None,
            precautions: Vec::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::sentinel(
            UNKNOWN_PEST_NAME,
            "The detection service returned a response that could not be interpreted",
        )
    }

    pub fn failed(reason: impl AsRef<str>) -> Self {
        Self::sentinel(
            ERROR_PEST_NAME,
            &format!("Detection failed: {}", reason.as_ref()),
        )
    }

    pub fn configuration_error(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::sentinel(CONFIGURATION_ERROR_PEST_NAME, &reason)
    }

    fn sentinel(name: &str, description: &str) -> Self {
        Self {
            pest_name: name.to_string(),
            confidence: 0.0,
            severity: Severity::Unknown,
            description: description.to_string(),
            scientific_name: None,
            affected_crops: Vec::new(),
            spread_method: None,
            precautions: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.pest_name == ERROR_PEST_NAME
    }

    pub fn is_configuration_error(&self) -> bool {
        self.pest_name == CONFIGURATION_ERROR_PEST_NAME
    }

    /// True when the record names an actual pest rather than a failure or an
    /// uninterpretable response.
    pub fn is_identified(&self) -> bool {
        !self.is_error() && !self.is_configuration_error() && self.pest_name != UNKNOWN_PEST_NAME
    }
}

pub(crate) fn format_percent(ratio: f32) -> String {
    format!("{:.1}%", ratio * 100.0)
}
