use std::path::PathBuf;

use thiserror::Error;

use crate::config_env::{
    first_trimmed_env, http_url_env_or, optional_http_url_env, optional_trimmed_env,
    parse_bool_env, parse_f32_env, parse_u32_env, parse_u64_env, parse_unit_interval_env,
    parse_usize_env,
};
use crate::detector::DetectorConfig;
use crate::intent::IntentWeights;
use crate::llm::context::{DEFAULT_MAX_HISTORY, DEFAULT_MAX_TOKENS};
use crate::llm::{ChatCompletionsConfig, ContextAssembler, ModelRoute};
use crate::pest::SeverityThresholds;
use crate::triage::TriageConfig;
use crate::tts::{DEFAULT_AUDIO_FORMAT, TtsConfig};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_LLM_MODEL: &str = "llama-3.1-8b-instant";
const DEFAULT_MODEL_ID: &str = "S1-1IVAM/trinera-pest-detector";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LiveApiConfig {
    pub bind_addr: String,
    pub session_ttl_seconds: u64,
    pub redis_url: Option<String>,
    pub context: ContextAssembler,
    pub llm: ChatCompletionsConfig,
    pub detector: DetectorConfig,
    pub triage: TriageConfig,
    pub tts: TtsConfig,
    pub intent_weights: IntentWeights,
    pub max_upload_bytes: usize,
    pub sweep_interval_seconds: u64,
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid number in env var {0}")]
    ParseFloat(String),
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

/// Loads `.env` from the working directory or its parents. A missing file is fine.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

impl LiveApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let severity = SeverityThresholds {
            high: parse_unit_interval_env("SEVERITY_HIGH_THRESHOLD", 0.8)?,
            medium: parse_unit_interval_env("SEVERITY_MEDIUM_THRESHOLD", 0.5)?,
        };
        if severity.medium > severity.high {
            return Err(ConfigError::InvalidConfiguration(
                "SEVERITY_MEDIUM_THRESHOLD must not exceed SEVERITY_HIGH_THRESHOLD".to_string(),
            ));
        }

        let max_tokens = parse_usize_env("CONTEXT_MAX_TOKENS", DEFAULT_MAX_TOKENS)?;
        if max_tokens == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "CONTEXT_MAX_TOKENS must be greater than zero".to_string(),
            ));
        }

        let session_ttl_seconds = parse_u64_env("SESSION_TTL_SECONDS", 3600)?;
        let sweep_interval_seconds = parse_u64_env("SWEEP_INTERVAL_SECONDS", 300)?;
        if session_ttl_seconds == 0 || sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "SESSION_TTL_SECONDS and SWEEP_INTERVAL_SECONDS must be greater than zero"
                    .to_string(),
            ));
        }

        let api_token = optional_trimmed_env("HUGGINGFACE_API_TOKEN");

        Ok(Self {
            bind_addr: optional_trimmed_env("API_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            session_ttl_seconds,
            redis_url: optional_trimmed_env("REDIS_URL"),
            context: ContextAssembler::new(
                parse_usize_env("CONTEXT_MAX_HISTORY", DEFAULT_MAX_HISTORY)?,
                max_tokens,
            ),
            llm: llm_config_from_env()?,
            detector: DetectorConfig {
                endpoint_url: optional_http_url_env("DETECTOR_URL")?,
                api_token: api_token.clone(),
                model_id: optional_trimmed_env("HUGGINGFACE_MODEL_ID")
                    .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
                timeout_ms: parse_u64_env("DETECTOR_TIMEOUT_MS", 60_000)?,
                deadline_ms: parse_u64_env("DETECTOR_DEADLINE_MS", 90_000)?,
                max_retries: parse_u32_env("DETECTOR_MAX_RETRIES", 2)?,
                retry_base_backoff_ms: parse_u64_env("DETECTOR_RETRY_BASE_BACKOFF_MS", 500)?,
                scratch_dir: optional_trimmed_env("DETECTOR_SCRATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir),
                severity,
            },
            triage: TriageConfig {
                classifier_url: optional_http_url_env("TRIAGE_CLASSIFIER_URL")?,
                api_token,
                budget_ms: parse_u64_env("TRIAGE_BUDGET_MS", 800)?,
                min_label_score: parse_unit_interval_env("TRIAGE_MIN_LABEL_SCORE", 0.1)?,
            },
            tts: TtsConfig {
                endpoint_url: optional_http_url_env("TTS_URL")?,
                api_key: optional_trimmed_env("TTS_API_KEY"),
                timeout_ms: parse_u64_env("TTS_TIMEOUT_MS", 30_000)?,
                max_retries: parse_u32_env("TTS_MAX_RETRIES", 3)?,
                retry_base_backoff_ms: parse_u64_env("TTS_RETRY_BASE_BACKOFF_MS", 1_000)?,
                audio_format: optional_trimmed_env("TTS_AUDIO_FORMAT")
                    .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
                audio_dir: optional_trimmed_env("TTS_AUDIO_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| std::env::temp_dir().join("croplens-tts")),
                audio_ttl_seconds: parse_u64_env("TTS_AUDIO_TTL_SECONDS", 600)?,
            },
            intent_weights: IntentWeights {
                pest_phrase: parse_unit_interval_env("INTENT_PEST_PHRASE_WEIGHT", 0.5)?,
                visual_relevance: parse_unit_interval_env("INTENT_VISUAL_RELEVANCE_WEIGHT", 0.3)?,
                visual_confidence: parse_unit_interval_env(
                    "INTENT_VISUAL_CONFIDENCE_WEIGHT",
                    0.2,
                )?,
                confidence_threshold: parse_unit_interval_env(
                    "INTENT_CONFIDENCE_THRESHOLD",
                    0.5,
                )?,
            },
            max_upload_bytes: parse_usize_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            sweep_interval_seconds,
            log_json: parse_bool_env("LOG_JSON", true)?,
        })
    }

    pub fn severity(&self) -> SeverityThresholds {
        self.detector.severity
    }
}

fn llm_config_from_env() -> Result<ChatCompletionsConfig, ConfigError> {
    let api_key = first_trimmed_env(&["LLM_API_KEY", "GROQ_API_KEY"])
        .ok_or_else(|| ConfigError::MissingVar("LLM_API_KEY".to_string()))?;
    let temperature = parse_f32_env("LLM_TEMPERATURE", 0.7)?;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::InvalidConfiguration(
            "LLM_TEMPERATURE must be between 0.0 and 2.0".to_string(),
        ));
    }

    Ok(ChatCompletionsConfig {
        chat_completions_url: http_url_env_or(
            "LLM_CHAT_COMPLETIONS_URL",
            DEFAULT_CHAT_COMPLETIONS_URL,
        )?,
        api_key,
        timeout_ms: parse_u64_env("LLM_TIMEOUT_MS", 30_000)?,
        max_retries: parse_u32_env("LLM_MAX_RETRIES", 2)?,
        retry_base_backoff_ms: parse_u64_env("LLM_RETRY_BASE_BACKOFF_MS", 250)?,
        temperature,
        max_tokens: parse_u32_env("LLM_MAX_TOKENS", 1000)?,
        model_route: ModelRoute {
            primary_model: optional_trimmed_env("LLM_MODEL")
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            fallback_model: optional_trimmed_env("LLM_FALLBACK_MODEL"),
        },
    })
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::{ConfigError, LiveApiConfig};

    const MANAGED_VARS: &[&str] = &[
        "API_BIND_ADDR",
        "LLM_API_KEY",
        "GROQ_API_KEY",
        "LLM_CHAT_COMPLETIONS_URL",
        "LLM_TEMPERATURE",
        "DETECTOR_URL",
        "SEVERITY_HIGH_THRESHOLD",
        "SEVERITY_MEDIUM_THRESHOLD",
        "SESSION_TTL_SECONDS",
        "SWEEP_INTERVAL_SECONDS",
        "INTENT_PEST_PHRASE_WEIGHT",
        "CONTEXT_MAX_HISTORY",
        "LOG_JSON",
    ];

    fn reset_env(vars: &[(&str, &str)]) {
        // SAFETY: every test touching the environment runs under #[serial].
        unsafe {
            for key in MANAGED_VARS {
                std::env::remove_var(key);
            }
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_with_only_an_api_key() {
        reset_env(&[("LLM_API_KEY", "test-key")]);
        let config = LiveApiConfig::from_env().expect("config should load");

        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.session_ttl_seconds, 3600);
        assert_eq!(config.context.max_history, 8);
        assert_eq!(config.context.max_tokens, 6000);
        assert_eq!(config.llm.model_route.primary_model, "llama-3.1-8b-instant");
        assert_eq!(config.detector.deadline_ms, 90_000);
        assert!(config.detector.endpoint_url.is_none());
        assert_eq!(config.triage.budget_ms, 800);
        assert_eq!(config.tts.max_retries, 3);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.severity().high, 0.8);
        assert!(config.log_json);
        reset_env(&[]);
    }

    #[test]
    #[serial]
    fn groq_key_is_accepted_as_fallback() {
        reset_env(&[("GROQ_API_KEY", "groq-key"), ("LOG_JSON", "off")]);
        let config = LiveApiConfig::from_env().expect("config should load");
        assert_eq!(config.llm.api_key, "groq-key");
        assert!(!config.log_json);
        reset_env(&[]);
    }

    #[test]
    #[serial]
    fn missing_api_key_is_rejected() {
        reset_env(&[]);
        let err = LiveApiConfig::from_env().expect_err("api key should be required");
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "LLM_API_KEY"));
    }

    #[test]
    #[serial]
    fn invalid_values_are_rejected() {
        reset_env(&[("LLM_API_KEY", "k"), ("DETECTOR_URL", "ftp://models")]);
        assert!(matches!(
            LiveApiConfig::from_env(),
            Err(ConfigError::InvalidConfiguration(_))
        ));

        reset_env(&[
            ("LLM_API_KEY", "k"),
            ("SEVERITY_HIGH_THRESHOLD", "0.4"),
            ("SEVERITY_MEDIUM_THRESHOLD", "0.6"),
        ]);
        assert!(matches!(
            LiveApiConfig::from_env(),
            Err(ConfigError::InvalidConfiguration(_))
        ));

        reset_env(&[("LLM_API_KEY", "k"), ("INTENT_PEST_PHRASE_WEIGHT", "1.5")]);
        assert!(matches!(
            LiveApiConfig::from_env(),
            Err(ConfigError::InvalidConfiguration(_))
        ));

        reset_env(&[("LLM_API_KEY", "k"), ("CONTEXT_MAX_HISTORY", "eight")]);
        assert!(matches!(
            LiveApiConfig::from_env(),
            Err(ConfigError::ParseInt(ref key)) if key == "CONTEXT_MAX_HISTORY"
        ));

        reset_env(&[("LLM_API_KEY", "k"), ("SWEEP_INTERVAL_SECONDS", "0")]);
        assert!(matches!(
            LiveApiConfig::from_env(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        reset_env(&[]);
    }
}
