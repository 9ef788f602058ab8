use std::env;

use url::Url;

use crate::config::ConfigError;

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_f32_env(key: &str, default: f32) -> Result<f32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => {
            let value = raw
                .parse::<f32>()
                .map_err(|_| ConfigError::ParseFloat(key.to_string()))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(ConfigError::ParseFloat(key.to_string()))
            }
        }
        None => Ok(default),
    }
}

/// Reads a ratio in `[0.0, 1.0]`, such as a scoring weight or a confidence threshold.
pub(crate) fn parse_unit_interval_env(key: &str, default: f32) -> Result<f32, ConfigError> {
    let value = parse_f32_env(key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidConfiguration(format!(
            "{key} must be between 0.0 and 1.0"
        )));
    }
    Ok(value)
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::ParseBool(key.to_string())),
            }
        }
        Err(_) => Ok(default),
    }
}

pub(crate) fn optional_http_url_env(key: &str) -> Result<Option<String>, ConfigError> {
    let Some(raw) = optional_trimmed_env(key) else {
        return Ok(None);
    };
    validate_http_url(key, &raw)?;
    Ok(Some(raw))
}

pub(crate) fn http_url_env_or(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(optional_http_url_env(key)?.unwrap_or_else(|| default.to_string()))
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn first_trimmed_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| optional_trimmed_env(key))
}

fn validate_http_url(key: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(raw).map_err(|_| {
        ConfigError::InvalidConfiguration(format!("{key} must be a valid URL"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidConfiguration(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}
