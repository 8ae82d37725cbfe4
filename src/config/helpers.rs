use std::time::Duration;

use crate::error::ConfigError;

/// Read an env var, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

/// Parse a strictly positive integer from an env var.
pub(crate) fn parse_positive_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(default);
    };
    let value = raw.parse::<u32>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be a positive integer: {e}"),
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(value)
}

/// Parse a strictly positive millisecond duration from an env var.
pub(crate) fn parse_millis_env(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(Duration::from_millis(default_ms));
    };
    let value = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be a duration in milliseconds: {e}"),
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(Duration::from_millis(value))
}

/// Parse a boolean env var (`true`/`1`/`yes`, `false`/`0`/`no`).
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{raw}'"),
        }),
    }
}
