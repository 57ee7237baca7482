//! Full configuration validation.
//!
//! Validates numeric ranges and endpoint shape, collecting all errors
//! into one message instead of stopping at the first.

use crate::schema::MurmurConfig;
use murmur_common::ConfigError;

pub fn validate(config: &MurmurConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    if config.session.model.trim().is_empty() {
        errors.push("session.model must not be empty".to_string());
    }
    validate_range_f64(
        &mut errors,
        "session.temperature",
        config.session.temperature,
        0.0,
        2.0,
    );
    validate_range(
        &mut errors,
        "session.max_output_tokens",
        config.session.max_output_tokens as u64,
        1,
        65_536,
    );

    if !config.transport.url.starts_with("ws://") && !config.transport.url.starts_with("wss://") {
        errors.push(format!(
            "transport.url must be a ws:// or wss:// endpoint, got '{}'",
            config.transport.url
        ));
    }
    if config.transport.api_key_env.trim().is_empty() {
        errors.push("transport.api_key_env must not be empty".to_string());
    }
    validate_range(
        &mut errors,
        "transport.connect_timeout_secs",
        config.transport.connect_timeout_secs,
        1,
        300,
    );

    validate_range(
        &mut errors,
        "buffer.audio_capacity",
        config.buffer.audio_capacity as u64,
        1,
        4096,
    );
    validate_range(
        &mut errors,
        "buffer.image_capacity",
        config.buffer.image_capacity as u64,
        1,
        256,
    );
    validate_range(
        &mut errors,
        "buffer.audio_flush_ms",
        config.buffer.audio_flush_ms,
        50,
        60_000,
    );
    validate_range(
        &mut errors,
        "buffer.image_flush_ms",
        config.buffer.image_flush_ms,
        250,
        600_000,
    );
    validate_range(
        &mut errors,
        "buffer.max_payload_kb",
        config.buffer.max_payload_kb as u64,
        1,
        65_536,
    );

    validate_range(
        &mut errors,
        "reconnect.max_attempts",
        config.reconnect.max_attempts as u64,
        0,
        100,
    );
    validate_range(
        &mut errors,
        "reconnect.initial_backoff_ms",
        config.reconnect.initial_backoff_ms,
        1,
        600_000,
    );
    if config.reconnect.max_backoff_ms < config.reconnect.initial_backoff_ms {
        errors.push(format!(
            "reconnect.max_backoff_ms ({}) must be >= reconnect.initial_backoff_ms ({})",
            config.reconnect.max_backoff_ms, config.reconnect.initial_backoff_ms
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_range(errors: &mut Vec<String>, field: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(format!("{field} must be between {min} and {max}, got {value}"));
    }
}

fn validate_range_f64(errors: &mut Vec<String>, field: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        errors.push(format!("{field} must be between {min} and {max}, got {value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MurmurConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&MurmurConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_url_scheme() {
        let mut config = MurmurConfig::default();
        config.transport.url = "https://example.com".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("transport.url"));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut config = MurmurConfig::default();
        config.session.temperature = 3.5;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("session.temperature"));
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut config = MurmurConfig::default();
        config.buffer.audio_capacity = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("buffer.audio_capacity"));
    }

    #[test]
    fn rejects_backoff_inversion() {
        let mut config = MurmurConfig::default();
        config.reconnect.initial_backoff_ms = 5000;
        config.reconnect.max_backoff_ms = 1000;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_backoff_ms"));
    }

    #[test]
    fn collects_multiple_errors() {
        let mut config = MurmurConfig::default();
        config.session.model = "  ".to_string();
        config.buffer.audio_flush_ms = 5;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("session.model"));
        assert!(err.contains("buffer.audio_flush_ms"));
    }
}
