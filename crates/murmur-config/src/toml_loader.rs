//! TOML config file loading and creation.

use crate::schema::MurmurConfig;
use crate::validation;
use murmur_common::ConfigError;
use std::path::Path;
use tracing::{info, warn};

/// Load config from a specific TOML file path.
///
/// Missing fields fall back to serde defaults. If validation fails, a
/// warning is logged and the default config is returned so a bad edit
/// never prevents startup.
pub fn load_from_path(path: &Path) -> Result<MurmurConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let config: MurmurConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
        warn!("falling back to default config");
        return Ok(MurmurConfig::default());
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// If the file does not exist, creates a commented default config file
/// and returns defaults.
pub fn load_default() -> Result<MurmurConfig, ConfigError> {
    let path = default_config_path()?;

    if !path.exists() {
        info!("no config found at {}, creating default", path.display());
        create_default_config(&path)?;
        return Ok(MurmurConfig::default());
    }

    load_from_path(&path)
}

/// Platform-specific default config file path
/// (`~/.config/murmur/config.toml` on Linux).
pub fn default_config_path() -> Result<std::path::PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))?;
    Ok(config_dir.join("murmur").join("config.toml"))
}

/// Create a default TOML config file with documentation comments.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    std::fs::write(path, default_config_toml()).map_err(|e| {
        ConfigError::ParseError(format!(
            "failed to write default config to {}: {e}",
            path.display()
        ))
    })?;

    info!("created default config at {}", path.display());
    Ok(())
}

/// Generate the default TOML config content with comments.
fn default_config_toml() -> String {
    r##"# Murmur Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[session]
# model = "gemini-2.0-flash-exp"
# system_prompt = ""
# temperature = 0.7        # 0.0-2.0
# max_output_tokens = 4096

[transport]
# url = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent"
# api_key_env = "GEMINI_API_KEY"
# connect_timeout_secs = 10
# session_timeout_secs = 0   # 0 disables the whole-session timeout

[buffer]
# audio_capacity = 64        # chunks kept before drop-oldest eviction
# image_capacity = 8
# audio_flush_ms = 500
# image_flush_ms = 2000
# max_payload_kb = 1024      # oversized payloads are dropped, not sent

[reconnect]
# max_attempts = 5
# initial_backoff_ms = 1000
# max_backoff_ms = 30000

[tools]
# approval_required = false

[recording]
# enabled = false
# path = ""

[logging]
# level = "murmur=info"
"##
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("murmur_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = load_from_path(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn default_template_parses_to_defaults() {
        let path = tmp_path("default.toml");
        std::fs::write(&path, default_config_toml()).unwrap();
        let config = load_from_path(&path).unwrap();
        assert_eq!(config, MurmurConfig::default());
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let path = tmp_path("invalid.toml");
        std::fs::write(&path, "[buffer]\naudio_capacity = 0\n").unwrap();
        let config = load_from_path(&path).unwrap();
        assert_eq!(config, MurmurConfig::default());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let path = tmp_path("broken.toml");
        std::fs::write(&path, "[session\nmodel=").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn create_writes_parent_dirs() {
        let path = tmp_path("nested/dir/config.toml");
        let _ = std::fs::remove_dir_all(path.parent().unwrap().parent().unwrap());
        create_default_config(&path).unwrap();
        assert!(path.exists());
    }
}
