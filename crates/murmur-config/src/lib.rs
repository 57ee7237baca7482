//! Murmur configuration system.
//!
//! TOML-based configuration for the live session client. All sections
//! use sensible defaults so partial configs work out of the box; a
//! commented default file is created on first run.

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{MurmurConfig, CONFIG_SCHEMA_VERSION};
pub use toml_loader::{default_config_path, load_from_path};

use murmur_common::ConfigError;

/// Load config from the platform default path, creating a default file
/// if none exists, then validate the result.
pub fn load_config() -> Result<MurmurConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = MurmurConfig::default();
        assert!(validation::validate(&config).is_ok());
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = MurmurConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MurmurConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.session.model, config.session.model);
        assert_eq!(parsed.buffer.audio_flush_ms, config.buffer.audio_flush_ms);
        assert_eq!(parsed.reconnect.max_attempts, config.reconnect.max_attempts);
    }
}
