use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    config.apply_ga_overrides();
    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.workers == 0 {
        return Err(ConfigError::Validation {
            message: "workers must be at least 1".to_string(),
        });
    }

    if config.queue_depth == 0 {
        return Err(ConfigError::Validation {
            message: "queue_depth must be at least 1".to_string(),
        });
    }

    if config.max_input_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "max_input_bytes must be non-zero".to_string(),
        });
    }

    // The fixed feature layout needs room for all hand-built features before
    // zero padding takes over.
    if config.feature_dim < crate::aml::RAW_FEATURE_COUNT {
        return Err(ConfigError::Validation {
            message: format!(
                "feature_dim must be at least {}",
                crate::aml::RAW_FEATURE_COUNT
            ),
        });
    }

    if let Some(key) = &config.master_key {
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::Validation {
                message: "master_key must be a 64-character hex string".to_string(),
            });
        }
    }

    Ok(())
}
