use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let worker = &config.worker;
    if worker.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "worker.concurrency must be greater than 0".to_string(),
        });
    }
    if worker.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "worker.max_attempts must be greater than 0".to_string(),
        });
    }
    // A lease must be renewed before it can expire.
    if worker.renew_interval_secs >= worker.lease_ttl_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "worker.renew_interval_secs ({}) must be less than worker.lease_ttl_secs ({})",
                worker.renew_interval_secs, worker.lease_ttl_secs
            ),
        });
    }

    if config.stream.subscriber_buffer == 0 {
        return Err(ConfigError::Validation {
            message: "stream.subscriber_buffer must be greater than 0".to_string(),
        });
    }

    Ok(())
}
