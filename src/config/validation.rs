//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (chunk size > 0, workers > 0)
//! - Validate addresses and cross-field limits
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::PipelineConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.workers.max_concurrent_exchanges == 0 {
        errors.push(ValidationError::new(
            "workers.max_concurrent_exchanges",
            "must be > 0",
        ));
    }

    if config.output.chunk_size == 0 {
        errors.push(ValidationError::new("output.chunk_size", "must be > 0"));
    }
    if config.output.channel_capacity == 0 {
        errors.push(ValidationError::new("output.channel_capacity", "must be > 0"));
    }

    let upload = &config.upload;
    if upload.read_buffer_size == 0 {
        errors.push(ValidationError::new("upload.read_buffer_size", "must be > 0"));
    }
    if upload.max_header_size == 0 {
        errors.push(ValidationError::new("upload.max_header_size", "must be > 0"));
    }
    if upload.max_part_size > 0 && upload.memory_threshold as u64 > upload.max_part_size {
        errors.push(ValidationError::new(
            "upload.memory_threshold",
            "must not exceed upload.max_part_size",
        ));
    }
    if upload.max_request_size > 0 && upload.max_part_size > upload.max_request_size {
        errors.push(ValidationError::new(
            "upload.max_part_size",
            "must not exceed upload.max_request_size",
        ));
    }
    if let Some(dir) = &upload.temp_dir {
        if !dir.is_dir() {
            errors.push(ValidationError::new(
                "upload.temp_dir",
                format!("'{}' is not a directory", dir.display()),
            ));
        }
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
