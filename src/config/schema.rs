//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the exchange pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Worker pool sizing.
    pub workers: WorkerConfig,

    /// Multipart decoding and spooling.
    pub upload: UploadConfig,

    /// Response streaming.
    pub output: OutputConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Exchanges allowed to run handler code at the same time.
    pub max_concurrent_exchanges: usize,

    /// How long an exchange may wait for a free worker (0 = wait forever).
    pub queue_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_exchanges: 64,
            queue_timeout_ms: 5_000,
        }
    }
}

impl WorkerConfig {
    pub fn queue_timeout(&self) -> Option<Duration> {
        (self.queue_timeout_ms > 0).then(|| Duration::from_millis(self.queue_timeout_ms))
    }
}

/// Multipart decoding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Spool directory for large parts (system temp dir when unset).
    pub temp_dir: Option<PathBuf>,

    /// Parts up to this many bytes stay in memory.
    pub memory_threshold: usize,

    /// Maximum size of one part in bytes (0 = unlimited).
    pub max_part_size: u64,

    /// Maximum size of the whole multipart body in bytes (0 = unlimited).
    pub max_request_size: u64,

    /// Maximum size of one part header block.
    pub max_header_size: usize,

    /// Size of reads from the request body.
    pub read_buffer_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            memory_threshold: 10 * 1024,
            max_part_size: 0,
            max_request_size: 0,
            max_header_size: 8 * 1024,
            read_buffer_size: 8 * 1024,
        }
    }
}

/// Response streaming configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Maximum bytes drained per sink write.
    pub chunk_size: usize,

    /// Chunks the host transport buffers before reporting "would block".
    pub channel_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            channel_capacity: 4,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-exchange timeout in seconds (0 disables).
    pub exchange_secs: u64,

    /// How long the host waits for a handler to commit a response head
    /// (0 waits indefinitely).
    pub head_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            exchange_secs: 30,
            head_wait_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn exchange_timeout(&self) -> Option<Duration> {
        (self.exchange_secs > 0).then(|| Duration::from_secs(self.exchange_secs))
    }

    pub fn head_wait(&self) -> Option<Duration> {
        (self.head_wait_secs > 0).then(|| Duration::from_secs(self.head_wait_secs))
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered size of a non-multipart body in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
