//! Error taxonomy for the exchange pipeline.
//!
//! # Categories
//! - Malformed input (`DecodeError`): bad boundary, truncated multipart body,
//!   oversized parts. Surfaced to clients as a 500 `fail` response.
//! - Output misuse (`OutputError`, `CompletionError`): double output or double
//!   completion. Programming errors in a handler; logged loudly, never fatal.
//! - Handler failures (`HandlerError`): recovered at the Executor boundary.
//! - Startup failures (`ConfigError` and friends via `PipelineError`).
//!
//! "No handler claimed the exchange" is deliberately not an error; see
//! [`crate::handler::ChainOutcome::Exhausted`].

use std::io;

use thiserror::Error;

pub use crate::config::loader::ConfigError;

/// Errors produced while decoding a request body.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// `Content-Type` is multipart but carries no `boundary=` parameter.
    #[error("multipart content type has no boundary parameter")]
    MissingBoundary,

    /// The boundary parameter is empty, too long or contains illegal bytes.
    #[error("invalid multipart boundary: {0}")]
    InvalidBoundary(String),

    /// The body ended before the closing `--boundary--` delimiter.
    #[error("multipart body truncated before closing boundary")]
    Truncated,

    /// A part header block exceeded the configured limit.
    #[error("part header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// A part header could not be understood.
    #[error("malformed part header: {0}")]
    MalformedHeader(String),

    /// A single part exceeded `max_part_size`.
    #[error("part exceeds maximum size of {limit} bytes")]
    PartTooLarge { limit: u64 },

    /// The whole body exceeded `max_request_size`.
    #[error("request body exceeds maximum size of {limit} bytes")]
    RequestTooLarge { limit: u64 },

    /// Reading the body or writing the spool failed.
    #[error("I/O error while decoding body: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::MissingBoundary => "missing_boundary",
            DecodeError::InvalidBoundary(_) => "invalid_boundary",
            DecodeError::Truncated => "truncated",
            DecodeError::HeaderTooLarge { .. } => "header_too_large",
            DecodeError::MalformedHeader(_) => "malformed_header",
            DecodeError::PartTooLarge { .. } => "part_too_large",
            DecodeError::RequestTooLarge { .. } => "request_too_large",
            DecodeError::Io(_) => "io",
        }
    }
}

/// Errors produced by the single-output API of a request context.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Output was already produced for this exchange.
    #[error("output already written for this exchange")]
    AlreadyWritten,

    /// The exchange was completed or aborted; no further writes are permitted.
    #[error("exchange already closed")]
    ExchangeClosed,

    /// The requested source cannot be streamed (missing file, empty path...).
    #[error("invalid output source: {0}")]
    InvalidSource(String),

    /// The host layer refused the response head.
    #[error("host rejected response: {0}")]
    Host(String),

    #[error("I/O error during output: {0}")]
    Io(#[from] io::Error),
}

/// Returned by a second `complete()` call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("exchange already completed")]
    AlreadyCompleted,
}

/// Errors a handler may return from its processing action.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("I/O error in handler: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Top-level error for starting and running the pipeline server.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid address: {0}")]
    Address(#[from] std::net::AddrParseError),
}
