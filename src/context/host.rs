//! Contract between the pipeline and the host connection layer.

use axum::http::{HeaderMap, StatusCode};

use crate::context::state::ExchangePhase;
use crate::error::OutputError;
use crate::output::StreamWriter;

/// Status line and headers, committed once before any body byte.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

/// Capabilities the host layer lends to one exchange.
///
/// Implementations must not block: `start_output` hands the writer to the
/// host's IO side, which then calls
/// [`StreamWriter::on_writable`] whenever its sink can take more bytes.
pub trait HostExchange: Send + Sync {
    /// Commit status and headers. Called at most once per exchange.
    fn send_head(&self, head: ResponseHead) -> Result<(), OutputError>;

    /// Begin driving the body writer.
    fn start_output(&self, writer: StreamWriter);

    /// The exchange reached a terminal phase; the host may flush and release.
    fn on_complete(&self, phase: ExchangePhase);
}
