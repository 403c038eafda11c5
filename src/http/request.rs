//! Request bridge: axum request → [`RawExchange`].
//!
//! # Responsibilities
//! - Copy method, target and headers into a `RawExchange`
//! - Pump the async body into a bounded channel
//! - Expose that channel as a blocking `std::io::Read` for the decoder
//!
//! # Design Decisions
//! - The pump runs as a tokio task; the reader is consumed on the blocking
//!   pool, so `blocking_recv` never stalls a runtime worker
//! - The channel is bounded: a slow decoder applies backpressure to the
//!   client connection instead of buffering the whole upload

use std::io::{self, Read};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use bytes::{Buf, Bytes};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::context::{ExchangeState, HostExchange};
use crate::executor::RawExchange;

/// Frames buffered between the connection and the decoder.
pub const DEFAULT_BODY_CAPACITY: usize = 8;

type Frame = Result<Bytes, io::Error>;

/// Blocking reader over body frames produced by an async pump.
///
/// Must be read from a thread outside the async runtime.
pub struct BodyReader {
    rx: mpsc::Receiver<Frame>,
    current: Bytes,
    finished: bool,
}

impl BodyReader {
    pub fn new(rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            finished: false,
        }
    }

    /// Start pumping `body` into a fresh reader.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(body: Body, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(pump(body, tx));
        Self::new(rx)
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            if self.finished {
                return Ok(0);
            }
            match self.rx.blocking_recv() {
                Some(Ok(frame)) => self.current = frame,
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => self.finished = true,
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

async fn pump(body: Body, tx: mpsc::Sender<Frame>) {
    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(io::Error::other);
        let failed = frame.is_err();
        if tx.send(frame).await.is_err() {
            tracing::debug!("Body reader dropped; stopping body pump");
            return;
        }
        if failed {
            return;
        }
    }
}

/// Convert an incoming request into an exchange bound to `host`.
pub fn into_exchange(
    request: Request<Body>,
    host: Arc<dyn HostExchange>,
    state: Arc<ExchangeState>,
    body_capacity: usize,
) -> RawExchange {
    let (parts, body) = request.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let content_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    RawExchange::new(parts.method, target, host)
        .with_state(state)
        .with_headers(parts.headers)
        .with_body(BodyReader::spawn(body, body_capacity), content_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExchangePhase, ResponseHead};
    use crate::error::OutputError;
    use crate::output::StreamWriter;
    use axum::http::Method;

    struct NullHost;

    impl HostExchange for NullHost {
        fn send_head(&self, _head: ResponseHead) -> Result<(), OutputError> {
            Ok(())
        }
        fn start_output(&self, _writer: StreamWriter) {}
        fn on_complete(&self, _phase: ExchangePhase) {}
    }

    #[test]
    fn test_reader_concatenates_frames() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Ok(Bytes::from_static(b"hello "))).unwrap();
        tx.try_send(Ok(Bytes::new())).unwrap();
        tx.try_send(Ok(Bytes::from_static(b"world"))).unwrap();
        drop(tx);

        let mut reader = BodyReader::new(rx);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_reader_surfaces_transport_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Ok(Bytes::from_static(b"abc"))).unwrap();
        tx.try_send(Err(io::Error::other("reset"))).unwrap();
        drop(tx);

        let mut reader = BodyReader::new(rx);
        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).unwrap_err();
        assert_eq!(err.to_string(), "reset");
        assert_eq!(buf, b"abc");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_into_exchange_copies_head_and_body() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload/a%20b?x=1&y=2")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::CONTENT_LENGTH, "4")
            .body(Body::from("data"))
            .unwrap();

        let state = Arc::new(ExchangeState::new());
        let raw = into_exchange(request, Arc::new(NullHost), Arc::clone(&state), 2);
        assert_eq!(raw.method, Method::POST);
        assert_eq!(raw.path, "/upload/a%20b");
        assert_eq!(raw.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(raw.content_length, Some(4));
        assert_eq!(raw.content_type(), Some("text/plain"));
        assert_eq!(raw.state.id(), state.id());

        let body = tokio::task::spawn_blocking(move || {
            let mut raw = raw;
            let mut out = Vec::new();
            raw.body.read_to_end(&mut out).map(|_| out)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(body, b"data");
    }
}
