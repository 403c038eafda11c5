//! The exchange as handed over by the host layer.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::context::{ExchangeState, HostExchange};

/// An exchange before decoding: head fields plus a blocking body reader.
pub struct RawExchange {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
    pub host: Arc<dyn HostExchange>,
    pub state: Arc<ExchangeState>,
}

impl RawExchange {
    /// `target` is the request target, e.g. `/upload?id=3`.
    pub fn new(method: Method, target: &str, host: Arc<dyn HostExchange>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            content_length: None,
            body: Box::new(io::empty()),
            host,
            state: Arc::new(ExchangeState::new()),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body<R: Read + Send + 'static>(mut self, body: R, len: Option<u64>) -> Self {
        self.body = Box::new(body);
        self.content_length = len;
        self
    }

    pub fn with_state(mut self, state: Arc<ExchangeState>) -> Self {
        self.state = state;
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

impl fmt::Debug for RawExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawExchange")
            .field("id", &self.state.id())
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
