//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value;

use exchange_pipeline::context::{ExchangePhase, HostExchange, RequestContext, ResponseHead};
use exchange_pipeline::error::{HandlerError, OutputError};
use exchange_pipeline::output::{NonBlockingSink, StreamWriter, WriteOutcome};
use exchange_pipeline::{
    Executor, HandlerRegistry, PipelineConfig, RawExchange, RequestHandler, ServiceRegistry,
};

/// Bytes the mock transport accepts per readiness cycle.
pub const SINK_BUDGET: usize = 64 * 1024;

/// Sink that accepts at most `budget` bytes until it is made ready again.
pub struct ThrottledSink {
    out: Arc<Mutex<Vec<u8>>>,
    budget: usize,
    remaining: usize,
}

impl ThrottledSink {
    pub fn new(out: Arc<Mutex<Vec<u8>>>, budget: usize) -> Self {
        Self {
            out,
            budget,
            remaining: budget,
        }
    }

    pub fn ready(&mut self) {
        self.remaining = self.budget;
    }
}

impl NonBlockingSink for ThrottledSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<WriteOutcome> {
        if self.remaining == 0 {
            return Ok(WriteOutcome::WouldBlock);
        }
        let n = buf.len().min(self.remaining);
        self.out.lock().unwrap().extend_from_slice(&buf[..n]);
        self.remaining -= n;
        Ok(WriteOutcome::Accepted(n))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Host that records the head, body and completions of one exchange.
///
/// Output is driven on a separate thread, one readiness cycle at a time,
/// through a [`ThrottledSink`].
pub struct MockHost {
    head: Mutex<Option<ResponseHead>>,
    body: Arc<Mutex<Vec<u8>>>,
    completions: Mutex<Vec<ExchangePhase>>,
    completed: Condvar,
    cycles: Arc<AtomicU64>,
    budget: usize,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Self::with_budget(SINK_BUDGET)
    }

    pub fn with_budget(budget: usize) -> Arc<Self> {
        Arc::new(Self {
            head: Mutex::new(None),
            body: Arc::new(Mutex::new(Vec::new())),
            completions: Mutex::new(Vec::new()),
            completed: Condvar::new(),
            cycles: Arc::new(AtomicU64::new(0)),
            budget,
        })
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.head.lock().unwrap().as_ref().map(|h| h.status)
    }

    pub fn header(&self, name: HeaderName) -> Option<String> {
        self.head
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|h| h.headers.get(name).map(|v| v.to_str().unwrap().to_string()))
    }

    pub fn body(&self) -> Vec<u8> {
        self.body.lock().unwrap().clone()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body()).unwrap()
    }

    pub fn completions(&self) -> Vec<ExchangePhase> {
        self.completions.lock().unwrap().clone()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Block until at least one terminal phase was reported.
    pub fn wait_for_completion(&self) -> Vec<ExchangePhase> {
        let guard = self.completions.lock().unwrap();
        let (guard, _) = self
            .completed
            .wait_timeout_while(guard, Duration::from_secs(10), |c| c.is_empty())
            .unwrap();
        guard.clone()
    }
}

impl HostExchange for MockHost {
    fn send_head(&self, head: ResponseHead) -> Result<(), OutputError> {
        let mut slot = self.head.lock().unwrap();
        if slot.is_some() {
            return Err(OutputError::Host("head already sent".into()));
        }
        *slot = Some(head);
        Ok(())
    }

    fn start_output(&self, mut writer: StreamWriter) {
        let mut sink = ThrottledSink::new(Arc::clone(&self.body), self.budget);
        let cycles = Arc::clone(&self.cycles);
        std::thread::spawn(move || loop {
            sink.ready();
            cycles.fetch_add(1, Ordering::SeqCst);
            if writer.on_writable(&mut sink).is_terminal() {
                break;
            }
        });
    }

    fn on_complete(&self, phase: ExchangePhase) {
        self.completions.lock().unwrap().push(phase);
        self.completed.notify_all();
    }
}

/// Builds a `multipart/form-data` body.
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            body: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.open();
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.open();
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn build(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }

    fn open(&mut self) {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

type Claim = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;
type Action = Arc<dyn Fn(&Arc<RequestContext>) -> Result<(), HandlerError> + Send + Sync>;

/// Handler assembled from closures.
#[derive(Clone)]
pub struct FnHandler {
    name: &'static str,
    claim: Claim,
    action: Action,
}

impl FnHandler {
    pub fn new<C, A>(name: &'static str, claim: C, action: A) -> Self
    where
        C: Fn(&RequestContext) -> bool + Send + Sync + 'static,
        A: Fn(&Arc<RequestContext>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            name,
            claim: Arc::new(claim),
            action: Arc::new(action),
        }
    }
}

impl RequestHandler for FnHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_my_job(&self, ctx: &RequestContext) -> bool {
        (self.claim)(ctx)
    }

    fn process(&self, ctx: &Arc<RequestContext>) -> Result<(), HandlerError> {
        (self.action)(ctx)
    }
}

/// Register a clone of `handler` as a factory.
pub fn register(registry: HandlerRegistry, handler: FnHandler) -> HandlerRegistry {
    registry.with(move || handler.clone())
}

pub fn executor(registry: HandlerRegistry) -> Executor {
    executor_with(registry, &PipelineConfig::default())
}

pub fn executor_with(registry: HandlerRegistry, config: &PipelineConfig) -> Executor {
    Executor::new(registry, Arc::new(ServiceRegistry::new()), config)
}

pub fn get(target: &str, host: &Arc<MockHost>) -> RawExchange {
    RawExchange::new(Method::GET, target, host.clone() as Arc<dyn HostExchange>)
}

pub fn post<R: Read + Send + 'static>(
    target: &str,
    content_type: &str,
    body: R,
    len: Option<u64>,
    host: &Arc<MockHost>,
) -> RawExchange {
    RawExchange::new(Method::POST, target, host.clone() as Arc<dyn HostExchange>)
        .with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        )
        .with_body(body, len)
}
