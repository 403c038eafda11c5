//! The per-exchange request context.
//!
//! # Responsibilities
//! - Expose decoded input (parameters, parts, raw body, headers, path)
//! - Own the single permitted output and commit the response head with it
//! - Enforce at-most-once completion and report misuse loudly
//! - Route unclaimed or failed exchanges to the replaceable fallbacks
//!
//! # Design Decisions
//! - Handlers see `&Arc<RequestContext>` so completion reactions can hold it
//! - Output and completion are guarded by [`ExchangeState`] atomics, not locks
//! - A failed output call never panics; it returns an [`OutputError`]

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use serde_json::Value;

use crate::context::disposition::{content_disposition, guess_mime, DispositionKind};
use crate::context::fallback::{self, FallbackFn};
use crate::context::host::{HostExchange, ResponseHead};
use crate::context::params::{unique_key, Parameters};
use crate::context::state::{ExchangeId, ExchangePhase, ExchangeState};
use crate::dispatch::{CallbackDispatcher, PropertyBag};
use crate::error::{CompletionError, OutputError};
use crate::executor::ServiceRegistry;
use crate::multipart::PartItem;
use crate::observability::metrics;
use crate::output::{ByteSource, StreamWriter};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Options for [`RequestContext::write_file`].
#[derive(Debug, Clone, Default)]
pub struct FileOutput {
    /// Name shown to the client; defaults to the file's own name.
    pub download_name: Option<String>,
    /// MIME type; guessed from the extension when absent.
    pub content_type: Option<String>,
    /// `attachment` instead of `inline`.
    pub attachment: bool,
}

/// State container for one exchange and the handlers' only door to I/O.
pub struct RequestContext {
    state: Arc<ExchangeState>,
    method: Method,
    raw_path: String,
    path: String,
    headers: HeaderMap,
    params: Parameters,
    parts: Vec<PartItem>,
    body: Option<Bytes>,
    host: Arc<dyn HostExchange>,
    services: Arc<ServiceRegistry>,
    chunk_size: usize,
    response_headers: Mutex<HeaderMap>,
    invalid_request: Mutex<FallbackFn>,
    exception: Mutex<FallbackFn>,
    started: Instant,
}

impl RequestContext {
    pub fn builder(host: Arc<dyn HostExchange>) -> RequestContextBuilder {
        RequestContextBuilder::new(host)
    }

    pub fn id(&self) -> ExchangeId {
        self.state.id()
    }

    pub fn state(&self) -> &Arc<ExchangeState> {
        &self.state
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Percent-decoded request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    /// Lower-cased extension of the last path segment, e.g. `css` for `/a/site.CSS`.
    pub fn resource_extension(&self) -> Option<String> {
        let segment = self.path.rsplit('/').next()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    /// Uploaded file parts, in body order.
    pub fn parts(&self) -> &[PartItem] {
        &self.parts
    }

    pub fn is_file_request(&self) -> bool {
        self.parts.iter().any(PartItem::is_file)
    }

    /// Parts keyed by field name; repeated names get `_1`, `_2` suffixes.
    pub fn parts_by_field(&self) -> Vec<(String, &PartItem)> {
        let mut out: Vec<(String, &PartItem)> = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let key = unique_key(part.field_name(), |k| out.iter().any(|(e, _)| e == k));
            out.push((key, part));
        }
        out
    }

    /// Buffered body of a request that was neither multipart nor a form.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn body_text(&self) -> Option<Cow<'_, str>> {
        self.body.as_deref().map(String::from_utf8_lossy)
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// A dispatcher that completes this exchange when the output finishes.
    pub fn completion(self: &Arc<Self>) -> CallbackDispatcher {
        let ctx = Arc::clone(self);
        CallbackDispatcher::new(move |bag: PropertyBag| {
            if !bag.is_done() {
                tracing::warn!(
                    exchange_id = %ctx.id(),
                    status = %bag.status,
                    msg = bag.message().unwrap_or_default(),
                    "Output finished unsuccessfully"
                );
            }
            if ctx.state().is_closed() {
                // Forced by recovery, or aborted by the host.
                tracing::debug!(
                    exchange_id = %ctx.id(),
                    phase = ?ctx.state().phase(),
                    "Output finished on a closed exchange"
                );
                return;
            }
            let _ = ctx.complete();
        })
    }

    pub fn write_text(
        &self,
        text: impl Into<String>,
        on_done: CallbackDispatcher,
    ) -> Result<(), OutputError> {
        let text = text.into();
        let name = format!("{}.txt", self.id());
        let head = self.head(
            StatusCode::OK,
            TEXT_PLAIN,
            Some(content_disposition(DispositionKind::Inline, &name)),
            Some(text.len() as u64),
        )?;
        self.commit(head, ByteSource::from_text(text), on_done)
    }

    pub fn write_json(&self, value: &Value, on_done: CallbackDispatcher) -> Result<(), OutputError> {
        self.write_json_status(StatusCode::OK, value, on_done)
    }

    pub fn write_json_status(
        &self,
        status: StatusCode,
        value: &Value,
        on_done: CallbackDispatcher,
    ) -> Result<(), OutputError> {
        let body = serde_json::to_vec(value).map_err(|e| OutputError::InvalidSource(e.to_string()))?;
        let name = format!("{}.json", self.id());
        let head = self.head(
            status,
            APPLICATION_JSON,
            Some(content_disposition(DispositionKind::Inline, &name)),
            Some(body.len() as u64),
        )?;
        self.commit(head, ByteSource::from_bytes(body), on_done)
    }

    /// Stream a file from disk.
    ///
    /// A missing or empty file is reported by dispatching `fail` to `on_done`
    /// and leaves the output slot unused, so a fallback can still answer.
    pub fn write_file(
        &self,
        path: &Path,
        options: FileOutput,
        on_done: CallbackDispatcher,
    ) -> Result<(), OutputError> {
        self.ensure_writable()?;

        let len = match fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => {
                on_done.dispatch(PropertyBag::fail(format!(
                    "not a readable non-empty file: {}",
                    path.display()
                )));
                return Ok(());
            }
            Err(e) => {
                on_done.dispatch(PropertyBag::fail(format!("{}: {e}", path.display())));
                return Ok(());
            }
        };

        let source = match ByteSource::open_file(path) {
            Ok(source) => source,
            Err(e) => {
                on_done.dispatch(PropertyBag::fail(format!("{}: {e}", path.display())));
                return Ok(());
            }
        };

        let name = options.download_name.unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.bin", self.id()))
        });
        let mime = options
            .content_type
            .unwrap_or_else(|| guess_mime(path).to_string());
        let kind = if options.attachment {
            DispositionKind::Attachment
        } else {
            DispositionKind::Inline
        };

        let head = self.head(
            StatusCode::OK,
            &mime,
            Some(content_disposition(kind, &name)),
            Some(len),
        )?;
        self.commit(head, source, on_done)
    }

    /// Stream an arbitrary reader. `len` becomes `Content-Length` when known.
    pub fn write_stream<R>(
        &self,
        reader: R,
        len: Option<u64>,
        content_type: &str,
        on_done: CallbackDispatcher,
    ) -> Result<(), OutputError>
    where
        R: Read + Send + 'static,
    {
        let head = self.head(StatusCode::OK, content_type, None, len)?;
        self.commit(head, ByteSource::from_reader(reader), on_done)
    }

    /// Copy an uploaded file part into `dir/file_name`.
    ///
    /// Outcome goes to `on_done`: `done` with `path` and `bytes`, or `fail`
    /// with a message. Does not touch the exchange's output.
    pub fn persist_part(
        &self,
        part: &PartItem,
        dir: &Path,
        file_name: &str,
        on_done: CallbackDispatcher,
    ) {
        let bag = match self.persist_checked(part, dir, file_name) {
            Ok(bag) => bag,
            Err(msg) => PropertyBag::fail(msg),
        };
        on_done.obtain_envelope().with_bag(bag).send_to_target();
    }

    fn persist_checked(
        &self,
        part: &PartItem,
        dir: &Path,
        file_name: &str,
    ) -> Result<PropertyBag, String> {
        if !part.is_file() {
            return Err(format!("part '{}' is not a file", part.field_name()));
        }
        if dir.as_os_str().is_empty() || file_name.is_empty() {
            return Err("target directory and file name are required".into());
        }
        if !dir.is_dir() {
            return Err(format!("'{}' is not a directory", dir.display()));
        }
        let dest = dir.join(file_name);
        let bytes = part
            .persist_to(&dest)
            .map_err(|e| format!("failed to write '{}': {e}", dest.display()))?;
        tracing::debug!(exchange_id = %self.id(), path = %dest.display(), bytes, "Part persisted");
        Ok(PropertyBag::done()
            .with("path", dest.to_string_lossy().into_owned())
            .with("bytes", bytes))
    }

    /// Mark the response as uncacheable. Applied with the single output.
    pub fn disable_http_cache(&self) {
        let mut headers = lock(&self.response_headers);
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    }

    /// Add a header to the response committed with the single output.
    pub fn set_response_header(&self, name: HeaderName, value: HeaderValue) {
        lock(&self.response_headers).insert(name, value);
    }

    pub fn set_invalid_request_callback<F>(&self, callback: F)
    where
        F: Fn(&Arc<RequestContext>, PropertyBag) + Send + Sync + 'static,
    {
        *lock(&self.invalid_request) = Arc::new(callback);
    }

    pub fn set_exception_callback<F>(&self, callback: F)
    where
        F: Fn(&Arc<RequestContext>, PropertyBag) + Send + Sync + 'static,
    {
        *lock(&self.exception) = Arc::new(callback);
    }

    /// Run the invalid-request fallback (no handler claimed the exchange).
    pub fn invalid_request(self: &Arc<Self>) {
        tracing::warn!(exchange_id = %self.id(), path = %self.path, "No handler claimed request");
        let callback = lock(&self.invalid_request).clone();
        callback(self, fallback::invalid_request_bag());
    }

    /// Run the exception fallback with a diagnostic message.
    pub fn report_exception(self: &Arc<Self>, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!(exchange_id = %self.id(), error = %msg, "Exchange failed");
        let callback = lock(&self.exception).clone();
        callback(self, fallback::exception_bag(msg));
    }

    /// Finish the exchange. Only the first call has any effect.
    pub fn complete(&self) -> Result<(), CompletionError> {
        if self.state.try_complete() {
            tracing::debug!(
                exchange_id = %self.id(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Exchange completed"
            );
            self.host.on_complete(ExchangePhase::Completed);
            return Ok(());
        }

        match self.state.phase() {
            ExchangePhase::Aborted => {
                tracing::debug!(exchange_id = %self.id(), "complete() after abort ignored");
            }
            phase => {
                tracing::error!(
                    exchange_id = %self.id(),
                    phase = ?phase,
                    "complete() called twice on the same exchange"
                );
                self.state.note_redundant_completion();
                metrics::record_double_completion();
            }
        }
        Err(CompletionError::AlreadyCompleted)
    }

    pub fn is_complete(&self) -> bool {
        self.state.phase() == ExchangePhase::Completed
    }

    /// Abandon the exchange (timeout, client gone). Pending output fails.
    pub fn abort(&self) -> bool {
        if self.state.abort() {
            tracing::warn!(exchange_id = %self.id(), "Exchange aborted");
            self.host.on_complete(ExchangePhase::Aborted);
            true
        } else {
            false
        }
    }

    pub fn has_output(&self) -> bool {
        self.state.has_output()
    }

    fn ensure_writable(&self) -> Result<(), OutputError> {
        if self.state.is_closed() {
            tracing::warn!(exchange_id = %self.id(), "Write attempted on a closed exchange");
            return Err(OutputError::ExchangeClosed);
        }
        if self.state.has_output() {
            tracing::error!(exchange_id = %self.id(), "Output already written for this exchange");
            return Err(OutputError::AlreadyWritten);
        }
        Ok(())
    }

    fn head(
        &self,
        status: StatusCode,
        content_type: &str,
        disposition: Option<String>,
        len: Option<u64>,
    ) -> Result<ResponseHead, OutputError> {
        let invalid = |e: axum::http::header::InvalidHeaderValue| {
            OutputError::InvalidSource(format!("invalid header value: {e}"))
        };
        let mut head = ResponseHead::new(status);
        head.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).map_err(invalid)?,
        );
        if let Some(disposition) = disposition {
            head.headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_str(&disposition).map_err(invalid)?,
            );
        }
        if let Some(len) = len {
            head.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        Ok(head)
    }

    /// Claim the single output, commit the head, and hand the writer to the host.
    fn commit(
        &self,
        mut head: ResponseHead,
        source: ByteSource,
        on_done: CallbackDispatcher,
    ) -> Result<(), OutputError> {
        self.ensure_writable()?;
        if !self.state.claim_output() {
            tracing::error!(exchange_id = %self.id(), "Output already written for this exchange");
            return Err(OutputError::AlreadyWritten);
        }

        head.headers.extend(lock(&self.response_headers).clone());
        let status = head.status;
        if let Err(e) = self.host.send_head(head) {
            on_done.dispatch(PropertyBag::fail(e.to_string()));
            return Err(e);
        }

        tracing::debug!(
            exchange_id = %self.id(),
            status = status.as_u16(),
            source = source.kind(),
            "Response committed"
        );
        self.host.start_output(StreamWriter::new(
            source,
            self.chunk_size,
            Arc::clone(&self.state),
            on_done,
        ));
        Ok(())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id())
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params.len())
            .field("parts", &self.parts.len())
            .field("phase", &self.state.phase())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`RequestContext`] once decoding has finished.
pub struct RequestContextBuilder {
    host: Arc<dyn HostExchange>,
    state: Option<Arc<ExchangeState>>,
    method: Method,
    raw_path: String,
    headers: HeaderMap,
    params: Parameters,
    parts: Vec<PartItem>,
    body: Option<Bytes>,
    services: Option<Arc<ServiceRegistry>>,
    chunk_size: usize,
}

impl RequestContextBuilder {
    fn new(host: Arc<dyn HostExchange>) -> Self {
        Self {
            host,
            state: None,
            method: Method::GET,
            raw_path: "/".to_string(),
            headers: HeaderMap::new(),
            params: Parameters::new(),
            parts: Vec::new(),
            body: None,
            services: None,
            chunk_size: crate::output::writer::DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn state(mut self, state: Arc<ExchangeState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn path(mut self, raw_path: impl Into<String>) -> Self {
        self.raw_path = raw_path.into();
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn params(mut self, params: Parameters) -> Self {
        self.params = params;
        self
    }

    pub fn parts(mut self, parts: Vec<PartItem>) -> Self {
        self.parts = parts;
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn build(self) -> Arc<RequestContext> {
        let path = urlencoding::decode(&self.raw_path)
            .map(Cow::into_owned)
            .unwrap_or_else(|_| self.raw_path.clone());
        Arc::new(RequestContext {
            state: self.state.unwrap_or_default(),
            method: self.method,
            raw_path: self.raw_path,
            path,
            headers: self.headers,
            params: self.params,
            parts: self.parts,
            body: self.body,
            host: self.host,
            services: self.services.unwrap_or_default(),
            chunk_size: self.chunk_size,
            response_headers: Mutex::new(HeaderMap::new()),
            invalid_request: Mutex::new(fallback::default_invalid_request()),
            exception: Mutex::new(fallback::default_exception()),
            started: Instant::now(),
        })
    }
}
