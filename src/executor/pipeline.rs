//! The executor: decode, build context, run the chain, recover.

use std::any::Any;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::config::schema::{PipelineConfig, UploadConfig};
use crate::context::{Parameters, RequestContext};
use crate::error::DecodeError;
use crate::handler::{ChainOutcome, HandlerRegistry};
use crate::multipart::{boundary_from_content_type, is_multipart, MultipartDecoder, PartItem};
use crate::observability::metrics;

use super::raw::RawExchange;
use super::registry::ServiceRegistry;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Decoded input ready for a [`RequestContext`].
#[derive(Default)]
struct Decoded {
    params: Parameters,
    parts: Vec<PartItem>,
    body: Option<Bytes>,
}

/// Runs exchanges to a terminal state. Shared by all workers.
pub struct Executor {
    registry: HandlerRegistry,
    services: Arc<ServiceRegistry>,
    upload: UploadConfig,
    max_body_size: usize,
    chunk_size: usize,
}

impl Executor {
    pub fn new(
        registry: HandlerRegistry,
        services: Arc<ServiceRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            registry,
            services,
            upload: config.upload.clone(),
            max_body_size: config.security.max_body_size,
            chunk_size: config.output.chunk_size,
        }
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Run one exchange on the calling thread.
    ///
    /// Never panics and never returns an error: decode failures, handler
    /// errors and handler panics all end in a fallback response.
    pub fn execute(&self, mut raw: RawExchange) {
        let started = Instant::now();
        let span = tracing::info_span!(
            "exchange",
            exchange_id = %raw.state.id(),
            method = %raw.method,
            path = %raw.path,
        );
        let _enter = span.enter();

        let decoded = self.decode(&mut raw);

        let builder = RequestContext::builder(Arc::clone(&raw.host))
            .state(Arc::clone(&raw.state))
            .method(raw.method.clone())
            .path(raw.path.clone())
            .headers(std::mem::take(&mut raw.headers))
            .services(Arc::clone(&self.services))
            .chunk_size(self.chunk_size);

        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                metrics::record_decode_error(e.kind());
                let ctx = builder.build();
                ctx.report_exception(format!("request body could not be decoded: {e}"));
                metrics::record_exchange("error", started);
                return;
            }
        };

        let mut builder = builder.params(decoded.params).parts(decoded.parts);
        if let Some(body) = decoded.body {
            builder = builder.body(body);
        }
        let ctx = builder.build();

        if self.registry.is_empty() {
            ctx.report_exception("no handlers registered");
            metrics::record_exchange("error", started);
            return;
        }

        let mut chain = self.registry.build_chain();
        let result = panic::catch_unwind(AssertUnwindSafe(|| chain.run(&ctx)));

        let outcome = match result {
            Ok(Ok(ChainOutcome::Claimed { .. })) => "claimed",
            Ok(Ok(ChainOutcome::Exhausted)) => "invalid",
            Ok(Err(e)) => {
                recover(&ctx, e.to_string());
                "error"
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!(panic = %msg, "Handler panicked");
                recover(&ctx, format!("handler panicked: {msg}"));
                "error"
            }
        };
        metrics::record_exchange(outcome, started);
    }

    fn decode(&self, raw: &mut RawExchange) -> Result<Decoded, DecodeError> {
        let mut params = raw
            .query
            .as_deref()
            .map(Parameters::parse)
            .unwrap_or_default();

        let content_type = raw.content_type().map(str::to_owned);
        match content_type.as_deref() {
            Some(ct) if is_multipart(ct) => {
                let boundary = boundary_from_content_type(ct)?;
                let decoded =
                    MultipartDecoder::new(&boundary, &self.upload).decode(raw.body.as_mut())?;

                let mut files = Vec::new();
                let mut fields = 0;
                for part in decoded {
                    if part.is_file() {
                        files.push(part);
                    } else {
                        params.insert(part.field_name().to_string(), part.text()?);
                        fields += 1;
                    }
                }
                tracing::debug!(files = files.len(), fields, "Multipart body decoded");
                metrics::record_parts(files.len(), fields);
                Ok(Decoded {
                    params,
                    parts: files,
                    body: None,
                })
            }
            Some(ct) if mime_essence(ct).eq_ignore_ascii_case(FORM_URLENCODED) => {
                let body = self.read_body(raw)?;
                params.extend_encoded(&String::from_utf8_lossy(&body));
                Ok(Decoded {
                    params,
                    ..Default::default()
                })
            }
            _ => {
                let body = self.read_body(raw)?;
                Ok(Decoded {
                    params,
                    parts: Vec::new(),
                    body: (!body.is_empty()).then_some(body),
                })
            }
        }
    }

    fn read_body(&self, raw: &mut RawExchange) -> Result<Bytes, DecodeError> {
        if raw.content_length == Some(0) {
            return Ok(Bytes::new());
        }
        let limit = self.max_body_size as u64;
        let mut buf = Vec::new();
        raw.body.by_ref().take(limit + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > limit {
            return Err(DecodeError::RequestTooLarge { limit });
        }
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("handlers", &self.registry.len())
            .field("services", &self.services.len())
            .finish_non_exhaustive()
    }
}

/// Turn a failed exchange into a response, or at least a completion.
fn recover(ctx: &Arc<RequestContext>, msg: String) {
    if ctx.state().is_closed() {
        tracing::warn!(error = %msg, "Handler failed after completing the exchange");
        return;
    }
    if ctx.has_output() {
        tracing::warn!(error = %msg, "Handler failed after producing output; forcing completion");
        let _ = ctx.complete();
        return;
    }
    ctx.report_exception(msg);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn mime_essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_essence() {
        assert_eq!(
            mime_essence("application/x-www-form-urlencoded; charset=UTF-8"),
            FORM_URLENCODED
        );
        assert_eq!(mime_essence(""), "");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
