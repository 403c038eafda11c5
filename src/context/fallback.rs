//! Default invalid-request and exception responses.
//!
//! Both fallbacks answer with a JSON body built from the bag they receive,
//! then complete the exchange once the body is streamed:
//! ```text
//! invalid request → 404 {"error_code":"404","msg":"invalid request","status":"invalid_request"}
//! exception       → 500 {"error_code":"500","msg":"<diagnostic>","status":"fail"}
//! ```

use std::sync::Arc;

use axum::http::StatusCode;

use crate::context::exchange::RequestContext;
use crate::dispatch::{PropertyBag, Status};

/// Replaceable fallback reaction.
pub type FallbackFn = Arc<dyn Fn(&Arc<RequestContext>, PropertyBag) + Send + Sync>;

pub fn invalid_request_bag() -> PropertyBag {
    PropertyBag::new(Status::InvalidRequest)
        .with("error_code", "404")
        .with("msg", "invalid request")
}

pub fn exception_bag(msg: impl Into<String>) -> PropertyBag {
    PropertyBag::fail(msg).with("error_code", "500")
}

pub fn default_invalid_request() -> FallbackFn {
    Arc::new(|ctx: &Arc<RequestContext>, bag: PropertyBag| {
        respond(ctx, StatusCode::NOT_FOUND, bag)
    })
}

pub fn default_exception() -> FallbackFn {
    Arc::new(|ctx: &Arc<RequestContext>, bag: PropertyBag| {
        respond(ctx, StatusCode::INTERNAL_SERVER_ERROR, bag)
    })
}

/// Write `bag` as JSON with `status`, forcing completion if that is impossible.
pub fn respond(ctx: &Arc<RequestContext>, status: StatusCode, bag: PropertyBag) {
    if let Err(e) = ctx.write_json_status(status, &bag.to_json(), ctx.completion()) {
        tracing::warn!(
            exchange_id = %ctx.id(),
            error = %e,
            "Fallback response could not be written"
        );
        if !ctx.state().is_closed() {
            let _ = ctx.complete();
        }
    }
}
