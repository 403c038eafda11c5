//! Handler chain of responsibility.
//!
//! # Data Flow
//! ```text
//! HandlerRegistry (factories, built once at startup)
//!     → build_chain() per exchange (fresh handler instances)
//!     → HandlerChain::run(ctx)
//!         → handler[0].is_my_job? no → handler[1].is_my_job? yes → process
//!         → nobody claimed → ctx.invalid_request()
//! ```
//!
//! # Design Decisions
//! - Handlers are built per exchange from factories, so no handler field is
//!   ever shared between concurrent exchanges
//! - The first handler to claim owns the exchange, including completion
//! - An empty chain is a configuration problem, caught by the executor

pub mod builtin;
pub mod chain;
pub mod registry;

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::HandlerError;

pub use chain::{ChainOutcome, ChainState, HandlerChain};
pub use registry::{HandlerFactory, HandlerRegistry};

/// One candidate in the handler chain.
pub trait RequestHandler: Send {
    /// Stable name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Capability test. Must not produce output.
    fn is_my_job(&self, ctx: &RequestContext) -> bool;

    /// Handle a claimed exchange.
    ///
    /// The handler must eventually complete the exchange, usually by passing
    /// `ctx.completion()` to its single `write_*` call.
    fn process(&self, ctx: &Arc<RequestContext>) -> Result<(), HandlerError>;
}
