//! Per-exchange handler chain.
//!
//! ```text
//! Idle ──run──▶ Trying(0) ──not my job──▶ Trying(1) ── ... ──▶ Exhausted
//!                  │                         │
//!                  └──claims──▶ Claimed(0)   └──claims──▶ Claimed(1)
//! ```

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::observability::metrics;

use super::RequestHandler;

/// Where the chain is in its walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    Trying(usize),
    Claimed(usize),
    Exhausted,
}

/// Terminal result of [`HandlerChain::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Claimed { index: usize, name: &'static str },
    /// Nobody claimed; the invalid-request fallback already ran.
    Exhausted,
}

/// Fresh handler instances for one exchange, consulted in order.
pub struct HandlerChain {
    handlers: Vec<Box<dyn RequestHandler>>,
    state: ChainState,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Box<dyn RequestHandler>>) -> Self {
        Self {
            handlers,
            state: ChainState::Idle,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Walk the chain once. Only the claiming handler's `process` runs.
    pub fn run(&mut self, ctx: &Arc<RequestContext>) -> Result<ChainOutcome, HandlerError> {
        for (index, handler) in self.handlers.iter().enumerate() {
            self.state = ChainState::Trying(index);
            if !handler.is_my_job(ctx) {
                continue;
            }

            self.state = ChainState::Claimed(index);
            let name = handler.name();
            tracing::debug!(exchange_id = %ctx.id(), handler = name, "Handler claimed exchange");
            metrics::record_claim(name);

            if let Err(e) = handler.process(ctx) {
                tracing::error!(exchange_id = %ctx.id(), handler = name, error = %e, "Handler failed");
                return Err(e);
            }
            return Ok(ChainOutcome::Claimed { index, name });
        }

        self.state = ChainState::Exhausted;
        ctx.invalid_request();
        Ok(ChainOutcome::Exhausted)
    }
}

impl std::fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("HandlerChain")
            .field("handlers", &names)
            .field("state", &self.state)
            .finish()
    }
}
