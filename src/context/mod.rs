//! Per-exchange request context.
//!
//! # Data Flow
//! ```text
//! Executor (decode finished)
//!     → RequestContextBuilder → Arc<RequestContext>
//!     → handlers read parameters / parts / body
//!     → exactly one write_*() commits head + StreamWriter to the host
//!     → completion dispatcher → complete() → host.on_complete()
//! ```
//!
//! # Design Decisions
//! - One exchange, one context; nothing here is shared across exchanges
//! - Completion and output flags live in `state.rs` so the host's IO side can
//!   observe them without touching the context
//! - The host is a trait object so any transport can drive the pipeline

pub mod disposition;
pub mod exchange;
pub mod fallback;
pub mod host;
pub mod params;
pub mod state;

pub use disposition::DispositionKind;
pub use exchange::{FileOutput, RequestContext, RequestContextBuilder};
pub use fallback::FallbackFn;
pub use host::{HostExchange, ResponseHead};
pub use params::Parameters;
pub use state::{ExchangeId, ExchangePhase, ExchangeState};
