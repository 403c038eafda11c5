//! Per-exchange orchestration.
//!
//! # Data Flow
//! ```text
//! host layer
//!     → RawExchange (method, path, query, headers, body reader, host handle)
//!     → WorkerPool::submit (bounded, runs on the blocking pool)
//!     → Executor::execute
//!         → decode: multipart → MultipartDecoder | form/query → Parameters | raw body
//!         → RequestContext
//!         → HandlerRegistry::build_chain → HandlerChain::run
//!         → errors and panics → exception fallback, forced completion
//! ```
//!
//! # Design Decisions
//! - Decoding and handler code may block; they never run on the IO threads
//! - Nothing escapes `execute`: every exchange ends in exactly one response
//! - Shared services are injected through an explicit [`ServiceRegistry`]

pub mod pipeline;
pub mod pool;
pub mod raw;
pub mod registry;

pub use pipeline::Executor;
pub use pool::{SubmitError, WorkerPool, WorkerPoolMetrics};
pub use raw::RawExchange;
pub use registry::ServiceRegistry;
