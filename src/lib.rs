//! In-process HTTP exchange pipeline.
//!
//! Each request becomes an exchange: the body is decoded (multipart parts
//! spooled to memory or temp files), a fresh handler chain is built and the
//! first handler that claims the exchange produces exactly one output, which
//! is streamed back under backpressure before the exchange completes.

// Core pipeline
pub mod context;
pub mod dispatch;
pub mod executor;
pub mod handler;
pub mod multipart;
pub mod output;

// Host layer
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::schema::PipelineConfig;
pub use context::RequestContext;
pub use dispatch::{CallbackDispatcher, PropertyBag, Status};
pub use executor::{Executor, RawExchange, ServiceRegistry, WorkerPool};
pub use handler::{HandlerRegistry, RequestHandler};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
