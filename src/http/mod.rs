//! Host layer: serves the pipeline over HTTP with axum.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, timeouts)
//!     → request.rs (head + body pump → RawExchange)
//!     → WorkerPool → Executor → HandlerChain
//!     → response.rs (head oneshot, StreamWriter → body channel)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::BodyReader;
pub use response::{AxumHost, ChannelSink, HostReceivers};
pub use server::HttpServer;
