//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → Assemble pool → Bind
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Finish responses → Drain workers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then pool, then listener
//! - Ordered shutdown: stop accept, drain, clear services
//! - Drain has a deadline: exchanges still running after it are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
