//! Readiness-driven response output.
//!
//! # Data Flow
//! ```text
//! RequestContext::write_*()
//!     → source.rs (buffer, text, file or reader)
//!     → writer.rs (StreamWriter, handed to the host)
//!
//! host IO task, on every "writable" signal:
//!     → writer.on_writable(&mut sink)
//!     → drain chunks until sink says WouldBlock or source is exhausted
//!     → Done: flush, dispatch `done` | Failed: dispatch `fail`
//! ```
//!
//! # Design Decisions
//! - The writer never pushes faster than the sink accepts (backpressure)
//! - One logical write may take any number of readiness cycles
//! - The sink trait is tiny so any event loop can drive the writer
//! - Exactly one of `done`/`fail` is dispatched, even if the writer is dropped

pub mod sink;
pub mod source;
pub mod writer;

pub use sink::{NonBlockingSink, WriteOutcome};
pub use source::ByteSource;
pub use writer::{StreamWriter, WriterState};
