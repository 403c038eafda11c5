//! Single-shot completion signaling.
//!
//! # Data Flow
//! ```text
//! async operation finishes (file copy, writer drained, decoder done)
//!     → dispatcher.obtain_envelope()
//!     → envelope.with_bag(PropertyBag { status, values })
//!     → envelope.send_to_target()
//!     → registered reaction runs on the *caller's* thread
//! ```
//!
//! # Design Decisions
//! - No queue: dispatching is a direct call, asynchrony comes from which
//!   thread calls `send_to_target`
//! - Reactions are `FnOnce`, so a dispatcher fires at most once by construction
//! - Nesting dispatchers chains "write finished → complete the exchange"

pub mod callback;

pub use callback::{CallbackDispatcher, Envelope, PropertyBag, Status};
