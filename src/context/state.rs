//! Exchange identity and completion state.
//!
//! This is the one piece of per-exchange state touched from two threads: the
//! worker running the handler, and the host's IO task driving the
//! [`StreamWriter`](crate::output::StreamWriter). Everything here is atomic.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use uuid::Uuid;

/// Unique identifier for an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle phase of an exchange.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    /// Decoding, dispatching or streaming output.
    Processing = 0,
    /// `complete()` was called; the host may flush and release the connection.
    Completed = 1,
    /// The host gave up on the exchange (timeout, client gone).
    Aborted = 2,
}

impl From<u8> for ExchangePhase {
    fn from(val: u8) -> Self {
        match val {
            1 => ExchangePhase::Completed,
            2 => ExchangePhase::Aborted,
            _ => ExchangePhase::Processing,
        }
    }
}

/// Completion and output flags for one exchange.
///
/// Both transitions are compare-and-swap so that "at most once" holds even
/// when the worker and the IO task race.
#[derive(Debug)]
pub struct ExchangeState {
    id: ExchangeId,
    phase: AtomicU8,
    output_claimed: AtomicBool,
    redundant_completions: AtomicU32,
}

impl ExchangeState {
    pub fn new() -> Self {
        Self {
            id: ExchangeId::new(),
            phase: AtomicU8::new(ExchangePhase::Processing as u8),
            output_claimed: AtomicBool::new(false),
            redundant_completions: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn phase(&self) -> ExchangePhase {
        ExchangePhase::from(self.phase.load(Ordering::Acquire))
    }

    /// True once the exchange is completed or aborted.
    pub fn is_closed(&self) -> bool {
        self.phase() != ExchangePhase::Processing
    }

    /// Transition `Processing → Completed`. Returns false if already closed.
    pub fn try_complete(&self) -> bool {
        self.transition(ExchangePhase::Completed)
    }

    /// Transition `Processing → Aborted`. Returns false if already closed.
    pub fn abort(&self) -> bool {
        self.transition(ExchangePhase::Aborted)
    }

    /// Claim the single output slot. Returns false if it was already taken.
    pub fn claim_output(&self) -> bool {
        self.output_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_output(&self) -> bool {
        self.output_claimed.load(Ordering::Acquire)
    }

    /// Record a `complete()` call on an already completed exchange.
    pub fn note_redundant_completion(&self) -> u32 {
        self.redundant_completions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn redundant_completions(&self) -> u32 {
        self.redundant_completions.load(Ordering::Relaxed)
    }

    fn transition(&self, to: ExchangePhase) -> bool {
        self.phase
            .compare_exchange(
                ExchangePhase::Processing as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for ExchangeState {
    fn default() -> Self {
        Self::new()
    }
}
