//! Readiness-driven stream writer.
//!
//! # Responsibilities
//! - Drain a [`ByteSource`] into a [`NonBlockingSink`] in bounded chunks
//! - Suspend when the sink would block and resume on the next readiness signal
//! - Dispatch exactly one `done` or `fail` bag to the caller's dispatcher
//!
//! # State Machine
//! ```text
//! Idle ──on_writable──▶ Writing ──source EOF + flush──▶ Done
//!   │                     │  ▲
//!   │                     │  └── WouldBlock / Accepted(0): suspend
//!   └──────────┬──────────┘
//!              ▼
//!           Failed  (IO error, host error, exchange closed, writer dropped)
//! ```

use std::io::{self, Read};
use std::sync::Arc;

use crate::context::state::ExchangeState;
use crate::dispatch::{CallbackDispatcher, PropertyBag};
use crate::observability::metrics;

use super::sink::{NonBlockingSink, WriteOutcome};
use super::source::ByteSource;

/// Default chunk size for a single sink write.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Progress of a [`StreamWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Created, no readiness signal seen yet.
    Idle,
    /// Suspended mid-stream, waiting for the sink to drain.
    Writing,
    /// All bytes written and flushed. `done` dispatched.
    Done,
    /// Stopped on error. `fail` dispatched.
    Failed,
}

impl WriterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WriterState::Done | WriterState::Failed)
    }
}

/// Streams one response body to the host, one readiness cycle at a time.
pub struct StreamWriter {
    source: Option<ByteSource>,
    chunk: Vec<u8>,
    pos: usize,
    filled: usize,
    state: WriterState,
    exchange: Arc<ExchangeState>,
    on_done: Option<CallbackDispatcher>,
    bytes_written: u64,
    readiness_cycles: u64,
}

impl StreamWriter {
    pub fn new(
        source: ByteSource,
        chunk_size: usize,
        exchange: Arc<ExchangeState>,
        on_done: CallbackDispatcher,
    ) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            source: Some(source),
            chunk: vec![0; chunk_size],
            pos: 0,
            filled: 0,
            state: WriterState::Idle,
            exchange,
            on_done: Some(on_done),
            bytes_written: 0,
            readiness_cycles: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Number of readiness signals this writer has handled.
    pub fn readiness_cycles(&self) -> u64 {
        self.readiness_cycles
    }

    /// Handle one "sink is writable" signal.
    ///
    /// Writes chunks until the sink stops accepting or the source is exhausted.
    /// Never blocks on the sink. Calling this after a terminal state is a no-op.
    pub fn on_writable(&mut self, sink: &mut dyn NonBlockingSink) -> WriterState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.readiness_cycles += 1;

        self.state = WriterState::Writing;

        loop {
            // Checked per chunk: a sink that never pushes back must still stop on abort.
            if self.exchange.is_closed() {
                self.fail("exchange already closed");
                return self.state;
            }
            if self.pos == self.filled {
                match self.refill() {
                    Ok(0) => {
                        self.finish(sink);
                        return self.state;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.fail(&e.to_string());
                        return self.state;
                    }
                }
            }

            match sink.write(&self.chunk[self.pos..self.filled]) {
                Ok(WriteOutcome::Accepted(0)) | Ok(WriteOutcome::WouldBlock) => {
                    return self.state;
                }
                Ok(WriteOutcome::Accepted(n)) => {
                    let n = n.min(self.filled - self.pos);
                    self.pos += n;
                    self.bytes_written += n as u64;
                }
                Err(e) => {
                    self.fail(&e.to_string());
                    return self.state;
                }
            }
        }
    }

    /// Host-reported transport failure.
    pub fn on_error(&mut self, err: io::Error) {
        if !self.state.is_terminal() {
            self.fail(&err.to_string());
        }
    }

    fn refill(&mut self) -> io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        loop {
            match source.read(&mut self.chunk) {
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn finish(&mut self, sink: &mut dyn NonBlockingSink) {
        self.source = None;
        if let Err(e) = sink.flush() {
            self.fail(&e.to_string());
            return;
        }
        self.state = WriterState::Done;
        metrics::record_bytes_written(self.bytes_written);
        tracing::debug!(
            exchange_id = %self.exchange.id(),
            bytes = self.bytes_written,
            cycles = self.readiness_cycles,
            "Output stream finished"
        );
        if let Some(dispatcher) = self.on_done.take() {
            dispatcher
                .obtain_envelope()
                .with_bag(PropertyBag::done().with("bytes", self.bytes_written))
                .send_to_target();
        }
    }

    fn fail(&mut self, msg: &str) {
        self.source = None;
        self.state = WriterState::Failed;
        tracing::warn!(
            exchange_id = %self.exchange.id(),
            bytes = self.bytes_written,
            error = %msg,
            "Output stream failed"
        );
        if let Some(dispatcher) = self.on_done.take() {
            dispatcher
                .obtain_envelope()
                .with_bag(PropertyBag::fail(msg).with("bytes", self.bytes_written))
                .send_to_target();
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.state.is_terminal() && self.on_done.is_some() {
            self.fail("writer dropped before completion");
        }
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("state", &self.state)
            .field("bytes_written", &self.bytes_written)
            .field("chunk_size", &self.chunk.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Status;
    use std::sync::Mutex;

    /// Accepts at most `budget` bytes per readiness cycle.
    struct ThrottledSink {
        out: Vec<u8>,
        budget: usize,
        left: usize,
    }

    impl ThrottledSink {
        fn new(budget: usize) -> Self {
            Self {
                out: Vec::new(),
                budget,
                left: budget,
            }
        }

        fn ready(&mut self) {
            self.left = self.budget;
        }
    }

    impl NonBlockingSink for ThrottledSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
            if self.left == 0 {
                return Ok(WriteOutcome::WouldBlock);
            }
            let n = buf.len().min(self.left);
            self.out.extend_from_slice(&buf[..n]);
            self.left -= n;
            Ok(WriteOutcome::Accepted(n))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl NonBlockingSink for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<WriteOutcome> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn recorder() -> (CallbackDispatcher, Arc<Mutex<Vec<PropertyBag>>>) {
        let bags = Arc::new(Mutex::new(Vec::new()));
        let b = bags.clone();
        let dispatcher = CallbackDispatcher::new(move |bag| b.lock().unwrap().push(bag));
        (dispatcher, bags)
    }

    #[test]
    fn test_large_body_over_throttled_sink() {
        let body: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let (dispatcher, bags) = recorder();
        let mut writer = StreamWriter::new(
            ByteSource::from_bytes(body.clone()),
            DEFAULT_CHUNK_SIZE,
            Arc::new(ExchangeState::new()),
            dispatcher,
        );
        let mut sink = ThrottledSink::new(64 * 1024);

        while !writer.on_writable(&mut sink).is_terminal() {
            sink.ready();
            assert!(bags.lock().unwrap().is_empty());
        }

        assert_eq!(writer.readiness_cycles(), 80);
        assert_eq!(writer.state(), WriterState::Done);
        assert_eq!(sink.out, body);
        assert_eq!(writer.bytes_written(), body.len() as u64);

        let bags = bags.lock().unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].status, Status::Done);
        assert_eq!(bags[0].get_u64("bytes"), Some(body.len() as u64));
    }

    #[test]
    fn test_empty_source_completes_in_one_cycle() {
        let (dispatcher, bags) = recorder();
        let mut writer = StreamWriter::new(
            ByteSource::from_bytes(Vec::new()),
            16,
            Arc::new(ExchangeState::new()),
            dispatcher,
        );
        let mut sink = Vec::new();
        assert_eq!(writer.on_writable(&mut sink), WriterState::Done);
        assert!(sink.is_empty());
        assert_eq!(bags.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sink_error_dispatches_fail_once() {
        let (dispatcher, bags) = recorder();
        let mut writer = StreamWriter::new(
            ByteSource::from_text("payload"),
            4,
            Arc::new(ExchangeState::new()),
            dispatcher,
        );
        assert_eq!(writer.on_writable(&mut BrokenSink), WriterState::Failed);
        assert_eq!(writer.on_writable(&mut BrokenSink), WriterState::Failed);
        writer.on_error(io::Error::other("late"));

        let bags = bags.lock().unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].status, Status::Fail);
        assert_eq!(bags[0].message(), Some("client went away"));
    }

    #[test]
    fn test_closed_exchange_refuses_output() {
        let state = Arc::new(ExchangeState::new());
        assert!(state.try_complete());
        let (dispatcher, bags) = recorder();
        let mut writer =
            StreamWriter::new(ByteSource::from_text("late"), 16, state, dispatcher);
        let mut sink = Vec::new();

        assert_eq!(writer.on_writable(&mut sink), WriterState::Failed);
        assert!(sink.is_empty());
        assert_eq!(
            bags.lock().unwrap()[0].message(),
            Some("exchange already closed")
        );
    }

    #[test]
    fn test_abort_mid_stream_fails_on_next_cycle() {
        let state = Arc::new(ExchangeState::new());
        let (dispatcher, bags) = recorder();
        let mut writer = StreamWriter::new(
            ByteSource::from_bytes(vec![7u8; 1024]),
            128,
            state.clone(),
            dispatcher,
        );
        let mut sink = ThrottledSink::new(256);
        assert_eq!(writer.on_writable(&mut sink), WriterState::Writing);
        state.abort();
        sink.ready();
        assert_eq!(writer.on_writable(&mut sink), WriterState::Failed);
        assert_eq!(sink.out.len(), 256);
        assert_eq!(bags.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_abort_stops_writer_while_sink_keeps_accepting() {
        struct AbortingReader {
            state: Arc<ExchangeState>,
            reads: usize,
        }

        impl Read for AbortingReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.reads += 1;
                if self.reads == 3 {
                    self.state.abort();
                }
                buf.fill(b'z');
                Ok(buf.len())
            }
        }

        let state = Arc::new(ExchangeState::new());
        let (dispatcher, bags) = recorder();
        let reader = AbortingReader {
            state: state.clone(),
            reads: 0,
        };
        let mut writer =
            StreamWriter::new(ByteSource::from_reader(reader), 64, state, dispatcher);
        let mut sink = Vec::new();

        assert_eq!(writer.on_writable(&mut sink), WriterState::Failed);
        assert_eq!(sink.len(), 3 * 64);
        assert_eq!(writer.readiness_cycles(), 1);
        let bags = bags.lock().unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].message(), Some("exchange already closed"));
    }

    #[test]
    fn test_drop_before_terminal_dispatches_fail() {
        let (dispatcher, bags) = recorder();
        let writer = StreamWriter::new(
            ByteSource::from_text("never sent"),
            16,
            Arc::new(ExchangeState::new()),
            dispatcher,
        );
        drop(writer);
        let bags = bags.lock().unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].status, Status::Fail);
    }
}
