//! Non-blocking sink abstraction over the host transport.

use std::io;

/// Result of offering bytes to a non-blocking sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The sink took this many bytes (possibly fewer than offered).
    Accepted(usize),
    /// The sink is full; wait for the next readiness signal.
    WouldBlock,
}

/// The host-side byte sink a [`StreamWriter`](super::StreamWriter) drains into.
///
/// Implementations must never block. Readiness is signalled out of band: the
/// host calls `StreamWriter::on_writable` whenever it believes the sink can
/// take more bytes.
pub trait NonBlockingSink: Send {
    /// Offer `buf` to the transport.
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome>;

    /// Push buffered bytes towards the network. Called once, after the last chunk.
    fn flush(&mut self) -> io::Result<()>;
}

impl NonBlockingSink for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        self.extend_from_slice(buf);
        Ok(WriteOutcome::Accepted(buf.len()))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
