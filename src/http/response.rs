//! Response bridge: [`HostExchange`] over axum.
//!
//! # Responsibilities
//! - Deliver the single response head to the waiting connection task
//! - Drive a [`StreamWriter`] into a bounded body channel
//! - Report the exchange's terminal phase
//!
//! # Data Flow
//! ```text
//! RequestContext ──send_head──▶ oneshot ──▶ server handler (status + headers)
//! StreamWriter ──on_writable──▶ ChannelSink ──mpsc──▶ Body stream ──▶ client
//!        ▲                                       │
//!        └──────── reserve() resolves ◀──────────┘ (readiness)
//! ```
//!
//! # Design Decisions
//! - A full channel is `WouldBlock`; the driver parks on `reserve()` and
//!   re-signals the writer once a slot frees up
//! - A closed channel means the client went away; the writer is failed with
//!   `BrokenPipe`
//! - An abort wakes a driver parked on `reserve()` and fails the writer, so a
//!   client that stops reading cannot pin the source or the blocking thread
//! - A writer that ends in `Failed` pushes an error frame so the connection
//!   is reset rather than ending with a short body

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::context::{ExchangePhase, HostExchange, ResponseHead};
use crate::error::OutputError;
use crate::output::{NonBlockingSink, StreamWriter, WriteOutcome, WriterState};

type Frame = Result<Bytes, io::Error>;

/// Non-blocking sink over a bounded body channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl NonBlockingSink for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        match self.tx.try_send(Ok(Bytes::copy_from_slice(buf))) {
            Ok(()) => Ok(WriteOutcome::Accepted(buf.len())),
            Err(TrySendError::Full(_)) => Ok(WriteOutcome::WouldBlock),
            Err(TrySendError::Closed(_)) => Err(client_gone()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving halves handed to the connection task.
pub struct HostReceivers {
    pub head: oneshot::Receiver<ResponseHead>,
    pub body: mpsc::Receiver<Frame>,
    pub done: oneshot::Receiver<ExchangePhase>,
}

/// Turn the body channel into a streaming response body.
pub fn streaming_body(body: mpsc::Receiver<Frame>) -> Body {
    let stream = futures_util::stream::unfold(body, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    Body::from_stream(stream)
}

/// Host side of one exchange served over axum.
pub struct AxumHost {
    head: Mutex<Option<oneshot::Sender<ResponseHead>>>,
    body: Mutex<Option<mpsc::Sender<Frame>>>,
    done: Mutex<Option<oneshot::Sender<ExchangePhase>>>,
    aborted: Arc<Notify>,
    runtime: Handle,
}

impl AxumHost {
    /// `capacity` is the number of chunks buffered towards the client.
    pub fn new(capacity: usize, runtime: Handle) -> (Arc<Self>, HostReceivers) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        let (done_tx, done_rx) = oneshot::channel();
        let host = Arc::new(Self {
            head: Mutex::new(Some(head_tx)),
            body: Mutex::new(Some(body_tx)),
            done: Mutex::new(Some(done_tx)),
            aborted: Arc::new(Notify::new()),
            runtime,
        });
        let receivers = HostReceivers {
            head: head_rx,
            body: body_rx,
            done: done_rx,
        };
        (host, receivers)
    }
}

impl HostExchange for AxumHost {
    fn send_head(&self, head: ResponseHead) -> Result<(), OutputError> {
        let sender = self
            .head
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| OutputError::Host("response head already sent".into()))?;
        sender
            .send(head)
            .map_err(|_| OutputError::Host("client connection is gone".into()))
    }

    fn start_output(&self, mut writer: StreamWriter) {
        let sender = self
            .body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tx) = sender else {
            writer.on_error(io::Error::other("response body is no longer available"));
            return;
        };
        let runtime = self.runtime.clone();
        let aborted = Arc::clone(&self.aborted);
        self.runtime
            .spawn_blocking(move || drive(writer, tx, aborted, runtime));
    }

    fn on_complete(&self, phase: ExchangePhase) {
        if phase == ExchangePhase::Aborted {
            // Stores a permit if the driver is not parked yet.
            self.aborted.notify_one();
        }
        // An unsent head means the connection task answers on its own.
        self.head
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // No writer took the body sender: end the body now.
        self.body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(done) = self
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = done.send(phase);
        }
    }
}

/// Pump `writer` into `tx` until it reaches a terminal state.
fn drive(
    mut writer: StreamWriter,
    tx: mpsc::Sender<Frame>,
    aborted: Arc<Notify>,
    runtime: Handle,
) {
    let mut sink = ChannelSink::new(tx.clone());
    loop {
        if writer.on_writable(&mut sink).is_terminal() {
            break;
        }
        let ready = runtime.block_on(async {
            tokio::select! {
                permit = tx.reserve() => permit.map(drop).map_err(|_| client_gone()),
                _ = aborted.notified() => Err(io::Error::other("exchange aborted")),
            }
        });
        if let Err(e) = ready {
            writer.on_error(e);
            break;
        }
    }

    if writer.state() == WriterState::Failed {
        let _ = tx.try_send(Err(io::Error::other("response output failed")));
    }
    tracing::trace!(
        bytes = writer.bytes_written(),
        cycles = writer.readiness_cycles(),
        "Output driver finished"
    );
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")
}
