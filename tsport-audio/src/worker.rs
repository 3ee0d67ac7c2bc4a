//! Delivery worker thread
//!
//! One worker per port. The thread borrows a buffer from the negotiated
//! allocator, asks the port to fill it, hands it to the downstream sink, and
//! returns it to the pool. Buffers filled under a flush generation that has
//! since been superseded are returned without being delivered.
//!
//! The worker exits on end of stream (reported to the sink exactly once), on
//! a stop request, on disconnect, or on a sink failure.

use crate::allocator::Allocator;
use crate::error::{Error, Result};
use crate::media::{BufferFlags, MediaBuffer};
use crate::port::{AudioPort, PullSource};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tsport_common::events::PortEvent;
use tsport_common::timing::RefTime;

/// Downstream consumer of filled buffers
pub trait BufferSink: Send {
    fn deliver(&mut self, buffer: &MediaBuffer) -> Result<()>;

    /// Called once when upstream ends
    fn end_of_stream(&mut self);
}

/// Summary of a delivered buffer
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredBuffer {
    pub start: Option<RefTime>,
    pub stop: Option<RefTime>,
    pub flags: BufferFlags,
    pub len: usize,
    pub segment: u64,
}

impl From<&MediaBuffer> for DeliveredBuffer {
    fn from(buffer: &MediaBuffer) -> Self {
        Self {
            start: buffer.start_time(),
            stop: buffer.stop_time(),
            flags: buffer.flags(),
            len: buffer.len(),
            segment: buffer.segment(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkMessage {
    Buffer(DeliveredBuffer),
    EndOfStream,
}

/// Sink that forwards buffer summaries over a channel
///
/// Usable from the worker thread and drained either from async code or
/// with `blocking_recv`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BufferSink for ChannelSink {
    fn deliver(&mut self, buffer: &MediaBuffer) -> Result<()> {
        self.tx
            .send(SinkMessage::Buffer(DeliveredBuffer::from(buffer)))
            .map_err(|_| Error::Internal("sink receiver dropped".to_string()))
    }

    fn end_of_stream(&mut self) {
        let _ = self.tx.send(SinkMessage::EndOfStream);
    }
}

/// Why the worker thread exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    EndOfStream { delivered: u64 },
    Stopped,
    Disconnected,
    Failed(String),
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::EndOfStream { delivered } => {
                write!(f, "end of stream after {} buffers", delivered)
            }
            WorkerExit::Stopped => write!(f, "stopped"),
            WorkerExit::Disconnected => write!(f, "disconnected"),
            WorkerExit::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Handle to a running delivery thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct DeliveryWorker {
    port: Arc<AudioPort>,
    handle: Option<JoinHandle<WorkerExit>>,
}

impl DeliveryWorker {
    /// Start delivering from a connected port into `sink`
    pub fn spawn(port: Arc<AudioPort>, sink: Box<dyn BufferSink>) -> Result<Self> {
        if !port.is_connected() {
            return Err(Error::NotConnected);
        }
        port.reset_stop();

        let thread_port = Arc::clone(&port);
        let name = format!("tsport-audio-{}", &port.id().simple().to_string()[..8]);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(thread_port, sink))
            .map_err(|e| Error::Internal(format!("failed to spawn delivery thread: {}", e)))?;

        Ok(Self {
            port,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> &Arc<AudioPort> {
        &self.port
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request a stop and wait for the thread
    pub fn stop(mut self) -> WorkerExit {
        self.port.request_stop();
        self.wait()
    }

    /// Wait for the thread to exit on its own
    pub fn join(mut self) -> WorkerExit {
        self.wait()
    }

    fn wait(&mut self) -> WorkerExit {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| WorkerExit::Failed("delivery thread panicked".to_string())),
            None => WorkerExit::Stopped,
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.port.request_stop();
            self.wait();
        }
    }
}

fn run(port: Arc<AudioPort>, mut sink: Box<dyn BufferSink>) -> WorkerExit {
    info!(port = %port.id(), "Delivery thread started");
    port.on_thread_start_play();
    let poll = port.settings().starvation_poll();

    let exit = loop {
        if port.is_stop_requested() {
            break WorkerExit::Stopped;
        }
        let Some(allocator) = port.allocator() else {
            break WorkerExit::Disconnected;
        };

        let mut buffer = match allocator.get_buffer(poll) {
            Ok(Some(buffer)) => buffer,
            Ok(None) => continue,
            Err(Error::Interrupted) if port.is_stop_requested() => break WorkerExit::Stopped,
            Err(Error::Interrupted) | Err(Error::NotConnected) => break WorkerExit::Disconnected,
            Err(e) => break WorkerExit::Failed(e.to_string()),
        };

        match port.fill_buffer(&mut buffer) {
            Ok(()) => {
                if !port.is_current_segment(buffer.segment()) {
                    debug!(port = %port.id(), "Discarding buffer from flushed segment");
                    allocator.release(buffer);
                    continue;
                }
                let delivered = sink.deliver(&buffer);
                allocator.release(buffer);
                if let Err(e) = delivered {
                    warn!(port = %port.id(), "Sink rejected buffer: {}", e);
                    break WorkerExit::Failed(e.to_string());
                }
            }
            Err(e) => {
                allocator.release(buffer);
                break exit_for(&port, sink.as_mut(), e);
            }
        }
    };

    info!(port = %port.id(), "Delivery thread exiting: {}", exit);
    port.events().emit_lossy(PortEvent::WorkerStopped {
        port_id: port.id(),
        reason: exit.to_string(),
        timestamp: chrono::Utc::now(),
    });
    exit
}

fn exit_for(port: &AudioPort, sink: &mut dyn BufferSink, error: Error) -> WorkerExit {
    match error {
        Error::UpstreamEndOfStream => {
            if port.mark_end_of_stream() {
                sink.end_of_stream();
            }
            WorkerExit::EndOfStream {
                delivered: port.delivered(),
            }
        }
        Error::Interrupted => WorkerExit::Stopped,
        Error::NotConnected => WorkerExit::Disconnected,
        other => {
            error!(port = %port.id(), "Delivery failed: {}", other);
            WorkerExit::Failed(other.to_string())
        }
    }
}
