//! Connection handle representation.
//!
//! A [`ConnectionHandle`] is the relay's representative of one live client.
//! It owns the write half of the client's duplex channel, serializes writes
//! to it, and carries the close signal that interrupts the client's ingress
//! loop.

use super::channel::{Frame, FrameSink};
use super::ConnectionId;
use crate::error::RelayError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::debug;

/// Represents an individual registered client connection.
///
/// Handles are created by the registry and shared as `Arc<ConnectionHandle>`
/// between the registry, the dispatcher's snapshots and the connection's
/// ingress loop.
pub struct ConnectionHandle {
    /// Identifier assigned at registration
    id: ConnectionId,

    /// Remote network address, when the transport has one
    remote_addr: Option<SocketAddr>,

    /// When the connection was registered
    connected_at: SystemTime,

    /// Write half of the channel; the lock keeps one write in flight at a time
    sink: Mutex<Box<dyn FrameSink>>,

    /// Cleared once the handle is removed, shut down or a write fails
    alive: AtomicBool,

    /// Fires once when the handle is shut down
    close_signal: watch::Sender<bool>,

    /// Upper bound for acquiring the write lock plus the write itself
    write_timeout: Duration,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        sink: Box<dyn FrameSink>,
        remote_addr: Option<SocketAddr>,
        write_timeout: Duration,
    ) -> Self {
        let (close_signal, _) = watch::channel(false);
        Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            sink: Mutex::new(sink),
            alive: AtomicBool::new(true),
            close_signal,
            write_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Writes one frame to the client.
    ///
    /// Concurrent callers queue on the per-handle lock, so frames from
    /// different dispatches never interleave on the wire. Waiting for the
    /// lock counts against `write_timeout`. A pending write is abandoned as
    /// soon as the handle is shut down.
    ///
    /// A failed or timed-out write shuts the handle down, so later writes
    /// fail immediately and the connection's ingress loop is woken.
    ///
    /// # Errors
    ///
    /// [`RelayError::WriteFailed`] if the handle is shut down, the transport
    /// rejected the frame, or the timeout elapsed.
    pub async fn write_frame(&self, frame: Frame) -> Result<(), RelayError> {
        if !self.is_alive() {
            return Err(RelayError::write_failed(self.id, "connection closed"));
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            sink.write_frame(frame).await
        };

        let outcome = tokio::select! {
            biased;
            _ = self.closed() => return Err(RelayError::write_failed(self.id, "connection closed")),
            outcome = timeout(self.write_timeout, write) => outcome,
        };

        let error = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => RelayError::write_failed(self.id, e),
            Err(_) => RelayError::write_failed(
                self.id,
                format!("timed out after {:?}", self.write_timeout),
            ),
        };
        self.shutdown();
        Err(error)
    }

    /// Marks the handle dead and wakes anything waiting in [`closed`].
    ///
    /// Does not touch the transport; safe to call from any context and more
    /// than once.
    ///
    /// [`closed`]: ConnectionHandle::closed
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            debug!("Connection {} shut down", self.id);
        }
        self.close_signal.send_replace(true);
    }

    /// Resolves once [`shutdown`](ConnectionHandle::shutdown) has been called.
    pub async fn closed(&self) {
        let mut rx = self.close_signal.subscribe();
        // The sender lives in `self`, so this only errors if it was dropped.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Releases the underlying channel, bounded by `write_timeout`.
    ///
    /// Best effort; failures are only logged.
    pub async fn close(&self) {
        self.shutdown();
        let release = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match timeout(self.write_timeout, release).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Connection {} close error: {}", self.id, e),
            Err(_) => debug!("Connection {} close timed out", self.id),
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}
