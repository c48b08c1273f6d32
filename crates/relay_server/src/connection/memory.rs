//! In-process duplex channel.
//!
//! Connects a [`MemoryPeer`] (playing the remote client) to a
//! [`MemorySink`]/[`MemorySource`] pair that can be registered with the relay
//! exactly like an upgraded WebSocket. The peer can inject read errors and
//! make every write towards it fail, which is how connection failures are
//! simulated without a network.

use super::channel::{Frame, FrameSink, FrameSource};
use crate::error::RelayError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Creates a connected in-memory channel.
///
/// `capacity` bounds both directions; a peer that stops draining its inbox
/// eventually makes writes towards it block.
pub fn memory_channel(capacity: usize) -> (MemorySink, MemorySource, MemoryPeer) {
    let (to_server, from_peer) = mpsc::channel(capacity);
    let (to_peer, from_server) = mpsc::channel(capacity);
    let fail_writes = Arc::new(AtomicBool::new(false));

    let sink = MemorySink {
        tx: Some(to_peer),
        fail_writes: fail_writes.clone(),
    };
    let source = MemorySource { rx: from_peer };
    let peer = MemoryPeer {
        tx: Some(to_server),
        rx: from_server,
        fail_writes,
    };
    (sink, source, peer)
}

/// Server-side write half of an in-memory channel.
pub struct MemorySink {
    tx: Option<mpsc::Sender<Frame>>,
    fail_writes: Arc<AtomicBool>,
}

/// Server-side read half of an in-memory channel.
pub struct MemorySource {
    rx: mpsc::Receiver<Result<Frame, String>>,
}

/// The remote end of an in-memory channel.
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<Result<Frame, String>>>,
    rx: mpsc::Receiver<Frame>,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), RelayError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RelayError::Internal("injected write failure".to_string()));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RelayError::Internal("channel closed".to_string()))?;
        tx.send(frame)
            .await
            .map_err(|_| RelayError::Internal("peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.tx.take();
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn read_frame(&mut self) -> Result<Option<Frame>, RelayError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(reason)) => Err(RelayError::ReadFailed(reason)),
            None => Ok(None),
        }
    }
}

impl MemoryPeer {
    /// Sends a frame towards the server. Returns `false` if the server side
    /// is gone or the peer already closed.
    pub async fn send(&self, frame: Frame) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Ok(frame)).await.is_ok(),
            None => false,
        }
    }

    pub async fn send_text(&self, text: &str) -> bool {
        self.send(Frame::Text(text.to_string())).await
    }

    /// Makes the server's next read on this channel fail with `reason`.
    pub async fn inject_read_error(&self, reason: &str) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Err(reason.to_string())).await.is_ok(),
            None => false,
        }
    }

    /// Receives the next frame written by the server, or `None` once the
    /// server released the channel.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`MemoryPeer::recv`].
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Closes the peer's sending side; the server reads end-of-stream.
    pub fn close(&mut self) {
        self.tx.take();
    }

    /// Toggles failure injection for every server write towards this peer.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}
