//! Per-connection ingress loop.
//!
//! Reads frames off one connection and hands each to the dispatcher. The
//! dispatch is awaited before the next read, which is what keeps every
//! origin's messages in order at each peer. Reads and writes use separate
//! halves of the channel and writes are time-bounded, so a dispatch can't
//! deadlock against another connection's ingress.

use crate::connection::{ConnectionHandle, ConnectionRegistry, FrameSource};
use crate::dispatch::{Dispatcher, InboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Lifecycle of an ingress loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressState {
    Connected,
    Reading,
    Disconnecting,
}

/// Why an ingress loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the channel
    PeerClosed,
    /// A read failed (transport error, malformed frame)
    ReadFailed(String),
    /// No frame arrived within the idle timeout
    IdleTimeout,
    /// The handle was shut down (write failure elsewhere, server shutdown)
    Shutdown,
}

/// Runs the ingress loop for one registered connection until it disconnects.
///
/// On exit the handle is removed from `registry` and its channel released.
/// This is the only terminal path; a broken read is never retried.
///
/// # Arguments
///
/// * `handle` - The registered connection
/// * `source` - Read half of the connection's channel
/// * `dispatcher` - Receives every frame read
/// * `registry` - Registry the handle was admitted to
/// * `idle_timeout` - Disconnect after this long without a frame; `None` waits forever
pub async fn run_ingress<S>(
    handle: Arc<ConnectionHandle>,
    mut source: S,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Option<Duration>,
) -> DisconnectReason
where
    S: FrameSource,
{
    let id = handle.id();
    let mut state = IngressState::Connected;
    trace!("Connection {} ingress {:?}", id, state);
    state = IngressState::Reading;
    trace!("Connection {} ingress {:?}", id, state);

    let reason = loop {
        let read = async {
            match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, source.read_frame()).await.ok(),
                None => Some(source.read_frame().await),
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = handle.closed() => break DisconnectReason::Shutdown,
            outcome = read => outcome,
        };

        match outcome {
            Some(Ok(Some(frame))) => {
                debug!("recv from {}: {:?} frame, {} bytes", id, frame.kind(), frame.len());
                let message = InboundMessage::new(id, frame);
                dispatcher.dispatch(&message).await;
            }
            Some(Ok(None)) => break DisconnectReason::PeerClosed,
            Some(Err(e)) => {
                warn!("Read: connection {}: {}", id, e);
                break DisconnectReason::ReadFailed(e.to_string());
            }
            None => break DisconnectReason::IdleTimeout,
        }
    };

    state = IngressState::Disconnecting;
    trace!("Connection {} ingress {:?}", id, state);

    registry.remove(id).await;
    handle.close().await;

    info!("Connection {} closed: {:?}", id, reason);
    reason
}
