//! Error types for the relay core.
//!
//! Failures are scoped to the connection they happen on. Only
//! [`RelayError::Network`] raised while binding the listener is fatal to the
//! whole process; everything else is logged and handled locally.

use crate::connection::ConnectionId;

/// Errors produced by the relay core.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The WebSocket upgrade handshake was rejected or failed midway.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Reading a frame from a connection failed (transport or protocol error).
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Writing a frame to a specific connection failed or timed out.
    #[error("Write to connection {id} failed: {reason}")]
    WriteFailed {
        /// Target connection of the failed write
        id: ConnectionId,
        /// Transport-level reason
        reason: String,
    },

    /// The registry is full and refused a new connection.
    #[error("Connection limit of {limit} reached")]
    CapacityExceeded {
        /// The configured connection limit
        limit: usize,
    },

    /// Listener setup failed (socket creation, bind, listen).
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected internal condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Builds a [`RelayError::WriteFailed`] for the given connection.
    pub fn write_failed(id: ConnectionId, reason: impl ToString) -> Self {
        Self::WriteFailed {
            id,
            reason: reason.to_string(),
        }
    }
}
