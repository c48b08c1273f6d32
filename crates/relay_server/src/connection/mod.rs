//! Connection management for relay clients.
//!
//! This module owns the lifecycle of client connections: the duplex channel
//! abstraction they are built on, the per-connection handle, and the registry
//! that tracks every live handle.

pub mod channel;
pub mod handle;
pub mod memory;
pub mod registry;

pub use channel::{split_websocket, Frame, FrameKind, FrameSink, FrameSource, WsFrameSink, WsFrameSource};
pub use handle::ConnectionHandle;
pub use memory::{memory_channel, MemoryPeer, MemorySink, MemorySource};
pub use registry::ConnectionRegistry;

/// Type alias for connection identifiers.
///
/// Identifiers are assigned by the registry from a monotonically increasing
/// counter and are never reused within a process.
pub type ConnectionId = u64;
