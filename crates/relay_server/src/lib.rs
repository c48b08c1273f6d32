//! # Relay Server - Real-Time Message Fan-Out
//!
//! A minimal real-time relay: clients hold a WebSocket open, send text or
//! binary frames, and every frame is rebroadcast to the connected group.
//!
//! ## Architecture Overview
//!
//! * **Connection Handle** - One client's duplex channel plus its per-handle
//!   write lock and close signal ([`connection::ConnectionHandle`])
//! * **Connection Registry** - Locked, id-keyed set of live handles with
//!   snapshot iteration ([`ConnectionRegistry`])
//! * **Fan-Out Dispatcher** - Writes each inbound frame to a registry
//!   snapshot with bounded concurrency, isolating per-peer failures
//!   ([`Dispatcher`])
//! * **Ingress Loop** - One task per connection reading frames and handing
//!   them to the dispatcher ([`ingress::run_ingress`])
//!
//! ### Message Flow
//!
//! 1. The accept loop upgrades a TCP stream on the configured path
//! 2. The write half is registered, the read half feeds the ingress loop
//! 3. Each frame read is dispatched to the selected registry members
//! 4. A failed write removes that member; the others still get the frame
//! 5. When the ingress loop ends, its handle is removed and closed
//!
//! ## Error Handling
//!
//! Failures stay local to the connection they occur on (see [`RelayError`]).
//! Only a listener that can't bind ends the process.

pub use config::ServerConfig;
pub use connection::{ConnectionId, ConnectionRegistry, Frame, FrameKind};
pub use dispatch::{DeliveryPolicy, DispatchReport, Dispatcher, DispatcherConfig, InboundMessage};
pub use error::RelayError;
pub use server::RelayServer;

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod ingress;
pub mod server;

/// Creates a relay server with the default configuration.
pub fn create_server() -> RelayServer {
    RelayServer::new(ServerConfig::default())
}

/// Creates a relay server with a custom configuration.
pub fn create_server_with_config(config: ServerConfig) -> RelayServer {
    RelayServer::new(config)
}
