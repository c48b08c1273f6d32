//! Server configuration types and defaults.
//!
//! This module contains the core configuration structure used to initialize
//! the relay: listener address, upgrade path, connection limits, timeouts and
//! fan-out policy.

use crate::dispatch::DispatcherConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the relay server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the listener to
    pub bind_address: SocketAddr,

    /// Request path that is upgraded to a WebSocket (e.g. `/echo`)
    pub path: String,

    /// Maximum number of concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Seconds without an inbound frame before a connection is dropped (0 = never)
    pub idle_timeout: u64,

    /// Seconds a single write may take before the target is considered dead
    pub write_timeout: u64,

    /// Seconds connection tasks get to drain during shutdown
    pub shutdown_grace: u64,

    /// Fan-out behavior
    pub dispatcher: DispatcherConfig,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            path: "/echo".to_string(),
            max_connections: 1000,
            idle_timeout: 60,
            write_timeout: 10,
            shutdown_grace: 5,
            dispatcher: DispatcherConfig::default(),
        }
    }
}
