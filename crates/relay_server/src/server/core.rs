//! Core relay server implementation.
//!
//! This module contains the `RelayServer` struct, which owns the connection
//! registry and dispatcher, runs the accept loop and coordinates shutdown.

use crate::{
    config::ServerConfig,
    connection::ConnectionRegistry,
    dispatch::Dispatcher,
    error::RelayError,
    server::handlers::{handle_connection, ConnectionContext},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Listen backlog handed to the OS.
const LISTEN_BACKLOG: i32 = 1024;

/// The relay server.
///
/// Owns the single [`ConnectionRegistry`] and [`Dispatcher`] of the process
/// and hands them explicitly to every connection task.
///
/// # Lifecycle
///
/// 1. [`bind`](RelayServer::bind) the listener (fatal on failure)
/// 2. [`serve`](RelayServer::serve) accepts until [`shutdown`](RelayServer::shutdown)
/// 3. On shutdown all handles are closed and connection tasks get
///    `shutdown_grace` to drain before being aborted
pub struct RelayServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Registry of live connections
    registry: Arc<ConnectionRegistry>,

    /// Fan-out engine shared by all ingress loops
    dispatcher: Arc<Dispatcher>,

    /// Flips to `true` once shutdown is requested
    shutdown_signal: watch::Sender<bool>,
}

impl RelayServer {
    /// Creates a new relay server with the specified configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_connections,
            config.write_timeout(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), config.dispatcher.clone()));
        let (shutdown_signal, _) = watch::channel(false);

        Self {
            config,
            registry,
            dispatcher,
            shutdown_signal,
        }
    }

    /// Binds the TCP listener described by the configuration.
    ///
    /// # Errors
    ///
    /// [`RelayError::Network`] if the socket can't be created, bound or put
    /// into listening mode. This is the one failure fatal to the process.
    pub fn bind(&self) -> Result<TcpListener, RelayError> {
        let addr = self.config.bind_address;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| RelayError::Network(format!("Socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        socket
            .bind(&addr.into())
            .map_err(|e| RelayError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| RelayError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| RelayError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| RelayError::Network(format!("Tokio listener creation failed: {e}")))?;

        info!("✅ Listener bound on {}", addr);
        Ok(listener)
    }

    /// Binds the listener and serves until shutdown.
    pub async fn start(&self) -> Result<(), RelayError> {
        info!("🚀 Starting relay on {}{}", self.config.bind_address, self.config.path);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let mut shutdown_receiver = self.shutdown_signal.subscribe();
        let mut connections = JoinSet::new();
        let ctx = ConnectionContext {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            path: self.config.path.clone(),
            idle_timeout: self.config.idle_timeout(),
        };

        loop {
            tokio::select! {
                _ = async { shutdown_receiver.wait_for(|stop| *stop).await.is_ok() } => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        connections.spawn(async move {
                            match handle_connection(stream, addr, ctx).await {
                                Ok(_) => {}
                                Err(RelayError::HandshakeFailed(e)) => {
                                    warn!("Upgrade: {} from {}", e, addr);
                                }
                                Err(e) => error!("Connection error from {}: {}", addr, e),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        self.drain(connections).await;
        info!("Server stopped");
        Ok(())
    }

    /// Closes every registered handle and waits for connection tasks.
    async fn drain(&self, mut connections: JoinSet<()>) {
        info!("🧹 Closing connections...");
        self.registry.close_all().await;

        let grace = self.config.shutdown_grace();
        let wait_all = async { while connections.join_next().await.is_some() {} };
        if timeout(grace, wait_all).await.is_err() {
            warn!(
                "{} connection task(s) still running after {:?}, aborting",
                connections.len(),
                grace
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
        debug!("All connection tasks finished");
    }

    /// Requests shutdown of a running (or not yet started) server.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down relay...");
        self.shutdown_signal.send_replace(true);
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Gets the connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Gets the fan-out dispatcher.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            shutdown_grace: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = RelayServer::new(local_config());
        let listener = server.bind().expect("bind should succeed");
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_network_error() {
        let first = RelayServer::new(local_config());
        let listener = first.bind().unwrap();

        let taken = ServerConfig {
            bind_address: listener.local_addr().unwrap(),
            ..local_config()
        };
        // SO_REUSEADDR does not allow two active listeners on one port.
        let result = RelayServer::new(taken).bind();
        assert!(matches!(result, Err(RelayError::Network(_))));
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_returns_promptly() {
        let server = RelayServer::new(local_config());
        let listener = server.bind().unwrap();
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), server.serve(listener)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
