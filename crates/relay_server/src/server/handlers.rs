//! Per-connection handling.
//!
//! Takes a freshly accepted TCP stream through the WebSocket upgrade, admits
//! it to the registry and runs its ingress loop to completion.

use crate::connection::{split_websocket, ConnectionRegistry};
use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::ingress::{run_ingress, DisconnectReason};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{info, warn};

/// Everything a connection task needs from the server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub path: String,
    pub idle_timeout: Option<Duration>,
}

/// Performs the WebSocket upgrade for a request on `path`.
///
/// Requests for any other path are answered with `404 Not Found`.
///
/// # Errors
///
/// [`RelayError::HandshakeFailed`] if the request was rejected or the
/// handshake could not complete.
pub async fn upgrade(stream: TcpStream, path: &str) -> Result<WebSocketStream<TcpStream>, RelayError> {
    let expected = path.to_string();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == expected {
            Ok(response)
        } else {
            let mut rejection =
                ErrorResponse::new(Some(format!("No endpoint at {}", request.uri().path())));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    accept_hdr_async(stream, callback)
        .await
        .map_err(|e| RelayError::HandshakeFailed(e.to_string()))
}

/// Drives one client connection from handshake to disconnect.
///
/// # Errors
///
/// * [`RelayError::HandshakeFailed`] - the upgrade failed; no ingress loop ran
/// * [`RelayError::CapacityExceeded`] - the registry was full; the connection
///   was closed without being admitted
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnectionContext,
) -> Result<DisconnectReason, RelayError> {
    stream.set_nodelay(true).ok();

    let mut ws = upgrade(stream, &ctx.path).await?;

    let limit = ctx.registry.max_connections();
    if limit > 0 && ctx.registry.len().await >= limit {
        let frame = CloseFrame {
            code: CloseCode::Again,
            reason: "server full".to_string().into(),
        };
        if let Err(e) = ws.close(Some(frame)).await {
            warn!("Failed to send close frame to {}: {}", addr, e);
        }
        return Err(RelayError::CapacityExceeded { limit });
    }

    let (sink, source) = split_websocket(ws);
    // A concurrent registration can still take the last slot; dropping the
    // halves closes the socket in that case.
    let handle = ctx.registry.register(Box::new(sink), Some(addr)).await?;
    info!("Connection {} established from {}", handle.id(), addr);

    Ok(run_ingress(handle, source, ctx.dispatcher, ctx.registry, ctx.idle_timeout).await)
}
