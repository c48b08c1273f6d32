//! Duplex channel abstraction.
//!
//! The relay core never talks to a transport directly. It only needs a way to
//! read one frame at a time from a client and a way to write one frame to it.
//! [`FrameSource`] and [`FrameSink`] capture exactly that, and this module
//! provides the WebSocket implementation built on `tokio-tungstenite`.

use crate::error::RelayError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::trace;

/// Frame-type tag carried alongside every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// An opaque data frame relayed between clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Text(_) => FrameKind::Text,
            Frame::Binary(_) => FrameKind::Binary,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        }
    }
}

/// Write half of a duplex channel.
///
/// Implementations do not need to be internally synchronized: the connection
/// handle serializes all writes to a sink behind its own lock.
#[async_trait]
pub trait FrameSink: Send {
    /// Writes a single frame, returning once the transport accepted it.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), RelayError>;

    /// Releases the channel, notifying the peer where the transport allows it.
    async fn close(&mut self) -> Result<(), RelayError>;
}

/// Read half of a duplex channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Reads the next data frame.
    ///
    /// Returns `Ok(None)` once the peer closed the channel cleanly.
    async fn read_frame(&mut self) -> Result<Option<Frame>, RelayError>;
}

/// WebSocket write half.
pub struct WsFrameSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// WebSocket read half.
pub struct WsFrameSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

/// Splits an upgraded WebSocket into the two halves the relay core consumes.
pub fn split_websocket<S>(ws: WebSocketStream<S>) -> (WsFrameSink<S>, WsFrameSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = ws.split();
    (WsFrameSink { inner: sink }, WsFrameSource { inner: stream })
}

#[async_trait]
impl<S> FrameSink for WsFrameSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.inner
            .send(frame.into())
            .await
            .map_err(|e| RelayError::Internal(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        SinkExt::close(&mut self.inner)
            .await
            .map_err(|e| RelayError::Internal(e.to_string()))
    }
}

#[async_trait]
impl<S> FrameSource for WsFrameSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Option<Frame>, RelayError> {
        while let Some(msg) = self.inner.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(Some(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => return Ok(Some(Frame::Binary(data.to_vec()))),
                Ok(Message::Close(frame)) => {
                    trace!("Peer sent close frame: {:?}", frame);
                    return Ok(None);
                }
                // tungstenite answers pings on its own
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Err(RelayError::ReadFailed(e.to_string())),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_and_len() {
        let text = Frame::Text("hello".to_string());
        assert_eq!(text.kind(), FrameKind::Text);
        assert_eq!(text.len(), 5);

        let binary = Frame::Binary(vec![1, 2, 3]);
        assert_eq!(binary.kind(), FrameKind::Binary);
        assert_eq!(binary.len(), 3);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }

    #[test]
    fn test_frame_into_message() {
        let msg: Message = Frame::Text("hi".to_string()).into();
        assert!(matches!(msg, Message::Text(ref t) if t.as_str() == "hi"));

        let msg: Message = Frame::Binary(vec![9, 8]).into();
        assert!(matches!(msg, Message::Binary(ref b) if b.as_ref() == [9u8, 8]));
    }
}
