//! Transport seam between the listener and the remote producer.
//!
//! - `ws`: websocket client transport.
//! - `memory`: in-process push/pull pair for embedding and tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// In-process transport.
pub mod memory;
/// Websocket transport.
pub mod ws;

pub use memory::{FrameSender, MemoryConnection, MemoryTransport};
pub use ws::{WsConnection, WsTransport};

/// Address of the remote producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One received transport message, possibly multipart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    parts: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(parts: Vec<Vec<u8>>) -> Self {
        Self { parts }
    }

    pub fn single(body: impl Into<Vec<u8>>) -> Self {
        Self {
            parts: vec![body.into()],
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::single(text.into().into_bytes())
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Body of a single-part frame; `None` for any other part count.
    pub fn single_part(&self) -> Option<&[u8]> {
        match self.parts.as_slice() {
            [body] => Some(body),
            _ => None,
        }
    }
}

/// Errors produced by transport connections.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Producer could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// Connection was closed by the peer or locally.
    #[error("connection closed")]
    Closed,

    /// Outbound frame could not be encoded.
    #[error("frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Opens connections to a producer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Connection, TransportError>;
}

/// An open connection owned by one listener.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Waits at most `timeout` for the next message; `Ok(None)` on timeout.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, TransportError>;

    /// Closes the connection. Safe to call more than once.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::{Endpoint, Frame};

    #[test]
    fn endpoint_displays_as_host_and_port() {
        assert_eq!(Endpoint::new("localhost", 5555).to_string(), "localhost:5555");
    }

    #[test]
    fn only_single_part_frames_expose_a_body() {
        assert_eq!(Frame::text("{}").single_part(), Some(&b"{}"[..]));
        assert_eq!(Frame::new(Vec::new()).single_part(), None);
        let multipart = Frame::new(vec![b"topic".to_vec(), b"{}".to_vec()]);
        assert_eq!(multipart.part_count(), 2);
        assert_eq!(multipart.single_part(), None);
    }
}
