//! Websocket transport.
//!
//! Each text or binary websocket message is one single-part frame. Pings are
//! answered while waiting; a close frame or socket error ends the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Connection, Endpoint, Frame, Transport, TransportError};

/// Connects to `ws://{host}:{port}{path}`.
#[derive(Clone, Debug)]
pub struct WsTransport {
    path: String,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            path: "/".to_string(),
        }
    }

    /// Sets the request path appended to the endpoint.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = path.trim();
        self.path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self
    }

    fn url(&self, endpoint: &Endpoint) -> String {
        format!("ws://{}:{}{}", endpoint.host, endpoint.port, self.path)
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Connection = WsConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<WsConnection, TransportError> {
        let url = self.url(endpoint);
        let (socket, _) = connect_async(url.as_str()).await?;
        debug!(event = "ws_connected", url = %url);
        Ok(WsConnection {
            socket,
            closed: false,
        })
    }
}

/// Open websocket connection.
pub struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let next = match tokio::time::timeout_at(deadline, self.socket.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::single(text.as_bytes().to_vec())))
                }
                Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::single(data.to_vec()))),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(err) = self.socket.send(Message::Pong(payload)).await {
                        self.closed = true;
                        return Err(TransportError::WebSocket(err));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    self.closed = true;
                    return Err(TransportError::WebSocket(err));
                }
                None => {
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.socket.close(None).await {
            debug!(event = "ws_close_failed", error = %err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    use super::WsTransport;
    use crate::stream::transport::{Connection, Endpoint, Transport, TransportError};

    #[test]
    fn url_uses_root_path_by_default() {
        let transport = WsTransport::new();
        assert_eq!(
            transport.url(&Endpoint::new("localhost", 5555)),
            "ws://localhost:5555/"
        );
    }

    #[test]
    fn path_override_is_normalized() {
        let transport = WsTransport::new().with_path("  stream/packets \n");
        assert_eq!(
            transport.url(&Endpoint::new("127.0.0.1", 8080)),
            "ws://127.0.0.1:8080/stream/packets"
        );
    }

    #[tokio::test]
    async fn failed_pong_marks_the_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ws listener");
        let port = listener.local_addr().expect("listener address").port();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(stream).await.expect("ws handshake");
            socket
                .send(Message::Ping(vec![1, 2, 3]))
                .await
                .expect("send ping");
            // Hold the socket open without answering the client's close.
            let _ = release_rx.await;
        });

        let mut connection = WsTransport::new()
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .expect("connect");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Once the local close handshake started, answering the ping fails.
        connection.socket.close(None).await.expect("start close");
        let received = connection.receive(Duration::from_secs(2)).await;
        assert!(matches!(received, Err(TransportError::WebSocket(_))));
        assert!(connection.closed);
        assert!(matches!(
            connection.receive(Duration::from_millis(10)).await,
            Err(TransportError::Closed)
        ));
        connection.close().await;

        let _ = release_tx.send(());
        server.await.expect("ws server joins");
    }
}
