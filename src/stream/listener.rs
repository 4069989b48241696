//! Network-side loop: receives frames, decodes packets, enqueues them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::{retry_connect, RetryPolicy};
use crate::stream::proto::{DecodeError, Packet};
use crate::stream::queue::PacketQueue;
use crate::stream::transport::{Connection, Endpoint, Frame, Transport};

/// Whether the receive loop keeps going after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Listener<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) endpoint: Endpoint,
    pub(crate) queue: Arc<PacketQueue>,
    pub(crate) cancel: CancellationToken,
    pub(crate) receive_timeout: Duration,
    pub(crate) connect_retry: RetryPolicy,
}

impl<T: Transport> Listener<T> {
    /// Connects and pumps frames until cancelled or the connection fails.
    ///
    /// The connection is closed on every exit path.
    pub(crate) async fn run(self) {
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();
        let connected = retry_connect(&self.connect_retry, &self.cancel, |_| {
            let transport = Arc::clone(&transport);
            let endpoint = endpoint.clone();
            async move { transport.connect(&endpoint).await }
        })
        .await;

        let mut connection = match connected {
            Ok(Some(connection)) => connection,
            Ok(None) => return,
            Err(error) => {
                warn!(
                    event = "listener_connect_failed",
                    endpoint = %self.endpoint,
                    error = %error
                );
                return;
            }
        };
        debug!(event = "listener_connected", endpoint = %self.endpoint);

        while !self.cancel.is_cancelled() {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = connection.receive(self.receive_timeout) => received,
            };

            match received {
                Ok(None) => continue,
                Ok(Some(frame)) => {
                    if self.accept(frame) == Flow::Stop {
                        break;
                    }
                }
                Err(error) => {
                    warn!(
                        event = "listener_receive_failed",
                        endpoint = %self.endpoint,
                        error = %error
                    );
                    break;
                }
            }
        }

        connection.close().await;
        debug!(event = "listener_stopped", endpoint = %self.endpoint);
    }

    fn accept(&self, frame: Frame) -> Flow {
        let Some(body) = frame.single_part() else {
            debug!(
                event = "listener_frame_skipped",
                parts = frame.part_count()
            );
            return Flow::Continue;
        };

        let text = match std::str::from_utf8(body) {
            Ok(text) => text,
            Err(error) => {
                warn!(event = "listener_frame_not_utf8", error = %error);
                return Flow::Continue;
            }
        };

        let packet = match Packet::from_text(text) {
            Ok(packet) => packet,
            Err(DecodeError::UnknownKind(kind)) => {
                warn!(event = "listener_unknown_packet_kind", kind = %kind);
                return Flow::Continue;
            }
            Err(error) => {
                warn!(event = "listener_decode_failed", error = %error);
                return Flow::Continue;
            }
        };

        match self.queue.push(packet) {
            Ok(()) => Flow::Continue,
            Err(rejected) => {
                warn!(
                    event = "listener_queue_released",
                    endpoint = %self.endpoint,
                    kind = %rejected.0.kind()
                );
                Flow::Stop
            }
        }
    }
}
