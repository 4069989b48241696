//! In-process transport.
//!
//! [`MemoryTransport`] plays the pull side and hands out connections;
//! [`FrameSender`] plays the push side. At most one connection is open at a
//! time: connecting again replaces the previous one, and frames sent while
//! nothing is connected are rejected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connection, Endpoint, Frame, Transport, TransportError};
use crate::stream::proto::Packet;

#[derive(Debug, Default)]
struct Shared {
    current: Mutex<Option<(u64, mpsc::UnboundedSender<Frame>)>>,
    next_id: AtomicU64,
    refuse: AtomicBool,
}

impl Shared {
    fn detach(&self, id: u64) {
        let mut current = self.current.lock();
        if matches!(current.as_ref(), Some((open, _)) if *open == id) {
            *current = None;
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push side bound to this transport.
    pub fn sender(&self) -> FrameSender {
        FrameSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Makes every subsequent connect fail as unreachable.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::Release);
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> u64 {
        self.shared.next_id.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MemoryConnection, TransportError> {
        if self.shared.refuse.load(Ordering::Acquire) {
            return Err(TransportError::Unreachable(endpoint.to_string()));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.current.lock() = Some((id, tx));
        Ok(MemoryConnection {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Pull side of an in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    rx: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.shared.detach(self.id);
        self.rx.close();
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.detach(self.id);
    }
}

/// Push side of a [`MemoryTransport`].
#[derive(Clone, Debug)]
pub struct FrameSender {
    shared: Arc<Shared>,
}

impl FrameSender {
    /// Sends one frame to the open connection.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let current = self.shared.current.lock();
        let (_, tx) = current.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Frame::text(text))
    }

    /// Encodes and sends a packet as a single-part text frame.
    pub fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        self.send_text(packet.to_text()?)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.current.lock().is_some()
    }

    /// Drops the open connection from the push side; the pull side sees
    /// [`TransportError::Closed`] once buffered frames are drained.
    pub fn disconnect(&self) {
        self.shared.current.lock().take();
    }
}
