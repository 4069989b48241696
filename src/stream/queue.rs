//! Unbounded FIFO hand-off between the listener and the dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::stream::proto::Packet;

/// Returned when pushing into a queue that has been released.
#[derive(Debug, Error)]
#[error("packet queue has been released")]
pub struct QueueClosed(pub Packet);

/// Outcome of [`PacketQueue::take`].
#[derive(Debug)]
pub enum Take {
    Packet(Packet),
    /// The caller's cancellation token fired first.
    Cancelled,
    /// The queue was released while waiting.
    Closed,
}

/// Ordered packet queue with a single consumer.
///
/// Pushing never blocks: a slow consumer grows the backlog instead of
/// stalling network reads.
#[derive(Debug)]
pub struct PacketQueue {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
    released: CancellationToken,
    backlog: AtomicUsize,
}

impl PacketQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            released: CancellationToken::new(),
            backlog: AtomicUsize::new(0),
        }
    }

    /// Appends a packet to the tail.
    pub fn push(&self, packet: Packet) -> Result<(), QueueClosed> {
        if self.released.is_cancelled() {
            return Err(QueueClosed(packet));
        }
        self.backlog.fetch_add(1, Ordering::AcqRel);
        self.tx.send(packet).map_err(|err| {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            QueueClosed(err.0)
        })
    }

    /// Waits for the head packet, cancellation, or release, whichever comes
    /// first. Cancellation wins over a packet that is already available.
    pub async fn take(&self, cancel: &CancellationToken) -> Take {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Take::Cancelled,
            _ = self.released.cancelled() => return Take::Closed,
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Take::Cancelled,
            _ = self.released.cancelled() => Take::Closed,
            next = rx.recv() => match next {
                Some(packet) => {
                    self.backlog.fetch_sub(1, Ordering::AcqRel);
                    Take::Packet(packet)
                }
                None => Take::Closed,
            },
        }
    }

    /// Releases the queue. Pending and future takes return [`Take::Closed`]
    /// and pushes fail; packets still buffered are never handed out.
    pub fn release(&self) {
        self.released.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }

    /// Number of packets pushed but not yet taken.
    pub fn len(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{PacketQueue, Take};
    use crate::stream::proto::{LogPacket, Packet};

    fn log(message: &str) -> Packet {
        Packet::Log(LogPacket {
            message: message.to_string(),
            algorithm_id: String::new(),
        })
    }

    fn message_of(take: Take) -> String {
        match take {
            Take::Packet(Packet::Log(packet)) => packet.message,
            other => panic!("expected a log packet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn packets_come_out_in_push_order() {
        let queue = PacketQueue::new();
        let cancel = CancellationToken::new();
        for index in 0..5 {
            queue.push(log(&format!("m{index}"))).expect("push");
        }
        assert_eq!(queue.len(), 5);

        for index in 0..5 {
            assert_eq!(message_of(queue.take(&cancel).await), format!("m{index}"));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn take_waits_for_a_later_push() {
        let queue = Arc::new(PacketQueue::new());
        let cancel = CancellationToken::new();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.push(log("late")).expect("push");
            })
        };

        let taken = tokio::time::timeout(Duration::from_secs(2), queue.take(&cancel))
            .await
            .expect("take should finish");
        assert_eq!(message_of(taken), "late");
        producer.await.expect("producer joins");
    }

    #[tokio::test]
    async fn cancellation_wakes_a_pending_take() {
        let queue = Arc::new(PacketQueue::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.take(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let taken = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("take should finish")
            .expect("waiter joins");
        assert!(matches!(taken, Take::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_wins_over_buffered_packets() {
        let queue = PacketQueue::new();
        let cancel = CancellationToken::new();
        queue.push(log("pending")).expect("push");
        cancel.cancel();

        assert!(matches!(queue.take(&cancel).await, Take::Cancelled));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn released_queue_rejects_pushes_and_closes_takes() {
        let queue = PacketQueue::new();
        let cancel = CancellationToken::new();
        queue.push(log("buffered")).expect("push");
        queue.release();

        assert!(queue.is_released());
        let rejected = queue.push(log("after release")).expect_err("released");
        assert!(matches!(rejected.0, Packet::Log(_)));
        assert!(matches!(queue.take(&cancel).await, Take::Closed));
    }
}
