//! In-process channel pair backed by tokio mpsc queues.

use super::{ChannelReceiver, ChannelSender};
use crate::error::{Result, RpcError};
use crate::serializer::Payload;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sending half of an in-memory endpoint.
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::UnboundedSender<Payload>,
}

/// Receiving half of an in-memory endpoint.
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Payload>,
}

/// One side of a connected pair.
pub type Endpoint = (MemorySender, MemoryReceiver);

/// Create two connected endpoints. What one side sends, the other receives.
///
/// The queues are unbounded so two engines that are both busy sending can
/// never wait on each other.
pub fn pair() -> (Endpoint, Endpoint) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();

    (
        (MemorySender { tx: left_tx }, MemoryReceiver { rx: left_rx }),
        (MemorySender { tx: right_tx }, MemoryReceiver { rx: right_rx }),
    )
}

impl MemorySender {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ChannelSender for MemorySender {
    async fn send(&mut self, payload: Payload) -> Result<()> {
        self.tx.send(payload).map_err(|_| RpcError::ChannelClosed)
    }
}

impl MemoryReceiver {
    /// Stop accepting payloads. Queued payloads can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[async_trait]
impl ChannelReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<Result<Payload>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let ((mut left_tx, mut left_rx), (mut right_tx, mut right_rx)) = pair();

        left_tx.send(Payload::from("ping")).await.unwrap();
        right_tx.send(Payload::from("pong")).await.unwrap();

        assert_eq!(right_rx.recv().await.unwrap().unwrap(), Payload::from("ping"));
        assert_eq!(left_rx.recv().await.unwrap().unwrap(), Payload::from("pong"));
    }

    #[tokio::test]
    async fn test_dropped_peer_closes_channel() {
        let ((mut left_tx, left_rx), (right_tx, mut right_rx)) = pair();

        drop(right_tx);
        drop(left_rx);

        assert!(right_rx.recv().await.is_none());
        assert!(matches!(
            left_tx.send(Payload::from("late")).await,
            Err(RpcError::ChannelClosed)
        ));
    }
}
