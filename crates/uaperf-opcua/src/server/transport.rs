// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification delivery from a subscription's publisher to its client.
//!
//! A [`NotificationTransport`] is bound to exactly one subscription and is
//! only ever driven by that subscription's publisher task, so batches of
//! one subscription arrive in publish order. Delivery never retries: a
//! closed target yields `DeliveryFailed` and the batch is dropped.

use async_trait::async_trait;
use tokio::sync::mpsc;

use uaperf_core::error::{TransportError, UaResult};

use crate::notification::{NotificationBatch, SubscriptionId};
use crate::protocol::ServerMessage;

// =============================================================================
// NotificationTransport
// =============================================================================

/// Delivers notification batches to one subscriber.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Delivers one batch.
    ///
    /// # Errors
    ///
    /// `DeliveryFailed` if the target is closed or disconnected.
    async fn deliver(&self, subscription_id: SubscriptionId, batch: NotificationBatch) -> UaResult<()>;

    /// Returns `false` once the target can no longer receive batches.
    fn is_connected(&self) -> bool;
}

// =============================================================================
// LocalTransport
// =============================================================================

/// In-process transport pushing batches into a client handle's inbox.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    inbox: mpsc::UnboundedSender<NotificationBatch>,
}

impl LocalTransport {
    /// Creates a transport feeding `inbox`.
    pub fn new(inbox: mpsc::UnboundedSender<NotificationBatch>) -> Self {
        Self { inbox }
    }

    /// Creates a transport together with its receiving end.
    pub fn with_inbox() -> (Self, mpsc::UnboundedReceiver<NotificationBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl NotificationTransport for LocalTransport {
    async fn deliver(&self, subscription_id: SubscriptionId, batch: NotificationBatch) -> UaResult<()> {
        self.inbox.send(batch).map_err(|_| {
            TransportError::delivery_failed(subscription_id.value(), "subscriber inbox closed").into()
        })
    }

    fn is_connected(&self) -> bool {
        !self.inbox.is_closed()
    }
}

// =============================================================================
// SessionTransport
// =============================================================================

/// Transport writing `Publish` frames into a TCP session's outbound queue.
///
/// The queue is bounded; a slow client back-pressures the publisher of the
/// subscription, never the address space writers.
#[derive(Debug, Clone)]
pub struct SessionTransport {
    outbound: mpsc::Sender<ServerMessage>,
}

impl SessionTransport {
    /// Creates a transport feeding the session writer.
    pub fn new(outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl NotificationTransport for SessionTransport {
    async fn deliver(&self, subscription_id: SubscriptionId, batch: NotificationBatch) -> UaResult<()> {
        let message = ServerMessage::Publish {
            subscription_id,
            batch,
        };
        self.outbound.send(message).await.map_err(|_| {
            TransportError::delivery_failed(subscription_id.value(), "session closed").into()
        })
    }

    fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uaperf_core::error::UaError;

    fn batch(id: u32, seq: u32) -> NotificationBatch {
        NotificationBatch::new(SubscriptionId(id), seq, Vec::new())
    }

    #[tokio::test]
    async fn test_local_transport_preserves_order() {
        let (transport, mut inbox) = LocalTransport::with_inbox();
        for seq in 1..=3 {
            transport.deliver(SubscriptionId(1), batch(1, seq)).await.unwrap();
        }
        for seq in 1..=3 {
            assert_eq!(inbox.recv().await.unwrap().sequence_number, seq);
        }
    }

    #[tokio::test]
    async fn test_local_transport_closed_inbox() {
        let (transport, inbox) = LocalTransport::with_inbox();
        drop(inbox);
        assert!(!transport.is_connected());
        let err = transport.deliver(SubscriptionId(1), batch(1, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            UaError::Transport(TransportError::DeliveryFailed { subscription_id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_session_transport_wraps_publish() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = SessionTransport::new(tx);
        transport.deliver(SubscriptionId(2), batch(2, 1)).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Publish { subscription_id, batch } => {
                assert_eq!(subscription_id, SubscriptionId(2));
                assert_eq!(batch.sequence_number, 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        drop(rx);
        assert!(!transport.is_connected());
        assert!(transport.deliver(SubscriptionId(2), batch(2, 2)).await.is_err());
    }
}
