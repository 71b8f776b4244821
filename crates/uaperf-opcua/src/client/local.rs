// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process subscription service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use uaperf_core::error::UaResult;
use uaperf_core::types::{EventFilter, NodeId};

use crate::notification::{MonitoredItemHandle, NotificationBatch, SubscriptionId};
use crate::server::{LocalTransport, SubscriptionEngine};

use super::subscription::{ClientSubscriptionHandle, SubscriptionCallback, SubscriptionService};

/// Talks to a [`SubscriptionEngine`] in the same process.
///
/// Batches bypass the wire entirely and go through a [`LocalTransport`].
#[derive(Clone)]
pub struct LocalSession {
    engine: Arc<SubscriptionEngine>,
}

impl LocalSession {
    /// Creates a session over `engine`.
    pub fn new(engine: Arc<SubscriptionEngine>) -> Self {
        Self { engine }
    }

    /// The engine behind this session.
    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// Creates a subscription dispatching to `callback`.
    pub async fn create_subscription(
        &self,
        publishing_interval: Duration,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> UaResult<ClientSubscriptionHandle> {
        ClientSubscriptionHandle::create(Arc::new(self.clone()), publishing_interval, callback).await
    }
}

#[async_trait]
impl SubscriptionService for LocalSession {
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        inbox: mpsc::UnboundedSender<NotificationBatch>,
    ) -> UaResult<SubscriptionId> {
        let transport = Arc::new(LocalTransport::new(inbox));
        Ok(self.engine.create_subscription(publishing_interval, transport))
    }

    async fn subscribe_data_change(
        &self,
        subscription_id: SubscriptionId,
        node_id: &NodeId,
    ) -> UaResult<MonitoredItemHandle> {
        self.engine.subscribe_data_change(subscription_id, node_id)
    }

    async fn subscribe_events(
        &self,
        subscription_id: SubscriptionId,
        notifier: Option<NodeId>,
        filter: Option<EventFilter>,
    ) -> UaResult<MonitoredItemHandle> {
        self.engine.subscribe_events(subscription_id, notifier, filter)
    }

    async fn unsubscribe(&self, subscription_id: SubscriptionId, handle: MonitoredItemHandle) -> UaResult<()> {
        self.engine.unsubscribe(subscription_id, handle)
    }

    async fn close_subscription(&self, subscription_id: SubscriptionId) -> UaResult<()> {
        self.engine.close_subscription(subscription_id)
    }
}

impl std::fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSession")
            .field("subscriptions", &self.engine.subscription_count())
            .finish()
    }
}
