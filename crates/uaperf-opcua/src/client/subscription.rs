// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-side subscription handle and callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   inbox (mpsc)   ┌──────────────────────┐
//! │ SubscriptionService  │ ───────────────▶ │ dispatcher task      │
//! │ (local or remote)    │                  │ one per subscription │
//! └──────────────────────┘                  └──────────────────────┘
//!            ▲                                         │ one call per entry
//!            │ subscribe / unsubscribe / close         ▼
//! ┌──────────────────────┐                  ┌──────────────────────┐
//! │ClientSubscriptionHandle                 │ SubscriptionCallback │
//! └──────────────────────┘                  └──────────────────────┘
//! ```
//!
//! Dispatch for one subscription is sequential, so a slow callback only
//! delays later entries of its own subscription. [`ClientSubscriptionHandle::close`]
//! waits for an in-flight callback to return; no callback fires after it
//! completes.
//!
//! # Example
//!
//! ```rust,ignore
//! let (callback, mut entries) = ChannelCallback::with_channel(1024);
//! let subscription = client
//!     .create_subscription(Duration::from_millis(1), Arc::new(callback))
//!     .await?;
//! subscription.subscribe_data_change(&perf_test_var).await?;
//!
//! while let Some(entry) = entries.recv().await {
//!     println!("{:?}", entry);
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use uaperf_core::error::{SubscriptionError, UaResult};
use uaperf_core::types::{AttributeId, DataValue, Event, EventFilter, NodeId};

use crate::notification::{MonitoredItemHandle, NotificationBatch, NotificationEntry, SubscriptionId};

// =============================================================================
// Subscription Callback
// =============================================================================

/// Receives dispatched notifications.
///
/// Implement this trait to handle data changes and events. Calls for one
/// subscription never overlap.
#[async_trait]
pub trait SubscriptionCallback: Send + Sync {
    /// Called once per data change entry.
    async fn on_data_change(
        &self,
        handle: MonitoredItemHandle,
        node_id: &NodeId,
        value: &DataValue,
        attribute: AttributeId,
    );

    /// Called once per event entry.
    async fn on_event(&self, _handle: MonitoredItemHandle, _event: &Event) {
        // Default: no-op
    }
}

/// Forwards entries into a channel.
pub struct ChannelCallback {
    sender: mpsc::Sender<NotificationEntry>,
}

impl ChannelCallback {
    /// Creates a new channel callback.
    pub fn new(sender: mpsc::Sender<NotificationEntry>) -> Self {
        Self { sender }
    }

    /// Creates a new channel callback with a receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SubscriptionCallback for ChannelCallback {
    async fn on_data_change(
        &self,
        handle: MonitoredItemHandle,
        node_id: &NodeId,
        value: &DataValue,
        attribute: AttributeId,
    ) {
        let entry = NotificationEntry::DataChange {
            handle,
            node_id: node_id.clone(),
            attribute,
            value: value.clone(),
        };
        // Best effort send, ignore errors
        let _ = self.sender.send(entry).await;
    }

    async fn on_event(&self, handle: MonitoredItemHandle, event: &Event) {
        let entry = NotificationEntry::Event {
            handle,
            event: event.clone(),
        };
        let _ = self.sender.send(entry).await;
    }
}

/// Logs every entry at INFO.
#[derive(Debug, Clone)]
pub struct LoggingCallback {
    label: String,
}

impl LoggingCallback {
    /// Creates a logger tagging lines with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl SubscriptionCallback for LoggingCallback {
    async fn on_data_change(
        &self,
        handle: MonitoredItemHandle,
        node_id: &NodeId,
        value: &DataValue,
        _attribute: AttributeId,
    ) {
        info!(label = %self.label, handle = %handle, node_id = %node_id, value = %value.value, "Data change");
    }

    async fn on_event(&self, handle: MonitoredItemHandle, event: &Event) {
        info!(
            label = %self.label,
            handle = %handle,
            source = %event.source_name,
            severity = event.severity,
            message_len = event.message.len(),
            "Event"
        );
    }
}

// =============================================================================
// Subscription Service
// =============================================================================

/// Server operations a subscription handle needs.
///
/// Implemented in-process by [`LocalSession`](super::LocalSession) and over
/// TCP by [`UaClient`](super::UaClient).
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Creates a subscription whose batches are pushed into `inbox`.
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        inbox: mpsc::UnboundedSender<NotificationBatch>,
    ) -> UaResult<SubscriptionId>;

    /// Monitors a variable's value.
    async fn subscribe_data_change(
        &self,
        subscription_id: SubscriptionId,
        node_id: &NodeId,
    ) -> UaResult<MonitoredItemHandle>;

    /// Monitors a notifier's events.
    async fn subscribe_events(
        &self,
        subscription_id: SubscriptionId,
        notifier: Option<NodeId>,
        filter: Option<EventFilter>,
    ) -> UaResult<MonitoredItemHandle>;

    /// Removes a monitored item.
    async fn unsubscribe(&self, subscription_id: SubscriptionId, handle: MonitoredItemHandle) -> UaResult<()>;

    /// Closes a subscription.
    async fn close_subscription(&self, subscription_id: SubscriptionId) -> UaResult<()>;
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Dispatcher {
    subscription_id: SubscriptionId,
    callback: Arc<dyn SubscriptionCallback>,
    closed: AtomicBool,
    // Held for the duration of one batch; `close` acquires it to wait out
    // an in-flight callback.
    gate: Mutex<()>,
    dispatched: AtomicU64,
}

impl Dispatcher {
    async fn dispatch(&self, batch: NotificationBatch) {
        let _gate = self.gate.lock().await;
        for entry in &batch.entries {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            match entry {
                NotificationEntry::DataChange {
                    handle,
                    node_id,
                    attribute,
                    value,
                } => {
                    self.callback
                        .on_data_change(*handle, node_id, value, *attribute)
                        .await
                }
                NotificationEntry::Event { handle, event } => self.callback.on_event(*handle, event).await,
            }
            self.dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn run(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<NotificationBatch>) {
        while let Some(batch) = inbox.recv().await {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            self.dispatch(batch).await;
        }
        debug!(subscription_id = %self.subscription_id, "Dispatcher stopped");
    }
}

// =============================================================================
// ClientSubscriptionHandle
// =============================================================================

/// Client-owned subscription.
///
/// Dropping the handle without calling [`close`](Self::close) closes the
/// subscription in the background.
pub struct ClientSubscriptionHandle {
    id: SubscriptionId,
    service: Arc<dyn SubscriptionService>,
    dispatcher: Arc<Dispatcher>,
    task: JoinHandle<()>,
}

impl ClientSubscriptionHandle {
    /// Creates a subscription on `service` and starts its dispatcher.
    pub async fn create(
        service: Arc<dyn SubscriptionService>,
        publishing_interval: Duration,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> UaResult<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let id = service.create_subscription(publishing_interval, inbox_tx).await?;

        let dispatcher = Arc::new(Dispatcher {
            subscription_id: id,
            callback,
            closed: AtomicBool::new(false),
            gate: Mutex::new(()),
            dispatched: AtomicU64::new(0),
        });
        let task = tokio::spawn(Arc::clone(&dispatcher).run(inbox_rx));

        debug!(subscription_id = %id, "Client subscription created");
        Ok(Self {
            id,
            service,
            dispatcher,
            task,
        })
    }

    /// Server-assigned id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns `true` once `close` was called or the handle was dropped.
    pub fn is_closed(&self) -> bool {
        self.dispatcher.closed.load(Ordering::Acquire)
    }

    /// Entries delivered to the callback so far.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatcher.dispatched.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> UaResult<()> {
        if self.is_closed() {
            Err(SubscriptionError::closed(self.id.value()).into())
        } else {
            Ok(())
        }
    }

    /// Monitors a variable's value.
    pub async fn subscribe_data_change(&self, node_id: &NodeId) -> UaResult<MonitoredItemHandle> {
        self.ensure_open()?;
        self.service.subscribe_data_change(self.id, node_id).await
    }

    /// Monitors a notifier's events; the Server node when `notifier` is `None`.
    pub async fn subscribe_events(
        &self,
        notifier: Option<NodeId>,
        filter: Option<EventFilter>,
    ) -> UaResult<MonitoredItemHandle> {
        self.ensure_open()?;
        self.service.subscribe_events(self.id, notifier, filter).await
    }

    /// Removes a monitored item.
    pub async fn unsubscribe(&self, handle: MonitoredItemHandle) -> UaResult<()> {
        self.ensure_open()?;
        self.service.unsubscribe(self.id, handle).await
    }

    /// Dispatches one batch on the caller's task.
    ///
    /// Normally driven by the dispatcher task; entries are delivered in
    /// batch order, one callback per entry.
    pub async fn on_notification(&self, batch: NotificationBatch) {
        if !self.is_closed() {
            self.dispatcher.dispatch(batch).await;
        }
    }

    /// Closes the subscription. No callback fires after this returns.
    ///
    /// Must not be called from inside this subscription's own callback.
    ///
    /// # Errors
    ///
    /// `SubscriptionClosed` if already closed; otherwise whatever the
    /// server reports.
    pub async fn close(&self) -> UaResult<()> {
        if self.dispatcher.closed.swap(true, Ordering::AcqRel) {
            return Err(SubscriptionError::closed(self.id.value()).into());
        }
        // Wait out an in-flight callback; later entries see the flag.
        drop(self.dispatcher.gate.lock().await);
        self.task.abort();

        let result = self.service.close_subscription(self.id).await;
        debug!(subscription_id = %self.id, ok = result.is_ok(), "Client subscription closed");
        result
    }
}

impl Drop for ClientSubscriptionHandle {
    fn drop(&mut self) {
        if self.dispatcher.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();

        let service = Arc::clone(&self.service);
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = service.close_subscription(id).await {
                    debug!(subscription_id = %id, error = %e, "Background close failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for ClientSubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSubscriptionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dispatched", &self.dispatched_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    use parking_lot::Mutex as SyncMutex;
    use uaperf_core::types::Value;

    /// Records service calls and hands out inboxes to the test.
    #[derive(Default)]
    struct MockService {
        next_id: AtomicU32,
        inboxes: SyncMutex<HashMap<SubscriptionId, mpsc::UnboundedSender<NotificationBatch>>>,
        closed: SyncMutex<Vec<SubscriptionId>>,
    }

    impl MockService {
        fn inbox(&self, id: SubscriptionId) -> mpsc::UnboundedSender<NotificationBatch> {
            self.inboxes.lock().get(&id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl SubscriptionService for MockService {
        async fn create_subscription(
            &self,
            _publishing_interval: Duration,
            inbox: mpsc::UnboundedSender<NotificationBatch>,
        ) -> UaResult<SubscriptionId> {
            let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
            self.inboxes.lock().insert(id, inbox);
            Ok(id)
        }

        async fn subscribe_data_change(&self, _id: SubscriptionId, _node_id: &NodeId) -> UaResult<MonitoredItemHandle> {
            Ok(MonitoredItemHandle(1))
        }

        async fn subscribe_events(
            &self,
            _id: SubscriptionId,
            _notifier: Option<NodeId>,
            _filter: Option<EventFilter>,
        ) -> UaResult<MonitoredItemHandle> {
            Ok(MonitoredItemHandle(2))
        }

        async fn unsubscribe(&self, _id: SubscriptionId, _handle: MonitoredItemHandle) -> UaResult<()> {
            Ok(())
        }

        async fn close_subscription(&self, id: SubscriptionId) -> UaResult<()> {
            self.closed.lock().push(id);
            Ok(())
        }
    }

    fn data_batch(id: SubscriptionId, values: &[i32]) -> NotificationBatch {
        let entries = values
            .iter()
            .map(|v| NotificationEntry::DataChange {
                handle: MonitoredItemHandle(1),
                node_id: NodeId::string(2, "perfTestVar"),
                attribute: AttributeId::Value,
                value: DataValue::new(Value::Int32(*v), chrono::Utc::now()),
            })
            .collect();
        NotificationBatch::new(id, 1, entries)
    }

    /// Blocks inside the callback until released.
    struct SlowCallback {
        entered: mpsc::UnboundedSender<i32>,
        release: Mutex<mpsc::UnboundedReceiver<()>>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl SubscriptionCallback for SlowCallback {
        async fn on_data_change(&self, _h: MonitoredItemHandle, _n: &NodeId, value: &DataValue, _a: AttributeId) {
            let _ = self.entered.send(value.value.as_i32().unwrap_or_default());
            self.release.lock().await.recv().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dispatch_in_batch_order() {
        let service = Arc::new(MockService::default());
        let (callback, mut entries) = ChannelCallback::with_channel(16);
        let handle = ClientSubscriptionHandle::create(service.clone(), Duration::ZERO, Arc::new(callback))
            .await
            .unwrap();

        let inbox = service.inbox(handle.id());
        inbox.send(data_batch(handle.id(), &[1, 2])).unwrap();
        inbox.send(data_batch(handle.id(), &[3])).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            match entries.recv().await.unwrap() {
                NotificationEntry::DataChange { value, .. } => seen.push(value.value.as_i32().unwrap()),
                other => panic!("unexpected entry: {:?}", other),
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let service = Arc::new(MockService::default());
        let handle = ClientSubscriptionHandle::create(service.clone(), Duration::ZERO, Arc::new(LoggingCallback::new("t")))
            .await
            .unwrap();

        handle.close().await.unwrap();
        let err = handle.close().await.unwrap_err();
        assert!(matches!(
            err,
            uaperf_core::error::UaError::Subscription(SubscriptionError::SubscriptionClosed { .. })
        ));
        assert!(handle.subscribe_data_change(&NodeId::SERVER).await.is_err());
        assert_eq!(service.closed.lock().clone(), vec![handle.id()]);
    }

    #[tokio::test]
    async fn test_no_callback_after_close() {
        let service = Arc::new(MockService::default());
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let callback = Arc::new(SlowCallback {
            entered: entered_tx,
            release: Mutex::new(release_rx),
            calls: AtomicU64::new(0),
        });
        let handle = Arc::new(
            ClientSubscriptionHandle::create(service.clone(), Duration::ZERO, callback.clone())
                .await
                .unwrap(),
        );

        service.inbox(handle.id()).send(data_batch(handle.id(), &[1, 2, 3])).unwrap();
        assert_eq!(entered.recv().await, Some(1));

        // Close while the first callback is in flight.
        let closer = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.close().await })
        };
        while !handle.is_closed() {
            tokio::task::yield_now().await;
        }
        release_tx.send(()).unwrap();
        closer.await.unwrap().unwrap();

        let calls_at_close = callback.calls.load(Ordering::SeqCst);
        assert_eq!(calls_at_close, 1);

        // More releases must not produce more callbacks.
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(callback.calls.load(Ordering::SeqCst), calls_at_close);
        assert!(entered.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_closes_in_background() {
        let service = Arc::new(MockService::default());
        let handle = ClientSubscriptionHandle::create(service.clone(), Duration::ZERO, Arc::new(LoggingCallback::new("t")))
            .await
            .unwrap();
        let id = handle.id();
        drop(handle);

        for _ in 0..50 {
            if service.closed.lock().contains(&id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("subscription was not closed after drop");
    }
}
