// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! TCP client for a [`UaServer`](crate::server::UaServer) endpoint.
//!
//! One reader task demultiplexes incoming frames: responses complete the
//! pending request with the same id, publish frames are routed to the inbox
//! of the owning subscription handle. When the connection drops every
//! pending request fails with `ConnectionError::Closed` and every
//! subscription inbox is closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use uaperf_core::address_space::Node;
use uaperf_core::error::{ConnectionError, UaError, UaResult};
use uaperf_core::types::{DataValue, EventFilter, NodeId, QualifiedName};

use crate::notification::{MonitoredItemHandle, NotificationBatch, SubscriptionId};
use crate::protocol::{
    FrameReader, FrameWriter, Request, RequestBody, ResponseBody, ResponseResult, ServerMessage, MAX_SERVER_FRAME_LEN,
};
use crate::types::Endpoint;

use super::subscription::{ClientSubscriptionHandle, SubscriptionCallback, SubscriptionService};

// =============================================================================
// Shared connection state
// =============================================================================

struct Shared {
    pending: Mutex<HashMap<u32, oneshot::Sender<ResponseResult>>>,
    routes: DashMap<SubscriptionId, mpsc::UnboundedSender<NotificationBatch>>,
    // Only changed under the `pending` lock.
    connected: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn mark_disconnected(&self) {
        let pending = {
            let mut pending = self.pending.lock();
            self.connected.store(false, Ordering::Release);
            std::mem::take(&mut *pending)
        };
        let failed = pending.len();
        // Dropping the senders fails the waiting requests.
        drop(pending);
        self.routes.clear();
        // Stored even without receivers, so later `closed()` calls see it.
        self.closed.send_replace(true);
        debug!(failed_requests = failed, "Connection state cleared");
    }

    fn route(&self, subscription_id: SubscriptionId, batch: NotificationBatch) {
        let delivered = self
            .routes
            .get(&subscription_id)
            .map(|inbox| inbox.send(batch).is_ok());
        match delivered {
            Some(true) => {}
            Some(false) => {
                self.routes.remove(&subscription_id);
            }
            None => trace!(subscription_id = %subscription_id, "Publish for unknown subscription dropped"),
        }
    }
}

async fn read_frames(shared: Arc<Shared>, mut reader: FrameReader<OwnedReadHalf>) {
    loop {
        match reader.next::<ServerMessage>().await {
            Ok(Some(ServerMessage::Response { request_id, result })) => {
                let waiter = shared.pending.lock().remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => warn!(request_id, "Response for unknown request"),
                }
            }
            Ok(Some(ServerMessage::Publish {
                subscription_id,
                batch,
            })) => shared.route(subscription_id, batch),
            Ok(None) => {
                info!("Server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Connection lost");
                break;
            }
        }
    }
    shared.mark_disconnected();
}

// =============================================================================
// UaClient
// =============================================================================

struct ClientInner {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<FrameWriter<OwnedWriteHalf>>,
    next_request_id: AtomicU32,
    reader: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connection to a server endpoint.
///
/// Cheap to clone; clones share the connection. The connection closes when
/// [`disconnect`](Self::disconnect) is called or the last clone and the
/// last subscription handle are dropped.
///
/// # Example
///
/// ```rust,ignore
/// let client = UaClient::connect(&Endpoint::default()).await?;
/// let root = client.get_root_node().await?;
/// let server = client.get_child(&QualifiedName::path(["Objects", "Server"])).await?;
/// client.disconnect().await?;
/// ```
#[derive(Clone)]
pub struct UaClient {
    inner: Arc<ClientInner>,
}

impl UaClient {
    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// `ConnectionError::Refused` if the TCP connection cannot be opened.
    pub async fn connect(endpoint: &Endpoint) -> UaResult<Self> {
        let stream = TcpStream::connect(endpoint.socket_addr())
            .await
            .map_err(|e| ConnectionError::refused_with(endpoint.to_string(), e))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();

        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            routes: DashMap::new(),
            connected: AtomicBool::new(true),
            closed,
        });
        let frames = FrameReader::new(read_half, MAX_SERVER_FRAME_LEN);
        let reader = tokio::spawn(read_frames(Arc::clone(&shared), frames));

        info!(endpoint = %endpoint, "Connected");
        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint: endpoint.clone(),
                shared,
                writer: tokio::sync::Mutex::new(FrameWriter::new(write_half)),
                next_request_id: AtomicU32::new(1),
                reader,
            }),
        })
    }

    /// The endpoint this client connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Returns `true` until the connection drops or is closed.
    pub fn is_connected(&self) -> bool {
        self.inner.shared.connected.load(Ordering::Acquire)
    }

    /// Resolves once the connection is gone.
    pub async fn closed(&self) {
        let mut closed = self.inner.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn request(&self, body: RequestBody) -> UaResult<ResponseBody> {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.shared.pending.lock();
            if !self.is_connected() {
                return Err(UaError::not_connected());
            }
            pending.insert(request_id, tx);
        }

        trace!(request_id, service = body.service_name(), "Request");
        let sent = self
            .inner
            .writer
            .lock()
            .await
            .send(&Request { request_id, body })
            .await;
        if let Err(e) = sent {
            self.inner.shared.pending.lock().remove(&request_id);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result.into_result(),
            Err(_) => Err(ConnectionError::closed("connection closed before response").into()),
        }
    }

    // =========================================================================
    // Browsing
    // =========================================================================

    /// The root node.
    pub async fn get_root_node(&self) -> UaResult<Node> {
        self.get_child(&[]).await
    }

    /// Resolves a root-relative browse path.
    ///
    /// # Errors
    ///
    /// `PathNotFound` if any segment does not resolve.
    pub async fn get_child(&self, path: &[QualifiedName]) -> UaResult<Node> {
        self.request(RequestBody::GetChild { path: path.to_vec() })
            .await?
            .into_node()
    }

    /// Children of a node, in insertion order.
    pub async fn get_children(&self, node_id: &NodeId) -> UaResult<Vec<Node>> {
        self.request(RequestBody::GetChildren {
            node_id: node_id.clone(),
        })
        .await?
        .into_nodes()
    }

    /// Current value of a variable.
    pub async fn read_value(&self, node_id: &NodeId) -> UaResult<DataValue> {
        self.request(RequestBody::ReadValue {
            node_id: node_id.clone(),
        })
        .await?
        .into_value()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription dispatching to `callback`.
    pub async fn create_subscription(
        &self,
        publishing_interval: Duration,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> UaResult<ClientSubscriptionHandle> {
        ClientSubscriptionHandle::create(Arc::new(self.clone()), publishing_interval, callback).await
    }

    /// Ends the session. The server closes every subscription it created.
    pub async fn disconnect(&self) -> UaResult<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.request(RequestBody::CloseSession).await?.into_ack()?;
        self.inner.writer.lock().await.shutdown().await?;
        self.closed().await;
        info!(endpoint = %self.inner.endpoint, "Disconnected");
        Ok(())
    }
}

#[async_trait]
impl SubscriptionService for UaClient {
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        inbox: mpsc::UnboundedSender<NotificationBatch>,
    ) -> UaResult<SubscriptionId> {
        let id = self
            .request(RequestBody::CreateSubscription {
                publishing_interval_ms: publishing_interval.as_millis() as u64,
            })
            .await?
            .into_subscription_id()?;
        // No item exists yet, so nothing can be published before the route.
        self.inner.shared.routes.insert(id, inbox);
        Ok(id)
    }

    async fn subscribe_data_change(
        &self,
        subscription_id: SubscriptionId,
        node_id: &NodeId,
    ) -> UaResult<MonitoredItemHandle> {
        self.request(RequestBody::SubscribeDataChange {
            subscription_id,
            node_id: node_id.clone(),
        })
        .await?
        .into_handle()
    }

    async fn subscribe_events(
        &self,
        subscription_id: SubscriptionId,
        notifier: Option<NodeId>,
        filter: Option<EventFilter>,
    ) -> UaResult<MonitoredItemHandle> {
        self.request(RequestBody::SubscribeEvents {
            subscription_id,
            notifier,
            filter,
        })
        .await?
        .into_handle()
    }

    async fn unsubscribe(&self, subscription_id: SubscriptionId, handle: MonitoredItemHandle) -> UaResult<()> {
        self.request(RequestBody::Unsubscribe {
            subscription_id,
            handle,
        })
        .await?
        .into_ack()
    }

    async fn close_subscription(&self, subscription_id: SubscriptionId) -> UaResult<()> {
        self.inner.shared.routes.remove(&subscription_id);
        self.request(RequestBody::CloseSubscription { subscription_id })
            .await?
            .into_ack()
    }
}

impl std::fmt::Debug for UaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UaClient")
            .field("endpoint", &self.inner.endpoint)
            .field("connected", &self.is_connected())
            .field("subscriptions", &self.inner.shared.routes.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uaperf_core::error::AddressSpaceError;
    use uaperf_core::AddressSpace;

    use crate::client::LoggingCallback;
    use crate::server::UaServer;
    use crate::types::ServerConfig;

    async fn start_server() -> (crate::server::ServerHandle, Endpoint) {
        let config = ServerConfig::builder().host("127.0.0.1").port(0).build().unwrap();
        let server = UaServer::new(config, Arc::new(AddressSpace::new())).unwrap();
        let handle = server.start().await.unwrap();
        let endpoint = handle.endpoint().clone();
        (handle, endpoint)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then release a port so nothing listens on it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = UaClient::connect(&Endpoint::new("127.0.0.1", port)).await.unwrap_err();
        assert!(matches!(err, UaError::Connection(ConnectionError::Refused { .. })));
    }

    #[tokio::test]
    async fn test_browse_root() {
        let (_server, endpoint) = start_server().await;
        let client = UaClient::connect(&endpoint).await.unwrap();

        let root = client.get_root_node().await.unwrap();
        assert_eq!(root.node_id, NodeId::ROOT_FOLDER);

        let objects = client.get_children(&NodeId::ROOT_FOLDER).await.unwrap();
        assert_eq!(objects.len(), 3);

        let err = client
            .get_child(&QualifiedName::path(["Objects", "Nope"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UaError::AddressSpace(AddressSpaceError::PathNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_stop_fails_requests() {
        let (server, endpoint) = start_server().await;
        let client = UaClient::connect(&endpoint).await.unwrap();
        assert!(client.is_connected());

        server.stop();
        tokio::time::timeout(Duration::from_secs(5), client.closed())
            .await
            .unwrap();
        assert!(!client.is_connected());

        let err = client.get_root_node().await.unwrap_err();
        assert!(matches!(err, UaError::Connection(ConnectionError::NotConnected)));
    }

    const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

    async fn disconnect_within_timeout(client: &UaClient) {
        tokio::time::timeout(LIFECYCLE_TIMEOUT, client.disconnect())
            .await
            .expect("disconnect timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (_server, endpoint) = start_server().await;
        let client = UaClient::connect(&endpoint).await.unwrap();
        disconnect_within_timeout(&client).await;
        assert!(!client.is_connected());
        disconnect_within_timeout(&client).await;
    }

    #[tokio::test]
    async fn test_closed_resolves_after_disconnect() {
        let (_server, endpoint) = start_server().await;
        let client = UaClient::connect(&endpoint).await.unwrap();
        disconnect_within_timeout(&client).await;

        // The connection is already gone; a fresh waiter must not block.
        tokio::time::timeout(LIFECYCLE_TIMEOUT, client.closed())
            .await
            .expect("closed() blocked after disconnect");
    }

    #[tokio::test]
    async fn test_disconnect_after_closed_subscription() {
        let (_server, endpoint) = start_server().await;
        let client = UaClient::connect(&endpoint).await.unwrap();
        let subscription = client
            .create_subscription(Duration::ZERO, Arc::new(LoggingCallback::new("test")))
            .await
            .unwrap();
        subscription.close().await.unwrap();

        disconnect_within_timeout(&client).await;
        disconnect_within_timeout(&client).await;
    }

    #[tokio::test]
    async fn test_disconnect_with_open_subscription() {
        let (_server, endpoint) = start_server().await;
        let client = UaClient::connect(&endpoint).await.unwrap();
        let subscription = client
            .create_subscription(Duration::ZERO, Arc::new(LoggingCallback::new("test")))
            .await
            .unwrap();

        disconnect_within_timeout(&client).await;
        assert!(!client.is_connected());
        drop(subscription);
        disconnect_within_timeout(&client).await;
    }
}
