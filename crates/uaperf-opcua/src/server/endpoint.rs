// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! TCP server endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use uaperf_core::address_space::AddressSpace;
use uaperf_core::error::{ConnectionError, UaResult};

use crate::types::{Endpoint, ServerConfig};

use super::engine::SubscriptionEngine;
use super::session::Session;

// =============================================================================
// UaServer
// =============================================================================

/// Serves an address space and its subscription engine over TCP.
///
/// # Example
///
/// ```rust,ignore
/// let space = Arc::new(AddressSpace::new());
/// let server = UaServer::new(ServerConfig::default(), space)?;
/// let handle = server.start().await?;
/// println!("listening on {}", handle.endpoint());
/// ```
pub struct UaServer {
    config: ServerConfig,
    engine: Arc<SubscriptionEngine>,
}

impl UaServer {
    /// Creates a server and its subscription engine.
    pub fn new(config: ServerConfig, address_space: Arc<AddressSpace>) -> UaResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine: SubscriptionEngine::new(address_space),
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The subscription engine.
    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// The served address space.
    pub fn address_space(&self) -> &Arc<AddressSpace> {
        self.engine.address_space()
    }

    /// Binds the endpoint and starts accepting sessions.
    ///
    /// # Errors
    ///
    /// `ConnectionError::Io` if the address cannot be bound.
    pub async fn start(&self) -> UaResult<ServerHandle> {
        let bind = self.config.endpoint.socket_addr();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| ConnectionError::io(format!("failed to bind {}", bind), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ConnectionError::io("failed to read bound address", e))?;
        let endpoint = self.config.endpoint.with_port(local_addr.port());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sessions = Arc::new(AtomicUsize::new(0));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.engine),
            self.config.session_queue_capacity,
            shutdown_rx,
            Arc::clone(&sessions),
        ));

        info!(endpoint = %endpoint, "Server endpoint listening");
        Ok(ServerHandle {
            endpoint,
            local_addr,
            engine: Arc::clone(&self.engine),
            shutdown: shutdown_tx,
            sessions,
            accept_task,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<SubscriptionEngine>,
    queue_capacity: usize,
    shutdown: watch::Receiver<bool>,
    sessions: Arc<AtomicUsize>,
) {
    let mut next_session_id: u64 = 1;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let session_id = next_session_id;
        next_session_id += 1;
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        let sessions = Arc::clone(&sessions);
        sessions.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            Session::run(session_id, stream, peer, engine, queue_capacity, shutdown).await;
            sessions.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

// =============================================================================
// ServerHandle
// =============================================================================

/// A running endpoint. Dropping the handle stops accepting and ends all
/// sessions.
pub struct ServerHandle {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    engine: Arc<SubscriptionEngine>,
    shutdown: watch::Sender<bool>,
    sessions: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The endpoint with the bound port filled in.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The engine behind this endpoint.
    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Stops accepting, ends every session and closes all subscriptions.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.shutdown.send(true);
        let closed = self.engine.close_all();
        info!(endpoint = %self.endpoint, subscriptions_closed = closed, "Server endpoint stopped");
    }
}
