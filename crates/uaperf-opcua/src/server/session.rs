// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One TCP session: a request loop plus a writer task.
//!
//! Responses and publish frames share one bounded outbound queue drained by
//! the writer task, so frames of one subscription leave in publish order.
//! Subscriptions created by a session belong to it and are closed when the
//! session ends, whatever the reason.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use uaperf_core::error::{SubscriptionError, UaResult};

use crate::notification::SubscriptionId;
use crate::protocol::{
    FrameReader, FrameWriter, Request, RequestBody, ResponseBody, ResponseResult, ServerMessage, MAX_REQUEST_FRAME_LEN,
};

use super::engine::SubscriptionEngine;
use super::transport::SessionTransport;

// =============================================================================
// SessionGuard
// =============================================================================

/// Closes the session's subscriptions on drop.
struct SessionGuard {
    session_id: u64,
    engine: Arc<SubscriptionEngine>,
    subscriptions: Vec<SubscriptionId>,
}

impl SessionGuard {
    fn owns(&self, id: SubscriptionId) -> UaResult<()> {
        if self.subscriptions.contains(&id) {
            Ok(())
        } else {
            Err(SubscriptionError::not_found(id.value()).into())
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let closed = self
            .subscriptions
            .iter()
            .filter(|id| self.engine.close_subscription(**id).is_ok())
            .count();
        debug!(session_id = self.session_id, closed, "Session subscriptions released");
    }
}

// =============================================================================
// Session
// =============================================================================

pub(crate) struct Session {
    guard: SessionGuard,
    peer: SocketAddr,
    outbound: mpsc::Sender<ServerMessage>,
}

impl Session {
    /// Serves one connection until the peer disconnects, sends
    /// `CloseSession`, or `shutdown` flips to `true`.
    pub(crate) async fn run(
        session_id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        engine: Arc<SubscriptionEngine>,
        queue_capacity: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (read_half, write_half) = stream.into_split();
        let (outbound, frames) = mpsc::channel(queue_capacity);
        let writer = tokio::spawn(write_frames(session_id, write_half, frames));

        let mut session = Session {
            guard: SessionGuard {
                session_id,
                engine,
                subscriptions: Vec::new(),
            },
            peer,
            outbound,
        };
        info!(session_id, peer = %peer, "Session opened");

        let mut reader = FrameReader::new(read_half, MAX_REQUEST_FRAME_LEN);
        loop {
            let request = tokio::select! {
                frame = reader.next::<Request>() => frame,
                _ = shutdown.changed() => {
                    debug!(session_id, "Session interrupted by shutdown");
                    break;
                }
            };

            let request = match request {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    warn!(session_id, peer = %peer, error = %e, "Dropping session after bad frame");
                    break;
                }
            };

            let closing = matches!(request.body, RequestBody::CloseSession);
            trace!(session_id, request_id = request.request_id, service = request.body.service_name(), "Request");
            let result = ResponseResult::from(session.handle(request.body));
            let response = ServerMessage::Response {
                request_id: request.request_id,
                result,
            };
            if session.outbound.send(response).await.is_err() || closing {
                break;
            }
        }

        let Session { guard, peer, outbound } = session;
        drop(guard);
        drop(outbound);
        // The writer ends once every publisher has released its transport.
        if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
            warn!(session_id, "Session writer did not drain in time");
        }
        info!(session_id, peer = %peer, "Session closed");
    }

    fn handle(&mut self, body: RequestBody) -> UaResult<ResponseBody> {
        let engine = Arc::clone(&self.guard.engine);
        let space = engine.address_space();

        match body {
            RequestBody::GetChild { path } => space.get_node(&path).map(ResponseBody::Node),
            RequestBody::GetChildren { node_id } => space.children(&node_id).map(ResponseBody::Nodes),
            RequestBody::ReadValue { node_id } => space.read_value(&node_id).map(ResponseBody::Value),
            RequestBody::CreateSubscription {
                publishing_interval_ms,
            } => {
                let transport = Arc::new(SessionTransport::new(self.outbound.clone()));
                let id = engine.create_subscription(Duration::from_millis(publishing_interval_ms), transport);
                self.guard.subscriptions.push(id);
                debug!(session_id = self.guard.session_id, subscription_id = %id, "Subscription bound to session");
                Ok(ResponseBody::SubscriptionCreated(id))
            }
            RequestBody::SubscribeDataChange {
                subscription_id,
                node_id,
            } => {
                self.guard.owns(subscription_id)?;
                engine
                    .subscribe_data_change(subscription_id, &node_id)
                    .map(ResponseBody::ItemCreated)
            }
            RequestBody::SubscribeEvents {
                subscription_id,
                notifier,
                filter,
            } => {
                self.guard.owns(subscription_id)?;
                engine
                    .subscribe_events(subscription_id, notifier, filter)
                    .map(ResponseBody::ItemCreated)
            }
            RequestBody::Unsubscribe {
                subscription_id,
                handle,
            } => {
                self.guard.owns(subscription_id)?;
                engine.unsubscribe(subscription_id, handle).map(|()| ResponseBody::Ack)
            }
            RequestBody::CloseSubscription { subscription_id } => {
                self.guard.owns(subscription_id)?;
                engine.close_subscription(subscription_id).map(|()| ResponseBody::Ack)
            }
            RequestBody::CloseSession => Ok(ResponseBody::Ack),
        }
    }
}

async fn write_frames(session_id: u64, write_half: OwnedWriteHalf, mut frames: mpsc::Receiver<ServerMessage>) {
    let mut writer = FrameWriter::new(write_half);
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.send(&frame).await {
            debug!(session_id, error = %e, "Session writer stopped");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
