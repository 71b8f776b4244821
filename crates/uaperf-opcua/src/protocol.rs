// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session wire protocol.
//!
//! Frames are JSON documents, one per line, over a TCP stream.
//!
//! ```text
//! client ── Request { request_id, body } ───────────────▶ server
//! client ◀── Response { request_id, result } ──────────── server
//! client ◀── Publish { subscription_id, batch } ───────── server
//! ```
//!
//! Responses answer requests by `request_id`; publish frames arrive
//! unsolicited and interleave freely with responses. Failures travel as a
//! [`ServiceFault`] carrying the typed error so the client can rebuild it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use uaperf_core::address_space::Node;
use uaperf_core::error::{
    AddressSpaceError, ConfigurationError, ConnectionError, SubscriptionError, TransportError,
    UaError, UaResult,
};
use uaperf_core::types::{DataValue, EventFilter, NodeId, QualifiedName};

use crate::notification::{MonitoredItemHandle, NotificationBatch, SubscriptionId};

/// Longest request frame a server session accepts, newline excluded.
pub const MAX_REQUEST_FRAME_LEN: usize = 64 * 1024;

/// Longest frame a client accepts. Publish frames carry whole batches,
/// so this is much larger than the request limit.
pub const MAX_SERVER_FRAME_LEN: usize = 256 * 1024 * 1024;

// =============================================================================
// Requests
// =============================================================================

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlates the response.
    pub request_id: u32,
    /// The service call.
    pub body: RequestBody,
}

/// Service calls a client can make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service")]
pub enum RequestBody {
    /// Resolve a root-relative browse path.
    GetChild {
        /// Path segments.
        path: Vec<QualifiedName>,
    },
    /// List a node's children.
    GetChildren {
        /// Parent node.
        node_id: NodeId,
    },
    /// Read a variable's current value.
    ReadValue {
        /// Variable node.
        node_id: NodeId,
    },
    /// Create a subscription bound to this session.
    CreateSubscription {
        /// Minimum spacing between publishes, in milliseconds.
        publishing_interval_ms: u64,
    },
    /// Monitor a variable's value.
    SubscribeDataChange {
        /// Target subscription.
        subscription_id: SubscriptionId,
        /// Variable node.
        node_id: NodeId,
    },
    /// Monitor a notifier's events.
    SubscribeEvents {
        /// Target subscription.
        subscription_id: SubscriptionId,
        /// Notifier node; the Server node when absent.
        #[serde(default)]
        notifier: Option<NodeId>,
        /// Event filter; accepts all when absent.
        #[serde(default)]
        filter: Option<EventFilter>,
    },
    /// Remove a monitored item.
    Unsubscribe {
        /// Target subscription.
        subscription_id: SubscriptionId,
        /// Item handle.
        handle: MonitoredItemHandle,
    },
    /// Close a subscription.
    CloseSubscription {
        /// Target subscription.
        subscription_id: SubscriptionId,
    },
    /// End the session; the server closes its subscriptions.
    CloseSession,
}

impl RequestBody {
    /// Service name for logging.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::GetChild { .. } => "GetChild",
            Self::GetChildren { .. } => "GetChildren",
            Self::ReadValue { .. } => "ReadValue",
            Self::CreateSubscription { .. } => "CreateSubscription",
            Self::SubscribeDataChange { .. } => "SubscribeDataChange",
            Self::SubscribeEvents { .. } => "SubscribeEvents",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::CloseSubscription { .. } => "CloseSubscription",
            Self::CloseSession => "CloseSession",
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Successful service results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    /// A single node.
    Node(Node),
    /// A list of nodes.
    Nodes(Vec<Node>),
    /// A variable's value.
    Value(DataValue),
    /// New subscription id.
    SubscriptionCreated(SubscriptionId),
    /// New monitored item handle.
    ItemCreated(MonitoredItemHandle),
    /// Success without payload.
    Ack,
}

impl ResponseBody {
    /// Name of the variant, for unexpected-response diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Node(_) => "node",
            Self::Nodes(_) => "nodes",
            Self::Value(_) => "value",
            Self::SubscriptionCreated(_) => "subscription_created",
            Self::ItemCreated(_) => "item_created",
            Self::Ack => "ack",
        }
    }

    /// Expects a [`ResponseBody::Node`].
    pub fn into_node(self) -> UaResult<Node> {
        match self {
            Self::Node(node) => Ok(node),
            other => Err(TransportError::unexpected_response("node", other.kind()).into()),
        }
    }

    /// Expects a [`ResponseBody::Nodes`].
    pub fn into_nodes(self) -> UaResult<Vec<Node>> {
        match self {
            Self::Nodes(nodes) => Ok(nodes),
            other => Err(TransportError::unexpected_response("nodes", other.kind()).into()),
        }
    }

    /// Expects a [`ResponseBody::Value`].
    pub fn into_value(self) -> UaResult<DataValue> {
        match self {
            Self::Value(value) => Ok(value),
            other => Err(TransportError::unexpected_response("value", other.kind()).into()),
        }
    }

    /// Expects a [`ResponseBody::SubscriptionCreated`].
    pub fn into_subscription_id(self) -> UaResult<SubscriptionId> {
        match self {
            Self::SubscriptionCreated(id) => Ok(id),
            other => Err(
                TransportError::unexpected_response("subscription_created", other.kind()).into(),
            ),
        }
    }

    /// Expects a [`ResponseBody::ItemCreated`].
    pub fn into_handle(self) -> UaResult<MonitoredItemHandle> {
        match self {
            Self::ItemCreated(handle) => Ok(handle),
            other => Err(TransportError::unexpected_response("item_created", other.kind()).into()),
        }
    }

    /// Expects a [`ResponseBody::Ack`].
    pub fn into_ack(self) -> UaResult<()> {
        match self {
            Self::Ack => Ok(()),
            other => Err(TransportError::unexpected_response("ack", other.kind()).into()),
        }
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    /// The call succeeded.
    Ok(ResponseBody),
    /// The call failed.
    Fault(ServiceFault),
}

impl From<UaResult<ResponseBody>> for ResponseResult {
    fn from(result: UaResult<ResponseBody>) -> Self {
        match result {
            Ok(body) => Self::Ok(body),
            Err(error) => Self::Fault(ServiceFault::from(&error)),
        }
    }
}

impl ResponseResult {
    /// Converts back into a `Result`, rebuilding the typed error.
    pub fn into_result(self) -> UaResult<ResponseBody> {
        match self {
            Self::Ok(body) => Ok(body),
            Self::Fault(fault) => Err(fault.into_error()),
        }
    }
}

// =============================================================================
// ServiceFault
// =============================================================================

/// Typed error carried inside a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Connection-level failure on the server side.
    Connection,
    /// Address space error.
    AddressSpace(AddressSpaceError),
    /// Subscription error.
    Subscription(SubscriptionError),
    /// Transport error.
    Transport(TransportError),
    /// Configuration error.
    Configuration(ConfigurationError),
}

/// A failed service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFault {
    /// The typed error.
    pub kind: FaultKind,
    /// Rendered error message.
    pub message: String,
}

impl ServiceFault {
    /// Rebuilds the error on the receiving side.
    pub fn into_error(self) -> UaError {
        match self.kind {
            FaultKind::Connection => ConnectionError::closed(self.message).into(),
            FaultKind::AddressSpace(e) => e.into(),
            FaultKind::Subscription(e) => e.into(),
            FaultKind::Transport(e) => e.into(),
            FaultKind::Configuration(e) => e.into(),
        }
    }
}

impl From<&UaError> for ServiceFault {
    fn from(error: &UaError) -> Self {
        let kind = match error {
            UaError::Connection(_) => FaultKind::Connection,
            UaError::AddressSpace(e) => FaultKind::AddressSpace(e.clone()),
            UaError::Subscription(e) => FaultKind::Subscription(e.clone()),
            UaError::Transport(e) => FaultKind::Transport(e.clone()),
            UaError::Configuration(e) => FaultKind::Configuration(e.clone()),
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

// =============================================================================
// Server messages
// =============================================================================

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Answer to a request.
    Response {
        /// The request being answered.
        request_id: u32,
        /// Outcome.
        result: ResponseResult,
    },
    /// One notification batch.
    Publish {
        /// Owning subscription.
        subscription_id: SubscriptionId,
        /// The batch.
        batch: NotificationBatch,
    },
}

// =============================================================================
// Framing
// =============================================================================

/// Reads newline-delimited JSON frames of bounded length.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a reader accepting frames of at most `max_frame_len` bytes.
    pub fn new(reader: R, max_frame_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            max_frame_len,
        }
    }

    /// Reads the next frame. `Ok(None)` at end of stream; blank lines are
    /// skipped.
    ///
    /// # Errors
    ///
    /// `TransportError::Protocol` for a frame longer than the limit or one
    /// that is not valid JSON. The stream cannot be resynchronized after an
    /// oversized frame.
    pub async fn next<T: DeserializeOwned>(&mut self) -> UaResult<Option<T>> {
        loop {
            self.line.clear();
            // One byte past the limit is enough to tell an oversized frame.
            let limit = self.max_frame_len as u64 + 2;
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(|e| ConnectionError::io("failed to read frame", e))?;
            if read == 0 {
                return Ok(None);
            }

            let terminated = self.line.last() == Some(&b'\n');
            if terminated {
                self.line.pop();
                if self.line.last() == Some(&b'\r') {
                    self.line.pop();
                }
            }
            if self.line.len() > self.max_frame_len {
                return Err(TransportError::protocol(format!(
                    "frame exceeds {} bytes",
                    self.max_frame_len
                ))
                .into());
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let frame = serde_json::from_slice(&self.line)
                .map_err(|e| TransportError::protocol(format!("malformed frame: {}", e)))?;
            return Ok(Some(frame));
        }
    }
}

/// Writes newline-delimited JSON frames.
pub struct FrameWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes one frame and flushes it.
    pub async fn send<T: Serialize>(&mut self, frame: &T) -> UaResult<()> {
        let json = serde_json::to_string(frame)
            .map_err(|e| TransportError::protocol(format!("failed to encode frame: {}", e)))?;
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| ConnectionError::io("failed to write frame", e))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| ConnectionError::io("failed to write frame", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ConnectionError::io("failed to flush frame", e))?;
        Ok(())
    }

    /// Flushes and shuts down the write half.
    pub async fn shutdown(&mut self) -> UaResult<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| ConnectionError::io("failed to shut down writer", e))?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uaperf_core::types::Value;

    #[test]
    fn test_request_shape() {
        let request = Request {
            request_id: 7,
            body: RequestBody::CreateSubscription {
                publishing_interval_ms: 1,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["request_id"], 7);
        assert_eq!(json["body"]["service"], "CreateSubscription");
        assert_eq!(json["body"]["publishing_interval_ms"], 1);
    }

    #[test]
    fn test_subscribe_events_defaults() {
        let body: RequestBody =
            serde_json::from_str(r#"{"service":"SubscribeEvents","subscription_id":1}"#).unwrap();
        assert_eq!(
            body,
            RequestBody::SubscribeEvents {
                subscription_id: SubscriptionId(1),
                notifier: None,
                filter: None,
            }
        );
    }

    #[test]
    fn test_fault_rebuilds_typed_error() {
        let error = UaError::from(SubscriptionError::unknown_handle(1, 2));
        let result = ResponseResult::from(Err::<ResponseBody, _>(error));
        let json = serde_json::to_string(&result).unwrap();
        let back: ResponseResult = serde_json::from_str(&json).unwrap();

        let error = back.into_result().unwrap_err();
        assert!(matches!(
            error,
            UaError::Subscription(SubscriptionError::UnknownHandle {
                subscription_id: 1,
                handle: 2
            })
        ));
    }

    #[test]
    fn test_unexpected_response() {
        let err = ResponseBody::Ack.into_node().unwrap_err();
        assert!(matches!(
            err,
            UaError::Transport(TransportError::UnexpectedResponse { .. })
        ));
        assert!(ResponseBody::Value(DataValue::new(Value::Int32(1), chrono::Utc::now()))
            .into_value()
            .is_ok());
    }

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        let request = Request {
            request_id: 1,
            body: RequestBody::CloseSession,
        };
        writer.send(&request).await.unwrap();
        writer.shutdown().await.unwrap();

        let received: Option<Request> = reader.next().await.unwrap();
        assert_eq!(received, Some(request));
        let end: Option<Request> = reader.next().await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(server, 64);
        let filler = format!("{{\"pad\":\"{}\"}}\n", "x".repeat(500));
        client.write_all(filler.as_bytes()).await.unwrap();

        let err = reader.next::<serde_json::Value>().await.unwrap_err();
        assert!(matches!(err, UaError::Transport(TransportError::Protocol { .. })));
        assert!(err.to_string().contains("64 bytes"));
    }

    #[tokio::test]
    async fn test_frame_at_limit_is_accepted() {
        let (mut client, server) = tokio::io::duplex(4096);
        let frame = format!("\"{}\"", "x".repeat(30));
        let mut reader = FrameReader::new(server, frame.len());
        client.write_all(format!("{}\r\n\n", frame).as_bytes()).await.unwrap();
        drop(client);

        let value: Option<String> = reader.next().await.unwrap();
        assert_eq!(value.as_deref(), Some("x".repeat(30).as_str()));
        assert!(reader.next::<String>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, 1024);
        client.write_all(b"{not json}\n").await.unwrap();

        let err = reader.next::<Request>().await.unwrap_err();
        assert!(matches!(err, UaError::Transport(TransportError::Protocol { .. })));
    }
}
