// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Identifiers and notification payloads shared by server and client.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uaperf_core::types::{AttributeId, DataValue, Event, NodeId};

// =============================================================================
// IDs
// =============================================================================

/// Server-assigned subscription identifier, unique per server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u32);

impl SubscriptionId {
    /// Creates a new subscription ID.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

impl From<u32> for SubscriptionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Monitored item handle, unique within its subscription and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoredItemHandle(pub u32);

impl MonitoredItemHandle {
    /// Creates a new handle.
    #[inline]
    pub const fn new(handle: u32) -> Self {
        Self(handle)
    }

    /// Returns the raw handle value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MonitoredItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mi-{}", self.0)
    }
}

impl From<u32> for MonitoredItemHandle {
    fn from(handle: u32) -> Self {
        Self(handle)
    }
}

// =============================================================================
// Notification entries
// =============================================================================

/// One reported change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEntry {
    /// A monitored variable was written.
    DataChange {
        /// Item that matched.
        handle: MonitoredItemHandle,
        /// Written node.
        node_id: NodeId,
        /// Monitored attribute.
        attribute: AttributeId,
        /// The value as written, with its source timestamp.
        value: DataValue,
    },

    /// An event passed an event item's filter.
    Event {
        /// Item that matched.
        handle: MonitoredItemHandle,
        /// The event.
        event: Event,
    },
}

impl NotificationEntry {
    /// Returns the item handle the entry was produced for.
    pub fn handle(&self) -> MonitoredItemHandle {
        match self {
            Self::DataChange { handle, .. } | Self::Event { handle, .. } => *handle,
        }
    }

    /// Returns `true` for data change entries.
    pub fn is_data_change(&self) -> bool {
        matches!(self, Self::DataChange { .. })
    }
}

// =============================================================================
// Notification batch
// =============================================================================

/// Entries flushed by one publish, in the order the changes occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBatch {
    /// Owning subscription.
    pub subscription_id: SubscriptionId,
    /// Per-subscription publish counter, starting at 1.
    pub sequence_number: u32,
    /// Entries in change order.
    pub entries: Vec<NotificationEntry>,
    /// When the batch was published.
    pub publish_time: DateTime<Utc>,
}

impl NotificationBatch {
    /// Creates a batch stamped now.
    pub fn new(
        subscription_id: SubscriptionId,
        sequence_number: u32,
        entries: Vec<NotificationEntry>,
    ) -> Self {
        Self {
            subscription_id,
            sequence_number,
            entries,
            publish_time: Utc::now(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the batch has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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
    fn test_id_display() {
        assert_eq!(SubscriptionId::new(3).to_string(), "sub-3");
        assert_eq!(MonitoredItemHandle::new(7).to_string(), "mi-7");
    }

    #[test]
    fn test_entry_handle() {
        let entry = NotificationEntry::DataChange {
            handle: MonitoredItemHandle(2),
            node_id: NodeId::string(2, "perfTestVar"),
            attribute: AttributeId::Value,
            value: DataValue::new(Value::Int32(1), Utc::now()),
        };
        assert_eq!(entry.handle(), MonitoredItemHandle(2));
        assert!(entry.is_data_change());
    }

    #[test]
    fn test_entry_json_is_tagged() {
        let event = Event::new(NodeId::SERVER, "src", 2, "hello").unwrap();
        let entry = NotificationEntry::Event {
            handle: MonitoredItemHandle(1),
            event,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "event");
        assert_eq!(json["handle"], 1);
    }
}
