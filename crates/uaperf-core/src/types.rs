// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Data model shared by the address space, the subscription engine and the
//! wire protocol.
//!
//! - [`NodeId`] / [`NodeIdentifier`]: node addressing
//! - [`QualifiedName`]: browse names used for path resolution
//! - [`Value`] / [`DataValue`]: typed variable values with source timestamps
//! - [`Event`] / [`EventFilter`]: transient occurrences and their selection

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, UaError};

// =============================================================================
// NodeId
// =============================================================================

/// Node identifier: a namespace index plus a numeric or string identifier.
///
/// # Examples
///
/// ```
/// use uaperf_core::types::NodeId;
///
/// let numeric = NodeId::numeric(0, 2253);
/// assert_eq!(numeric, NodeId::SERVER);
///
/// let parsed: NodeId = "ns=2;s=perfTestVar".parse().unwrap();
/// assert_eq!(parsed, NodeId::string(2, "perfTestVar"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    // =========================================================================
    // Standard Node IDs
    // =========================================================================

    /// Root folder node (ns=0, i=84).
    pub const ROOT_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(84),
    };

    /// Objects folder node (ns=0, i=85).
    pub const OBJECTS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(85),
    };

    /// Types folder node (ns=0, i=86).
    pub const TYPES_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(86),
    };

    /// Views folder node (ns=0, i=87).
    pub const VIEWS_FOLDER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(87),
    };

    /// Server node (ns=0, i=2253). Default event notifier.
    pub const SERVER: NodeId = NodeId {
        namespace_index: 0,
        identifier: NodeIdentifier::Numeric(2253),
    };

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns `true` if this is a numeric identifier.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::Numeric(_))
    }

    /// Returns `true` if this is a string identifier.
    #[inline]
    pub const fn is_string(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::String(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses `ns=2;i=1001`, `ns=2;s=Name`, `i=85` or `s=Name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| UaError::configuration(ConfigurationError::invalid_node_id(s, reason));

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace"))?;
                let ns: u16 = ns.parse().map_err(|_| invalid("Invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(id.parse().map_err(|_| invalid("Invalid numeric identifier"))?)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("Empty string identifier"));
            }
            NodeIdentifier::String(id.to_string())
        } else {
            return Err(invalid("Unknown identifier type. Expected i= or s="));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// Identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier, used by the standard nodes.
    Numeric(u32),

    /// String identifier, used by the demo namespace.
    String(String),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
        }
    }
}

// =============================================================================
// QualifiedName
// =============================================================================

/// A browse name: namespace index plus name.
///
/// Text form is `<ns>:<name>`. A segment without a numeric prefix belongs to
/// namespace 0, so `"Objects"` and `"0:Objects"` are equal.
///
/// ```
/// use uaperf_core::types::QualifiedName;
///
/// let name = QualifiedName::from("2:OpcDemoDevice");
/// assert_eq!(name.namespace_index, 2);
/// assert_eq!(name.name, "OpcDemoDevice");
/// assert_eq!(QualifiedName::from("Objects"), QualifiedName::new(0, "Objects"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name within the namespace.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }

    /// Parses each segment of a path.
    pub fn path<I, S>(segments: I) -> Vec<QualifiedName>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .map(|s| QualifiedName::from(s.as_ref()))
            .collect()
    }

    /// Formats a path as `seg/seg/seg` for diagnostics.
    pub fn join(path: &[QualifiedName]) -> String {
        path.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl From<&str> for QualifiedName {
    fn from(s: &str) -> Self {
        match s.split_once(':') {
            Some((ns, name)) => match ns.parse::<u16>() {
                Ok(namespace_index) => Self::new(namespace_index, name),
                Err(_) => Self::new(0, s),
            },
            None => Self::new(0, s),
        }
    }
}

impl FromStr for QualifiedName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.namespace_index, self.name)
        }
    }
}

// =============================================================================
// NodeClass / AttributeId
// =============================================================================

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeClass {
    /// Folder or device; has no value.
    Object,
    /// Holds a current [`DataValue`].
    Variable,
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "Object"),
            Self::Variable => write!(f, "Variable"),
        }
    }
}

/// Attribute a monitored item watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeId {
    /// The value of a variable.
    Value,
    /// The event stream of a notifier node.
    EventNotifier,
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => write!(f, "Value"),
            Self::EventNotifier => write!(f, "EventNotifier"),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A typed variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// 32-bit signed integer.
    Int32(i32),
    /// Fixed-length array of 32-bit signed integers.
    Int32Array(Vec<i32>),
    /// UTF-8 string.
    String(String),
}

impl Value {
    /// Returns the type name, with the length for arrays.
    pub fn type_name(&self) -> String {
        match self {
            Self::Int32(_) => "Int32".to_string(),
            Self::Int32Array(v) => format!("Int32[{}]", v.len()),
            Self::String(_) => "String".to_string(),
        }
    }

    /// Returns `true` if `other` may replace `self`: same tag and, for
    /// arrays, same length.
    pub fn same_type(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int32(_), Self::Int32(_)) => true,
            (Self::Int32Array(a), Self::Int32Array(b)) => a.len() == b.len(),
            (Self::String(_), Self::String(_)) => true,
            _ => false,
        }
    }

    /// Returns the scalar if this is an `Int32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the elements if this is an `Int32Array`.
    pub fn as_i32_array(&self) -> Option<&[i32]> {
        match self {
            Self::Int32Array(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the text if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Int32Array(v) => {
                // Arrays are long; show the head only.
                const SHOWN: usize = 4;
                let head: Vec<String> = v.iter().take(SHOWN).map(i32::to_string).collect();
                if v.len() > SHOWN {
                    write!(f, "[{}, ... ({} total)]", head.join(", "), v.len())
                } else {
                    write!(f, "[{}]", head.join(", "))
                }
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Self::Int32Array(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value together with the time the address space accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
    /// The value.
    pub value: Value,
    /// Source timestamp; strictly increasing across writes in one address space.
    pub source_timestamp: DateTime<Utc>,
}

impl DataValue {
    /// Creates a data value.
    pub fn new(value: Value, source_timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            source_timestamp,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.value, self.source_timestamp.to_rfc3339())
    }
}

// =============================================================================
// Event
// =============================================================================

/// Lowest valid event severity.
pub const MIN_SEVERITY: u16 = 1;
/// Highest valid event severity.
pub const MAX_SEVERITY: u16 = 1000;

/// A transient occurrence reported to event subscribers.
///
/// Events are not stored in the address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Notifier the event originates from.
    pub source_node: NodeId,
    /// Human readable source.
    pub source_name: String,
    /// Severity in `1..=1000`.
    pub severity: u16,
    /// Message text.
    pub message: String,
    /// Occurrence time.
    pub time: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    ///
    /// Fails with `InvalidSeverity` outside `1..=1000`.
    pub fn new(
        source_node: NodeId,
        source_name: impl Into<String>,
        severity: u16,
        message: impl Into<String>,
    ) -> Result<Self, UaError> {
        validate_severity(severity)?;
        Ok(Self {
            source_node,
            source_name: source_name.into(),
            severity,
            message: message.into(),
            time: Utc::now(),
        })
    }

    /// Returns a copy with a fresh occurrence time.
    pub fn restamped(&self) -> Self {
        Self {
            time: Utc::now(),
            ..self.clone()
        }
    }
}

fn validate_severity(severity: u16) -> Result<(), UaError> {
    if (MIN_SEVERITY..=MAX_SEVERITY).contains(&severity) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidSeverity { severity }.into())
    }
}

// =============================================================================
// EventFilter
// =============================================================================

/// Selects which events an event item receives.
///
/// An empty filter accepts every event from its notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Minimum severity, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<u16>,
    /// Exact source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

impl EventFilter {
    /// Filter accepting everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Requires `severity >= min`.
    pub fn with_min_severity(mut self, min: u16) -> Self {
        self.min_severity = Some(min);
        self
    }

    /// Requires an exact source name.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Returns `true` if no criteria are set.
    pub fn is_empty(&self) -> bool {
        self.min_severity.is_none() && self.source_name.is_none()
    }

    /// Rejects a minimum severity outside `1..=1000`.
    pub fn validate(&self) -> Result<(), UaError> {
        match self.min_severity {
            Some(min) => validate_severity(min),
            None => Ok(()),
        }
    }

    /// Returns `true` if the event passes every set criterion.
    pub fn accepts(&self, event: &Event) -> bool {
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(name) = &self.source_name {
            if &event.source_name != name {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_and_display() {
        let id: NodeId = "ns=2;s=perfTestVar".parse().unwrap();
        assert_eq!(id, NodeId::string(2, "perfTestVar"));
        assert_eq!(id.to_string(), "ns=2;s=perfTestVar");

        let id: NodeId = "i=2253".parse().unwrap();
        assert_eq!(id, NodeId::SERVER);
        assert_eq!(id.to_string(), "i=2253");

        let id: NodeId = "ns=0;i=85".parse().unwrap();
        assert_eq!(id, NodeId::OBJECTS_FOLDER);
    }

    #[test]
    fn test_node_id_parse_errors() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("ns=2;q=1".parse::<NodeId>().is_err());
        assert!("i=abc".parse::<NodeId>().is_err());
        assert!("s=".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_qualified_name_parsing() {
        assert_eq!(QualifiedName::from("Objects"), QualifiedName::new(0, "Objects"));
        assert_eq!(
            QualifiedName::from("2:perfTestVar"),
            QualifiedName::new(2, "perfTestVar")
        );
        // A non-numeric prefix is part of the name.
        assert_eq!(QualifiedName::from("a:b"), QualifiedName::new(0, "a:b"));

        let path = QualifiedName::path(["Objects", "2:OpcDemoDevice"]);
        assert_eq!(QualifiedName::join(&path), "Objects/2:OpcDemoDevice");
    }

    #[test]
    fn test_value_type_matching() {
        assert!(Value::Int32(1).same_type(&Value::Int32(2)));
        assert!(!Value::Int32(1).same_type(&Value::from("x")));
        assert!(Value::from(vec![0; 100]).same_type(&Value::from(vec![1; 100])));
        assert!(!Value::from(vec![0; 100]).same_type(&Value::from(vec![0; 99])));
        assert_eq!(Value::from(vec![0; 100]).type_name(), "Int32[100]");
    }

    #[test]
    fn test_value_display_truncates_arrays() {
        assert_eq!(Value::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(
            Value::from(vec![1, 0, 0, 0, 0, 0]).to_string(),
            "[1, 0, 0, 0, ... (6 total)]"
        );
    }

    #[test]
    fn test_event_severity_bounds() {
        assert!(Event::new(NodeId::SERVER, "src", 0, "m").is_err());
        assert!(Event::new(NodeId::SERVER, "src", 1001, "m").is_err());
        assert!(Event::new(NodeId::SERVER, "src", 1, "m").is_ok());
        assert!(Event::new(NodeId::SERVER, "src", 1000, "m").is_ok());
    }

    #[test]
    fn test_event_filter() {
        let low = Event::new(NodeId::SERVER, "a", 2, "m").unwrap();
        let high = Event::new(NodeId::SERVER, "b", 500, "m").unwrap();

        let all = EventFilter::all();
        assert!(all.is_empty());
        assert!(all.accepts(&low) && all.accepts(&high));

        let severe = EventFilter::all().with_min_severity(100);
        assert!(!severe.accepts(&low));
        assert!(severe.accepts(&high));

        let named = EventFilter::all().with_source_name("a");
        assert!(named.accepts(&low));
        assert!(!named.accepts(&high));

        assert!(EventFilter::all().with_min_severity(0).validate().is_err());
    }

    #[test]
    fn test_value_serialization() {
        let json = serde_json::to_string(&Value::Int32(7)).unwrap();
        assert_eq!(json, r#"{"type":"Int32","value":7}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int32(7));
    }
}
