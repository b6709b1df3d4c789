//! Message envelopes and declared types
//!
//! Every value moving along an edge travels inside an [`Envelope`]: the
//! payload as an opaque JSON value plus the [`MessageType`] it was sent
//! as. The declared type, not the payload's shape, drives handler
//! resolution and port validation, and it is preserved verbatim across
//! checkpoint round-trips.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use weft_checkpoint::{MessageRecord, TraceRecord};

use crate::error::Result;

/// Stable string identifier for a message type
///
/// Types are compared by id only; `of::<T>()` derives the id from the
/// Rust type name, `named` accepts any stable string (the form to use
/// when messages cross process or language boundaries). [`MessageType::any`]
/// is the catch-all used by fallback handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    /// Type id derived from a Rust type name
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    /// Explicitly named type id
    pub fn named(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Catch-all type accepted by fallback handlers
    pub fn any() -> Self {
        Self("*".to_string())
    }

    /// Type id of fan-in composite messages
    pub fn composite() -> Self {
        Self("composite".to_string())
    }

    /// JSON string
    pub fn string() -> Self {
        Self("string".to_string())
    }

    /// JSON integer
    pub fn integer() -> Self {
        Self("int".to_string())
    }

    /// JSON boolean
    pub fn boolean() -> Self {
        Self("bool".to_string())
    }

    /// Infer a JSON-kind type id from a value's shape
    ///
    /// Used when a host enqueues raw values without naming a type.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::named("null"),
            Value::Bool(_) => Self::boolean(),
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::integer(),
            Value::Number(_) => Self::named("float"),
            Value::String(_) => Self::string(),
            Value::Array(_) => Self::named("array"),
            Value::Object(_) => Self::named("object"),
        }
    }

    /// Whether this type is the catch-all
    pub fn is_any(&self) -> bool {
        self.0 == "*"
    }

    /// Whether a payload declared as `declared` satisfies this type
    ///
    /// Exact id equality, except that the catch-all accepts everything.
    pub fn accepts(&self, declared: &MessageType) -> bool {
        self.is_any() || self == declared
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(id: &str) -> Self {
        Self::named(id)
    }
}

impl From<String> for MessageType {
    fn from(id: String) -> Self {
        Self::named(id)
    }
}

/// Trace context correlating the hops of one logical message flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Stable trace id
    pub trace_id: String,
}

impl TraceContext {
    /// Start a fresh trace
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A message in flight: payload plus the type it was declared as
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The message payload
    pub payload: Value,
    /// The type the sender declared
    pub declared_type: MessageType,
    /// Optional trace context, inherited across hops
    pub trace: Option<TraceContext>,
}

impl Envelope {
    /// Wrap a raw value under an explicit declared type
    pub fn new(payload: Value, declared_type: MessageType) -> Self {
        Self {
            payload,
            declared_type,
            trace: None,
        }
    }

    /// Wrap a serializable value, declaring its Rust type name
    pub fn typed<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?, MessageType::of::<T>()))
    }

    /// Attach a trace context
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Deserialize the payload into a concrete type
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Serialized record for checkpointing
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            payload: self.payload.clone(),
            type_id: self.declared_type.as_str().to_string(),
            trace: self.trace.as_ref().map(|t| TraceRecord {
                trace_id: t.trace_id.clone(),
            }),
        }
    }

    /// Rebuild an envelope from its checkpoint record
    pub fn from_record(record: MessageRecord) -> Self {
        Self {
            payload: record.payload,
            declared_type: MessageType::named(record.type_id),
            trace: record.trace.map(|t| TraceContext {
                trace_id: t.trace_id,
            }),
        }
    }
}
