//! # Connection Boundary
//!
//! The transport owns connections; the core only references them and calls
//! back through [`Connection::write`] and [`Connection::close`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::delivery::DeliveryResult;
use super::errors::PushResult;

/// Identifier of one open client connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Why the core asks the transport to close a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Client or application closed the connection
    Normal,
    /// A scope the channel id depends on was destroyed
    ScopeExpired,
    /// The push facility is being torn down
    Shutdown,
    /// The connection asked for a channel id nobody declared
    UnknownChannel,
}

impl CloseReason {
    /// WebSocket close code
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::Shutdown => 1001,
            CloseReason::UnknownChannel => 1008,
            CloseReason::ScopeExpired => 4001,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Normal => "normal",
            CloseReason::ScopeExpired => "scope expired",
            CloseReason::Shutdown => "shutdown",
            CloseReason::UnknownChannel => "unknown channel",
        }
    }
}

/// Message payload pushed to clients
///
/// Cheap to clone: one payload is shared by every recipient of a publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage(Arc<Value>);

impl PushMessage {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Serialize any value into a push message
    pub fn json<T: Serialize + ?Sized>(value: &T) -> PushResult<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Text frame representation
    pub fn to_text(&self) -> String {
        self.0.to_string()
    }
}

impl From<Value> for PushMessage {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<&str> for PushMessage {
    fn from(value: &str) -> Self {
        Self::new(Value::String(value.to_string()))
    }
}

impl From<String> for PushMessage {
    fn from(value: String) -> Self {
        Self::new(Value::String(value))
    }
}

/// One live client transport session
///
/// Implementations must not block in [`write`](Connection::write): it only
/// initiates the write and reports the outcome through the returned
/// [`DeliveryResult`].
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> &ConnectionId;

    /// Initiate an asynchronous write of `message`
    fn write(&self, message: PushMessage) -> DeliveryResult;

    /// Ask the transport to close the connection
    fn close(&self, reason: CloseReason);
}
