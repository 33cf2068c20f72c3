//! # Push Errors
//!
//! Contract violations reported synchronously to callers of the push API.
//!
//! Delivery failures are not errors at this level: they are resolved into
//! the per-connection [`DeliveryResult`](super::delivery::DeliveryResult).

use thiserror::Error;

/// Result type for push operations
pub type PushResult<T> = Result<T, PushError>;

/// Push errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    // ==================
    // Identifier Errors
    // ==================
    /// Channel name does not match the allowed pattern
    #[error("Invalid channel name: {0}")]
    InvalidChannelName(String),

    /// Scope identifier is malformed
    #[error("Invalid scope id: {0}")]
    InvalidScopeId(String),

    /// Channel id could not be parsed
    #[error("Invalid channel id: {0}")]
    InvalidChannelId(String),

    /// User identity is malformed
    #[error("Invalid user identity: {0}")]
    InvalidUser(String),

    // ==================
    // Channel Errors
    // ==================
    /// Channel was never declared
    #[error("Channel not declared: {0}")]
    UndeclaredChannel(String),

    /// Channel was already declared with another scope kind
    #[error("Channel {name} already declared with scope {existing}")]
    ChannelConflict { name: String, existing: String },

    /// Channel id does not belong to a declared channel of matching shape
    #[error("Unknown channel id: {0}")]
    UnknownChannel(String),

    /// A scope required by the channel is not active
    #[error("Scope {scope} required by channel {channel} is not active")]
    ScopeInactive { channel: String, scope: String },

    // ==================
    // Connection Errors
    // ==================
    /// Connection is not registered under the channel id
    #[error("Connection {connection} is not registered under {channel_id}")]
    NotRegistered { connection: String, channel_id: String },

    // ==================
    // Lifecycle Errors
    // ==================
    /// The push facility has been torn down
    #[error("Push manager has been shut down")]
    ShutDown,

    /// Message could not be turned into a push payload
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PushError {
    /// HTTP status code used by the reference server
    pub fn status_code(&self) -> u16 {
        match self {
            PushError::InvalidChannelName(_)
            | PushError::InvalidScopeId(_)
            | PushError::InvalidChannelId(_)
            | PushError::InvalidUser(_)
            | PushError::InvalidMessage(_) => 400,
            PushError::UndeclaredChannel(_) | PushError::UnknownChannel(_) => 404,
            PushError::ChannelConflict { .. } | PushError::NotRegistered { .. } => 409,
            PushError::ScopeInactive { .. } => 422,
            PushError::ShutDown => 503,
            PushError::Config(_) => 500,
        }
    }
}

impl From<serde_json::Error> for PushError {
    fn from(e: serde_json::Error) -> Self {
        PushError::InvalidMessage(e.to_string())
    }
}
