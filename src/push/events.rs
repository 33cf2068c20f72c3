//! # Lifecycle Events
//!
//! Connection lifecycle notifications for application observers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::channel::ChannelId;
use super::channel_registry::UserId;
use super::connection::ConnectionId;

/// What happened to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEventKind {
    /// Connection registered under a channel id
    Opened,
    /// Connection's user changed
    Switched { previous_user: Option<UserId> },
    /// Connection left a channel id
    Closed { close_code: u16 },
}

/// Lifecycle event for one connection on one channel id
#[derive(Debug, Clone, Serialize)]
pub struct PushEvent {
    /// Channel name
    pub channel: String,

    /// Channel id the connection is registered under
    pub channel_id: ChannelId,

    /// Connection
    pub connection_id: ConnectionId,

    /// Current user, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,

    #[serde(flatten)]
    pub kind: PushEventKind,

    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn new(channel_id: &ChannelId, connection_id: &ConnectionId, user: Option<UserId>, kind: PushEventKind) -> Self {
        Self {
            channel: channel_id.channel_name().to_string(),
            channel_id: channel_id.clone(),
            connection_id: connection_id.clone(),
            user,
            kind,
            timestamp: Utc::now(),
        }
    }
}
