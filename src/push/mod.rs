//! # Socket Push
//!
//! Server-to-client push over long-lived connections, addressed by logical
//! channel name, optionally bounded by a session and/or view scope, and
//! optionally narrowed to specific users.
//!
//! ## Architecture
//!
//! - **Scopes**: ambient session/view ids, captured eagerly into a snapshot
//! - **Channels**: declared name + scope kind, resolved into channel ids
//! - **Session Registry**: channel id → open connections
//! - **Channel Registry**: (user, channel) → channel ids
//! - **Issued Ids**: scoped channel ids clients may open
//! - **Delivery**: non-blocking fan-out with per-connection results
//! - **Context**: the publisher-facing `send` API
//! - **Manager**: connection lifecycle, scope expiry and shutdown
//!
//! Delivery is best-effort and at-most-once. Nothing is persisted; a
//! message published while a client is disconnected is lost.

pub mod channel;
pub mod channel_registry;
pub mod connection;
pub mod context;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod issued;
pub mod manager;
pub mod outbox;
pub mod scope;
pub mod session_registry;

pub use channel::{resolve_channel_id, Channel, ChannelId, ChannelName, CHANNEL_ID_SEPARATOR};
pub use channel_registry::{ChannelRegistry, UserId};
pub use connection::{CloseReason, Connection, ConnectionId, PushMessage};
pub use context::PushContext;
pub use delivery::{DeliveryCompleter, DeliveryEngine, DeliveryError, DeliveryOutcome, DeliveryResult};
pub use errors::{PushError, PushResult};
pub use events::{PushEvent, PushEventKind};
pub use issued::IssuedChannelIds;
pub use manager::PushManager;
pub use outbox::{OutboundMessage, Outbox, OutboxItem, QueuedConnection};
pub use scope::{AmbientScope, ScopeId, ScopeIds, ScopeKind, ScopeProvider, ScopeSnapshot};
pub use session_registry::SessionRegistry;
