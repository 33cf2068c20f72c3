//! # Push Manager
//!
//! Owns the shared push state and is the surface the transport drives:
//! connections open, authenticate and close through it, scopes expire
//! through it, and publishers obtain [`PushContext`]s from it.
//!
//! Registration order keeps the user index a subset of the session
//! registry: sessions are registered before users, and users are
//! deregistered before sessions. Opening re-checks the session entry after
//! indexing the user, and releasing sweeps the user index again after the
//! session entry is gone, so a racing open and close cannot strand a user
//! entry.
//!
//! Scoped channel ids are only accepted while the id is issued: handed out
//! by [`PushManager::channel_id`] and not yet revoked by
//! [`PushManager::destroy_scope`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::channel::{Channel, ChannelId};
use super::channel_registry::{ChannelRegistry, UserId};
use super::connection::{CloseReason, Connection, ConnectionId};
use super::context::PushContext;
use super::delivery::DeliveryEngine;
use super::errors::{PushError, PushResult};
use super::events::{PushEvent, PushEventKind};
use super::issued::IssuedChannelIds;
use super::scope::{ScopeId, ScopeKind, ScopeProvider, ScopeSnapshot};
use super::session_registry::SessionRegistry;
use crate::config::{Config, PushSettings};
use crate::observability::PushMetrics;

/// State shared by the manager and every context it hands out
#[derive(Debug)]
pub(crate) struct PushShared {
    pub(crate) settings: PushSettings,
    pub(crate) channels: DashMap<String, Channel>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) users: Arc<ChannelRegistry>,
    pub(crate) issued: IssuedChannelIds,
    pub(crate) engine: DeliveryEngine,
    pub(crate) events: broadcast::Sender<PushEvent>,
    pub(crate) metrics: Arc<PushMetrics>,
    shut_down: AtomicBool,
}

impl PushShared {
    pub(crate) fn ensure_running(&self) -> PushResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(PushError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PushEvent) {
        // No observers is fine
        let _ = self.events.send(event);
    }
}

/// Handle over the process-wide push state
#[derive(Debug, Clone)]
pub struct PushManager {
    shared: Arc<PushShared>,
}

impl Default for PushManager {
    fn default() -> Self {
        Self::new(PushSettings::default())
    }
}

impl PushManager {
    /// Create a manager with no declared channels
    pub fn new(settings: PushSettings) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let metrics = Arc::new(PushMetrics::new());
        let engine = DeliveryEngine::new(Arc::clone(&sessions), Arc::clone(&metrics));
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));

        Self {
            shared: Arc::new(PushShared {
                settings,
                channels: DashMap::new(),
                sessions,
                users: Arc::new(ChannelRegistry::new()),
                issued: IssuedChannelIds::new(),
                engine,
                events,
                metrics,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Create a manager and declare the configured channels
    pub fn from_config(config: &Config) -> PushResult<Self> {
        let manager = Self::new(config.push.clone());
        for channel in &config.channels {
            manager.declare(&channel.name, channel.scope)?;
        }
        Ok(manager)
    }

    pub fn settings(&self) -> &PushSettings {
        &self.shared.settings
    }

    // ==================
    // Channels
    // ==================

    /// Declare a channel
    ///
    /// Declaring an existing channel with the same scope kind is a no-op.
    pub fn declare(&self, name: &str, scope: ScopeKind) -> PushResult<Channel> {
        let channel = Channel::new(name, scope)?;

        match self.shared.channels.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().scope == scope {
                    Ok(existing.get().clone())
                } else {
                    Err(PushError::ChannelConflict {
                        name: name.to_string(),
                        existing: existing.get().scope.to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(channel.clone());
                info!(channel = name, scope = %scope, "channel declared");
                Ok(channel)
            }
        }
    }

    /// Declared channel by name
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.shared.channels.get(name).map(|c| c.value().clone())
    }

    /// All declared channels, sorted by name
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .shared
            .channels
            .iter()
            .map(|c| c.value().clone())
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }

    fn declared(&self, name: &str) -> PushResult<Channel> {
        self.channel(name)
            .ok_or_else(|| PushError::UndeclaredChannel(name.to_string()))
    }

    // ==================
    // Publisher Surface
    // ==================

    /// Obtain a push context for `name`, capturing the scopes `scope` reports now
    pub fn context(&self, name: &str, scope: &dyn ScopeProvider) -> PushResult<PushContext> {
        self.shared.ensure_running()?;
        let channel = self.declared(name)?;
        let snapshot = ScopeSnapshot::capture(scope);
        Ok(PushContext::new(channel, snapshot, Arc::clone(&self.shared)))
    }

    /// Channel id a client in the current scopes should connect under
    ///
    /// Unlike publishing, this requires every scope of the channel to be active.
    /// The returned id is issued: clients may open it until one of its scopes
    /// is destroyed.
    pub fn channel_id(&self, name: &str, scope: &dyn ScopeProvider) -> PushResult<ChannelId> {
        let channel = self.declared(name)?;
        let snapshot = ScopeSnapshot::capture(scope);

        let missing = if channel.scope.requires_session() && snapshot.session().is_none() {
            Some("session")
        } else if channel.scope.requires_view() && snapshot.view().is_none() {
            Some("view")
        } else {
            None
        };

        match missing {
            Some(missing) => Err(PushError::ScopeInactive {
                channel: name.to_string(),
                scope: missing.to_string(),
            }),
            None => {
                let channel_id = channel.resolve(&snapshot);
                if self.shared.issued.issue(&channel_id) {
                    debug!(channel_id = %channel_id, "channel id issued");
                }
                Ok(channel_id)
            }
        }
    }

    // ==================
    // Transport Surface
    // ==================

    /// Parse a client supplied channel id and check it may be opened
    ///
    /// The id must belong to a declared channel of matching shape and, when
    /// scoped, must have been issued in scopes that are still active.
    pub fn validate_channel_id(&self, raw: &str) -> PushResult<ChannelId> {
        let channel_id = ChannelId::parse(raw)?;
        self.check_openable(&channel_id)?;
        Ok(channel_id)
    }

    fn check_openable(&self, channel_id: &ChannelId) -> PushResult<()> {
        match self.channel(channel_id.channel_name()) {
            Some(channel) if channel.owns(channel_id) && self.shared.issued.is_issued(channel_id) => Ok(()),
            _ => Err(PushError::UnknownChannel(channel_id.to_string())),
        }
    }

    /// Register an opened connection under `channel_id`, optionally as `user`
    ///
    /// Opening an already registered connection again is a no-op, except that
    /// a given `user` switches the connection to that user.
    pub fn open(&self, channel_id: &ChannelId, connection: Arc<dyn Connection>, user: Option<UserId>) -> PushResult<()> {
        self.shared.ensure_running()?;
        self.check_openable(channel_id)?;

        let connection_id = connection.id().clone();
        if !self.shared.sessions.register(channel_id, connection) {
            return match user {
                Some(user) => self.authenticate(&connection_id, channel_id, user),
                None => Ok(()),
            };
        }

        // The scope may have been destroyed since the check
        if !self.shared.issued.is_issued(channel_id) {
            self.shared.sessions.unregister(channel_id, &connection_id);
            return Err(PushError::UnknownChannel(channel_id.to_string()));
        }

        if let Some(user) = &user {
            self.shared.users.register_user(&connection_id, channel_id, user);

            // A concurrent close or scope expiry may have released the session entry
            if !self.shared.sessions.contains(channel_id, &connection_id) {
                self.shared.users.deregister_user(&connection_id, channel_id, user);
                return Err(not_registered(&connection_id, channel_id));
            }
        }

        if self.shared.ensure_running().is_err() {
            // Raced with shutdown after the first check
            self.close(&connection_id, CloseReason::Shutdown);
            return Err(PushError::ShutDown);
        }

        self.shared.metrics.record_registration_opened();
        info!(channel_id = %channel_id, connection = %connection_id, user = ?user, "connection opened");
        self.shared
            .emit(PushEvent::new(channel_id, &connection_id, user, PushEventKind::Opened));
        Ok(())
    }

    /// Switch the user of a connection registered under `channel_id`
    pub fn authenticate(&self, connection_id: &ConnectionId, channel_id: &ChannelId, user: UserId) -> PushResult<()> {
        self.shared.ensure_running()?;
        self.ensure_registered(connection_id, channel_id)?;

        let previous = self.shared.users.user_for(connection_id, channel_id);
        if previous.as_ref() == Some(&user) {
            return Ok(());
        }
        if let Some(previous) = &previous {
            self.shared
                .users
                .deregister_user(connection_id, channel_id, previous);
        }
        self.shared.users.register_user(connection_id, channel_id, &user);

        // The connection may have closed meanwhile
        if !self.shared.sessions.contains(channel_id, connection_id) {
            self.shared.users.deregister_user(connection_id, channel_id, &user);
            return Err(not_registered(connection_id, channel_id));
        }

        debug!(channel_id = %channel_id, connection = %connection_id, user = %user, "connection authenticated");
        self.shared.emit(PushEvent::new(
            channel_id,
            connection_id,
            Some(user),
            PushEventKind::Switched {
                previous_user: previous,
            },
        ));
        Ok(())
    }

    /// Drop the user of a connection registered under `channel_id`
    pub fn deauthenticate(&self, connection_id: &ConnectionId, channel_id: &ChannelId) -> PushResult<Option<UserId>> {
        self.ensure_registered(connection_id, channel_id)?;

        let previous = self.shared.users.user_for(connection_id, channel_id);
        if let Some(user) = &previous {
            self.shared.users.deregister_user(connection_id, channel_id, user);
            debug!(channel_id = %channel_id, connection = %connection_id, user = %user, "connection deauthenticated");
            self.shared.emit(PushEvent::new(
                channel_id,
                connection_id,
                None,
                PushEventKind::Switched {
                    previous_user: Some(user.clone()),
                },
            ));
        }
        Ok(previous)
    }

    fn ensure_registered(&self, connection_id: &ConnectionId, channel_id: &ChannelId) -> PushResult<()> {
        if self.shared.sessions.contains(channel_id, connection_id) {
            Ok(())
        } else {
            Err(not_registered(connection_id, channel_id))
        }
    }

    /// Remove a connection from one channel id
    pub fn leave(&self, channel_id: &ChannelId, connection_id: &ConnectionId) -> bool {
        self.release(channel_id, connection_id, CloseReason::Normal)
    }

    /// Remove a closed connection from every channel id it was registered under
    pub fn close(&self, connection_id: &ConnectionId, reason: CloseReason) -> Vec<ChannelId> {
        let mut users: HashMap<ChannelId, UserId> = self
            .shared
            .users
            .deregister_connection(connection_id)
            .into_iter()
            .map(|(user, channel_id)| (channel_id, user))
            .collect();

        let removed = self.shared.sessions.unregister_all(connection_id);

        // Users indexed by an open that raced the first sweep
        for (user, channel_id) in self.shared.users.deregister_connection(connection_id) {
            users.entry(channel_id).or_insert(user);
        }

        for channel_id in &removed {
            self.record_closed(channel_id, connection_id, users.get(channel_id).cloned(), reason);
        }
        removed
    }

    /// Deregister and close every connection under channel ids derived from `scope_id`
    ///
    /// Ids derived from the scope are revoked first, so clients can no longer
    /// open them. Returns the number of registrations removed.
    pub fn destroy_scope(&self, scope_id: &ScopeId) -> usize {
        self.shared.issued.revoke_scope(scope_id);
        let mut released = 0;

        for channel_id in self.shared.sessions.channel_ids_in_scope(scope_id) {
            for connection in self.shared.sessions.connections_for(&channel_id) {
                let connection_id = connection.id().clone();
                if self.release(&channel_id, &connection_id, CloseReason::ScopeExpired) {
                    released += 1;
                }
                if self
                    .shared
                    .sessions
                    .channel_ids_for_connection(&connection_id)
                    .is_empty()
                {
                    connection.close(CloseReason::ScopeExpired);
                }
            }
        }

        self.shared.metrics.record_scope_destroyed();
        info!(scope = %scope_id, released, "scope destroyed");
        released
    }

    fn release(&self, channel_id: &ChannelId, connection_id: &ConnectionId, reason: CloseReason) -> bool {
        let user = self.drop_user(connection_id, channel_id);
        let removed = self.shared.sessions.unregister(channel_id, connection_id);
        let user = self.drop_user(connection_id, channel_id).or(user);

        if removed {
            self.record_closed(channel_id, connection_id, user, reason);
        }
        removed
    }

    fn drop_user(&self, connection_id: &ConnectionId, channel_id: &ChannelId) -> Option<UserId> {
        let user = self.shared.users.user_for(connection_id, channel_id)?;
        self.shared.users.deregister_user(connection_id, channel_id, &user);
        Some(user)
    }

    fn record_closed(&self, channel_id: &ChannelId, connection_id: &ConnectionId, user: Option<UserId>, reason: CloseReason) {
        self.shared.metrics.record_registration_closed();
        info!(
            channel_id = %channel_id,
            connection = %connection_id,
            reason = reason.as_str(),
            "connection closed"
        );
        self.shared.emit(PushEvent::new(
            channel_id,
            connection_id,
            user,
            PushEventKind::Closed {
                close_code: reason.code(),
            },
        ));
    }

    // ==================
    // Lifecycle
    // ==================

    /// Tear the push facility down
    ///
    /// Every connection is deregistered and closed; afterwards contexts,
    /// sends and opens fail with [`PushError::ShutDown`].
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let connections = self.shared.sessions.all_connections();
        let count = connections.len();
        for connection in connections {
            self.close(connection.id(), CloseReason::Shutdown);
            connection.close(CloseReason::Shutdown);
        }

        self.shared.users.clear();
        self.shared.sessions.clear();
        self.shared.issued.clear();
        if count > 0 {
            warn!(connections = count, "push manager shut down with open connections");
        } else {
            info!("push manager shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.ensure_running().is_err()
    }

    /// Observe connection lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<PushEvent> {
        self.shared.events.subscribe()
    }

    // ==================
    // Introspection
    // ==================

    pub fn session_registry(&self) -> &SessionRegistry {
        &self.shared.sessions
    }

    pub fn channel_registry(&self) -> &ChannelRegistry {
        &self.shared.users
    }

    pub fn metrics(&self) -> &PushMetrics {
        &self.shared.metrics
    }
}

fn not_registered(connection_id: &ConnectionId, channel_id: &ChannelId) -> PushError {
    PushError::NotRegistered {
        connection: connection_id.to_string(),
        channel_id: channel_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::outbox::QueuedConnection;
    use crate::push::scope::ScopeIds;

    fn manager() -> PushManager {
        let manager = PushManager::default();
        manager.declare("chat", ScopeKind::Session).unwrap();
        manager.declare("news", ScopeKind::Application).unwrap();
        manager
    }

    #[test]
    fn test_declare_is_idempotent_and_detects_conflicts() {
        let manager = manager();
        assert!(manager.declare("chat", ScopeKind::Session).is_ok());
        assert!(matches!(
            manager.declare("chat", ScopeKind::View),
            Err(PushError::ChannelConflict { .. })
        ));
        assert!(matches!(
            manager.declare("bad name", ScopeKind::View),
            Err(PushError::InvalidChannelName(_))
        ));
        assert_eq!(manager.channels().len(), 2);
    }

    #[test]
    fn test_context_requires_declared_channel() {
        let manager = manager();
        assert!(matches!(
            manager.context("missing", &ScopeIds::none()),
            Err(PushError::UndeclaredChannel(_))
        ));
    }

    #[test]
    fn test_channel_id_requires_active_scope() {
        let manager = manager();
        assert!(matches!(
            manager.channel_id("chat", &ScopeIds::none()),
            Err(PushError::ScopeInactive { .. })
        ));

        let session = ScopeId::generate();
        let id = manager
            .channel_id("chat", &ScopeIds::none().with_session(session.clone()))
            .unwrap();
        assert_eq!(id.as_str(), format!("chat?{}", session));
    }

    fn issue(manager: &PushManager, session: &ScopeId) -> ChannelId {
        manager
            .channel_id("chat", &ScopeIds::none().with_session(session.clone()))
            .unwrap()
    }

    #[test]
    fn test_validate_channel_id() {
        let manager = manager();
        assert!(manager.validate_channel_id("news").is_ok());
        issue(&manager, &ScopeId::parse("abc").unwrap());
        assert!(manager.validate_channel_id("chat?abc").is_ok());
        assert!(matches!(
            manager.validate_channel_id("chat"),
            Err(PushError::UnknownChannel(_))
        ));
        assert!(matches!(
            manager.validate_channel_id("other"),
            Err(PushError::UnknownChannel(_))
        ));
        assert!(matches!(
            manager.validate_channel_id("chat?"),
            Err(PushError::InvalidChannelId(_))
        ));
    }

    #[test]
    fn test_scoped_ids_must_be_issued() {
        let manager = manager();
        assert!(matches!(
            manager.validate_channel_id("chat?neverissued"),
            Err(PushError::UnknownChannel(_))
        ));

        let (connection, _outbox) = QueuedConnection::new(4);
        let forged = ChannelId::parse("chat?neverissued").unwrap();
        assert!(matches!(
            manager.open(&forged, connection, None),
            Err(PushError::UnknownChannel(_))
        ));
        assert!(manager.session_registry().is_empty());
    }

    #[test]
    fn test_destroyed_scope_cannot_be_reopened() {
        let manager = manager();
        let session = ScopeId::generate();
        let id = issue(&manager, &session);

        let (first, _first_outbox) = QueuedConnection::new(4);
        manager.open(&id, first, None).unwrap();
        assert_eq!(manager.destroy_scope(&session), 1);

        assert!(matches!(
            manager.validate_channel_id(id.as_str()),
            Err(PushError::UnknownChannel(_))
        ));
        let (second, _second_outbox) = QueuedConnection::new(4);
        assert!(matches!(
            manager.open(&id, second, None),
            Err(PushError::UnknownChannel(_))
        ));
        assert_eq!(manager.session_registry().connection_count(&id), 0);
    }

    #[test]
    fn test_reopen_with_user_indexes_user() {
        let manager = manager();
        let id = ChannelId::parse("news").unwrap();
        let (connection, _outbox) = QueuedConnection::new(4);
        let connection_id = connection.id().clone();
        let alice = UserId::new("alice").unwrap();

        manager.open(&id, Arc::clone(&connection) as Arc<dyn Connection>, None).unwrap();
        manager.open(&id, connection, Some(alice.clone())).unwrap();

        assert_eq!(manager.channel_registry().user_for(&connection_id, &id), Some(alice.clone()));
        assert_eq!(manager.channel_registry().channel_ids_for_user(&alice, "news").len(), 1);
        assert_eq!(manager.session_registry().connection_count(&id), 1);
        assert_eq!(manager.metrics().snapshot().registrations_opened, 1);
    }

    #[test]
    fn test_authenticate_requires_registration() {
        let manager = manager();
        let id = ChannelId::parse("news").unwrap();
        let result = manager.authenticate(&ConnectionId::from("c1"), &id, UserId::new("alice").unwrap());
        assert!(matches!(result, Err(PushError::NotRegistered { .. })));
    }

    #[test]
    fn test_authenticate_switches_user() {
        let manager = manager();
        let id = ChannelId::parse("news").unwrap();
        let (connection, _outbox) = QueuedConnection::new(4);
        let connection_id = connection.id().clone();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();

        manager.open(&id, connection, Some(alice.clone())).unwrap();
        manager.authenticate(&connection_id, &id, bob.clone()).unwrap();

        let users = manager.channel_registry();
        assert!(users.channel_ids_for_user(&alice, "news").is_empty());
        assert_eq!(users.channel_ids_for_user(&bob, "news").len(), 1);

        assert_eq!(manager.deauthenticate(&connection_id, &id).unwrap(), Some(bob.clone()));
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let manager = manager();
        let mut events = manager.subscribe_events();
        let id = ChannelId::parse("news").unwrap();
        let (connection, _outbox) = QueuedConnection::new(4);
        let connection_id = connection.id().clone();

        manager.open(&id, connection, None).unwrap();
        manager.close(&connection_id, CloseReason::Normal);

        assert_eq!(events.recv().await.unwrap().kind, PushEventKind::Opened);
        assert_eq!(
            events.recv().await.unwrap().kind,
            PushEventKind::Closed { close_code: 1000 }
        );
    }

    #[test]
    fn test_shutdown_rejects_further_use() {
        let manager = manager();
        let id = ChannelId::parse("news").unwrap();
        let (connection, _outbox) = QueuedConnection::new(4);
        manager.open(&id, Arc::clone(&connection) as Arc<dyn Connection>, None).unwrap();
        let context = manager.context("news", &ScopeIds::none()).unwrap();

        manager.shutdown();

        assert!(manager.is_shut_down());
        assert!(connection.is_closed());
        assert!(manager.session_registry().is_empty());
        assert_eq!(context.send("late").unwrap_err(), PushError::ShutDown);
        assert!(matches!(
            manager.context("news", &ScopeIds::none()),
            Err(PushError::ShutDown)
        ));
        let (other, _outbox) = QueuedConnection::new(4);
        assert_eq!(manager.open(&id, other, None).unwrap_err(), PushError::ShutDown);
    }
}
