//! # Session Registry
//!
//! Process-wide index from channel id to the open connections registered
//! under it.
//!
//! All maps are sharded [`DashMap`]s, so traffic on unrelated channel ids
//! never contends on one lock. No shard lock is held while the caller writes
//! to a connection: lookups return cloned snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::channel::ChannelId;
use super::connection::{Connection, ConnectionId};
use super::scope::ScopeId;

/// Channel id → connections index
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Connections by channel id
    by_channel: DashMap<ChannelId, HashMap<ConnectionId, Arc<dyn Connection>>>,

    /// Channel ids by connection
    by_connection: DashMap<ConnectionId, HashSet<ChannelId>>,

    /// Live channel ids by the scope ids they were derived from
    by_scope: DashMap<ScopeId, HashSet<ChannelId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under `channel_id`
    ///
    /// Returns `false` if it was already registered, or if the id is not live.
    pub fn register(&self, channel_id: &ChannelId, connection: Arc<dyn Connection>) -> bool {
        if !channel_id.is_live() {
            return false;
        }

        let connection_id = connection.id().clone();
        let inserted = self
            .by_channel
            .entry(channel_id.clone())
            .or_default()
            .insert(connection_id.clone(), connection)
            .is_none();

        if !inserted {
            return false;
        }

        self.by_connection
            .entry(connection_id.clone())
            .or_default()
            .insert(channel_id.clone());

        for scope_id in channel_id.scope_ids() {
            self.by_scope
                .entry(scope_id)
                .or_default()
                .insert(channel_id.clone());
        }

        debug!(channel_id = %channel_id, connection = %connection_id, "connection registered");
        true
    }

    /// Remove `connection_id` from `channel_id`
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister(&self, channel_id: &ChannelId, connection_id: &ConnectionId) -> bool {
        let removed = match self.by_channel.get_mut(channel_id) {
            Some(mut connections) => connections.remove(connection_id).is_some(),
            None => false,
        };

        if !removed {
            return false;
        }

        if let Some(mut channel_ids) = self.by_connection.get_mut(connection_id) {
            channel_ids.remove(channel_id);
        }
        self.by_connection
            .remove_if(connection_id, |_, channel_ids| channel_ids.is_empty());

        let emptied = self
            .by_channel
            .remove_if(channel_id, |_, connections| connections.is_empty())
            .is_some();
        if emptied {
            self.forget_scopes(channel_id);
        }

        debug!(channel_id = %channel_id, connection = %connection_id, "connection unregistered");
        true
    }

    /// Remove `connection_id` from every channel id it is registered under
    pub fn unregister_all(&self, connection_id: &ConnectionId) -> Vec<ChannelId> {
        let channel_ids = self.channel_ids_for_connection(connection_id);
        channel_ids
            .into_iter()
            .filter(|channel_id| self.unregister(channel_id, connection_id))
            .collect()
    }

    /// Snapshot of the connections registered under `channel_id`
    pub fn connections_for(&self, channel_id: &ChannelId) -> Vec<Arc<dyn Connection>> {
        self.by_channel
            .get(channel_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The connection registered under `channel_id` with the given id
    pub fn connection(&self, channel_id: &ChannelId, connection_id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        self.by_channel
            .get(channel_id)
            .and_then(|connections| connections.get(connection_id).cloned())
    }

    /// Channel ids `connection_id` is registered under
    pub fn channel_ids_for_connection(&self, connection_id: &ConnectionId) -> Vec<ChannelId> {
        self.by_connection
            .get(connection_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live channel ids derived from `scope_id`
    pub fn channel_ids_in_scope(&self, scope_id: &ScopeId) -> Vec<ChannelId> {
        self.by_scope
            .get(scope_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered connection, once each
    pub fn all_connections(&self) -> Vec<Arc<dyn Connection>> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for entry in self.by_channel.iter() {
            for (connection_id, connection) in entry.value() {
                if seen.insert(connection_id.clone()) {
                    all.push(Arc::clone(connection));
                }
            }
        }
        all
    }

    /// Number of distinct registered connections
    pub fn total_connections(&self) -> usize {
        self.by_connection.len()
    }

    pub fn contains(&self, channel_id: &ChannelId, connection_id: &ConnectionId) -> bool {
        self.by_channel
            .get(channel_id)
            .is_some_and(|connections| connections.contains_key(connection_id))
    }

    /// Number of connections under `channel_id`
    pub fn connection_count(&self, channel_id: &ChannelId) -> usize {
        self.by_channel
            .get(channel_id)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }

    /// Number of live channel ids
    pub fn channel_count(&self) -> usize {
        self.by_channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_channel.is_empty()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.by_channel.clear();
        self.by_connection.clear();
        self.by_scope.clear();
    }

    fn forget_scopes(&self, channel_id: &ChannelId) {
        for scope_id in channel_id.scope_ids() {
            if let Some(mut ids) = self.by_scope.get_mut(&scope_id) {
                // A concurrent register may have revived the id
                if !self.by_channel.contains_key(channel_id) {
                    ids.remove(channel_id);
                }
            }
            self.by_scope.remove_if(&scope_id, |_, ids| ids.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::connection::{CloseReason, PushMessage};
    use crate::push::delivery::DeliveryResult;

    #[derive(Debug)]
    struct NoopConnection(ConnectionId);

    impl Connection for NoopConnection {
        fn id(&self) -> &ConnectionId {
            &self.0
        }

        fn write(&self, _message: PushMessage) -> DeliveryResult {
            DeliveryResult::ready(self.0.clone(), Ok(()))
        }

        fn close(&self, _reason: CloseReason) {}
    }

    fn connection(id: &str) -> Arc<dyn Connection> {
        Arc::new(NoopConnection(ConnectionId::from(id)))
    }

    fn id(raw: &str) -> ChannelId {
        ChannelId::parse(raw).unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SessionRegistry::new();
        let c1 = connection("c1");

        assert!(registry.register(&id("chat?s1"), Arc::clone(&c1)));
        assert!(!registry.register(&id("chat?s1"), c1));
        assert_eq!(registry.connection_count(&id("chat?s1")), 1);
    }

    #[test]
    fn test_unregister_is_idempotent_and_removes_empty_keys() {
        let registry = SessionRegistry::new();
        let c1 = connection("c1");
        registry.register(&id("chat?s1"), c1);

        assert!(registry.unregister(&id("chat?s1"), &ConnectionId::from("c1")));
        assert!(!registry.unregister(&id("chat?s1"), &ConnectionId::from("c1")));
        assert!(registry.is_empty());
        assert_eq!(registry.total_connections(), 0);
        assert!(registry
            .channel_ids_in_scope(&ScopeId::parse("s1").unwrap())
            .is_empty());
    }

    #[test]
    fn test_inactive_id_is_refused() {
        use crate::push::channel::Channel;
        use crate::push::scope::{ScopeKind, ScopeSnapshot};

        let registry = SessionRegistry::new();
        let channel = Channel::new("chat", ScopeKind::Session).unwrap();
        let inactive = channel.resolve(&ScopeSnapshot::empty());

        assert!(!registry.register(&inactive, connection("c1")));
        assert!(registry.connections_for(&inactive).is_empty());
    }

    #[test]
    fn test_connections_for_unknown_id_is_empty() {
        let registry = SessionRegistry::new();
        assert!(registry.connections_for(&id("nobody")).is_empty());
    }

    #[test]
    fn test_unregister_all() {
        let registry = SessionRegistry::new();
        let c1 = connection("c1");
        registry.register(&id("chat?s1"), Arc::clone(&c1));
        registry.register(&id("news"), Arc::clone(&c1));
        registry.register(&id("news"), connection("c2"));

        let mut removed = registry.unregister_all(&ConnectionId::from("c1"));
        removed.sort();
        assert_eq!(removed, vec![id("chat?s1"), id("news")]);
        assert_eq!(registry.connection_count(&id("news")), 1);
        assert_eq!(registry.channel_count(), 1);
    }

    #[test]
    fn test_all_connections_is_deduplicated() {
        let registry = SessionRegistry::new();
        let c1 = connection("c1");
        registry.register(&id("chat?s1"), Arc::clone(&c1));
        registry.register(&id("news"), c1);
        registry.register(&id("news"), connection("c2"));

        assert_eq!(registry.all_connections().len(), 2);
        assert_eq!(registry.total_connections(), 2);
    }

    #[test]
    fn test_scope_index() {
        let registry = SessionRegistry::new();
        registry.register(&id("chat?s1?v1"), connection("c1"));
        registry.register(&id("chat?s1?v2"), connection("c2"));

        let s1 = ScopeId::parse("s1").unwrap();
        let v1 = ScopeId::parse("v1").unwrap();
        assert_eq!(registry.channel_ids_in_scope(&s1).len(), 2);
        assert_eq!(registry.channel_ids_in_scope(&v1), vec![id("chat?s1?v1")]);
    }
}
