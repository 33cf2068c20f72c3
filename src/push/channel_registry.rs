//! # Channel Registry
//!
//! Process-wide index from (user, channel name) to the channel ids currently
//! registered for that user, across all of the user's open connections.
//!
//! Each channel id keeps the set of connections that hold it, so two
//! connections of one user sharing a channel id (two tabs in one session)
//! keep the id alive until both are gone.

use std::collections::{HashMap, HashSet};
use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::channel::ChannelId;
use super::connection::ConnectionId;
use super::errors::{PushError, PushResult};

const MAX_USER_ID_LEN: usize = 256;

/// Application-defined user identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate a user identity
    ///
    /// Must be non-blank, at most 256 characters, and free of control
    /// characters.
    pub fn new(raw: &str) -> PushResult<Self> {
        let valid = !raw.trim().is_empty()
            && raw.chars().count() <= MAX_USER_ID_LEN
            && !raw.chars().any(char::is_control);

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PushError::InvalidUser(raw.escape_debug().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = PushError;

    fn try_from(value: String) -> PushResult<Self> {
        Self::new(&value)
    }
}

impl From<UserId> for String {
    fn from(user: UserId) -> Self {
        user.0
    }
}

type UserKey = (UserId, String);

/// (user, channel name) → channel ids index
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Channel ids, and the connections holding them, by user and channel name
    by_user: DashMap<UserKey, HashMap<ChannelId, HashSet<ConnectionId>>>,

    /// User registrations by connection
    by_connection: DashMap<ConnectionId, HashMap<ChannelId, UserId>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `user` holds `channel_id` through `connection`
    ///
    /// Returns `false` if the registration already existed.
    pub fn register_user(&self, connection: &ConnectionId, channel_id: &ChannelId, user: &UserId) -> bool {
        let key = (user.clone(), channel_id.channel_name().to_string());
        let inserted = self
            .by_user
            .entry(key)
            .or_default()
            .entry(channel_id.clone())
            .or_default()
            .insert(connection.clone());

        if inserted {
            self.by_connection
                .entry(connection.clone())
                .or_default()
                .insert(channel_id.clone(), user.clone());
            debug!(user = %user, channel_id = %channel_id, connection = %connection, "user registered");
        }

        inserted
    }

    /// Inverse of [`register_user`](Self::register_user)
    ///
    /// Empty id sets and user entries are removed. Returns `false` if the
    /// registration did not exist.
    pub fn deregister_user(&self, connection: &ConnectionId, channel_id: &ChannelId, user: &UserId) -> bool {
        if let Some(mut registrations) = self.by_connection.get_mut(connection) {
            if registrations.get(channel_id) == Some(user) {
                registrations.remove(channel_id);
            }
        }
        self.by_connection
            .remove_if(connection, |_, registrations| registrations.is_empty());

        let key = (user.clone(), channel_id.channel_name().to_string());
        let removed = match self.by_user.get_mut(&key) {
            Some(mut channel_ids) => {
                let removed = channel_ids
                    .get_mut(channel_id)
                    .is_some_and(|connections| connections.remove(connection));
                if channel_ids.get(channel_id).is_some_and(HashSet::is_empty) {
                    channel_ids.remove(channel_id);
                }
                removed
            }
            None => false,
        };
        self.by_user.remove_if(&key, |_, channel_ids| channel_ids.is_empty());

        if removed {
            debug!(user = %user, channel_id = %channel_id, connection = %connection, "user deregistered");
        }
        removed
    }

    /// Drop every user registration held by `connection`
    pub fn deregister_connection(&self, connection: &ConnectionId) -> Vec<(UserId, ChannelId)> {
        let registrations: Vec<(UserId, ChannelId)> = self
            .by_connection
            .get(connection)
            .map(|r| r.iter().map(|(id, user)| (user.clone(), id.clone())).collect())
            .unwrap_or_default();

        registrations
            .into_iter()
            .filter(|(user, channel_id)| self.deregister_user(connection, channel_id, user))
            .collect()
    }

    /// Channel ids `user` currently holds on `channel_name`
    pub fn channel_ids_for_user(&self, user: &UserId, channel_name: &str) -> HashSet<ChannelId> {
        let key = (user.clone(), channel_name.to_string());
        self.by_user
            .get(&key)
            .map(|channel_ids| channel_ids.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// User `connection` is registered as under `channel_id`
    pub fn user_for(&self, connection: &ConnectionId, channel_id: &ChannelId) -> Option<UserId> {
        self.by_connection
            .get(connection)
            .and_then(|registrations| registrations.get(channel_id).cloned())
    }

    /// Number of (user, channel name) entries
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.by_user.clear();
        self.by_connection.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn id(raw: &str) -> ChannelId {
        ChannelId::parse(raw).unwrap()
    }

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new("alice").is_ok());
        assert!(UserId::new("  ").is_err());
        assert!(UserId::new("bad\nuser").is_err());
        assert!(UserId::new(&"x".repeat(257)).is_err());
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ChannelRegistry::new();
        let c1 = ConnectionId::from("c1");

        assert!(registry.register_user(&c1, &id("chat?v1"), &user("alice")));
        assert!(!registry.register_user(&c1, &id("chat?v1"), &user("alice")));
        assert_eq!(registry.channel_ids_for_user(&user("alice"), "chat").len(), 1);
    }

    #[test]
    fn test_union_across_connections() {
        let registry = ChannelRegistry::new();
        registry.register_user(&ConnectionId::from("c1"), &id("chat?v1"), &user("alice"));
        registry.register_user(&ConnectionId::from("c2"), &id("chat?v2"), &user("alice"));
        registry.register_user(&ConnectionId::from("c3"), &id("news"), &user("alice"));

        let ids = registry.channel_ids_for_user(&user("alice"), "chat");
        assert_eq!(ids, HashSet::from([id("chat?v1"), id("chat?v2")]));
    }

    #[test]
    fn test_shared_id_survives_first_close() {
        let registry = ChannelRegistry::new();
        let c1 = ConnectionId::from("c1");
        let c2 = ConnectionId::from("c2");
        registry.register_user(&c1, &id("chat?s1"), &user("alice"));
        registry.register_user(&c2, &id("chat?s1"), &user("alice"));

        assert!(registry.deregister_user(&c1, &id("chat?s1"), &user("alice")));
        assert_eq!(registry.channel_ids_for_user(&user("alice"), "chat").len(), 1);

        assert!(registry.deregister_user(&c2, &id("chat?s1"), &user("alice")));
        assert!(registry.channel_ids_for_user(&user("alice"), "chat").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_connection() {
        let registry = ChannelRegistry::new();
        let c1 = ConnectionId::from("c1");
        registry.register_user(&c1, &id("chat?v1"), &user("alice"));
        registry.register_user(&c1, &id("news"), &user("alice"));

        let removed = registry.deregister_connection(&c1);
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.user_for(&c1, &id("news")), None);
    }

    #[test]
    fn test_unknown_user_is_empty() {
        let registry = ChannelRegistry::new();
        assert!(registry.channel_ids_for_user(&user("nobody"), "chat").is_empty());
        assert!(!registry.deregister_user(&ConnectionId::from("c1"), &id("chat"), &user("nobody")));
    }
}
