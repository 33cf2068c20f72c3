//! # Issued Channel Ids
//!
//! Scoped channel ids handed out to clients, indexed by the scope ids they
//! were derived from. A client may only open a scoped id that is still
//! listed here; expiring a scope revokes every id derived from it.
//!
//! Application ids carry no scope and are always accepted.

use std::collections::HashSet;

use dashmap::{DashMap, DashSet};
use tracing::debug;

use super::channel::ChannelId;
use super::scope::ScopeId;

/// Ledger of scoped channel ids issued in live scopes
#[derive(Debug, Default)]
pub struct IssuedChannelIds {
    ids: DashSet<ChannelId>,
    by_scope: DashMap<ScopeId, HashSet<ChannelId>>,
}

impl IssuedChannelIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `channel_id` as handed out
    ///
    /// Returns `false` for ids without scope components, which need no record.
    pub fn issue(&self, channel_id: &ChannelId) -> bool {
        let scope_ids = channel_id.scope_ids();
        if scope_ids.is_empty() {
            return false;
        }

        for scope_id in scope_ids {
            self.by_scope
                .entry(scope_id)
                .or_default()
                .insert(channel_id.clone());
        }
        self.ids.insert(channel_id.clone())
    }

    /// Whether a client may open `channel_id`
    pub fn is_issued(&self, channel_id: &ChannelId) -> bool {
        channel_id.scope_ids().is_empty() || self.ids.contains(channel_id)
    }

    /// Revoke every id derived from `scope_id`
    ///
    /// Returns the revoked ids.
    pub fn revoke_scope(&self, scope_id: &ScopeId) -> Vec<ChannelId> {
        let Some((_, channel_ids)) = self.by_scope.remove(scope_id) else {
            return Vec::new();
        };

        let revoked: Vec<ChannelId> = channel_ids
            .into_iter()
            .filter(|channel_id| self.ids.remove(channel_id).is_some())
            .collect();

        // Drop the revoked ids from the other scope they were derived from
        for channel_id in &revoked {
            for other in channel_id.scope_ids() {
                if &other == scope_id {
                    continue;
                }
                if let Some(mut ids) = self.by_scope.get_mut(&other) {
                    ids.remove(channel_id);
                }
                self.by_scope.remove_if(&other, |_, ids| ids.is_empty());
            }
        }

        debug!(scope = %scope_id, revoked = revoked.len(), "channel ids revoked");
        revoked
    }

    /// Number of scoped ids currently issued
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&self) {
        self.ids.clear();
        self.by_scope.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ChannelId {
        ChannelId::parse(raw).unwrap()
    }

    fn scope(raw: &str) -> ScopeId {
        ScopeId::parse(raw).unwrap()
    }

    #[test]
    fn test_application_ids_need_no_record() {
        let issued = IssuedChannelIds::new();
        assert!(!issued.issue(&id("news")));
        assert!(issued.is_issued(&id("news")));
        assert!(issued.is_empty());
    }

    #[test]
    fn test_scoped_ids_must_be_issued() {
        let issued = IssuedChannelIds::new();
        assert!(!issued.is_issued(&id("chat?s1")));

        assert!(issued.issue(&id("chat?s1")));
        assert!(!issued.issue(&id("chat?s1")));
        assert!(issued.is_issued(&id("chat?s1")));
        assert!(!issued.is_issued(&id("chat?s2")));
    }

    #[test]
    fn test_revoke_scope() {
        let issued = IssuedChannelIds::new();
        issued.issue(&id("chat?s1"));
        issued.issue(&id("board?s1?v1"));
        issued.issue(&id("board?s2?v1"));

        let mut revoked = issued.revoke_scope(&scope("s1"));
        revoked.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(revoked, vec![id("board?s1?v1"), id("chat?s1")]);

        assert!(!issued.is_issued(&id("chat?s1")));
        assert!(!issued.is_issued(&id("board?s1?v1")));
        assert!(issued.is_issued(&id("board?s2?v1")));
        assert_eq!(issued.len(), 1);

        // The view index no longer lists the revoked id
        assert_eq!(issued.revoke_scope(&scope("v1")), vec![id("board?s2?v1")]);
        assert!(issued.is_empty());
        assert!(issued.revoke_scope(&scope("s1")).is_empty());
    }
}
