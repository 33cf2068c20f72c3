//! # Channels and Channel Ids
//!
//! A channel is a logical name plus a declared [`ScopeKind`]. Publishing
//! resolves the channel against a [`ScopeSnapshot`] into a [`ChannelId`], the
//! concrete key connections are registered under.
//!
//! Channel id layout: `name[?component][?component]`, where the components
//! are the session and/or view scope ids demanded by the scope kind, in that
//! order. Channel names and scope ids never contain the separator, so no
//! component needs escaping and distinct inputs never collide.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::{PushError, PushResult};
use super::scope::{ScopeId, ScopeKind, ScopeSnapshot};

/// Separator between the channel name and scope components
pub const CHANNEL_ID_SEPARATOR: char = '?';

/// Component used in place of a scope that was not active.
/// Never a valid [`ScopeId`], so ids carrying it are never registered.
const INACTIVE_SCOPE_MARKER: &str = "~";

fn channel_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid channel name pattern"))
}

/// Validated channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: &str) -> PushResult<Self> {
        if channel_name_pattern().is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(PushError::InvalidChannelName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = PushError;

    fn try_from(value: String) -> PushResult<Self> {
        Self::new(&value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

/// A declared channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: ChannelName,
    pub scope: ScopeKind,
}

impl Channel {
    /// Create a channel, validating its name
    pub fn new(name: &str, scope: ScopeKind) -> PushResult<Self> {
        Ok(Self {
            name: ChannelName::new(name)?,
            scope,
        })
    }

    /// Resolve this channel against a scope snapshot
    pub fn resolve(&self, snapshot: &ScopeSnapshot) -> ChannelId {
        resolve_channel_id(&self.name, self.scope, snapshot)
    }

    /// Whether `id` has the shape of an id of this channel
    pub fn owns(&self, id: &ChannelId) -> bool {
        id.channel_name() == self.name.as_str()
            && id.component_count() == self.scope.component_count()
    }
}

/// Concrete delivery key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Parse a channel id received from a client
    ///
    /// Only live ids parse: every scope component must be a valid scope id.
    pub fn parse(raw: &str) -> PushResult<Self> {
        let invalid = || PushError::InvalidChannelId(raw.to_string());

        let mut parts = raw.split(CHANNEL_ID_SEPARATOR);
        let name = parts.next().unwrap_or_default();
        if !channel_name_pattern().is_match(name) {
            return Err(invalid());
        }

        let mut components = 0;
        for component in parts {
            ScopeId::parse(component).map_err(|_| invalid())?;
            components += 1;
        }
        if components > 2 {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the channel this id was resolved from
    pub fn channel_name(&self) -> &str {
        self.0
            .split_once(CHANNEL_ID_SEPARATOR)
            .map_or(self.0.as_str(), |(name, _)| name)
    }

    fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(CHANNEL_ID_SEPARATOR).skip(1)
    }

    pub fn component_count(&self) -> usize {
        self.components().count()
    }

    /// Scope ids this channel id was derived from
    pub fn scope_ids(&self) -> Vec<ScopeId> {
        self.components()
            .filter(|c| *c != INACTIVE_SCOPE_MARKER)
            .filter_map(|c| ScopeId::parse(c).ok())
            .collect()
    }

    /// Whether every scope this id depends on was active when it was resolved
    pub fn is_live(&self) -> bool {
        self.components().all(|c| c != INACTIVE_SCOPE_MARKER)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a channel name and declared scope kind against a snapshot
///
/// Total and deterministic. A scope required by `kind` but absent from
/// `snapshot` yields a non-live id that matches no connection.
pub fn resolve_channel_id(name: &ChannelName, kind: ScopeKind, snapshot: &ScopeSnapshot) -> ChannelId {
    let mut id = String::with_capacity(name.as_str().len() + 2 * 33);
    id.push_str(name.as_str());

    let mut push_component = |scope: Option<&ScopeId>| {
        id.push(CHANNEL_ID_SEPARATOR);
        id.push_str(scope.map_or(INACTIVE_SCOPE_MARKER, ScopeId::as_str));
    };

    if kind.requires_session() {
        push_component(snapshot.session());
    }
    if kind.requires_view() {
        push_component(snapshot.view());
    }

    ChannelId(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(raw: &str) -> ScopeId {
        ScopeId::parse(raw).unwrap()
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(ChannelName::new("chat_room1").is_ok());
        assert!(ChannelName::new("").is_err());
        assert!(ChannelName::new("chat?x").is_err());
        assert!(ChannelName::new("chat room").is_err());
    }

    #[test]
    fn test_resolve_application() {
        let channel = Channel::new("news", ScopeKind::Application).unwrap();
        let snapshot = ScopeSnapshot::new(Some(scope("s1")), Some(scope("v1")));
        assert_eq!(channel.resolve(&snapshot).as_str(), "news");
    }

    #[test]
    fn test_resolve_component_order() {
        let snapshot = ScopeSnapshot::new(Some(scope("s1")), Some(scope("v1")));

        let session = Channel::new("chat", ScopeKind::Session).unwrap();
        let view = Channel::new("chat", ScopeKind::View).unwrap();
        let both = Channel::new("chat", ScopeKind::SessionAndView).unwrap();

        assert_eq!(session.resolve(&snapshot).as_str(), "chat?s1");
        assert_eq!(view.resolve(&snapshot).as_str(), "chat?v1");
        assert_eq!(both.resolve(&snapshot).as_str(), "chat?s1?v1");
    }

    #[test]
    fn test_resolve_inactive_scope_is_not_live() {
        let channel = Channel::new("chat", ScopeKind::SessionAndView).unwrap();
        let snapshot = ScopeSnapshot::new(Some(scope("s1")), None);

        let id = channel.resolve(&snapshot);
        assert!(!id.is_live());
        assert_eq!(id.channel_name(), "chat");
        assert_eq!(id.scope_ids(), vec![scope("s1")]);
        assert!(ChannelId::parse(id.as_str()).is_err());
    }

    #[test]
    fn test_parse_round_trip_parts() {
        let id = ChannelId::parse("chat?s1?v1").unwrap();
        assert!(id.is_live());
        assert_eq!(id.channel_name(), "chat");
        assert_eq!(id.component_count(), 2);
        assert_eq!(id.scope_ids(), vec![scope("s1"), scope("v1")]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ChannelId::parse("").is_err());
        assert!(ChannelId::parse("chat?").is_err());
        assert!(ChannelId::parse("chat?a?b?c").is_err());
        assert!(ChannelId::parse("ch at?a").is_err());
    }

    #[test]
    fn test_owns() {
        let channel = Channel::new("chat", ScopeKind::Session).unwrap();
        assert!(channel.owns(&ChannelId::parse("chat?s1").unwrap()));
        assert!(!channel.owns(&ChannelId::parse("chat").unwrap()));
        assert!(!channel.owns(&ChannelId::parse("chatter?s1").unwrap()));
    }
}
