//! # Scopes
//!
//! Session and view scopes bound the lifetime of scoped channels.
//!
//! A [`ScopeSnapshot`] is captured eagerly when a [`PushContext`] is obtained,
//! so a publish running later on another task still resolves against the
//! scopes that were active at capture time.
//!
//! [`PushContext`]: super::context::PushContext

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{PushError, PushResult};

/// Declared lifetime scope of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// One channel id shared by the whole application
    Application,
    /// One channel id per browser session
    Session,
    /// One channel id per page view
    View,
    /// One channel id per page view within a session
    SessionAndView,
}

impl ScopeKind {
    /// Whether channel ids of this kind carry a session component
    pub fn requires_session(&self) -> bool {
        matches!(self, ScopeKind::Session | ScopeKind::SessionAndView)
    }

    /// Whether channel ids of this kind carry a view component
    pub fn requires_view(&self) -> bool {
        matches!(self, ScopeKind::View | ScopeKind::SessionAndView)
    }

    /// Number of scope components in a channel id of this kind
    pub fn component_count(&self) -> usize {
        usize::from(self.requires_session()) + usize::from(self.requires_view())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Application => "application",
            ScopeKind::Session => "session",
            ScopeKind::View => "view",
            ScopeKind::SessionAndView => "session_and_view",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of one active session or view scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId(String);

impl ScopeId {
    /// Generate a fresh, collision-free scope id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a scope id received from outside the process
    pub fn parse(raw: &str) -> PushResult<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PushError::InvalidScopeId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ScopeId {
    type Error = PushError;

    fn try_from(value: String) -> PushResult<Self> {
        Self::parse(&value)
    }
}

impl From<ScopeId> for String {
    fn from(id: ScopeId) -> Self {
        id.0
    }
}

/// Source of the currently active scope ids
///
/// Each method returns `None` when the corresponding scope is not active.
pub trait ScopeProvider {
    fn current_session_scope_id(&self) -> Option<ScopeId>;

    fn current_view_scope_id(&self) -> Option<ScopeId>;
}

/// Explicitly supplied scope ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeIds {
    pub session: Option<ScopeId>,
    pub view: Option<ScopeId>,
}

tokio::task_local! {
    static AMBIENT_SCOPE: ScopeIds;
}

impl ScopeIds {
    /// No active scope
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the session scope
    pub fn with_session(mut self, session: ScopeId) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the view scope
    pub fn with_view(mut self, view: ScopeId) -> Self {
        self.view = Some(view);
        self
    }

    /// Run `future` with these ids as the task's ambient scope
    ///
    /// Inside the future, [`AmbientScope`] reports these ids.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        AMBIENT_SCOPE.scope(self, future).await
    }

    /// Synchronous counterpart of [`ScopeIds::scope`]
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        AMBIENT_SCOPE.sync_scope(self, f)
    }
}

impl ScopeProvider for ScopeIds {
    fn current_session_scope_id(&self) -> Option<ScopeId> {
        self.session.clone()
    }

    fn current_view_scope_id(&self) -> Option<ScopeId> {
        self.view.clone()
    }
}

/// Scope provider backed by the task-local scope set through [`ScopeIds::scope`]
///
/// Outside such a task both scopes are inactive.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientScope;

impl ScopeProvider for AmbientScope {
    fn current_session_scope_id(&self) -> Option<ScopeId> {
        AMBIENT_SCOPE
            .try_with(|ids| ids.session.clone())
            .ok()
            .flatten()
    }

    fn current_view_scope_id(&self) -> Option<ScopeId> {
        AMBIENT_SCOPE.try_with(|ids| ids.view.clone()).ok().flatten()
    }
}

/// Immutable capture of the scope ids active at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSnapshot {
    session: Option<ScopeId>,
    view: Option<ScopeId>,
}

impl ScopeSnapshot {
    /// Capture the scopes currently reported by `provider`
    pub fn capture(provider: &dyn ScopeProvider) -> Self {
        Self {
            session: provider.current_session_scope_id(),
            view: provider.current_view_scope_id(),
        }
    }

    /// Build a snapshot from explicit ids
    pub fn new(session: Option<ScopeId>, view: Option<ScopeId>) -> Self {
        Self { session, view }
    }

    /// Snapshot with no active scope
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&ScopeId> {
        self.session.as_ref()
    }

    pub fn view(&self) -> Option<&ScopeId> {
        self.view.as_ref()
    }

    /// Whether every scope required by `kind` was active at capture time
    pub fn covers(&self, kind: ScopeKind) -> bool {
        (!kind.requires_session() || self.session.is_some())
            && (!kind.requires_view() || self.view.is_some())
    }
}
