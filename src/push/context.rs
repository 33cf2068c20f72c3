//! # Push Context
//!
//! Publisher-facing handle bound to one channel and the scopes that were
//! active when it was obtained.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::channel::{Channel, ChannelId};
use super::channel_registry::UserId;
use super::connection::PushMessage;
use super::delivery::DeliveryResult;
use super::errors::PushResult;
use super::manager::PushShared;
use super::scope::ScopeSnapshot;

/// Publishes messages on one channel
///
/// The channel id is resolved once, when the context is obtained from
/// [`PushManager::context`](super::manager::PushManager::context). Sending
/// from another task later still targets the scopes captured then.
#[derive(Debug, Clone)]
pub struct PushContext {
    channel: Channel,
    snapshot: ScopeSnapshot,
    channel_id: ChannelId,
    shared: Arc<PushShared>,
}

impl PushContext {
    pub(crate) fn new(channel: Channel, snapshot: ScopeSnapshot, shared: Arc<PushShared>) -> Self {
        let channel_id = channel.resolve(&snapshot);
        Self {
            channel,
            snapshot,
            channel_id,
            shared,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Channel id broadcasts of this context are delivered to
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn snapshot(&self) -> &ScopeSnapshot {
        &self.snapshot
    }

    /// Send `message` to every connection under this context's channel id
    ///
    /// Returns one result per connection; empty when nobody listens or the
    /// captured scope was inactive.
    pub fn send(&self, message: impl Into<PushMessage>) -> PushResult<Vec<DeliveryResult>> {
        self.shared.ensure_running()?;

        let message = message.into();
        let results = self.shared.engine.deliver_all([&self.channel_id], &message);
        debug!(channel_id = %self.channel_id, recipients = results.len(), "broadcast sent");
        Ok(results)
    }

    /// Send `message` to every open connection of `user` on this channel
    ///
    /// Covers all of the user's channel ids on this channel, whatever scope
    /// they were opened in.
    pub fn send_to_user(&self, message: impl Into<PushMessage>, user: impl AsRef<str>) -> PushResult<Vec<DeliveryResult>> {
        let user = UserId::new(user.as_ref())?;
        self.shared.ensure_running()?;

        let message = message.into();
        Ok(self.deliver_to_user(&user, &message))
    }

    /// Send `message` to every open connection of each of `users`
    ///
    /// All users are validated before anything is sent. A user without
    /// connections maps to an empty result set.
    pub fn send_to_users<I, S>(&self, message: impl Into<PushMessage>, users: I) -> PushResult<HashMap<UserId, Vec<DeliveryResult>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let users = users
            .into_iter()
            .map(|user| UserId::new(user.as_ref()))
            .collect::<PushResult<Vec<_>>>()?;
        self.shared.ensure_running()?;

        let message = message.into();
        let mut results = HashMap::with_capacity(users.len());
        for user in users {
            if let Entry::Vacant(slot) = results.entry(user) {
                let delivered = self.deliver_to_user(slot.key(), &message);
                slot.insert(delivered);
            }
        }
        Ok(results)
    }

    fn deliver_to_user(&self, user: &UserId, message: &PushMessage) -> Vec<DeliveryResult> {
        let channel_ids = self
            .shared
            .users
            .channel_ids_for_user(user, self.channel.name.as_str());
        let results = self.shared.engine.deliver_all(&channel_ids, message);
        debug!(
            channel = %self.channel.name,
            user = %user,
            channel_ids = channel_ids.len(),
            recipients = results.len(),
            "user message sent"
        );
        results
    }
}
