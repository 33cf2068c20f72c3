//! # Delivery
//!
//! Fan-out of one message to every connection registered under a set of
//! channel ids.
//!
//! Best-effort, at-most-once. The fan-out only *initiates* one write per
//! connection and returns; each write resolves its own [`DeliveryResult`]
//! independently, and a failed write never affects its siblings.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

use super::channel::ChannelId;
use super::connection::{ConnectionId, PushMessage};
use super::session_registry::SessionRegistry;
use crate::observability::PushMetrics;

/// Per-connection delivery failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Connection was closed before the write completed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection's outbound queue is full
    #[error("Outbound queue full")]
    Backpressure,

    /// Write did not complete in time
    #[error("Write timed out")]
    Timeout,

    /// Transport dropped the write without reporting an outcome
    #[error("Write cancelled")]
    Cancelled,

    /// Transport-level write error
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Outcome of one write
pub type DeliveryOutcome = Result<(), DeliveryError>;

/// Asynchronous outcome of one write to one connection
///
/// Await it to observe the outcome. Dropping it does not cancel the write.
#[derive(Debug)]
pub struct DeliveryResult {
    connection_id: ConnectionId,
    receiver: oneshot::Receiver<DeliveryOutcome>,
}

/// Transport-side half of a [`DeliveryResult`]
///
/// Dropping it without completing resolves the result as
/// [`DeliveryError::Cancelled`].
#[derive(Debug)]
pub struct DeliveryCompleter {
    sender: oneshot::Sender<DeliveryOutcome>,
}

impl DeliveryCompleter {
    pub fn complete(self, outcome: DeliveryOutcome) {
        // The publisher may have dropped its handle
        let _ = self.sender.send(outcome);
    }
}

impl DeliveryResult {
    /// Create a pending result and the completer that resolves it
    pub fn pending(connection_id: ConnectionId) -> (DeliveryCompleter, DeliveryResult) {
        let (sender, receiver) = oneshot::channel();
        (
            DeliveryCompleter { sender },
            DeliveryResult {
                connection_id,
                receiver,
            },
        )
    }

    /// Create an already resolved result
    pub fn ready(connection_id: ConnectionId, outcome: DeliveryOutcome) -> Self {
        let (completer, result) = Self::pending(connection_id);
        completer.complete(outcome);
        result
    }

    /// Connection this write targets
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Take the outcome if the write has finished
    ///
    /// Returns `None` while the write is in flight. The outcome is handed out
    /// once; later calls report [`DeliveryError::Cancelled`].
    pub fn try_outcome(&mut self) -> Option<DeliveryOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DeliveryError::Cancelled)),
        }
    }

    /// Block the current thread until the write finishes
    ///
    /// Must not be called from within an async runtime; await the result
    /// there instead.
    pub fn blocking_wait(self) -> DeliveryOutcome {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(DeliveryError::Cancelled))
    }
}

impl Future for DeliveryResult {
    type Output = DeliveryOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DeliveryError::Cancelled)))
    }
}

/// Fans messages out to registered connections
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    sessions: Arc<SessionRegistry>,
    metrics: Arc<PushMetrics>,
}

impl DeliveryEngine {
    pub fn new(sessions: Arc<SessionRegistry>, metrics: Arc<PushMetrics>) -> Self {
        Self { sessions, metrics }
    }

    /// Deliver `message` to every connection under `channel_ids`, grouped by id
    ///
    /// Every requested id has an entry, empty when nobody listens. A
    /// connection registered under several of the ids is written once, under
    /// the first of them.
    pub fn deliver<'a, I>(&self, channel_ids: I, message: &PushMessage) -> HashMap<ChannelId, Vec<DeliveryResult>>
    where
        I: IntoIterator<Item = &'a ChannelId>,
    {
        let mut grouped: HashMap<ChannelId, Vec<DeliveryResult>> = HashMap::new();
        let ids: Vec<&ChannelId> = channel_ids.into_iter().collect();
        for id in &ids {
            grouped.entry((*id).clone()).or_default();
        }

        self.fan_out(ids, message, |id, result| {
            grouped.entry(id.clone()).or_default().push(result);
        });

        grouped
    }

    /// Deliver `message` to the union of connections under `channel_ids`
    pub fn deliver_all<'a, I>(&self, channel_ids: I, message: &PushMessage) -> Vec<DeliveryResult>
    where
        I: IntoIterator<Item = &'a ChannelId>,
    {
        let mut results = Vec::new();
        self.fan_out(channel_ids, message, |_, result| results.push(result));
        results
    }

    fn fan_out<'a, I, F>(&self, channel_ids: I, message: &PushMessage, mut sink: F)
    where
        I: IntoIterator<Item = &'a ChannelId>,
        F: FnMut(&ChannelId, DeliveryResult),
    {
        let mut seen: HashSet<ConnectionId> = HashSet::new();
        let mut targeted = 0usize;

        for id in channel_ids {
            // Snapshot taken under the shard lock; writes happen after release
            let connections = self.sessions.connections_for(id);
            for connection in connections {
                if !seen.insert(connection.id().clone()) {
                    continue;
                }
                targeted += 1;
                sink(id, connection.write(message.clone()));
            }
        }

        self.metrics.record_publish(targeted as u64);
        trace!(recipients = targeted, "push fan-out initiated");
    }
}
