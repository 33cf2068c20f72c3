//! # Queued Connection
//!
//! A [`Connection`] backed by a bounded queue. The transport drains the
//! [`Outbox`] on its own task, performs the actual I/O and completes each
//! message's [`DeliveryResult`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::connection::{CloseReason, Connection, ConnectionId, PushMessage};
use super::delivery::{DeliveryCompleter, DeliveryError, DeliveryOutcome, DeliveryResult};

/// A message waiting to be written, with the handle that reports its outcome
#[derive(Debug)]
pub struct OutboundMessage {
    message: PushMessage,
    completer: DeliveryCompleter,
}

impl OutboundMessage {
    pub fn message(&self) -> &PushMessage {
        &self.message
    }

    /// Report the outcome of the write to the publisher
    pub fn complete(self, outcome: DeliveryOutcome) {
        self.completer.complete(outcome);
    }
}

/// Next thing the transport has to do for a connection
#[derive(Debug)]
pub enum OutboxItem {
    /// Write this message
    Message(OutboundMessage),
    /// Close the connection
    Close(CloseReason),
}

/// Connection whose writes are queued for a transport task
#[derive(Debug)]
pub struct QueuedConnection {
    id: ConnectionId,
    queue: mpsc::Sender<OutboundMessage>,
    close_signal: watch::Sender<Option<CloseReason>>,
    closed: AtomicBool,
}

/// Transport side of a [`QueuedConnection`]
#[derive(Debug)]
pub struct Outbox {
    queue: mpsc::Receiver<OutboundMessage>,
    close_signal: watch::Receiver<Option<CloseReason>>,
}

impl QueuedConnection {
    /// Create a connection with room for `capacity` queued messages
    pub fn new(capacity: usize) -> (Arc<Self>, Outbox) {
        Self::with_id(ConnectionId::generate(), capacity)
    }

    pub fn with_id(id: ConnectionId, capacity: usize) -> (Arc<Self>, Outbox) {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);

        let connection = Arc::new(Self {
            id,
            queue: queue_tx,
            close_signal: close_tx,
            closed: AtomicBool::new(false),
        });
        let outbox = Outbox {
            queue: queue_rx,
            close_signal: close_rx,
        };

        (connection, outbox)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for QueuedConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn write(&self, message: PushMessage) -> DeliveryResult {
        if self.is_closed() {
            return DeliveryResult::ready(self.id.clone(), Err(DeliveryError::ConnectionClosed));
        }

        let (completer, result) = DeliveryResult::pending(self.id.clone());
        match self.queue.try_send(OutboundMessage { message, completer }) {
            Ok(()) => result,
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                rejected.complete(Err(DeliveryError::Backpressure));
                result
            }
            Err(mpsc::error::TrySendError::Closed(rejected)) => {
                rejected.complete(Err(DeliveryError::ConnectionClosed));
                result
            }
        }
    }

    fn close(&self, reason: CloseReason) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // The outbox may already be gone
            let _ = self.close_signal.send(Some(reason));
        }
    }
}

impl Outbox {
    /// Wait for the next message or close request
    ///
    /// A close request takes precedence over queued messages. Returns `None`
    /// once the connection handle is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboxItem> {
        if let Some(reason) = *self.close_signal.borrow() {
            return Some(OutboxItem::Close(reason));
        }

        tokio::select! {
            biased;

            changed = self.close_signal.changed() => {
                match changed {
                    Ok(()) => self.close_signal.borrow().map(OutboxItem::Close),
                    // Sender dropped: only queued messages remain
                    Err(_) => self.queue.recv().await.map(OutboxItem::Message),
                }
            }
            message = self.queue.recv() => message.map(OutboxItem::Message),
        }
    }

    /// Take a queued message without waiting
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.queue.try_recv().ok()
    }

    /// Fail every queued message with [`DeliveryError::ConnectionClosed`]
    pub fn fail_pending(&mut self) -> usize {
        self.queue.close();
        let mut failed = 0;
        while let Ok(pending) = self.queue.try_recv() {
            pending.complete(Err(DeliveryError::ConnectionClosed));
            failed += 1;
        }
        failed
    }
}
