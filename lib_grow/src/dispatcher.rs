//! Fan-out of inbound frames and connection lifecycle events.
//!
//! One `Dispatcher` backs arbitrarily many subscribers. Frames are wrapped in
//! an `Arc` once and every subscriber receives a pointer to the same parsed
//! payload, so a broadcast never clones message bodies per consumer.
//!
//! Subscriber lifetime is independent of the connection: consumers attach and
//! detach freely, and the connection stays up after the last detach. Dropping
//! a receiver without unsubscribing is also fine; the stale entry is pruned
//! on the next broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::connection::ConnectionStatus;
use crate::protocol::Inbound;

/// What a subscriber receives: every parsed frame plus lifecycle transitions
/// of the shared connection.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A parsed inbound frame, shared across all subscribers.
    Frame(Arc<Inbound>),
    /// The connection (re)opened.
    Connected,
    /// The connection closed or errored; a reconnect may follow.
    Disconnected,
    /// The reconnect budget is exhausted. No further events will arrive.
    GaveUp,
}

impl PushEvent {
    /// The status a consumer should display after seeing this event, if the
    /// event implies one.
    pub fn implied_status(&self) -> Option<ConnectionStatus> {
        match self {
            PushEvent::Connected => Some(ConnectionStatus::Open),
            PushEvent::Disconnected => Some(ConnectionStatus::Closed),
            PushEvent::GaveUp => Some(ConnectionStatus::GivingUp),
            PushEvent::Frame(_) => None,
        }
    }
}

/// Opaque identity handed out by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct SubscriberHandle {
    id: u64,
    label: String,
    sender: mpsc::UnboundedSender<PushEvent>,
}

/// Subscription registry multiplexing one connection across many consumers.
pub struct Dispatcher {
    subscribers: Mutex<Vec<SubscriberHandle>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a consumer. The label only appears in logs.
    pub fn subscribe(&self, label: &str) -> (SubscriberId, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().expect("registry lock poisoned");
        subscribers.push(SubscriberHandle {
            id,
            label: label.to_string(),
            sender: tx,
        });
        log::info!("Subscriber '{}' attached ({} active)", label, subscribers.len());
        (SubscriberId(id), rx)
    }

    /// Detaches a consumer. Unknown or already-removed ids are no-ops.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock().expect("registry lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id.0);
        if subscribers.len() == before {
            log::debug!("Unsubscribe for unknown subscriber {:?}", id);
        }
    }

    /// Delivers one event to every registered subscriber. Subscribers whose
    /// receiver has been dropped are removed on the way through.
    pub fn broadcast(&self, event: PushEvent) {
        let mut subscribers = self.subscribers.lock().expect("registry lock poisoned");
        subscribers.retain(|s| match s.sender.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                log::info!("Subscriber '{}' dropped its receiver, pruning", s.label);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("registry lock poisoned").len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
