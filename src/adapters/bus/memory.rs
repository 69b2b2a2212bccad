//! In-process message bus.
//!
//! Routes each published message to every subscriber registered on the
//! exact subject at publish time. Each subscriber owns a bounded channel; a
//! full channel is reported as a slow consumer rather than blocking the
//! publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::{BusError, Message, MessageBus, Subject, Subscription};

/// Default per-subscriber buffer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Route {
    id: u64,
    sender: mpsc::Sender<Message>,
}

struct Registry {
    capacity: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    routes: RwLock<HashMap<Subject, Vec<Route>>>,
}

impl Registry {
    fn remove(&self, subject: &Subject, id: u64) {
        let mut routes = self.routes.write();
        if let Some(list) = routes.get_mut(subject) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                routes.remove(subject);
            }
        }
    }
}

/// Cloneable handle to a shared in-process bus
#[derive(Clone)]
pub struct InMemoryBus {
    registry: Arc<Registry>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with a custom per-subscriber buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                routes: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Close the bus: pending subscriptions end and new calls fail
    pub fn close(&self) {
        self.registry.closed.store(true, Ordering::SeqCst);
        self.registry.routes.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.registry.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions across all subjects
    pub fn subscriber_count(&self) -> usize {
        self.registry.routes.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn subscribe(&self, subject: &Subject) -> Result<Subscription, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let (sender, receiver) = mpsc::channel(self.registry.capacity);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);

        self.registry
            .routes
            .write()
            .entry(subject.clone())
            .or_default()
            .push(Route { id, sender });
        debug!(%subject, id, "subscribed");

        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        let route_subject = subject.clone();
        Ok(
            Subscription::new(subject.clone(), receiver).on_unsubscribe(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(&route_subject, id);
                }
            }),
        )
    }

    async fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let senders: Vec<(u64, mpsc::Sender<Message>)> = self
            .registry
            .routes
            .read()
            .get(subject)
            .map(|list| list.iter().map(|r| (r.id, r.sender.clone())).collect())
            .unwrap_or_default();

        if senders.is_empty() {
            debug!(%subject, "no subscribers, message dropped");
            return Ok(());
        }

        let mut slow = false;
        for (id, sender) in senders {
            match sender.try_send(Message::new(subject.clone(), payload.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%subject, id, "subscriber buffer full");
                    slow = true;
                }
                Err(TrySendError::Closed(_)) => self.registry.remove(subject, id),
            }
        }

        if slow {
            return Err(BusError::SlowConsumer {
                subject: subject.to_string(),
            });
        }
        Ok(())
    }
}
