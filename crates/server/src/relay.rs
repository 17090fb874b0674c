use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use huddle_core::{
    ClientEvent, ConnId, Delivery, ErrorCode, Registry, RegistryLimits, RegistryStats, RoomId,
    RoomKind, RoomSnapshot, ServerEvent,
};
use tokio::sync::mpsc;

pub type Outbox = mpsc::UnboundedReceiver<ServerEvent>;

/// Shared relay state: the room registry plus one outbound queue per live
/// connection. The lock is only held while the registry computes deliveries
/// and they are pushed onto queues; it is never held across an `.await`.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    registry: Registry,
    outboxes: HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>,
}

impl Inner {
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        for Delivery { to, event } in deliveries {
            let Some(tx) = self.outboxes.get(&to) else {
                continue;
            };
            if tx.send(event).is_err() {
                tracing::debug!("dropping event for closed connection {to}");
            }
        }
    }
}

impl Relay {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                registry: Registry::new(limits),
                outboxes: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection. The returned queue yields every event
    /// addressed to it, starting with `welcome`.
    pub fn register(&self) -> (ConnId, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let (conn, deliveries) = inner.registry.connect();
        inner.outboxes.insert(conn, tx);
        inner.deliver(deliveries);
        (conn, rx)
    }

    pub fn dispatch(&self, conn: ConnId, event: ClientEvent) {
        tracing::debug!("conn {conn}: {}", event.name());
        let mut inner = self.lock();
        let deliveries = inner.registry.handle(conn, event);
        inner.deliver(deliveries);
    }

    /// Report a frame that never made it to the registry.
    pub fn reject(&self, conn: ConnId, code: ErrorCode, message: impl Into<String>) {
        let mut inner = self.lock();
        inner.deliver(vec![Delivery::new(conn, ServerEvent::error(code, message))]);
    }

    pub fn unregister(&self, conn: ConnId) {
        let mut inner = self.lock();
        inner.outboxes.remove(&conn);
        let deliveries = inner.registry.disconnect(conn);
        inner.deliver(deliveries);
    }

    pub fn stats(&self) -> RegistryStats {
        self.lock().registry.stats()
    }

    pub fn room(&self, kind: RoomKind, room: &RoomId) -> Option<RoomSnapshot> {
        self.lock().registry.room(kind, room)
    }

    pub fn list_rooms(&self, kind: RoomKind) -> Vec<RoomSnapshot> {
        self.lock().registry.list_rooms(kind)
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}
