//! Typed pub/sub for inbound chat events.
//!
//! Listeners subscribe to one event kind, optionally narrowed to a single
//! room, and are invoked synchronously in registration order on the routing
//! task. Callbacks must therefore stay cheap; anything slow belongs in a
//! room actor or a spawned task. The listener table is locked during
//! delivery, so callbacks must not subscribe or unsubscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use tmi_proto::InboundEvent;

/// Handle for removing a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The kinds of inbound events a listener can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Bot joined a room.
    Join,
    /// Bot left a room.
    Part,
    /// Chat message.
    Text,
    /// Room metadata update.
    RoomState,
    /// Chat cleared.
    ClearChat,
    /// Subscription announcement.
    SubscriberNotice,
}

impl EventKind {
    /// The kind of a concrete event.
    pub fn of(event: &InboundEvent) -> EventKind {
        match event {
            InboundEvent::Join { .. } => EventKind::Join,
            InboundEvent::Part { .. } => EventKind::Part,
            InboundEvent::Text(_) => EventKind::Text,
            InboundEvent::RoomState(_) => EventKind::RoomState,
            InboundEvent::ClearChat(_) => EventKind::ClearChat,
            InboundEvent::SubscriberNotice(_) => EventKind::SubscriberNotice,
        }
    }
}

type Callback = Box<dyn Fn(&InboundEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    room: Option<String>,
    callback: Callback,
}

/// Synchronous event fan-out.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind. A `room` filter restricts
    /// delivery to events addressed to that room.
    pub fn listen<F>(&self, kind: EventKind, room: Option<&str>, callback: F) -> ListenerId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().entry(kind).or_default().push(Listener {
            id,
            room: room.map(tmi_proto::normalize_room),
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for bucket in listeners.values_mut() {
            if let Some(pos) = bucket.iter().position(|l| l.id == id) {
                bucket.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver an event to every matching listener, in registration order.
    pub fn fire(&self, event: &InboundEvent) {
        let listeners = self.listeners.lock();
        let Some(bucket) = listeners.get(&EventKind::of(event)) else {
            return;
        };
        for listener in bucket {
            match &listener.room {
                Some(room) if room != event.room() => {}
                _ => (listener.callback)(event),
            }
        }
    }
}
