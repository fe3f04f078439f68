//! Bounded event outbox.
//!
//! Events are produced by:
//! - value writes and hardware reads (value changes)
//! - attribute patches and online/offline transitions (port updates)
//! - virtual port creation and removal
//!
//! and consumed when the core flushes the outbox to its event sink.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Writes      │────▶│              │     │              │
//! │ Reads       │────▶│    Outbox    │────▶│  EventSink   │
//! │ Patches     │────▶│   (32 deep)  │     │  (on flush)  │
//! │ Add/remove  │────▶│              │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use heapless::Deque;
use log::warn;

use crate::app::events::CoreEvent;

/// Maximum number of pending events.
pub const OUTBOX_CAP: usize = 32;

/// Result of queueing one event.
#[derive(Debug, PartialEq)]
pub enum Pushed {
    /// Appended to the queue.
    Queued,
    /// An equivalent event is already pending; nothing was added.
    Suppressed,
    /// The queue is full; the event is handed back.
    Full(CoreEvent),
}

/// FIFO of events awaiting delivery.
pub struct Outbox {
    queue: Deque<CoreEvent, OUTBOX_CAP>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
        }
    }

    /// Queue `event` unless a pending one already covers it.
    pub fn push(&mut self, event: CoreEvent) -> Pushed {
        if self.queue.iter().any(|pending| event.is_duplicate(pending)) {
            return Pushed::Suppressed;
        }
        match self.queue.push_back(event) {
            Ok(()) => Pushed::Queued,
            Err(event) => {
                warn!("Outbox: full, {} for '{}' deferred", event.type_tag(), event.port_id());
                Pushed::Full(event)
            }
        }
    }

    /// Pop the oldest pending event.
    pub fn pop(&mut self) -> Option<CoreEvent> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, v: f64) -> CoreEvent {
        CoreEvent::ValueChange {
            port_id: id.into(),
            value: Some(v),
        }
    }

    #[test]
    fn fifo_order() {
        let mut q = Outbox::new();
        assert_eq!(q.push(change("a", 1.0)), Pushed::Queued);
        assert_eq!(q.push(change("a", 2.0)), Pushed::Queued);
        assert_eq!(q.pop(), Some(change("a", 1.0)));
        assert_eq!(q.pop(), Some(change("a", 2.0)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pending_port_update_suppresses_new_one() {
        let mut q = Outbox::new();
        let update = CoreEvent::PortUpdate { port_id: "a".into() };
        assert_eq!(q.push(update.clone()), Pushed::Queued);
        assert_eq!(q.push(update.clone()), Pushed::Suppressed);
        assert_eq!(q.queue.len(), 1);

        q.pop();
        assert_eq!(q.push(update), Pushed::Queued);
    }

    #[test]
    fn full_queue_hands_event_back() {
        let mut q = Outbox::new();
        for i in 0..OUTBOX_CAP {
            assert_eq!(q.push(change("a", i as f64)), Pushed::Queued);
        }
        assert_eq!(q.push(change("b", 0.0)), Pushed::Full(change("b", 0.0)));
        assert_eq!(q.queue.len(), OUTBOX_CAP);
    }
}
