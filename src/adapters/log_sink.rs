//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every resolved notification to the
//! `log` facade.  A websocket or webhook adapter would implement the same
//! trait.

use log::info;

use crate::app::events::Notification;
use crate::app::ports::EventSink;

/// Adapter that logs every [`Notification`].
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u64,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications logged so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, notification: &Notification) {
        self.emitted += 1;
        info!("EVENT | {} | {}", notification.type_tag, notification.params);
    }
}
