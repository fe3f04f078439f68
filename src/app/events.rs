//! Outbound domain events.
//!
//! The [`Core`](super::service::Core) queues [`CoreEvent`]s as things happen
//! and resolves them into [`Notification`]s only when the outbox is
//! flushed, so a `port-update` reports the attributes as they are at
//! delivery time, not as they were when the change was first noticed.

use serde::Serialize;
use serde_json::Value;

/// Domain events emitted by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A port's value changed, or a write was ignored by the hardware.
    ValueChange { port_id: String, value: Option<f64> },

    /// A port's attributes (or online state) changed.
    PortUpdate { port_id: String },

    /// A port was added.
    PortAdd { port_id: String },

    /// A port was removed.
    PortRemove { port_id: String },
}

impl CoreEvent {
    /// Wire-level type tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ValueChange { .. } => "value-change",
            Self::PortUpdate { .. } => "port-update",
            Self::PortAdd { .. } => "port-add",
            Self::PortRemove { .. } => "port-remove",
        }
    }

    pub fn port_id(&self) -> &str {
        match self {
            Self::ValueChange { port_id, .. }
            | Self::PortUpdate { port_id }
            | Self::PortAdd { port_id }
            | Self::PortRemove { port_id } => port_id,
        }
    }

    /// Whether `self` is superseded by an already-pending `other`.
    ///
    /// Only attribute updates collapse: the pending one resolves lazily and
    /// will carry the newer attributes anyway.  Value changes are never
    /// merged.
    pub fn is_duplicate(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::PortUpdate { port_id: a }, Self::PortUpdate { port_id: b }) if a == b
        )
    }
}

/// A resolved event, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub type_tag: &'static str,
    pub params: Value,
}
