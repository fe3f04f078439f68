//! Port traits: the hexagonal boundary between the core and the outside world.
//!
//! ```text
//!   Adapter ──▶ trait ──▶ Core (domain)
//! ```
//!
//! "Port" is overloaded in this crate: the traits here are architectural
//! ports; the value endpoints the core manages live in [`crate::port`].
//!
//! Driven adapters (clocks, hardware drivers, event sinks, record stores)
//! implement these traits.  The [`Core`](super::service::Core) holds them as
//! trait objects, so the domain never touches hardware or storage directly.

use core::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{Result, StorageError};

use super::events::Notification;

// ───────────────────────────────────────────────────────────────
// Clock (driven adapter: system time → domain)
// ───────────────────────────────────────────────────────────────

/// Wall-clock source for expressions, history and scheduling.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// Fixed offset of local time from UTC, in seconds.
    fn utc_offset_secs(&self) -> i32 {
        0
    }

    /// `false` until the host clock has been synchronised; calendar
    /// functions skip while this is `false`.
    fn has_real_date_time(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Port driver (driven adapter: domain ↔ hardware)
// ───────────────────────────────────────────────────────────────

/// Blocking hardware access for one port.
///
/// Drivers only ever run on their peripheral's worker thread, so they may
/// block freely but must be `Send`.
pub trait PortDriver: Send {
    /// Read the current hardware value.  `None` means "no value available".
    fn read_value(&mut self) -> Result<Option<f64>>;

    /// Push a value to the hardware.  Drivers may silently ignore values
    /// (the core detects this on readback).
    fn write_value(&mut self, value: f64) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: domain → subscribers)
// ───────────────────────────────────────────────────────────────

/// The core delivers resolved [`Notification`]s through this port.
/// Adapters decide where they go (log, websocket, webhook, ...).
pub trait EventSink {
    fn emit(&mut self, notification: &Notification);
}

// ───────────────────────────────────────────────────────────────
// Record store (driven adapter: domain ↔ persistence)
// ───────────────────────────────────────────────────────────────

/// One persisted record: a flat JSON object.  Stores assign an `id`.
pub type Record = Map<String, Value>;

/// Collection-oriented persistence.
///
/// # Contract
///
/// - `insert` assigns and returns a fresh `id` unless the record has one.
/// - `replace` upserts by id and reports whether a record was replaced.
/// - `update` merges fields into every matching record.
pub trait Store {
    fn query(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[Sort],
        limit: Option<usize>,
    ) -> core::result::Result<Vec<Record>, StorageError>;

    fn insert(&mut self, collection: &str, record: Record)
    -> core::result::Result<String, StorageError>;

    fn update(
        &mut self,
        collection: &str,
        fields: Record,
        filter: &Filter,
    ) -> core::result::Result<usize, StorageError>;

    fn replace(
        &mut self,
        collection: &str,
        id: &str,
        record: Record,
    ) -> core::result::Result<bool, StorageError>;

    fn remove(&mut self, collection: &str, filter: &Filter)
    -> core::result::Result<usize, StorageError>;
}

/// Sort key: field name plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub desc: bool,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.into(),
            desc: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.into(),
            desc: true,
        }
    }
}

/// One comparison applied to a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Ge(Value),
    Lt(Value),
    Le(Value),
    In(Vec<Value>),
}

/// Conjunction of per-field conditions.  The empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, condition: Condition) -> Self {
        self.conditions.push((field.into(), condition));
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gt(value.into()))
    }

    pub fn ge(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ge(value.into()))
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lt(value.into()))
    }

    pub fn le(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Le(value.into()))
    }

    pub fn is_in(self, field: &str, values: Vec<Value>) -> Self {
        self.with(field, Condition::In(values))
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    /// Whether `record` satisfies every condition.  A missing field only
    /// satisfies `Ne`.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(field, cond)| {
            let Some(actual) = record.get(field) else {
                return matches!(cond, Condition::Ne(_));
            };
            match cond {
                Condition::Eq(v) => compare(actual, v) == Some(Ordering::Equal),
                Condition::Ne(v) => compare(actual, v) != Some(Ordering::Equal),
                Condition::Gt(v) => compare(actual, v) == Some(Ordering::Greater),
                Condition::Ge(v) => matches!(
                    compare(actual, v),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                Condition::Lt(v) => compare(actual, v) == Some(Ordering::Less),
                Condition::Le(v) => {
                    matches!(compare(actual, v), Some(Ordering::Less | Ordering::Equal))
                }
                Condition::In(vs) => vs
                    .iter()
                    .any(|v| compare(actual, v) == Some(Ordering::Equal)),
            }
        })
    }
}

/// Order two JSON values of the same kind.  Numbers compare numerically
/// across integer/float representations; mixed kinds are unordered.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}
