//! Addressable value endpoints.
//!
//! ```text
//!                    ┌──────────── Port ────────────┐
//!   write ─────────▶ │ validate ─▶ lock ─▶ kind     │ ─▶ ValueChange
//!   sequence ──────▶ │                    ├ Virtual │
//!   expression ────▶ │                    └ Hardware ─┼─▶ Peripheral runner
//!                    └──────────────────────────────┘
//! ```
//!
//! A port is either *virtual* (value lives only in the core) or backed by a
//! hardware driver on a peripheral.  Either kind may be *derived*: when an
//! expression is attached, its value is recomputed by the propagation loop
//! instead of being read from hardware.

pub mod attrs;
pub mod sequence;
pub mod vport;

use core::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use serde::{Deserialize, Serialize};

use crate::app::ports::PortDriver;
use crate::error::{Error, Result};
use crate::expr::Expression;
use crate::peripheral::Peripheral;

use sequence::SequenceHandle;

// ---------------------------------------------------------------------------
// Static definition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Boolean,
    Number,
}

/// One allowed value of a port with a fixed choice list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Attributes fixed when a port is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
    #[serde(default = "default_writable")]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub integer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Choice>>,
}

fn default_writable() -> bool {
    true
}

impl PortSpec {
    pub fn boolean(id: &str) -> Self {
        Self {
            id: id.into(),
            port_type: PortType::Boolean,
            writable: true,
            min: None,
            max: None,
            integer: false,
            step: None,
            choices: None,
        }
    }

    pub fn number(id: &str) -> Self {
        Self {
            port_type: PortType::Number,
            ..Self::boolean(id)
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }

    /// Whether a candidate value satisfies type, bounds, choices and step.
    pub fn accepts_value(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }

        if self.port_type == PortType::Boolean {
            return value == 0.0 || value == 1.0;
        }

        if self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max) {
            return false;
        }
        if self.integer && value.fract() != 0.0 {
            return false;
        }
        if let Some(choices) = &self.choices {
            if !choices.iter().any(|c| c.value == value) {
                return false;
            }
        }
        if let (Some(step), Some(min)) = (self.step, self.min) {
            if step != 0.0 {
                let steps = (value - min) / step;
                if (steps - steps.round()).abs() > 1e-9 {
                    return false;
                }
            }
        }
        true
    }

    /// Coerce an expression result into this port's domain: booleans
    /// become 0/1, integers truncate, and bounds clamp.
    pub fn adapt_value(&self, value: f64) -> f64 {
        if self.port_type == PortType::Boolean {
            return if value != 0.0 { 1.0 } else { 0.0 };
        }
        let mut v = if self.integer { value.trunc() } else { value };
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

pub(crate) enum PortKind {
    Virtual,
    Hardware {
        peripheral: Rc<Peripheral>,
        driver: Arc<StdMutex<Box<dyn PortDriver>>>,
    },
}

/// An expression together with the text it was parsed from.
pub(crate) struct Attached {
    pub text: String,
    pub expr: Rc<Expression>,
}

/// Mutable per-port state, touched only from the scheduler thread.
pub(crate) struct PortState {
    pub enabled: bool,
    pub value: Option<f64>,
    pub display_name: Option<String>,
    pub unit: Option<String>,
    pub tag: Option<String>,
    pub expression: Option<Attached>,
    pub history_interval: i64,
    pub history_retention: i64,
    pub sequence: Option<SequenceHandle>,
    pub last_read_error: Option<Error>,
    pub last_history_ms: Option<i64>,
}

impl PortState {
    fn new() -> Self {
        Self {
            enabled: true,
            value: None,
            display_name: None,
            unit: None,
            tag: None,
            expression: None,
            history_interval: 0,
            history_retention: 0,
            sequence: None,
            last_read_error: None,
            last_history_ms: None,
        }
    }
}

pub struct Port {
    spec: PortSpec,
    pub(crate) kind: PortKind,
    state: RefCell<PortState>,
    /// Serializes value writes and sequence steps.
    pub(crate) write_lock: Mutex<NoopRawMutex, ()>,
}

impl Port {
    pub(crate) fn new_virtual(spec: PortSpec) -> Self {
        Self::with_kind(spec, PortKind::Virtual)
    }

    pub(crate) fn new_hardware(
        spec: PortSpec,
        peripheral: Rc<Peripheral>,
        driver: Box<dyn PortDriver>,
    ) -> Self {
        Self::with_kind(
            spec,
            PortKind::Hardware {
                peripheral,
                driver: Arc::new(StdMutex::new(driver)),
            },
        )
    }

    fn with_kind(spec: PortSpec, kind: PortKind) -> Self {
        Self {
            spec,
            kind,
            state: RefCell::new(PortState::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, PortKind::Virtual)
    }

    pub fn is_writable(&self) -> bool {
        self.spec.writable
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    pub fn is_online(&self) -> bool {
        match &self.kind {
            PortKind::Virtual => true,
            PortKind::Hardware { peripheral, .. } => peripheral.is_online(),
        }
    }

    pub(crate) fn peripheral(&self) -> Option<&Rc<Peripheral>> {
        match &self.kind {
            PortKind::Virtual => None,
            PortKind::Hardware { peripheral, .. } => Some(peripheral),
        }
    }

    /// Cached value, or `None` while disabled.
    pub fn value(&self) -> Option<f64> {
        let state = self.state.borrow();
        if state.enabled { state.value } else { None }
    }

    pub fn is_derived(&self) -> bool {
        self.state.borrow().expression.is_some()
    }

    pub fn expression(&self) -> Option<Rc<Expression>> {
        self.state.borrow().expression.as_ref().map(|a| Rc::clone(&a.expr))
    }

    pub fn expression_text(&self) -> Option<String> {
        self.state.borrow().expression.as_ref().map(|a| a.text.clone())
    }

    pub fn last_read_error(&self) -> Option<Error> {
        self.state.borrow().last_read_error.clone()
    }

    pub(crate) fn state(&self) -> Ref<'_, PortState> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, PortState> {
        self.state.borrow_mut()
    }

    /// Validate a value about to be written to field `field`.
    pub fn validate(&self, value: f64, field: &str) -> Result<()> {
        if self.spec.accepts_value(value) {
            Ok(())
        } else {
            Err(Error::InvalidField(field.into()))
        }
    }

    /// Replace the cached value.  Returns `true` if it changed.
    pub(crate) fn store_value(&self, value: Option<f64>) -> bool {
        let mut state = self.state.borrow_mut();
        if state.value == value {
            return false;
        }
        state.value = value;
        true
    }

    /// Cancel the active sequence, if any.
    pub(crate) fn cancel_sequence(&self) -> bool {
        let handle = self.state.borrow_mut().sequence.take();
        handle.map(|h| h.cancel()).is_some()
    }

    // ── Hardware access ───────────────────────────────────────

    /// Read the driver on the peripheral's worker.  Virtual ports have no
    /// driver and answer with their cached value.
    pub(crate) async fn read_driver(&self, timeout_ms: u32) -> Result<Option<f64>> {
        match &self.kind {
            PortKind::Virtual => Ok(self.value()),
            PortKind::Hardware { peripheral, driver } => {
                let driver = Arc::clone(driver);
                peripheral
                    .run_threaded_timeout(timeout_ms, move || lock_driver(&driver).read_value())
                    .await
            }
        }
    }

    /// Push `value` to the driver on the peripheral's worker.  A no-op for
    /// virtual ports.
    pub(crate) async fn write_driver(&self, value: f64, timeout_ms: u32) -> Result<()> {
        match &self.kind {
            PortKind::Virtual => Ok(()),
            PortKind::Hardware { peripheral, driver } => {
                let driver = Arc::clone(driver);
                peripheral
                    .run_threaded_timeout(timeout_ms, move || lock_driver(&driver).write_value(value))
                    .await
            }
        }
    }
}

/// A driver call that panicked poisons the mutex; the driver itself is
/// still usable.
fn lock_driver(driver: &StdMutex<Box<dyn PortDriver>>) -> MutexGuard<'_, Box<dyn PortDriver>> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}
