//! Port core service.
//!
//! [`Core`] owns every port and peripheral, the cooperative executor the
//! port logic runs on, and the event outbox.  All I/O flows through the
//! traits in [`ports`](super::ports): hardware through [`PortDriver`]s on
//! peripheral workers, persistence through a [`Store`], notifications
//! through an [`EventSink`].
//!
//! ```text
//!   API calls ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                 │             Core             │
//!   tick()   ──▶  │  ports · peripherals · exprs │ ◀─▶ Store
//!                 └──────────────┬───────────────┘
//!                                ▼
//!                     Peripheral runners (threads)
//! ```
//!
//! `Core` is a cheap handle (`Rc`) and is not `Send`: all port logic runs
//! on the thread that drives [`Core::block_on`].

use core::cell::{Cell, RefCell};
use core::future::Future;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use edge_executor::LocalExecutor;
use log::{debug, error, info, warn};
use serde_json::{Value, json};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::events::{Outbox, Pushed};
use crate::expr::{check_loops, parse};
use crate::history::{self, Sample};
use crate::peripheral::Peripheral;
use crate::port::attrs::{self, AttrValue};
use crate::port::sequence::{self, Outcome, Sequence};
use crate::port::{Attached, Port, PortSpec, vport};
use crate::scheduler::Scheduler;

use super::events::{CoreEvent, Notification};
use super::ports::{Clock, EventSink, Filter, PortDriver, Record, Store};

// ───────────────────────────────────────────────────────────────
// Core
// ───────────────────────────────────────────────────────────────

/// Handle to the port runtime.  Clones share the same state.
#[derive(Clone)]
pub struct Core {
    pub(super) shared: Rc<Shared>,
}

pub(super) struct Shared {
    pub(super) config: CoreConfig,
    pub(super) clock: Box<dyn Clock>,
    store: RefCell<Box<dyn Store>>,
    sink: RefCell<Box<dyn EventSink>>,
    outbox: RefCell<Outbox>,
    pub(super) ports: RefCell<BTreeMap<String, Rc<Port>>>,
    pub(super) peripherals: RefCell<Vec<Rc<Peripheral>>>,
    executor: LocalExecutor<'static>,
    pub(super) scheduler: RefCell<Scheduler>,
    /// Ports whose value changed since their dependents were last evaluated.
    pub(super) changed: RefCell<BTreeSet<String>>,
    /// Derived ports to evaluate on the next tick regardless of inputs.
    pub(super) force_eval: RefCell<BTreeSet<String>>,
    pub(super) stopped: Cell<bool>,
}

impl Core {
    /// Build the core and reload persisted virtual ports.
    pub fn new(
        config: CoreConfig,
        clock: Box<dyn Clock>,
        store: Box<dyn Store>,
        sink: Box<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let core = Self {
            shared: Rc::new(Shared {
                scheduler: RefCell::new(Scheduler::new(config.history_janitor_interval_secs)),
                config,
                clock,
                store: RefCell::new(store),
                sink: RefCell::new(sink),
                outbox: RefCell::new(Outbox::new()),
                ports: RefCell::new(BTreeMap::new()),
                peripherals: RefCell::new(Vec::new()),
                executor: LocalExecutor::new(),
                changed: RefCell::new(BTreeSet::new()),
                force_eval: RefCell::new(BTreeSet::new()),
                stopped: Cell::new(false),
            }),
        };

        let specs = core.with_store(|s| vport::load(s))?;
        for spec in specs {
            let port = Rc::new(Port::new_virtual(spec));
            core.insert_port(&port);
            core.restore_attrs(&port)?;
        }
        info!(
            "Core: started with {} virtual ports",
            core.shared.ports.borrow().len()
        );
        Ok(core)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.shared.clock.as_ref()
    }

    /// Drive `fut` to completion on the core's executor.  Spawned work
    /// (sequences, attribute fan-out) makes progress while it runs.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        futures_lite::future::block_on(self.shared.executor.run(fut))
    }

    pub(super) fn with_store<T>(&self, f: impl FnOnce(&mut dyn Store) -> T) -> T {
        f(self.shared.store.borrow_mut().as_mut())
    }

    pub(super) fn port(&self, id: &str) -> Result<Rc<Port>> {
        self.shared
            .ports
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoSuchPort(id.into()))
    }

    fn insert_port(&self, port: &Rc<Port>) {
        self.shared
            .ports
            .borrow_mut()
            .insert(port.id().to_owned(), Rc::clone(port));
    }

    // ── Registration ──────────────────────────────────────────

    /// Register a peripheral and its hardware-backed ports.
    pub fn add_peripheral(
        &self,
        name: &str,
        ports: Vec<(PortSpec, Box<dyn PortDriver>)>,
    ) -> Result<Rc<Peripheral>> {
        let mut ids = BTreeSet::new();
        for (spec, _) in &ports {
            vport::validate(spec)?;
            if self.shared.ports.borrow().contains_key(&spec.id) || !ids.insert(spec.id.clone()) {
                return Err(Error::DuplicatePort(spec.id.clone()));
            }
        }

        let peripheral = Rc::new(Peripheral::new(name, ids.into_iter().collect()));
        let mut added = Vec::with_capacity(ports.len());
        for (spec, driver) in ports {
            let port = Rc::new(Port::new_hardware(spec, Rc::clone(&peripheral), driver));
            self.insert_port(&port);
            added.push(port);
        }
        for port in &added {
            self.restore_attrs(port)?;
            self.emit(CoreEvent::PortAdd {
                port_id: port.id().to_owned(),
            });
        }
        peripheral.set_enabled(added.iter().any(|p| p.is_enabled()));
        self.shared.peripherals.borrow_mut().push(Rc::clone(&peripheral));

        info!("Core: peripheral '{}' added with {} ports", name, added.len());
        self.flush_events();
        Ok(peripheral)
    }

    /// Create a virtual port.
    pub fn add_virtual_port(&self, spec: PortSpec) -> Result<()> {
        vport::validate(&spec)?;
        {
            let ports = self.shared.ports.borrow();
            if ports.contains_key(&spec.id) {
                return Err(Error::DuplicatePort(spec.id));
            }
            let count = ports.values().filter(|p| p.is_virtual()).count();
            if count >= self.shared.config.max_virtual_ports as usize {
                return Err(Error::TooManyPorts);
            }
        }

        self.with_store(|s| vport::save(s, &spec))?;
        let port = Rc::new(Port::new_virtual(spec));
        self.insert_port(&port);
        info!("Core: virtual port '{}' added", port.id());

        self.emit(CoreEvent::PortAdd {
            port_id: port.id().to_owned(),
        });
        self.flush_events();
        Ok(())
    }

    /// Remove a virtual port along with its persisted attributes and history.
    pub fn remove_port(&self, id: &str) -> Result<()> {
        let port = self.port(id)?;
        if !port.is_virtual() {
            return Err(Error::PortNotRemovable(id.into()));
        }

        port.cancel_sequence();
        self.shared.ports.borrow_mut().remove(id);
        self.shared.force_eval.borrow_mut().remove(id);
        self.shared.changed.borrow_mut().insert(id.to_owned());

        self.with_store(|s| -> Result<()> {
            vport::remove(s, id)?;
            s.remove(attrs::COLLECTION, &Filter::new().eq("id", id))?;
            history::remove(s, id, None, None)?;
            Ok(())
        })?;
        info!("Core: port '{}' removed", id);

        self.emit(CoreEvent::PortRemove {
            port_id: id.to_owned(),
        });
        self.flush_events();
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────

    /// Attributes and value of every port, ordered by id.
    pub fn get_ports(&self) -> Vec<Value> {
        self.shared.ports.borrow().values().map(|p| attrs::to_json(p)).collect()
    }

    pub fn get_port(&self, id: &str) -> Result<Value> {
        Ok(attrs::to_json(&*self.port(id)?))
    }

    /// Cached value of a port.  A failed last hardware read is reported
    /// until the next successful one.
    pub fn get_port_value(&self, id: &str) -> Result<Option<f64>> {
        let port = self.port(id)?;
        match port.last_read_error() {
            Some(e) => Err(e),
            None => Ok(port.value()),
        }
    }

    pub fn has_sequence(&self, id: &str) -> Result<bool> {
        Ok(self.port(id)?.has_sequence())
    }

    pub fn get_port_history(
        &self,
        id: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Sample>> {
        self.port(id)?;
        self.with_store(|s| history::query(s, id, from_ms, to_ms, limit))
    }

    pub fn remove_port_history(
        &self,
        id: &str,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
    ) -> Result<usize> {
        self.port(id)?;
        self.with_store(|s| history::remove(s, id, from_ms, to_ms))
    }

    // ── Value writes ──────────────────────────────────────────

    /// Write one value, superseding any running sequence.
    pub async fn patch_port_value(&self, id: &str, value: f64) -> Result<()> {
        let port = self.port(id)?;
        port.validate(value, "value")?;
        if !port.is_enabled() {
            return Err(Error::PortDisabled);
        }
        if !port.is_writable() {
            return Err(Error::ReadOnlyPort);
        }

        let result = {
            let _guard = port.write_lock.lock().await;
            if port.cancel_sequence() {
                debug!("Port[{}]: sequence superseded by write", id);
            }
            self.write_transformed(&port, value).await
        };
        self.flush_events();
        result
    }

    /// Start playing a sequence, superseding any running one.
    ///
    /// `repeat` is the total number of plays; `0` plays until cancelled.
    pub async fn patch_port_sequence(
        &self,
        id: &str,
        values: Vec<f64>,
        delays_ms: Vec<u64>,
        repeat: u32,
    ) -> Result<()> {
        let port = self.port(id)?;
        let sequence = Sequence::new(values, delays_ms, repeat)?;
        for value in sequence.values() {
            port.validate(*value, "values")?;
        }
        if !port.is_enabled() {
            return Err(Error::PortDisabled);
        }
        if !port.is_writable() {
            return Err(Error::ReadOnlyPort);
        }
        if port.is_derived() {
            return Err(Error::PortWithExpression);
        }

        let _guard = port.write_lock.lock().await;
        let token = port.install_sequence();
        info!(
            "Port[{}]: sequence of {} values started (repeat {})",
            id,
            sequence.values().len(),
            sequence.repeat()
        );

        let core = self.clone();
        let playing = Rc::clone(&port);
        let task = async move {
            let outcome = sequence::play(&playing, &sequence, &token, |v| {
                core.write_transformed(&playing, v)
            })
            .await;
            playing.release_sequence(&token);
            match outcome {
                Ok(Outcome::Completed) => info!("Port[{}]: sequence done", playing.id()),
                Ok(Outcome::Cancelled) => debug!("Port[{}]: sequence cancelled", playing.id()),
                Err(e) => error!("Port[{}]: sequence aborted: {}", playing.id(), e),
            }
            core.flush_events();
        };
        self.shared.executor.spawn(task).detach();
        Ok(())
    }

    /// Write an expression result to a hardware port in the background.
    pub(super) fn spawn_write(&self, port: Rc<Port>, value: f64) {
        let core = self.clone();
        let task = async move {
            let _guard = port.write_lock.lock().await;
            if let Err(e) = core.write_transformed(&port, value).await {
                error!("Port[{}]: writing expression result failed: {}", port.id(), e);
            }
            core.flush_events();
        };
        self.shared.executor.spawn(task).detach();
    }

    /// Apply `value` through the port's driver and cache the outcome.
    /// Callers hold the port's write lock.
    pub(super) async fn write_transformed(&self, port: &Port, value: f64) -> Result<()> {
        let config = &self.shared.config;
        let applied = if port.is_virtual() {
            Some(value)
        } else {
            port.write_driver(value, config.write_timeout_ms).await?;
            Some(port.read_driver(config.read_timeout_ms).await?.unwrap_or(value))
        };

        if !self.set_cached_value(port, applied) {
            debug!("Port[{}]: write of {} left value unchanged", port.id(), value);
            self.emit(CoreEvent::ValueChange {
                port_id: port.id().to_owned(),
                value: port.value(),
            });
        }
        Ok(())
    }

    /// Store a new cached value.  On change: notify, mark dependents for
    /// re-evaluation and record history for on-change ports.
    pub(super) fn set_cached_value(&self, port: &Port, value: Option<f64>) -> bool {
        if !port.store_value(value) {
            return false;
        }
        self.emit(CoreEvent::ValueChange {
            port_id: port.id().to_owned(),
            value: port.value(),
        });
        self.shared.changed.borrow_mut().insert(port.id().to_owned());

        if port.state().history_interval == -1 {
            self.record_history(port, self.shared.clock.now_ms());
        }
        true
    }

    pub(super) fn record_history(&self, port: &Port, now_ms: i64) {
        let saved = self.with_store(|s| history::save(s, port.id(), port.value(), now_ms));
        if let Err(e) = saved {
            warn!("Port[{}]: history sample not saved: {}", port.id(), e);
        }
    }

    // ── Attribute writes ──────────────────────────────────────

    /// Patch attributes of one port.
    ///
    /// Every attribute is validated before any is applied.  Sets then run
    /// concurrently; all are attempted and the first failure in
    /// declaration order is returned.
    pub async fn patch_port(&self, id: &str, attributes: &Record) -> Result<()> {
        let port = self.port(id)?;
        let checked = attributes
            .iter()
            .map(|(name, value)| Ok((name.clone(), attrs::check(&port, name, value)?)))
            .collect::<Result<Vec<_>>>()?;

        let tasks: Vec<_> = checked
            .into_iter()
            .map(|(name, value)| {
                let core = self.clone();
                let port = Rc::clone(&port);
                self.shared
                    .executor
                    .spawn(async move { core.apply_attr(&port, &name, value) })
            })
            .collect();

        let mut first_error = None;
        for task in tasks {
            if let Err(e) = task.await {
                first_error.get_or_insert(e);
            }
        }

        let persisted = self
            .with_store(|s| s.replace(attrs::COLLECTION, port.id(), attrs::persisted_record(&port)));
        self.emit(CoreEvent::PortUpdate {
            port_id: port.id().to_owned(),
        });
        self.flush_events();

        if let Some(e) = first_error {
            return Err(e);
        }
        persisted?;
        Ok(())
    }

    fn apply_attr(&self, port: &Rc<Port>, name: &str, value: AttrValue) -> Result<()> {
        match (name, value) {
            ("enabled", AttrValue::Bool(enabled)) => self.set_port_enabled(port, enabled),
            ("expression", AttrValue::Text(text)) => self.set_expression(port, text)?,
            ("display_name", AttrValue::Text(text)) => port.state_mut().display_name = text,
            ("unit", AttrValue::Text(text)) => port.state_mut().unit = text,
            ("tag", AttrValue::Text(text)) => port.state_mut().tag = text,
            ("history_interval", AttrValue::Integer(n)) => {
                let mut state = port.state_mut();
                state.history_interval = n;
                state.last_history_ms = None;
            }
            ("history_retention", AttrValue::Integer(n)) => port.state_mut().history_retention = n,
            (name, _) => return Err(Error::AttributeNotModifiable(name.into())),
        }
        Ok(())
    }

    fn set_port_enabled(&self, port: &Rc<Port>, enabled: bool) {
        if port.is_enabled() == enabled {
            return;
        }
        port.state_mut().enabled = enabled;
        if !enabled && port.cancel_sequence() {
            debug!("Port[{}]: sequence cancelled by disable", port.id());
        }
        info!(
            "Port[{}]: {}",
            port.id(),
            if enabled { "enabled" } else { "disabled" }
        );

        if let Some(peripheral) = port.peripheral() {
            let any_enabled = {
                let ports = self.shared.ports.borrow();
                peripheral
                    .port_ids()
                    .iter()
                    .any(|id| ports.get(id).is_some_and(|p| p.is_enabled()))
            };
            peripheral.set_enabled(any_enabled);
        }
        self.shared.changed.borrow_mut().insert(port.id().to_owned());
    }

    fn set_expression(&self, port: &Rc<Port>, text: Option<String>) -> Result<()> {
        let Some(text) = text else {
            if port.state_mut().expression.take().is_some() {
                info!("Port[{}]: expression cleared", port.id());
            }
            return Ok(());
        };

        let expr = parse(Some(port.id()), &text)?;
        {
            let ports = self.shared.ports.borrow();
            check_loops(port.id(), &expr, |id| ports.get(id).and_then(|p| p.expression()))?;
        }

        info!("Port[{}]: expression set to {}", port.id(), expr);
        port.state_mut().expression = Some(Attached {
            text,
            expr: Rc::new(expr),
        });
        self.shared.force_eval.borrow_mut().insert(port.id().to_owned());
        Ok(())
    }

    /// Re-apply attributes saved for `port` by an earlier patch.
    fn restore_attrs(&self, port: &Rc<Port>) -> Result<()> {
        let records = self.with_store(|s| {
            s.query(attrs::COLLECTION, &Filter::new().eq("id", port.id()), &[], Some(1))
        })?;
        let Some(record) = records.into_iter().next() else {
            return Ok(());
        };

        for name in attrs::PERSISTED {
            let Some(value) = record.get(*name).filter(|v| !v.is_null()) else {
                continue;
            };
            let restored = attrs::check(port, name, value).and_then(|v| self.apply_attr(port, name, v));
            if let Err(e) = restored {
                warn!("Port[{}]: cannot restore {}: {}", port.id(), name, e);
            }
        }
        Ok(())
    }

    // ── Events ────────────────────────────────────────────────

    /// Queue an event for the next flush.  A full outbox is flushed first.
    pub(super) fn emit(&self, event: CoreEvent) {
        let pushed = self.shared.outbox.borrow_mut().push(event);
        if let Pushed::Full(event) = pushed {
            self.flush_events();
            self.shared.outbox.borrow_mut().push(event);
        }
    }

    /// Resolve pending events against current port state and deliver them.
    pub fn flush_events(&self) {
        loop {
            let Some(event) = self.shared.outbox.borrow_mut().pop() else {
                break;
            };
            if let Some(notification) = self.resolve(&event) {
                self.shared.sink.borrow_mut().emit(&notification);
            }
        }
    }

    fn resolve(&self, event: &CoreEvent) -> Option<Notification> {
        let params = match event {
            CoreEvent::ValueChange { port_id, value } => json!({ "id": port_id, "value": value }),
            CoreEvent::PortUpdate { port_id } | CoreEvent::PortAdd { port_id } => {
                let ports = self.shared.ports.borrow();
                attrs::to_json(ports.get(port_id)?)
            }
            CoreEvent::PortRemove { port_id } => json!({ "id": port_id }),
        };
        Some(Notification {
            type_tag: event.type_tag(),
            params,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Make [`run`](Self::run) return after the current tick.
    pub fn stop(&self) {
        self.shared.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.get()
    }

    /// Cancel all sequences, then stop every peripheral worker and wait
    /// for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        for port in self.shared.ports.borrow().values() {
            port.cancel_sequence();
        }
        let peripherals: Vec<Rc<Peripheral>> = self.shared.peripherals.borrow().clone();
        for peripheral in peripherals {
            peripheral.shutdown().await;
        }
        self.flush_events();
        info!("Core: shut down");
    }
}
