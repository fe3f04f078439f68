//! Mock adapters for integration tests.
//!
//! Drivers record every write and can be told to fail, to ignore values
//! or to block; the sink records every notification; the clock only moves when a test
//! moves it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_io_mini::Timer;
use serde_json::Value;

use portcore::adapters::memory_store::MemoryStore;
use portcore::app::events::Notification;
use portcore::app::ports::{Clock, EventSink, Filter, PortDriver, Record, Sort, Store};
use portcore::error::StorageError;
use portcore::{Core, CoreConfig, Error, Result};

/// 2023-06-15 14:30:45.250 UTC
pub const T0: i64 = 1_686_839_445_250;

// ── MockDriver ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DriverState {
    pub value: Option<f64>,
    pub writes: Vec<f64>,
    pub reads: usize,
    pub read_error: Option<Error>,
    pub ignore_writes: bool,
}

/// Cloneable handle; every clone drives the same simulated hardware.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<DriverState>>,
    gate: Arc<Mutex<()>>,
}

#[allow(dead_code)]
impl MockDriver {
    pub fn with_value(value: f64) -> Self {
        let driver = Self::default();
        driver.state().value = Some(value);
        driver
    }

    pub fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap()
    }

    /// Driver calls block until the returned guard is dropped.
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap()
    }

    fn pass_gate(&self) {
        drop(self.gate.lock().unwrap_or_else(|e| e.into_inner()));
    }

    pub fn boxed(&self) -> Box<dyn PortDriver> {
        Box::new(self.clone())
    }

    pub fn writes(&self) -> Vec<f64> {
        self.state().writes.clone()
    }
}

impl PortDriver for MockDriver {
    fn read_value(&mut self) -> Result<Option<f64>> {
        self.pass_gate();
        let mut state = self.state();
        state.reads += 1;
        match &state.read_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.value),
        }
    }

    fn write_value(&mut self, value: f64) -> Result<()> {
        self.pass_gate();
        let mut state = self.state();
        state.writes.push(value);
        if !state.ignore_writes {
            state.value = Some(value);
        }
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink(Rc<RefCell<Vec<Notification>>>);

#[allow(dead_code)]
impl RecordingSink {
    pub fn take(&self) -> Vec<Notification> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Values of every `value-change` for `id`, in delivery order.
    pub fn values_of(&self, id: &str) -> Vec<Option<f64>> {
        self.0
            .borrow()
            .iter()
            .filter(|n| n.type_tag == "value-change" && n.params["id"] == id)
            .map(|n| n.params["value"].as_f64())
            .collect()
    }

    pub fn count(&self, type_tag: &str, id: &str) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|n| n.type_tag == type_tag && n.params["id"] == id)
            .count()
    }

    pub fn last(&self, type_tag: &str, id: &str) -> Option<Value> {
        self.0
            .borrow()
            .iter()
            .rev()
            .find(|n| n.type_tag == type_tag && n.params["id"] == id)
            .map(|n| n.params.clone())
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, notification: &Notification) {
        self.0.borrow_mut().push(notification.clone());
    }
}

// ── FixedClock ────────────────────────────────────────────────

#[derive(Clone)]
pub struct FixedClock {
    now_ms: Rc<Cell<i64>>,
    real: Rc<Cell<bool>>,
}

#[allow(dead_code)]
impl FixedClock {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(now_ms)),
            real: Rc::new(Cell::new(true)),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }

    pub fn set_real(&self, real: bool) {
        self.real.set(real);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.get()
    }

    fn has_real_date_time(&self) -> bool {
        self.real.get()
    }
}

// ── SharedStore ───────────────────────────────────────────────

/// A [`MemoryStore`] that outlives the core, for restart tests.
#[derive(Clone, Default)]
pub struct SharedStore(Rc<RefCell<MemoryStore>>);

impl Store for SharedStore {
    fn query(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[Sort],
        limit: Option<usize>,
    ) -> core::result::Result<Vec<Record>, StorageError> {
        self.0.borrow().query(collection, filter, sort, limit)
    }

    fn insert(
        &mut self,
        collection: &str,
        record: Record,
    ) -> core::result::Result<String, StorageError> {
        self.0.borrow_mut().insert(collection, record)
    }

    fn update(
        &mut self,
        collection: &str,
        fields: Record,
        filter: &Filter,
    ) -> core::result::Result<usize, StorageError> {
        self.0.borrow_mut().update(collection, fields, filter)
    }

    fn replace(
        &mut self,
        collection: &str,
        id: &str,
        record: Record,
    ) -> core::result::Result<bool, StorageError> {
        self.0.borrow_mut().replace(collection, id, record)
    }

    fn remove(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> core::result::Result<usize, StorageError> {
        self.0.borrow_mut().remove(collection, filter)
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub core: Core,
    pub events: RecordingSink,
    pub clock: FixedClock,
    pub store: SharedStore,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        Self::with_store(config, SharedStore::default())
    }

    /// A fresh core over an existing store, as after a restart.
    pub fn with_store(config: CoreConfig, store: SharedStore) -> Self {
        let events = RecordingSink::default();
        let clock = FixedClock::at(T0);
        let core = Core::new(
            config,
            Box::new(clock.clone()),
            Box::new(store.clone()),
            Box::new(events.clone()),
        )
        .unwrap();
        Self {
            core,
            events,
            clock,
            store,
        }
    }

    pub fn tick(&self) {
        self.core.block_on(self.core.tick());
    }

    pub fn write(&self, id: &str, value: f64) -> Result<()> {
        self.core.block_on(self.core.patch_port_value(id, value))
    }

    pub fn patch(&self, id: &str, attrs: Value) -> Result<()> {
        let Value::Object(attrs) = attrs else {
            panic!("attributes must be an object");
        };
        self.core.block_on(self.core.patch_port(id, &attrs))
    }

    pub fn sequence(&self, id: &str, values: &[f64], delays: &[u64], repeat: u32) -> Result<()> {
        self.core.block_on(self.core.patch_port_sequence(
            id,
            values.to_vec(),
            delays.to_vec(),
            repeat,
        ))
    }

    /// Let background tasks run for `ms` of real time.
    pub fn run_for(&self, ms: u64) {
        self.core.block_on(Timer::after(Duration::from_millis(ms)));
    }

    /// Drive the executor until `id` has no running sequence.
    pub fn settle(&self, id: &str) {
        for _ in 0..2000 {
            if !self.core.has_sequence(id).unwrap() {
                return;
            }
            self.run_for(1);
        }
        panic!("sequence on '{id}' did not finish");
    }
}
