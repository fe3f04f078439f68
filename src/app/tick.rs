//! Propagation tick.
//!
//! One tick of the port runtime:
//!
//! ```text
//!   1. read     enabled, non-derived hardware ports (peripheral workers)
//!   2. evaluate derived ports, in passes:
//!                 pass 1: inputs changed, time dependency due, or forced
//!                 pass n: inputs changed during pass n-1
//!               each port is evaluated at most once per tick
//!   3. history  periodic samples, then the janitor when due
//!   4. flush    pending events to the sink
//! ```
//!
//! Evaluation only ever reads cached values, so a tick's cost is bounded
//! by step 1's hardware reads.

use core::mem;
use core::time::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use async_io_mini::Timer;
use log::{debug, error, warn};

use crate::error::Error;
use crate::expr::{EvalContext, ExprError};
use crate::history;
use crate::peripheral::Peripheral;
use crate::port::Port;
use crate::scheduler::Due;

use super::events::CoreEvent;
use super::ports::Clock;
use super::service::Core;

/// Evaluation view over the core's ports.
struct CoreEvalCtx<'a> {
    ports: &'a BTreeMap<String, Rc<Port>>,
    clock: &'a dyn Clock,
}

impl EvalContext for CoreEvalCtx<'_> {
    fn port_value(&self, id: &str) -> Result<Option<f64>, ExprError> {
        self.ports
            .get(id)
            .map(|p| p.value())
            .ok_or_else(|| ExprError::UnknownPort(id.into()))
    }

    fn clock(&self) -> &dyn Clock {
        self.clock
    }
}

impl Core {
    /// Tick until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        let period = Duration::from_millis(u64::from(self.shared.config.tick_interval_ms));
        while !self.is_stopped() {
            self.tick().await;
            Timer::after(period).await;
        }
    }

    /// Run one propagation tick.
    pub async fn tick(&self) {
        let now_ms = self.shared.clock.now_ms();
        let due = self.shared.scheduler.borrow_mut().advance(now_ms);

        self.read_hardware().await;
        self.propagate(due);
        self.sample_history(now_ms);
        if due.janitor {
            self.run_janitor(now_ms);
        }
        self.flush_events();
    }

    async fn read_hardware(&self) {
        let ports: Vec<Rc<Port>> = self
            .shared
            .ports
            .borrow()
            .values()
            .filter(|p| !p.is_virtual() && p.is_enabled() && !p.is_derived())
            .cloned()
            .collect();

        for port in ports {
            let Some(peripheral) = port.peripheral().cloned() else {
                continue;
            };
            // A write or sequence step owns the port right now.
            let Ok(guard) = port.write_lock.try_lock() else {
                continue;
            };
            let read = port.read_driver(self.shared.config.read_timeout_ms).await;
            drop(guard);

            match read {
                Ok(value) => {
                    port.state_mut().last_read_error = None;
                    self.set_online(&peripheral, true);
                    self.set_cached_value(&port, value);
                }
                Err(Error::Busy) => debug!("Port[{}]: read skipped, peripheral busy", port.id()),
                Err(e) => {
                    warn!("Port[{}]: read failed: {}", port.id(), e);
                    port.state_mut().last_read_error = Some(e);
                    self.set_online(&peripheral, false);
                }
            }
        }
    }

    fn set_online(&self, peripheral: &Peripheral, online: bool) {
        if !peripheral.set_online(online) {
            return;
        }
        let enabled: Vec<String> = {
            let ports = self.shared.ports.borrow();
            peripheral
                .port_ids()
                .iter()
                .filter(|id| ports.get(*id).is_some_and(|p| p.is_enabled()))
                .cloned()
                .collect()
        };
        for port_id in enabled {
            self.emit(CoreEvent::PortUpdate { port_id });
        }
    }

    /// Re-evaluate derived ports affected by changes, time or new
    /// expressions.
    fn propagate(&self, due: Due) {
        let forced = mem::take(&mut *self.shared.force_eval.borrow_mut());
        let mut evaluated: BTreeSet<String> = BTreeSet::new();
        let mut first_pass = true;

        loop {
            let frontier = mem::take(&mut *self.shared.changed.borrow_mut());
            let ports = self.shared.ports.borrow();
            let candidates: Vec<Rc<Port>> = ports
                .values()
                .filter(|p| p.is_enabled() && !evaluated.contains(p.id()))
                .filter(|p| {
                    let Some(expr) = p.expression() else {
                        return false;
                    };
                    let inputs_changed = expr
                        .port_refs()
                        .iter()
                        .any(|r| *r != p.id() && frontier.contains(*r));
                    inputs_changed
                        || (first_pass
                            && (forced.contains(p.id()) || due.triggers(expr.time_deps())))
                })
                .cloned()
                .collect();

            if candidates.is_empty() {
                // Leftover changes trigger their dependents next tick.
                self.shared.changed.borrow_mut().extend(frontier);
                break;
            }

            let ctx = CoreEvalCtx {
                ports: &ports,
                clock: self.shared.clock.as_ref(),
            };
            for port in candidates {
                evaluated.insert(port.id().to_owned());
                let Some(expr) = port.expression() else {
                    continue;
                };
                match expr.eval(&ctx) {
                    Ok(v) => {
                        let v = port.spec().adapt_value(v);
                        if port.is_virtual() {
                            self.set_cached_value(&port, Some(v));
                        } else if port.value() != Some(v) {
                            // Hardware results land once the driver confirms them.
                            self.spawn_write(Rc::clone(&port), v);
                        }
                    }
                    Err(ExprError::Skipped) => debug!("Port[{}]: evaluation skipped", port.id()),
                    Err(e) => error!("Port[{}]: evaluation failed: {}", port.id(), e),
                }
            }
            first_pass = false;
        }
    }

    fn sample_history(&self, now_ms: i64) {
        if !self.shared.clock.has_real_date_time() {
            return;
        }
        let due: Vec<Rc<Port>> = self
            .shared
            .ports
            .borrow()
            .values()
            .filter(|p| {
                let state = p.state();
                state.enabled
                    && state.history_interval > 0
                    && state
                        .last_history_ms
                        .is_none_or(|last| now_ms - last >= state.history_interval * 1000)
            })
            .cloned()
            .collect();

        for port in due {
            port.state_mut().last_history_ms = Some(now_ms);
            self.record_history(&port, now_ms);
        }
    }

    fn run_janitor(&self, now_ms: i64) {
        let retained: Vec<(String, i64)> = self
            .shared
            .ports
            .borrow()
            .values()
            .filter_map(|p| {
                let retention = p.state().history_retention;
                (retention > 0).then(|| (p.id().to_owned(), retention))
            })
            .collect();

        for (id, retention_secs) in retained {
            let before = now_ms - retention_secs * 1000;
            match self.with_store(|s| history::remove(s, &id, None, Some(before))) {
                Ok(0) => {}
                Ok(n) => debug!("Port[{}]: janitor removed {} samples", id, n),
                Err(e) => warn!("Port[{}]: janitor failed: {}", id, e),
            }
        }
    }
}
