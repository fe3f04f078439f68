//! Peripherals: hardware driver instances that own one or more ports.
//!
//! A peripheral bridges its ports' blocking drivers onto a dedicated
//! [`ThreadedRunner`], created on first use and torn down on cleanup.
//! Its enabled flag follows its ports (enabled while any port is enabled);
//! its online flag follows the outcome of the latest hardware call.

pub mod runner;

use core::cell::{Cell, RefCell};
use core::future::Future;
use core::time::Duration;
use std::rc::Rc;

use async_io_mini::Timer;
use log::{info, warn};

use crate::error::{Error, Result};

pub use runner::{RUNNER_QUEUE_SIZE, ThreadedRunner};

pub struct Peripheral {
    name: String,
    port_ids: Vec<String>,
    enabled: Cell<bool>,
    online: Cell<bool>,
    runner: RefCell<Option<Rc<ThreadedRunner>>>,
}

impl Peripheral {
    pub fn new(name: &str, port_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            port_ids,
            enabled: Cell::new(false),
            online: Cell::new(false),
            runner: RefCell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port_ids(&self) -> &[String] {
        &self.port_ids
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn is_online(&self) -> bool {
        self.online.get()
    }

    /// Run a blocking call on this peripheral's worker thread.
    ///
    /// Fails immediately with [`Error::Busy`] when the worker's queue is
    /// full; otherwise suspends until the call completes.
    pub async fn run_threaded<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pending = self.runner()?.schedule(f)?;
        pending.await
    }

    /// Like [`run_threaded`](Self::run_threaded), giving up the wait after
    /// `timeout_ms`.  The call itself still runs to completion on the worker.
    pub async fn run_threaded_timeout<T, F>(&self, timeout_ms: u32, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        with_timeout(timeout_ms, self.run_threaded(f)).await
    }

    fn runner(&self) -> Result<Rc<ThreadedRunner>> {
        let mut slot = self.runner.borrow_mut();
        if let Some(runner) = slot.as_ref() {
            return Ok(Rc::clone(runner));
        }
        let runner = Rc::new(ThreadedRunner::new(&self.name)?);
        *slot = Some(Rc::clone(&runner));
        Ok(runner)
    }

    /// Returns `true` if the flag changed.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        if self.enabled.replace(enabled) == enabled {
            return false;
        }
        info!(
            "Peripheral[{}]: {}",
            self.name,
            if enabled { "enabled" } else { "disabled" }
        );
        if !enabled {
            self.cleanup();
        }
        true
    }

    /// Returns `true` if the flag changed.
    pub(crate) fn set_online(&self, online: bool) -> bool {
        if self.online.replace(online) == online {
            return false;
        }
        if online {
            info!("Peripheral[{}]: online", self.name);
        } else {
            warn!("Peripheral[{}]: offline", self.name);
        }
        true
    }

    /// Stop and drop the worker, if any, without waiting for it to exit.
    /// A later call recreates it.
    pub fn cleanup(&self) {
        let runner = self.runner.borrow_mut().take();
        if let Some(runner) = runner {
            runner.stop();
        }
    }

    /// Stop the worker, if any, and wait until its thread has exited.
    pub async fn shutdown(&self) {
        let runner = self.runner.borrow_mut().take();
        if let Some(runner) = runner {
            runner.stop();
            runner.join().await;
            info!("Peripheral[{}]: worker exited", self.name);
        }
    }
}

impl Drop for Peripheral {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Race `fut` against a timer; the timer losing is [`Error::PortTimeout`].
pub async fn with_timeout<T>(timeout_ms: u32, fut: impl Future<Output = Result<T>>) -> Result<T> {
    futures_lite::future::or(fut, async {
        Timer::after(Duration::from_millis(u64::from(timeout_ms))).await;
        Err(Error::PortTimeout)
    })
    .await
}
