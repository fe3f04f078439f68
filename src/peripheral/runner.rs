//! Threaded runner: a bounded job queue drained by one worker thread.
//!
//! Blocking driver calls never run on the cooperative scheduler.  Each
//! peripheral owns one runner; jobs are executed strictly one at a time in
//! FIFO order and their results come back through a signal the caller's
//! task awaits.
//!
//! ```text
//!  ┌──────────────────────┐  Message::Run(job)  ┌──────────────────────┐
//!  │  Scheduler thread    │────────────────────▶│  Worker thread       │
//!  │  (LocalExecutor)     │   Channel<_, N>     │  block_on(receive)   │
//!  │                      │                     │  job() ─┐            │
//!  │  done.wait().await ◀─┼──── Signal ─────────┼─────────┘            │
//!  └──────────────────────┘                     └──────────────────────┘
//! ```
//!
//! A full queue is backpressure ([`Error::Busy`]), never a silent drop.
//! Stopping never blocks the caller: the worker finishes its current job,
//! abandons the rest and exits on its own.  [`ThreadedRunner::join`] awaits
//! that exit.

use core::any::Any;
use core::future::Future;
use core::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use log::{debug, info};

use crate::error::{Error, Result};

/// Default queue depth per peripheral.
pub const RUNNER_QUEUE_SIZE: usize = 8;

/// A queued call.  The flag is `true` when the runner was stopped before
/// the job got to run.
type Job = Box<dyn FnOnce(bool) + Send>;

enum Message {
    Run(Job),
    Stop,
}

type Queue<const N: usize> = Channel<CriticalSectionRawMutex, Message, N>;

/// Bounded single-worker executor for blocking calls.
pub struct ThreadedRunner<const N: usize = RUNNER_QUEUE_SIZE> {
    name: String,
    queue: Arc<Queue<N>>,
    stopping: Arc<AtomicBool>,
    exited: Arc<Exited>,
}

type Exited = Signal<CriticalSectionRawMutex, ()>;

impl<const N: usize> ThreadedRunner<N> {
    /// Spawn the worker thread.
    pub fn new(name: &str) -> Result<Self> {
        let queue: Arc<Queue<N>> = Arc::new(Channel::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let exited: Arc<Exited> = Arc::new(Signal::new());

        {
            let queue = Arc::clone(&queue);
            let stopping = Arc::clone(&stopping);
            let exited = Arc::clone(&exited);
            let thread_name = format!("runner-{name}");
            // Detached; the worker reports its exit through `exited`.
            std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    work(&queue, &stopping);
                    exited.signal(());
                })
                .map_err(|e| Error::Unexpected(format!("cannot spawn runner thread: {e}")))?;
        }

        info!("Runner[{}]: started (queue depth {})", name, N);

        Ok(Self {
            name: name.into(),
            queue,
            stopping,
            exited,
        })
    }

    /// Enqueue `f` and return a future resolving to its result.
    ///
    /// Enqueueing happens immediately; the returned future only waits.
    /// Fails with [`Error::Busy`] when the queue is full and with
    /// [`Error::RunnerStopped`] once [`stop`](Self::stop) was called.
    pub fn schedule<T, F>(&self, f: F) -> Result<impl Future<Output = Result<T>> + 'static>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.stopping.load(Ordering::Acquire) {
            return Err(Error::RunnerStopped);
        }

        let done: Arc<Signal<CriticalSectionRawMutex, Result<T>>> = Arc::new(Signal::new());
        let reply = Arc::clone(&done);

        let job: Job = Box::new(move |abandoned| {
            let result = if abandoned {
                Err(Error::RunnerStopped)
            } else {
                panic::catch_unwind(AssertUnwindSafe(f))
                    .unwrap_or_else(|payload| Err(Error::Unexpected(panic_message(&*payload))))
            };
            reply.signal(result);
        });

        if self.queue.try_send(Message::Run(job)).is_err() {
            debug!("Runner[{}]: queue full", self.name);
            return Err(Error::Busy);
        }

        Ok(async move { done.wait().await })
    }

    /// Enqueue `f` and wait for its result.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule(f)?.await
    }

    /// Number of jobs waiting (not counting the one running).
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Ask the worker to exit and return at once.  A job already running
    /// is allowed to finish; queued jobs resolve to
    /// [`Error::RunnerStopped`].  Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        // A full queue means the worker is busy and will see the flag.
        let _ = self.queue.try_send(Message::Stop);
        info!("Runner[{}]: stopping", self.name);
    }

    /// Wait until the worker thread has exited.  Only returns after
    /// [`stop`](Self::stop).
    pub async fn join(&self) {
        self.exited.wait().await;
        // Keep the exit observable for later joins.
        self.exited.signal(());
    }
}

impl<const N: usize> Drop for ThreadedRunner<N> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn work<const N: usize>(queue: &Queue<N>, stopping: &AtomicBool) {
    while !stopping.load(Ordering::Acquire) {
        match futures_lite::future::block_on(queue.receive()) {
            Message::Run(job) => job(false),
            Message::Stop => break,
        }
    }

    while let Ok(message) = queue.try_receive() {
        if let Message::Run(job) = message {
            job(true);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in threaded call".to_owned()
    }
}
