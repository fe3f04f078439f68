//! Timed value sequences.
//!
//! A sequence is a list of `(value, delay)` steps played against one port.
//! Each value is applied under the port's write lock, then the step's delay
//! runs before the next value.  The delay is raced against the sequence's
//! cancel signal, so a superseding write or a disable stops playback
//! without waiting the delay out.

use core::future::Future;
use core::time::Duration;
use std::rc::Rc;

use async_io_mini::Timer;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use log::debug;

use crate::error::{Error, Result};

use super::Port;

type CancelSignal = Signal<NoopRawMutex, ()>;

/// A validated sequence definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    values: Vec<f64>,
    delays_ms: Vec<u64>,
    /// Total number of plays; `0` plays forever.
    repeat: u32,
}

impl Sequence {
    pub fn new(values: Vec<f64>, delays_ms: Vec<u64>, repeat: u32) -> Result<Self> {
        if values.len() != delays_ms.len() {
            return Err(Error::InvalidField("delays".into()));
        }
        if values.is_empty() {
            return Err(Error::InvalidField("values".into()));
        }
        Ok(Self {
            values,
            delays_ms,
            repeat,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    fn is_last_step(&self, round: u32, index: usize) -> bool {
        self.repeat != 0 && round + 1 >= self.repeat && index + 1 == self.values.len()
    }
}

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
}

/// Owner-side handle of a running sequence.  Stored on the port; dropping
/// the handle does not stop playback, [`cancel`](Self::cancel) does.
pub(crate) struct SequenceHandle {
    cancel: Rc<CancelSignal>,
}

impl SequenceHandle {
    pub(crate) fn cancel(&self) {
        self.cancel.signal(());
    }

    fn is(&self, token: &Rc<CancelSignal>) -> bool {
        Rc::ptr_eq(&self.cancel, token)
    }
}

impl Port {
    /// Cancel any running sequence and install a fresh handle.  Returns the
    /// token the new playback listens on.
    pub(crate) fn install_sequence(&self) -> Rc<CancelSignal> {
        self.cancel_sequence();
        let token = Rc::new(Signal::new());
        self.state_mut().sequence = Some(SequenceHandle {
            cancel: Rc::clone(&token),
        });
        token
    }

    /// Drop the handle for `token`, unless a newer sequence replaced it.
    pub(crate) fn release_sequence(&self, token: &Rc<CancelSignal>) {
        let mut state = self.state_mut();
        if state.sequence.as_ref().is_some_and(|h| h.is(token)) {
            state.sequence = None;
        }
    }

    pub fn has_sequence(&self) -> bool {
        self.state().sequence.is_some()
    }
}

/// Play `sequence` on `port`, applying each value with `apply`.
///
/// `apply` runs with the port's write lock held.  The first error stops
/// playback and is returned.
pub(crate) async fn play<F, Fut>(
    port: &Port,
    sequence: &Sequence,
    cancel: &CancelSignal,
    mut apply: F,
) -> Result<Outcome>
where
    F: FnMut(f64) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut round = 0u32;
    loop {
        for (index, (&value, &delay_ms)) in
            sequence.values.iter().zip(&sequence.delays_ms).enumerate()
        {
            {
                let _guard = port.write_lock.lock().await;
                if cancel.signaled() {
                    return Ok(Outcome::Cancelled);
                }
                apply(value).await?;
            }

            if sequence.is_last_step(round, index) {
                debug!("Sequence[{}]: completed after {} plays", port.id(), round + 1);
                return Ok(Outcome::Completed);
            }
            if wait_step(cancel, delay_ms).await {
                return Ok(Outcome::Cancelled);
            }
        }
        round = round.saturating_add(1);
    }
}

/// Wait out one step delay.  Returns `true` if cancelled meanwhile.
async fn wait_step(cancel: &CancelSignal, delay_ms: u64) -> bool {
    if delay_ms == 0 {
        futures_lite::future::yield_now().await;
        return cancel.signaled();
    }
    futures_lite::future::or(
        async {
            cancel.wait().await;
            true
        },
        async {
            Timer::after(Duration::from_millis(delay_ms)).await;
            false
        },
    )
    .await
}
