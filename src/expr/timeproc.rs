//! Stateful time-processing functions.
//!
//! Each call node keeps its own history in [`CallState`], so two `DELAY`
//! calls in the same formula never share samples.  Time here is the
//! monotonic-enough `Clock::now_ms`, not the calendar; these functions work
//! before the wall clock is trusted.

use std::collections::VecDeque;

use super::eval::truth;
use super::functions::{CallState, HeldStage};
use super::{Call, EvalContext, EvalResult, ExprError};

/// Upper bound on buffered samples per call node.
pub const HISTORY_SIZE: usize = 1024;

/// `DELAY(value, ms)`: the input as it was `ms` milliseconds ago.
pub(super) fn delay(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let delay_ms = call.arg(1, ctx)?;
    let now = ctx.clock().now_ms();

    let mut state = call.state.borrow_mut();
    if !matches!(*state, CallState::Delay { .. }) {
        *state = CallState::Delay {
            queue: VecDeque::new(),
            last: None,
            current: None,
        };
    }
    let CallState::Delay {
        queue,
        last,
        current,
    } = &mut *state
    else {
        unreachable!("delay state installed above");
    };

    let current = current.get_or_insert(value);

    if *last != Some(value) {
        *last = Some(value);
        while queue.len() >= HISTORY_SIZE {
            queue.pop_front();
        }
        queue.push_back((now, value));
    }

    while let Some(&(at, v)) = queue.front() {
        if ((now - at) as f64) < delay_ms {
            break;
        }
        *current = v;
        queue.pop_front();
    }

    Ok(*current)
}

/// `SAMPLE(value, ms)`: re-read the input at most once every `ms`.
pub(super) fn sample(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = ctx.clock().now_ms();
    if let CallState::Sample {
        value,
        period_ms,
        time_ms,
    } = *call.state.borrow()
    {
        if ((now - time_ms) as f64) < period_ms {
            return Ok(value);
        }
    }

    let value = call.arg(0, ctx)?;
    let period_ms = call.arg(1, ctx)?;
    *call.state.borrow_mut() = CallState::Sample {
        value,
        period_ms,
        time_ms: now,
    };
    Ok(value)
}

/// `HELD(value, fixed, ms)`: true once `value` has equalled `fixed` for at
/// least `ms` milliseconds.
pub(super) fn held(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let fixed = call.arg(1, ctx)?;
    let duration_ms = call.arg(2, ctx)?;
    let now = ctx.clock().now_ms();

    let mut state = call.state.borrow_mut();
    if !matches!(*state, CallState::Held { .. }) {
        *state = CallState::Held {
            since_ms: now,
            stage: HeldStage::Off,
        };
    }
    let CallState::Held { since_ms, stage } = &mut *state else {
        unreachable!("held state installed above");
    };

    if value == fixed {
        match *stage {
            HeldStage::Off => {
                *since_ms = now;
                *stage = HeldStage::Waiting;
            }
            HeldStage::Waiting if ((now - *since_ms) as f64) >= duration_ms => {
                *stage = HeldStage::On;
            }
            HeldStage::Waiting | HeldStage::On => {}
        }
    } else {
        *stage = HeldStage::Off;
    }

    Ok(truth(*stage == HeldStage::On))
}

/// Shared bookkeeping for `DERIV` and `INTEG`: returns the previous sample
/// and the elapsed seconds, or skips while inside the sampling interval.
fn advance_sampled(
    call: &Call,
    now: i64,
    value: f64,
    sampling_ms: f64,
) -> Result<Option<(f64, f64)>, ExprError> {
    let mut state = call.state.borrow_mut();
    let previous = match *state {
        CallState::Sampled {
            last_value: Some(last),
            last_ms,
        } => {
            let elapsed = (now - last_ms) as f64;
            if elapsed < sampling_ms || elapsed <= 0.0 {
                return Err(ExprError::Skipped);
            }
            Some((last, elapsed / 1000.0))
        }
        _ => None,
    };

    *state = CallState::Sampled {
        last_value: Some(value),
        last_ms: now,
    };
    Ok(previous)
}

/// `DERIV(value, sampling_ms)`: rate of change per second.
pub(super) fn deriv(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let sampling_ms = call.arg(1, ctx)?;
    let now = ctx.clock().now_ms();

    Ok(match advance_sampled(call, now, value, sampling_ms)? {
        Some((last, dt)) => (value - last) / dt,
        None => 0.0,
    })
}

/// `INTEG(value, accumulator, sampling_ms)`: trapezoidal integral added to
/// the accumulator, usually the port itself (`$`).
pub(super) fn integ(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let accumulator = call.arg(1, ctx)?;
    let sampling_ms = call.arg(2, ctx)?;
    let now = ctx.clock().now_ms();

    Ok(match advance_sampled(call, now, value, sampling_ms)? {
        Some((last, dt)) => accumulator + (value + last) * dt / 2.0,
        None => accumulator,
    })
}

/// Push a sample into the moving window and return a snapshot of it.
fn advance_window(
    call: &Call,
    now: i64,
    value: f64,
    width: f64,
    sampling_ms: f64,
) -> Result<Vec<f64>, ExprError> {
    let width = (width.max(1.0) as usize).min(HISTORY_SIZE);

    let mut state = call.state.borrow_mut();
    if !matches!(*state, CallState::Window { .. }) {
        *state = CallState::Window {
            queue: VecDeque::new(),
            last_ms: None,
        };
    }
    let CallState::Window { queue, last_ms } = &mut *state else {
        unreachable!("window state installed above");
    };

    if let Some(last) = *last_ms {
        if ((now - last) as f64) < sampling_ms {
            return Err(ExprError::Skipped);
        }
    }

    while queue.len() >= width {
        queue.pop_front();
    }
    queue.push_back(value);
    *last_ms = Some(now);

    Ok(queue.iter().copied().collect())
}

/// `FMAVG(value, width, sampling_ms)`: moving average.
pub(super) fn fmavg(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let width = call.arg(1, ctx)?;
    let sampling_ms = call.arg(2, ctx)?;

    let window = advance_window(call, ctx.clock().now_ms(), value, width, sampling_ms)?;
    Ok(window.iter().sum::<f64>() / window.len() as f64)
}

/// `FMEDIAN(value, width, sampling_ms)`: moving median (upper median for
/// even windows).
pub(super) fn fmedian(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let width = call.arg(1, ctx)?;
    let sampling_ms = call.arg(2, ctx)?;

    let mut window = advance_window(call, ctx.clock().now_ms(), value, width, sampling_ms)?;
    window.sort_by(f64::total_cmp);
    Ok(window[window.len() / 2])
}
