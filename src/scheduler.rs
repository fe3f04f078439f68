//! Tick scheduler.
//!
//! Decides, once per propagation tick, which time-driven work is due:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Core::tick()                          │
//! │                                                              │
//! │   clock.now_ms() ──▶ Scheduler::advance() ──▶ Due            │
//! │                                                │             │
//! │        ┌───────────────────────┬───────────────┼──────────┐  │
//! │        ▼                       ▼               ▼          │  │
//! │  `second` expressions   `millisecond` exprs   janitor     │  │
//! │  (wall second changed)  (every tick)          (interval)  │  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use log::debug;

use crate::expr::TimeDeps;

/// Work due on the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Due {
    /// The wall-clock second changed since the previous tick.
    pub second: bool,
    /// The history janitor should run.
    pub janitor: bool,
}

impl Due {
    /// Whether an expression with time dependencies `deps` must be
    /// re-evaluated this tick.
    pub fn triggers(&self, deps: TimeDeps) -> bool {
        deps.contains(TimeDeps::MILLISECOND) || (self.second && deps.contains(TimeDeps::SECOND))
    }
}

/// Tracks the last time each periodic job ran.
#[derive(Debug)]
pub struct Scheduler {
    janitor_interval_ms: i64,
    last_second: Option<i64>,
    last_janitor_ms: Option<i64>,
}

impl Scheduler {
    pub fn new(janitor_interval_secs: u32) -> Self {
        Self {
            janitor_interval_ms: i64::from(janitor_interval_secs) * 1000,
            last_second: None,
            last_janitor_ms: None,
        }
    }

    /// Move the scheduler to `now_ms` and report what is due.
    pub fn advance(&mut self, now_ms: i64) -> Due {
        let second = now_ms.div_euclid(1000);
        let second_due = self.last_second != Some(second);
        self.last_second = Some(second);

        let janitor = match self.last_janitor_ms {
            // A clock stepping backwards restarts the interval.
            Some(last) if now_ms < last => {
                self.last_janitor_ms = Some(now_ms);
                false
            }
            Some(last) => now_ms - last >= self.janitor_interval_ms,
            None => true,
        };
        if janitor {
            debug!("Scheduler: janitor due at {}", now_ms);
            self.last_janitor_ms = Some(now_ms);
        }

        Due {
            second: second_due,
            janitor,
        }
    }
}
