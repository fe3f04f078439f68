//! Host time adapter.
//!
//! Wall-clock time for expressions and history, from the host clock via
//! `chrono`.  Time before `real_time_epoch_secs` (default 2020-01-01) is
//! treated as an unsynchronised clock, the way a device looks right after
//! boot and before NTP.

use chrono::{Local, Utc};

use crate::app::ports::Clock;

/// [`Clock`] backed by the host's system time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    real_time_epoch_secs: i64,
    /// Overrides the host time zone when set.
    fixed_offset_secs: Option<i32>,
}

impl SystemClock {
    pub fn new(real_time_epoch_secs: i64) -> Self {
        Self {
            real_time_epoch_secs,
            fixed_offset_secs: None,
        }
    }

    /// Use a fixed UTC offset instead of the host time zone.
    pub fn with_fixed_offset(mut self, offset_secs: i32) -> Self {
        self.fixed_offset_secs = Some(offset_secs);
        self
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn utc_offset_secs(&self) -> i32 {
        self.fixed_offset_secs
            .unwrap_or_else(|| Local::now().offset().local_minus_utc())
    }

    fn has_real_date_time(&self) -> bool {
        self.now_ms().div_euclid(1000) >= self.real_time_epoch_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_time_follows_epoch_threshold() {
        assert!(SystemClock::new(1_577_836_800).has_real_date_time());
        assert!(!SystemClock::new(i64::MAX).has_real_date_time());
    }

    #[test]
    fn fixed_offset_overrides_host_zone() {
        let clock = SystemClock::new(0).with_fixed_offset(3600);
        assert_eq!(clock.utc_offset_secs(), 3600);
    }
}
