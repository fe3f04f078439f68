//! Wall-clock and calendar functions.
//!
//! All of these yield [`ExprError::Skipped`] until the host clock reports a
//! trustworthy date.  Local time is UTC shifted by the clock's fixed offset;
//! `chrono` does the timestamp ⇄ field conversion while period arithmetic
//! (`BOM`, `BOW`, `BOD`) counts months and walks days explicitly, within a
//! bounded shift.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::eval::truth;
use super::{Call, EvalContext, EvalResult, ExprError};

// ---------------------------------------------------------------------------
// Calendar helpers
// ---------------------------------------------------------------------------

pub(crate) fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if is_leap_year(year) => 29,
        _ => 28,
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month < 12 { (year, month + 1) } else { (year + 1, 1) }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month > 1 { (year, month - 1) } else { (year - 1, 12) }
}

fn add_months(year: i32, month: u32, n: i64) -> (i32, u32) {
    let total = i64::from(year) * 12 + i64::from(month - 1) + n;
    (total.div_euclid(12) as i32, total.rem_euclid(12) as u32 + 1)
}

/// Largest period shift accepted by `BOM`, `BOW` and `BOD`, in years.
const MAX_SHIFT_YEARS: i64 = 10_000;

/// `n` truncated, if it shifts by no more than [`MAX_SHIFT_YEARS`] worth of
/// `per_year` units.
fn bounded_shift(n: f64, per_year: i64) -> Result<i64, ExprError> {
    let limit = (MAX_SHIFT_YEARS * per_year) as f64;
    if n.trunc().abs() <= limit {
        Ok(n.trunc() as i64)
    } else {
        Err(ExprError::InvalidArgument { index: 1, value: n })
    }
}

/// Shift a calendar date by `n` days, one month boundary at a time.
fn add_days(mut year: i32, mut month: u32, mut day: u32, mut n: i64) -> (i32, u32, u32) {
    while n > 0 {
        let remaining = i64::from(days_in_month(year, month) - day);
        if n <= remaining {
            day += n as u32;
            n = 0;
        } else {
            n -= remaining + 1;
            (year, month) = next_month(year, month);
            day = 1;
        }
    }
    while n < 0 {
        let back = i64::from(day - 1);
        if -n <= back {
            day -= (-n) as u32;
            n = 0;
        } else {
            n += back + 1;
            (year, month) = prev_month(year, month);
            day = days_in_month(year, month);
        }
    }
    (year, month, day)
}

// ---------------------------------------------------------------------------
// Clock access
// ---------------------------------------------------------------------------

fn require_real_time(ctx: &dyn EvalContext) -> Result<(), ExprError> {
    if ctx.clock().has_real_date_time() {
        Ok(())
    } else {
        Err(ExprError::Skipped)
    }
}

fn offset_ms(ctx: &dyn EvalContext) -> i64 {
    i64::from(ctx.clock().utc_offset_secs()) * 1000
}

fn local_from_ms(ctx: &dyn EvalContext, ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms.checked_add(offset_ms(ctx))?).map(|dt| dt.naive_utc())
}

fn now_local(ctx: &dyn EvalContext) -> Result<NaiveDateTime, ExprError> {
    require_real_time(ctx)?;
    local_from_ms(ctx, ctx.clock().now_ms()).ok_or(ExprError::Skipped)
}

/// Unix timestamp (seconds) of local midnight on the given date.
fn local_midnight(ctx: &dyn EvalContext, year: i32, month: u32, day: u32) -> Option<f64> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some((naive.and_utc().timestamp() - offset_ms(ctx) / 1000) as f64)
}

// ---------------------------------------------------------------------------
// Current time
// ---------------------------------------------------------------------------

pub(super) fn time(_call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    require_real_time(ctx)?;
    Ok(ctx.clock().now_ms().div_euclid(1000) as f64)
}

pub(super) fn timems(_call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    require_real_time(ctx)?;
    Ok(ctx.clock().now_ms() as f64)
}

// ---------------------------------------------------------------------------
// Date parts
// ---------------------------------------------------------------------------

/// Extract one field from the optional timestamp argument (seconds,
/// truncated) or from the current local time.
fn date_part(call: &Call, ctx: &dyn EvalContext, extract: fn(&NaiveDateTime) -> u32) -> EvalResult {
    require_real_time(ctx)?;
    let dt = match call.opt_arg(0, ctx)? {
        Some(ts) => (ts.trunc() as i64)
            .checked_mul(1000)
            .and_then(|ms| local_from_ms(ctx, ms))
            .ok_or(ExprError::InvalidArgument { index: 1, value: ts })?,
        None => now_local(ctx)?,
    };
    Ok(f64::from(extract(&dt)))
}

pub(super) fn year(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.year().unsigned_abs())
}

pub(super) fn month(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.month())
}

pub(super) fn day(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.day())
}

/// Day of week, Monday = 0.
pub(super) fn dow(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.weekday().num_days_from_monday())
}

/// Last day of the month.
pub(super) fn ldom(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| days_in_month(dt.year(), dt.month()))
}

pub(super) fn hour(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.hour())
}

pub(super) fn minute(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.minute())
}

pub(super) fn second(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    date_part(call, ctx, |dt| dt.second())
}

pub(super) fn millisecond(_call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    Ok(f64::from(now.nanosecond() / 1_000_000))
}

// ---------------------------------------------------------------------------
// Timestamp construction
// ---------------------------------------------------------------------------

/// `DATE(year, month, day, hour, minute, second)` in local time.
pub(super) fn date(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    require_real_time(ctx)?;
    let v: Vec<i64> = call
        .all_args(ctx)?
        .into_iter()
        .map(|a| a.trunc() as i64)
        .collect();

    let invalid = |index: usize| ExprError::InvalidArgument {
        index,
        value: v[index - 1] as f64,
    };

    if !(1..=9999).contains(&v[0]) {
        return Err(invalid(1));
    }
    let year = v[0] as i32;
    if !(1..=12).contains(&v[1]) {
        return Err(invalid(2));
    }
    let month = v[1] as u32;
    if !(1..=i64::from(days_in_month(year, month))).contains(&v[2]) {
        return Err(invalid(3));
    }
    if !(0..=23).contains(&v[3]) {
        return Err(invalid(4));
    }
    if !(0..=59).contains(&v[4]) {
        return Err(invalid(5));
    }
    if !(0..=59).contains(&v[5]) {
        return Err(invalid(6));
    }

    let midnight = local_midnight(ctx, year, month, v[2] as u32).ok_or_else(|| invalid(1))?;
    Ok(midnight + (v[3] * 3600 + v[4] * 60 + v[5]) as f64)
}

/// Beginning of the year, `n` years from now.
pub(super) fn boy(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    let n = call.arg(0, ctx)?;
    let year = i32::try_from(i64::from(now.year()) + n.trunc() as i64).ok();
    year.and_then(|y| local_midnight(ctx, y, 1, 1))
        .ok_or(ExprError::InvalidArgument { index: 1, value: n })
}

/// Beginning of the month, `n` months from now.
pub(super) fn bom(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    let n = call.arg(0, ctx)?;
    let (year, month) = add_months(now.year(), now.month(), bounded_shift(n, 12)?);
    local_midnight(ctx, year, month, 1).ok_or(ExprError::InvalidArgument { index: 1, value: n })
}

/// Beginning of the week, `n` weeks from now.  `s` is the first day of the
/// week (0 = Monday, the default).
pub(super) fn bow(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    let n = call.arg(0, ctx)?;
    let s = call.opt_arg(1, ctx)?.unwrap_or(0.0);
    if !(0.0..7.0).contains(&s) {
        return Err(ExprError::InvalidArgument { index: 2, value: s });
    }

    let weekday = i64::from(now.weekday().num_days_from_monday());
    let days_back = (weekday - s.trunc() as i64 + 7) % 7;
    let shift = bounded_shift(n, 53)? * 7 - days_back;
    let (year, month, day) = add_days(now.year(), now.month(), now.day(), shift);
    local_midnight(ctx, year, month, day).ok_or(ExprError::InvalidArgument { index: 1, value: n })
}

/// Beginning of the day, `n` days from now.
pub(super) fn bod(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    let n = call.arg(0, ctx)?;
    let (year, month, day) = add_days(now.year(), now.month(), now.day(), bounded_shift(n, 366)?);
    local_midnight(ctx, year, month, day).ok_or(ExprError::InvalidArgument { index: 1, value: n })
}

// ---------------------------------------------------------------------------
// Intervals
// ---------------------------------------------------------------------------

fn check_range(index: usize, value: f64, low: f64, high: f64) -> Result<u32, ExprError> {
    if (low..=high).contains(&value) {
        Ok(value as u32)
    } else {
        Err(ExprError::InvalidArgument { index, value })
    }
}

fn ms_of_day(hour: u32, minute: u32, second: u32) -> u32 {
    ((hour * 60 + minute) * 60 + second) * 1000
}

/// `HMSINTERVAL(h1, m1, s1, h2, m2, s2)`: whether the local time of day
/// lies within `[h1:m1:s1.000, h2:m2:s2.000]`, compared to the millisecond.
pub(super) fn hms_interval(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    let v = call.all_args(ctx)?;

    let start = ms_of_day(
        check_range(1, v[0], 0.0, 23.0)?,
        check_range(2, v[1], 0.0, 59.0)?,
        check_range(3, v[2], 0.0, 59.0)?,
    );
    let stop = ms_of_day(
        check_range(4, v[3], 0.0, 23.0)?,
        check_range(5, v[4], 0.0, 59.0)?,
        check_range(6, v[5], 0.0, 59.0)?,
    );

    let current = ms_of_day(now.hour(), now.minute(), now.second()) + now.nanosecond() / 1_000_000;
    Ok(truth(start <= current && current <= stop))
}

/// `MDINTERVAL(m1, d1, m2, d2)`: whether today lies within
/// `[m1/d1, m2/d2]` of the current year.
pub(super) fn md_interval(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let now = now_local(ctx)?;
    let v = call.all_args(ctx)?;

    let start_month = check_range(1, v[0], 1.0, 12.0)?;
    let start_day = check_range(2, v[1], 1.0, f64::from(days_in_month(now.year(), start_month)))?;
    let stop_month = check_range(3, v[2], 1.0, 12.0)?;
    let stop_day = check_range(4, v[3], 1.0, f64::from(days_in_month(now.year(), stop_month)))?;

    let today = (now.month(), now.day());
    Ok(truth((start_month, start_day) <= today && today <= (stop_month, stop_day)))
}
