//! Built-in function table.
//!
//! Every function is one row in a static table:
//!
//! ```text
//! ┌─────────────┬──────┬──────┬──────────────┬─────────────────────┐
//! │ name        │ min  │ max  │ time deps    │ eval                │
//! ├─────────────┼──────┼──────┼──────────────┼─────────────────────┤
//! │ ADD         │ 2    │ ∞    │ -            │ fn(call, ctx)       │
//! │ HOUR        │ 0    │ 1    │ second       │ fn(call, ctx)       │
//! │ DELAY       │ 2    │ 2    │ millisecond  │ fn(call, ctx)       │
//! └─────────────┴──────┴──────┴──────────────┴─────────────────────┘
//! ```
//!
//! Lookup is case-insensitive; names are stored upper-case.  Arguments are
//! evaluated lazily by each function, so `IF`, `AND` and `OR` only touch
//! the branches they need.

use std::collections::VecDeque;

use super::eval::truth;
use super::{Call, EvalContext, EvalResult, ExprError, TimeDeps, date, timeproc};

/// Signature shared by every built-in.
pub type EvalFn = fn(&Call, &dyn EvalContext) -> EvalResult;

/// Static descriptor for one built-in function.
pub struct FunctionDef {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
    pub deps: TimeDeps,
    pub eval: EvalFn,
}

impl FunctionDef {
    /// Whether `count` arguments satisfy this function's bounds.
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.is_none_or(|max| count <= max)
    }
}

const fn def(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    deps: TimeDeps,
    eval: EvalFn,
) -> FunctionDef {
    FunctionDef {
        name,
        min_args,
        max_args,
        deps,
        eval,
    }
}

const NONE: TimeDeps = TimeDeps::NONE;
const SEC: TimeDeps = TimeDeps::SECOND;
const MS: TimeDeps = TimeDeps::MILLISECOND;

static FUNCTIONS: &[FunctionDef] = &[
    // ── Arithmetic ─────────────────────────────────────────────
    def("ADD", 2, None, NONE, add),
    def("SUB", 2, Some(2), NONE, sub),
    def("MUL", 2, None, NONE, mul),
    def("DIV", 2, Some(2), NONE, div),
    def("MOD", 2, Some(2), NONE, modulo),
    def("POW", 2, Some(2), NONE, pow),
    def("ABS", 1, Some(1), NONE, abs),
    def("SGN", 1, Some(1), NONE, sgn),
    def("MIN", 2, None, NONE, min),
    def("MAX", 2, None, NONE, max),
    def("AVG", 2, None, NONE, avg),
    def("FLOOR", 1, Some(1), NONE, floor),
    def("CEIL", 1, Some(1), NONE, ceil),
    def("ROUND", 1, Some(2), NONE, round),
    // ── Logic ──────────────────────────────────────────────────
    def("AND", 2, None, NONE, and),
    def("OR", 2, None, NONE, or),
    def("NOT", 1, Some(1), NONE, not),
    def("XOR", 2, Some(2), NONE, xor),
    def("IF", 3, Some(3), NONE, if_),
    // ── Bitwise ────────────────────────────────────────────────
    def("BITAND", 2, None, NONE, bitand),
    def("BITOR", 2, None, NONE, bitor),
    def("BITXOR", 2, Some(2), NONE, bitxor),
    def("BITNOT", 1, Some(1), NONE, bitnot),
    def("SHL", 2, Some(2), NONE, shl),
    def("SHR", 2, Some(2), NONE, shr),
    // ── Comparison ─────────────────────────────────────────────
    def("EQ", 2, Some(2), NONE, eq),
    def("GT", 2, Some(2), NONE, gt),
    def("GTE", 2, Some(2), NONE, gte),
    def("LT", 2, Some(2), NONE, lt),
    def("LTE", 2, Some(2), NONE, lte),
    def("HYST", 3, Some(3), NONE, hyst),
    // ── Wall clock ─────────────────────────────────────────────
    def("TIME", 0, Some(0), SEC, date::time),
    def("TIMEMS", 0, Some(0), MS, date::timems),
    def("YEAR", 0, Some(1), SEC, date::year),
    def("MONTH", 0, Some(1), SEC, date::month),
    def("DAY", 0, Some(1), SEC, date::day),
    def("DOW", 0, Some(1), SEC, date::dow),
    def("LDOM", 0, Some(1), SEC, date::ldom),
    def("HOUR", 0, Some(1), SEC, date::hour),
    def("MINUTE", 0, Some(1), SEC, date::minute),
    def("SECOND", 0, Some(1), SEC, date::second),
    def("MILLISECOND", 0, Some(0), MS, date::millisecond),
    def("DATE", 6, Some(6), SEC, date::date),
    def("BOY", 1, Some(1), SEC, date::boy),
    def("BOM", 1, Some(1), SEC, date::bom),
    def("BOW", 1, Some(2), SEC, date::bow),
    def("BOD", 1, Some(1), SEC, date::bod),
    def("HMSINTERVAL", 6, Some(6), SEC, date::hms_interval),
    def("MDINTERVAL", 4, Some(4), SEC, date::md_interval),
    // ── Time processing ────────────────────────────────────────
    def("DELAY", 2, Some(2), MS, timeproc::delay),
    def("SAMPLE", 2, Some(2), MS, timeproc::sample),
    def("HELD", 3, Some(3), MS, timeproc::held),
    def("DERIV", 2, Some(2), MS, timeproc::deriv),
    def("INTEG", 3, Some(3), MS, timeproc::integ),
    def("FMAVG", 3, Some(3), MS, timeproc::fmavg),
    def("FMEDIAN", 3, Some(3), MS, timeproc::fmedian),
];

/// Find a built-in by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static FunctionDef> {
    FUNCTIONS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

/// The whole table, in declaration order.
pub fn all() -> &'static [FunctionDef] {
    FUNCTIONS
}

// ---------------------------------------------------------------------------
// Per-call state for stateful functions
// ---------------------------------------------------------------------------

/// Runtime memory of a stateful call node.  Fresh nodes start `Empty` and
/// each function installs its own variant on first evaluation.
#[derive(Debug, Default)]
pub enum CallState {
    #[default]
    Empty,
    Hyst {
        on: bool,
    },
    Delay {
        queue: VecDeque<(i64, f64)>,
        last: Option<f64>,
        current: Option<f64>,
    },
    Sample {
        value: f64,
        period_ms: f64,
        time_ms: i64,
    },
    Held {
        since_ms: i64,
        stage: HeldStage,
    },
    Sampled {
        last_value: Option<f64>,
        last_ms: i64,
    },
    Window {
        queue: VecDeque<f64>,
        last_ms: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldStage {
    Off,
    Waiting,
    On,
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

impl Call {
    /// Evaluate argument `index` (0-based).
    pub(crate) fn arg(&self, index: usize, ctx: &dyn EvalContext) -> EvalResult {
        self.args()[index].eval(ctx)
    }

    /// Evaluate argument `index` if it was supplied.
    pub(crate) fn opt_arg(
        &self,
        index: usize,
        ctx: &dyn EvalContext,
    ) -> Result<Option<f64>, ExprError> {
        self.args().get(index).map(|a| a.eval(ctx)).transpose()
    }

    /// Evaluate every argument in order.
    pub(crate) fn all_args(&self, ctx: &dyn EvalContext) -> Result<Vec<f64>, ExprError> {
        self.args().iter().map(|a| a.eval(ctx)).collect()
    }
}

fn binary(call: &Call, ctx: &dyn EvalContext) -> Result<(f64, f64), ExprError> {
    Ok((call.arg(0, ctx)?, call.arg(1, ctx)?))
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn add(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call.all_args(ctx)?.into_iter().sum())
}

fn sub(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(a - b)
}

fn mul(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call.all_args(ctx)?.into_iter().product())
}

fn div(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    if b == 0.0 {
        return Err(ExprError::InvalidArgument { index: 2, value: b });
    }
    Ok(a / b)
}

/// Floored modulo: the result takes the sign of the divisor.
fn modulo(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    if b == 0.0 {
        return Err(ExprError::InvalidArgument { index: 2, value: b });
    }
    Ok(a - b * (a / b).floor())
}

fn pow(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    let r = a.powf(b);
    if r.is_finite() {
        Ok(r)
    } else {
        Err(ExprError::InvalidArgument { index: 2, value: b })
    }
}

fn abs(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call.arg(0, ctx)?.abs())
}

fn sgn(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let v = call.arg(0, ctx)?;
    Ok(if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    })
}

fn min(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call.all_args(ctx)?.into_iter().fold(f64::INFINITY, f64::min))
}

fn max(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call
        .all_args(ctx)?
        .into_iter()
        .fold(f64::NEG_INFINITY, f64::max))
}

fn avg(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let values = call.all_args(ctx)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

fn floor(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call.arg(0, ctx)?.floor())
}

fn ceil(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(call.arg(0, ctx)?.ceil())
}

fn round(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let v = call.arg(0, ctx)?;
    match call.opt_arg(1, ctx)? {
        None => Ok(v.round()),
        Some(d) if (0.0..=15.0).contains(&d) => {
            let scale = 10f64.powi(d as i32);
            Ok((v * scale).round() / scale)
        }
        Some(d) => Err(ExprError::InvalidArgument { index: 2, value: d }),
    }
}

// ---------------------------------------------------------------------------
// Logic
// ---------------------------------------------------------------------------

fn and(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    for arg in call.args() {
        if arg.eval(ctx)? == 0.0 {
            return Ok(0.0);
        }
    }
    Ok(1.0)
}

fn or(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    for arg in call.args() {
        if arg.eval(ctx)? != 0.0 {
            return Ok(1.0);
        }
    }
    Ok(0.0)
}

fn not(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(truth(call.arg(0, ctx)? == 0.0))
}

fn xor(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(truth((a != 0.0) != (b != 0.0)))
}

fn if_(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    if call.arg(0, ctx)? != 0.0 {
        call.arg(1, ctx)
    } else {
        call.arg(2, ctx)
    }
}

// ---------------------------------------------------------------------------
// Bitwise (on integer-truncated operands)
// ---------------------------------------------------------------------------

fn bitand(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let values = call.all_args(ctx)?;
    Ok(values.into_iter().map(|v| v as i64).fold(-1, |acc, v| acc & v) as f64)
}

fn bitor(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let values = call.all_args(ctx)?;
    Ok(values.into_iter().map(|v| v as i64).fold(0, |acc, v| acc | v) as f64)
}

fn bitxor(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(((a as i64) ^ (b as i64)) as f64)
}

fn bitnot(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    Ok(!(call.arg(0, ctx)? as i64) as f64)
}

fn shift_amount(b: f64) -> Result<u32, ExprError> {
    if (0.0..64.0).contains(&b) {
        Ok(b as u32)
    } else {
        Err(ExprError::InvalidArgument { index: 2, value: b })
    }
}

fn shl(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(((a as i64) << shift_amount(b)?) as f64)
}

fn shr(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(((a as i64) >> shift_amount(b)?) as f64)
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn eq(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(truth(a == b))
}

fn gt(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(truth(a > b))
}

fn gte(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(truth(a >= b))
}

fn lt(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(truth(a < b))
}

fn lte(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let (a, b) = binary(call, ctx)?;
    Ok(truth(a <= b))
}

/// `HYST(value, low, high)`: turns on above `high`, stays on until the
/// value drops below `low`.
fn hyst(call: &Call, ctx: &dyn EvalContext) -> EvalResult {
    let value = call.arg(0, ctx)?;
    let low = call.arg(1, ctx)?;
    let high = call.arg(2, ctx)?;

    let mut state = call.state.borrow_mut();
    if !matches!(*state, CallState::Hyst { .. }) {
        *state = CallState::Hyst { on: false };
    }
    let CallState::Hyst { on } = &mut *state else {
        unreachable!("hysteresis state installed above");
    };

    *on = value > high || (*on && value >= low);
    Ok(truth(*on))
}
