//! Expression evaluator.
//!
//! Dispatch is a plain `match` over the closed node set; calls jump
//! through the function table's `eval` pointer.  [`ExprError::Skipped`]
//! travels up through `?` untouched, so any call built on a skipped
//! sub-expression is itself skipped.

use crate::app::ports::Clock;

use super::{ExprError, Expression};

/// Outcome of evaluating one node.
pub type EvalResult = Result<f64, ExprError>;

/// Read-only view of the world an expression is evaluated against.
pub trait EvalContext {
    /// Cached value of port `id`.
    ///
    /// `Ok(None)` means the port exists but has no usable value (disabled or
    /// never read); `Err(UnknownPort)` means the port has been removed.
    fn port_value(&self, id: &str) -> Result<Option<f64>, ExprError>;

    /// Wall clock used by the date/time functions.
    fn clock(&self) -> &dyn Clock;
}

impl Expression {
    /// Evaluate this tree against `ctx`.
    pub fn eval(&self, ctx: &dyn EvalContext) -> EvalResult {
        match self {
            Self::Constant(v) => Ok(*v),
            Self::PortValue(id) => ctx.port_value(id)?.ok_or(ExprError::Skipped),
            Self::Call(call) => (call.def().eval)(call, ctx),
        }
    }
}

/// Convert a number to a 0/1 truth value.
pub(crate) fn truth(v: bool) -> f64 {
    if v { 1.0 } else { 0.0 }
}
