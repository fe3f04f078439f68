//! Port expressions: a tiny typed formula language.
//!
//! ```text
//!   "ADD($temp, IF(GT($hum, 60), 2, 0))"
//!
//!              Call(ADD)
//!             /         \
//!   PortValue(temp)   Call(IF)
//!                    /    |    \
//!              Call(GT)  2.0   0.0
//!              /      \
//!   PortValue(hum)   60.0
//! ```
//!
//! An expression tree is immutable once parsed; changing a formula means
//! parsing it again.  Built-in functions live in a static table
//! ([`functions::lookup`]) and the evaluator ([`eval`]) never performs I/O:
//! port references resolve to the referenced port's cached value.

pub mod date;
pub mod eval;
pub mod functions;
pub mod loops;
pub mod parse;
pub mod timeproc;

use core::cell::RefCell;
use core::fmt;
use std::collections::BTreeSet;

pub use eval::{EvalContext, EvalResult};
pub use functions::{CallState, FunctionDef};
pub use loops::check_loops;
pub use parse::parse;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors (and the skip signal) produced while parsing, checking or
/// evaluating expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// Malformed formula text.
    InvalidExpression(String),
    /// A function was called with an argument count outside its bounds.
    ArgumentCount { function: &'static str, given: usize },
    /// A function argument is out of its domain.  `index` is 1-based.
    InvalidArgument { index: usize, value: f64 },
    /// Assigning the expression would make the port depend on itself.
    CircularDependency(String),
    /// No result this cycle; the port keeps its previous value.
    Skipped,
    /// A port reference points at a port that no longer exists.
    UnknownPort(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExpression(msg) => write!(f, "invalid expression: {msg}"),
            Self::ArgumentCount { function, given } => {
                write!(f, "invalid number of arguments for {function}: {given}")
            }
            Self::InvalidArgument { index, value } => {
                write!(f, "invalid argument {index}: {value}")
            }
            Self::CircularDependency(id) => write!(f, "{id} is recursively referred"),
            Self::Skipped => write!(f, "evaluation skipped"),
            Self::UnknownPort(id) => write!(f, "unknown port: {id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual time dependencies
// ---------------------------------------------------------------------------

/// Bitmask of wall-clock units an expression must be re-evaluated on,
/// even when none of its input ports changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeDeps(u8);

impl TimeDeps {
    pub const NONE: Self = Self(0);
    pub const SECOND: Self = Self(0b0000_0001);
    pub const MILLISECOND: Self = Self(0b0000_0010);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ---------------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------------

/// A parsed expression node.
#[derive(Debug, PartialEq)]
pub enum Expression {
    /// Numeric literal.
    Constant(f64),
    /// Reference to another port's (or this port's) current value.
    PortValue(String),
    /// Built-in function applied to argument expressions.
    Call(Call),
}

/// A function call node.
///
/// Stateful functions (`DELAY`, `HYST`, ...) keep their history in
/// `state`; the tree shape itself never changes after parsing.
pub struct Call {
    def: &'static FunctionDef,
    args: Vec<Expression>,
    pub(crate) state: RefCell<CallState>,
}

impl Call {
    pub(crate) fn new(def: &'static FunctionDef, args: Vec<Expression>) -> Self {
        Self {
            def,
            args,
            state: RefCell::new(CallState::Empty),
        }
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn def(&self) -> &'static FunctionDef {
        self.def
    }

    pub fn args(&self) -> &[Expression] {
        &self.args
    }
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.def.name == other.def.name && self.args == other.args
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("name", &self.def.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Expression {
    /// Union of the virtual time dependencies of every call in the tree.
    pub fn time_deps(&self) -> TimeDeps {
        match self {
            Self::Constant(_) | Self::PortValue(_) => TimeDeps::NONE,
            Self::Call(call) => call
                .args
                .iter()
                .fold(call.def.deps, |deps, arg| deps.union(arg.time_deps())),
        }
    }

    /// Ids of every port referenced anywhere in the tree.
    pub fn port_refs(&self) -> BTreeSet<&str> {
        let mut refs = BTreeSet::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, refs: &mut BTreeSet<&'a str>) {
        match self {
            Self::Constant(_) => {}
            Self::PortValue(id) => {
                refs.insert(id.as_str());
            }
            Self::Call(call) => {
                for arg in &call.args {
                    arg.collect_refs(refs);
                }
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::PortValue(id) => write!(f, "${id}"),
            Self::Call(call) => {
                write!(f, "{}(", call.def.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
