//! Circular-dependency analysis, run once when an expression is assigned.
//!
//! ```text
//!   assign  A := ADD($B, $C)
//!
//!   depth 1:  $B ─────────── $C
//!   depth 2:  B := $D        C := $D   (D already seen, pruned)
//!   depth 3:  D := 5
//! ```
//!
//! Only a walk that comes back to the port being assigned counts as a
//! cycle.  Ports reached twice through different paths (diamonds) are fine.

use std::collections::BTreeSet;
use std::rc::Rc;

use super::{ExprError, Expression};

/// Reject `expr` for `port_id` if it would make the port depend on itself.
///
/// `lookup` yields the expression currently attached to a port, or `None`
/// for ports with no expression (and for ports that do not exist).
pub fn check_loops<F>(port_id: &str, expr: &Expression, lookup: F) -> Result<(), ExprError>
where
    F: Fn(&str) -> Option<Rc<Expression>>,
{
    let mut seen = BTreeSet::new();
    seen.insert(port_id.to_owned());
    walk(port_id, expr, 1, &mut seen, &lookup)
}

fn walk<F>(
    origin: &str,
    expr: &Expression,
    depth: usize,
    seen: &mut BTreeSet<String>,
    lookup: &F,
) -> Result<(), ExprError>
where
    F: Fn(&str) -> Option<Rc<Expression>>,
{
    match expr {
        Expression::Constant(_) => Ok(()),
        Expression::Call(call) => call
            .args()
            .iter()
            .try_for_each(|arg| walk(origin, arg, depth, seen, lookup)),
        Expression::PortValue(id) => {
            if id == origin {
                return if depth > 1 {
                    Err(ExprError::CircularDependency(origin.to_owned()))
                } else {
                    Ok(())
                };
            }
            if !seen.insert(id.clone()) {
                return Ok(());
            }
            match lookup(id) {
                Some(next) => walk(origin, &next, depth + 1, seen, lookup),
                None => Ok(()),
            }
        }
    }
}
