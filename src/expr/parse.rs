//! Expression text parser.
//!
//! Classification is tried in order on the trimmed text:
//!
//! 1. `$` prefix: port reference (`$` alone means the owning port);
//! 2. contains `(`: function call, arguments split on top-level commas;
//! 3. anything else: numeric constant.
//!
//! Argument counts are checked against the function table here, so an
//! arity mistake never survives until evaluation.

use super::functions;
use super::{Call, ExprError, Expression};

/// Parse `text` into an expression tree.
///
/// `self_port_id` is the id substituted for a bare `$`; `None` makes a bare
/// `$` invalid.
pub fn parse(self_port_id: Option<&str>, text: &str) -> Result<Expression, ExprError> {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix('$') {
        parse_port_value(self_port_id, rest)
    } else if text.contains('(') {
        parse_call(self_port_id, text)
    } else {
        parse_constant(text)
    }
}

/// Whether `id` is acceptable as a port identifier.
pub fn is_valid_port_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn parse_port_value(self_port_id: Option<&str>, rest: &str) -> Result<Expression, ExprError> {
    if rest.is_empty() {
        return match self_port_id {
            Some(id) => Ok(Expression::PortValue(id.to_owned())),
            None => Err(ExprError::InvalidExpression(
                "self reference outside of a port".into(),
            )),
        };
    }

    if !is_valid_port_id(rest) {
        return Err(ExprError::InvalidExpression(format!(
            "invalid port reference: ${rest}"
        )));
    }

    Ok(Expression::PortValue(rest.to_owned()))
}

fn parse_call(self_port_id: Option<&str>, text: &str) -> Result<Expression, ExprError> {
    let open = text.find('(').unwrap_or_default();
    let name = text[..open].trim();

    let Some(inner) = text[open + 1..].strip_suffix(')') else {
        return Err(ExprError::InvalidExpression(format!(
            "missing closing parenthesis: {text}"
        )));
    };

    if name.is_empty() {
        return Err(ExprError::InvalidExpression(format!(
            "missing function name: {text}"
        )));
    }

    let def = functions::lookup(name)
        .ok_or_else(|| ExprError::InvalidExpression(format!("unknown function {name}")))?;

    let args = split_args(inner)?
        .into_iter()
        .map(|arg| parse(self_port_id, arg))
        .collect::<Result<Vec<_>, _>>()?;

    if !def.accepts(args.len()) {
        return Err(ExprError::ArgumentCount {
            function: def.name,
            given: args.len(),
        });
    }

    Ok(Expression::Call(Call::new(def, args)))
}

/// Split the text between a call's outer parentheses on commas that are
/// not nested inside another call.
fn split_args(inner: &str) -> Result<Vec<&str>, ExprError> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    ExprError::InvalidExpression("unbalanced parentheses".into())
                })?;
            }
            ',' if depth == 0 => {
                args.push(non_empty_arg(&inner[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ExprError::InvalidExpression("unbalanced parentheses".into()));
    }
    args.push(non_empty_arg(&inner[start..])?);

    Ok(args)
}

fn non_empty_arg(arg: &str) -> Result<&str, ExprError> {
    if arg.trim().is_empty() {
        Err(ExprError::InvalidExpression("empty argument".into()))
    } else {
        Ok(arg)
    }
}

fn parse_constant(text: &str) -> Result<Expression, ExprError> {
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Expression::Constant(v)),
        _ => Err(ExprError::InvalidExpression(format!(
            "invalid number: {text:?}"
        ))),
    }
}
