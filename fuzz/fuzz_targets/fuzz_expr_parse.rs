//! Fuzz target: `expr::parse`
//!
//! Drives arbitrary text into the expression parser and asserts that it
//! never panics and that anything it accepts prints back to text which
//! parses to the same tree.
//!
//! cargo fuzz run fuzz_expr_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use portcore::expr::parse;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(expr) = parse(Some("fuzz"), text) {
        let printed = expr.to_string();
        let reparsed = parse(Some("fuzz"), &printed).expect("printed expression must parse");
        assert_eq!(reparsed, expr, "print/parse round trip changed the tree");
    }
});
