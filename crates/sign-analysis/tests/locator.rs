use boa_interner::Interner;
use sign_analysis::locate::{locate_math_region, parse_bundle};

fn locate(source: &str) -> Option<usize> {
    let mut interner = Interner::default();
    let script = parse_bundle(source, &mut interner).expect("fixture parses");
    locate_math_region(&script, &mut interner).map(|region| region.return_ordinal)
}

#[test]
fn single_qualifying_region_is_found() {
    let source = r#"
        function pad(x) { return x; }
        function checksum(a) { return Math.floor(a[0]); }
    "#;
    assert_eq!(locate(source), Some(1));
}

#[test]
fn zero_qualifying_regions_yield_none() {
    let source = r#"
        function pad(x) { return x; }
        function id(y) { return y; }
    "#;
    assert_eq!(locate(source), None);
}

#[test]
fn first_match_wins_across_returns() {
    let source = r#"
        function first(a) { return Math.abs(a); }
        function second(b) { return Math.max(b, 0); }
    "#;
    assert_eq!(locate(source), Some(0));
}

#[test]
fn math_buried_in_a_nested_expression_still_matches() {
    let source = r#"
        function f(a) {
            var unused = 1;
            return a.map(function (x) { return x * Math.PI; });
        }
    "#;
    // The outer return is encountered first and its subtree contains the
    // identifier, so the outer return is the region.
    assert_eq!(locate(source), Some(0));
}

#[test]
fn search_is_deterministic() {
    let source = r#"
        function a(x) { return x; }
        function b(x) { return Math.round(x); }
        function c(x) { return Math.ceil(x); }
    "#;
    assert_eq!(locate(source), locate(source));
    assert_eq!(locate(source), Some(1));
}

#[test]
fn malformed_source_is_a_parse_error() {
    let mut interner = Interner::default();
    assert!(parse_bundle("function {", &mut interner).is_err());
}
