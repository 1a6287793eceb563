use std::collections::BTreeSet;

use boa_interner::Interner;
use sign_analysis::locate::{locate_math_region, parse_bundle};
use sign_analysis::rewrite::instrument;
use sign_analysis::{
    analyse_log, extract_rules_from_code, run_sandbox, sha1_hex, Diagnostic, ExtractError,
    SandboxOptions, APP_TOKEN,
};

/// A miniature bundle with the registration-slot shape the executor
/// expects: the signing module hashes a two-line message, reads the
/// fabricated identity and user agent through the resolver stubs, and
/// derives a checksum tail from the digest inside a Math-bearing return.
const BUNDLE: &str = r#"
self.webpackChunkof_vue = self.webpackChunkof_vue || [];
self.webpackChunkof_vue.push([[2313], {
    802313: function (e, t, n) {
        var sha = n(89668);
        var grab = n(858156);
        var auth = n(944114);
        function checksum(digest) {
            return digest[0] + digest[1] + Math.floor(20);
        }
        t.A = function (req) {
            var digest = sha("static-part" + String.fromCharCode(10) + "second-line");
            var user = auth["default"]["getters.auth/authUserId"];
            var agent = grab(window, "navigator.userAgent", "unknown");
            var tail = checksum(digest);
            return { sign: ["prefix", digest, String(tail), "suffix"].join(":"), user: user, agent: agent };
        };
    }
}]);
"#;

#[test]
fn pipeline_recovers_rules_from_synthetic_bundle() {
    let rules = extract_rules_from_code(BUNDLE).expect("extraction succeeds");

    let digest = sha1_hex(b"static-part\nsecond-line");
    let bytes = digest.as_bytes();

    assert_eq!(rules.app_token, APP_TOKEN);
    assert_eq!(rules.static_param, "static-part");
    assert_eq!(rules.prefix, "prefix");
    assert_eq!(rules.suffix, "suffix");
    assert_eq!(rules.checksum_indexes, vec![0, 1]);
    assert_eq!(rules.checksum_constant, i64::from(bytes[0]) + i64::from(bytes[1]));
}

#[test]
fn rule_document_serializes_indexes_as_literal_array() {
    let rules = extract_rules_from_code(BUNDLE).unwrap();
    let json = serde_json::to_string(&rules).unwrap();
    assert!(json.contains("\"checksum_indexes\":[0,1]"));
    assert!(json.contains("\"app-token\""));
}

#[test]
fn unknown_module_is_diagnosed_not_fatal() {
    let source = r#"
        self.webpackChunkof_vue = self.webpackChunkof_vue || [];
        self.webpackChunkof_vue.push([[1], {
            802313: function (e, t, n) {
                var missing = n(999999);
                t.A = function (req) { return { sign: "a:b:c:d" }; };
            }
        }]);
    "#;
    let outcome =
        run_sandbox(source, &BTreeSet::new(), &SandboxOptions::default()).expect("run completes");
    assert_eq!(outcome.sign, "a:b:c:d");
    assert!(outcome.log.unknown_modules().any(|id| id == "999999"));
}

#[test]
fn empty_binding_reads_surface_as_diagnostics() {
    let source = r#"
        self.webpackChunkof_vue = self.webpackChunkof_vue || [];
        var nothing = self.missingProp;
        self.webpackChunkof_vue.push([[1], {
            802313: function (e, t, n) {
                t.A = function (req) { return { sign: "a:b:c:d" }; };
            }
        }]);
    "#;
    let outcome = run_sandbox(source, &BTreeSet::new(), &SandboxOptions::default()).unwrap();
    assert!(outcome.log.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::BindingMiss { binding, key } if binding == "self" && key == "missingProp"
    )));
}

#[test]
fn hashing_stub_records_the_exact_message() {
    let rules_input = extract_rules_from_code(BUNDLE);
    assert!(rules_input.is_ok());

    // A bundle that never touches the hashing stub cannot yield a static
    // parameter; assembly fails, the sandbox run itself does not.
    let source = r#"
        self.webpackChunkof_vue = self.webpackChunkof_vue || [];
        self.webpackChunkof_vue.push([[1], {
            802313: function (e, t, n) {
                function checksum(d) { return d[0] + Math.floor(1); }
                t.A = function (req) { return { sign: ["p", checksum("xy"), "c", "s"].join(":") }; };
            }
        }]);
    "#;
    match extract_rules_from_code(source) {
        Err(ExtractError::Assembly(_)) => {}
        other => panic!("expected assembly failure, got {other:?}"),
    }
}

#[test]
fn wrapped_callable_with_plus_in_source_is_substituted() {
    // The helper keeps a unary plus in its source, so the wrapper's
    // source inspection matches and the read resolves to the logged add
    // instead of the helper itself.
    let source = r#"
        self.webpackChunkof_vue = self.webpackChunkof_vue || [];
        self.webpackChunkof_vue.push([[1], {
            802313: function (e, t, n) {
                var helpers = { plus: function (x, y) { return 0 + +y; } };
                function mix(src) {
                    return helpers.plus(src[0], Math.floor(3));
                }
                t.A = function (req) { return { sign: ["p", mix("AB"), "x", "s"].join(":") }; };
            }
        }]);
    "#;

    let mut interner = Interner::default();
    let script = parse_bundle(source, &mut interner).unwrap();
    let region = locate_math_region(&script, &mut interner).unwrap();
    let instrumented = instrument(script, region, &mut interner);
    assert_eq!(
        instrumented.bindings.iter().collect::<Vec<_>>(),
        vec!["helpers", "src"]
    );

    let outcome =
        run_sandbox(&instrumented.source, &instrumented.bindings, &SandboxOptions::default())
            .expect("run completes");
    // The substituted add returned the genuine result to the bundle.
    assert_eq!(outcome.sign, "p:A3:x:s");

    let summary = analyse_log(&outcome.log.entries);
    assert_eq!(summary.checksum_indexes, vec![0]);
    assert_eq!(summary.checksum_constant, i64::from(b'A') + 3);
}

#[test]
fn bundle_without_region_is_region_not_found() {
    match extract_rules_from_code("var x = 1;") {
        Err(ExtractError::RegionNotFound) => {}
        other => panic!("expected RegionNotFound, got {other:?}"),
    }
}

#[test]
fn malformed_bundle_is_a_parse_error() {
    match extract_rules_from_code("function {") {
        Err(ExtractError::Parse(_)) => {}
        other => panic!("expected Parse, got {other:?}"),
    }
}
