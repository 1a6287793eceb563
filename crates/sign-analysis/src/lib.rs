pub mod fetch;
pub mod headers;
pub mod locate;
pub mod pipeline;
pub mod rewrite;
pub mod rules;
pub mod sandbox;
pub mod types;

pub use fetch::fetch_bundle;
pub use headers::{create_headers, sha1_hex};
pub use pipeline::{extract_rules, extract_rules_from_code, extract_rules_from_code_with};
pub use rewrite::{instrument, Instrumented};
pub use rules::{analyse_log, assemble_rules, LogSummary, APP_TOKEN};
pub use sandbox::{run_sandbox, SandboxOptions, SandboxOutcome};
pub use types::{
    BundleSource, Diagnostic, ExtractError, LogEntry, MathRegion, OperationLog, RequestHeaders,
    SignRequest, SignatureRuleSet,
};
