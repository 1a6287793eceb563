//! Run-to-completion driver. Data flows strictly forward: fetch, locate,
//! instrument, execute, analyse, assemble. Nothing loops back; validation
//! against a live response is a manual step through the header synthesizer.

use boa_interner::Interner;
use reqwest::Client;
use tracing::{debug, info};

use crate::fetch::fetch_bundle;
use crate::locate::{locate_math_region, parse_bundle};
use crate::rewrite::instrument;
use crate::rules::{analyse_log, assemble_rules};
use crate::sandbox::{run_sandbox, SandboxOptions};
use crate::types::{ExtractError, SignatureRuleSet};

pub async fn extract_rules(page_url: &str, marker: &str) -> Result<SignatureRuleSet, ExtractError> {
    let client = Client::new();
    let bundle = fetch_bundle(&client, page_url, marker).await?;
    extract_rules_from_code(&bundle.raw_code)
}

/// The analysis stages behind the fetch boundary; callers with the bundle
/// already in hand start here.
pub fn extract_rules_from_code(raw_code: &str) -> Result<SignatureRuleSet, ExtractError> {
    extract_rules_from_code_with(raw_code, &SandboxOptions::default())
}

pub fn extract_rules_from_code_with(
    raw_code: &str,
    options: &SandboxOptions,
) -> Result<SignatureRuleSet, ExtractError> {
    let mut interner = Interner::default();
    let script = parse_bundle(raw_code, &mut interner)?;
    let region =
        locate_math_region(&script, &mut interner).ok_or(ExtractError::RegionNotFound)?;
    debug!(return_ordinal = region.return_ordinal, "checksum region located");

    let instrumented = instrument(script, region, &mut interner);
    debug!(bindings = instrumented.bindings.len(), "bundle instrumented");

    let outcome = run_sandbox(&instrumented.source, &instrumented.bindings, options)?;
    let summary = analyse_log(&outcome.log.entries);
    info!(
        constant = summary.checksum_constant,
        indexes = summary.checksum_indexes.len(),
        diagnostics = outcome.log.diagnostics.len() + summary.anomalies.len(),
        "operation log analysed"
    );
    assemble_rules(&outcome, &summary)
}
