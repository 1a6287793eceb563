//! Header synthesizer: recomputes a request signature from a rule set.
//!
//! This is the acceptance check for the whole pipeline. Nothing calls it
//! automatically; compare its output against a known-good response when
//! validating freshly extracted rules.

use sha1::{Digest, Sha1};

use crate::types::{ExtractError, RequestHeaders, SignRequest, SignatureRuleSet};

/// Lowercase hex SHA-1; shared by the sandbox hashing stub and the
/// synthesizer.
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// JavaScript `Number.prototype.toString(16)` renders negative values with
/// a leading minus, not in two's complement.
fn js_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:x}", value.unsigned_abs())
    } else {
        format!("{value:x}")
    }
}

/// Pure: identical rules and request values yield a byte-identical header
/// set. The timestamp is part of the request, never read from a clock here.
pub fn create_headers(
    rules: &SignatureRuleSet,
    request: &SignRequest,
) -> Result<RequestHeaders, ExtractError> {
    let message =
        [rules.static_param.as_str(), &request.time, &request.path, &request.user_id].join("\n");
    let digest = sha1_hex(message.as_bytes());

    let digest_bytes = digest.as_bytes();
    let mut checksum = rules.checksum_constant;
    for &index in &rules.checksum_indexes {
        let byte = usize::try_from(index)
            .ok()
            .and_then(|i| digest_bytes.get(i))
            .ok_or_else(|| {
                ExtractError::Assembly(format!("checksum index {index} outside digest"))
            })?;
        checksum += i64::from(*byte);
    }

    let sign = [rules.prefix.as_str(), &digest, &js_hex(checksum), &rules.suffix].join(":");
    Ok(RequestHeaders {
        accept: "application/json, text/plain, */*".to_string(),
        app_token: rules.app_token.clone(),
        cookie: request.cookie.clone(),
        sign,
        time: request.time.clone(),
        user_id: request.user_id.clone(),
        user_agent: request.user_agent.clone(),
        x_bc: request.secondary_token.clone(),
    })
}
