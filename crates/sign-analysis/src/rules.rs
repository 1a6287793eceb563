//! Log analyzer and rule assembler.
//!
//! The analyzer is a pure function of the operation log: every indexed
//! read contributes its index, and the arithmetic entry immediately
//! following a read contributes its signed numeric delta to the running
//! constant. The assembler folds the analysis together with the sandbox
//! result into the final rule set.

use tracing::warn;

use crate::sandbox::SandboxOutcome;
use crate::types::{Diagnostic, ExtractError, LogEntry, SignatureRuleSet};

/// Application token of the target service; fixed, not derived from the
/// bundle.
pub const APP_TOKEN: &str = "33d57ade8c02dbc5a333db99ff9ae26a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSummary {
    pub checksum_constant: i64,
    /// Sorted ascending: the set, not the order, carries meaning, and the
    /// artifact should be canonical.
    pub checksum_indexes: Vec<i64>,
    pub anomalies: Vec<Diagnostic>,
}

pub fn analyse_log(entries: &[LogEntry]) -> LogSummary {
    let mut checksum_indexes = Vec::new();
    let mut checksum_constant = 0i64;
    let mut anomalies = Vec::new();

    for (position, entry) in entries.iter().enumerate() {
        let LogEntry::Get { index, .. } = entry else {
            continue;
        };
        checksum_indexes.push(*index);
        match entries.get(position + 1) {
            Some(LogEntry::Add { result, .. }) => checksum_constant += *result as i64,
            Some(LogEntry::Sub { result, .. }) => checksum_constant -= *result as i64,
            _ => {
                warn!(position, "expected an add or sub entry after an indexed read");
                anomalies.push(Diagnostic::AnomalousLogSequence { position });
            }
        }
    }

    checksum_indexes.sort_unstable();
    LogSummary { checksum_constant, checksum_indexes, anomalies }
}

/// Field 0 is the prefix, field 3 the suffix; fields 1-2 are per-request
/// values and are not persisted. Any other shape means the target format
/// drifted and the run aborts before an artifact is written.
pub fn split_sign(sign: &str) -> Result<(String, String), ExtractError> {
    let parts: Vec<&str> = sign.split(':').collect();
    if parts.len() != 4 {
        return Err(ExtractError::Assembly(format!(
            "signature has {} fields, expected 4: {sign:?}",
            parts.len()
        )));
    }
    Ok((parts[0].to_string(), parts[3].to_string()))
}

/// The static parameter is the first line of the message the bundle fed to
/// the hashing stub.
pub fn static_param_of(message: &str) -> String {
    message.split('\n').next().unwrap_or_default().to_string()
}

pub fn assemble_rules(
    outcome: &SandboxOutcome,
    summary: &LogSummary,
) -> Result<SignatureRuleSet, ExtractError> {
    let (prefix, suffix) = split_sign(&outcome.sign)?;
    let static_param = outcome
        .hashed_message
        .as_deref()
        .map(static_param_of)
        .ok_or_else(|| {
            ExtractError::Assembly("hashing stub never ran; static parameter unknown".to_string())
        })?;

    let rules = SignatureRuleSet {
        app_token: APP_TOKEN.to_string(),
        static_param,
        prefix,
        suffix,
        checksum_constant: summary.checksum_constant,
        checksum_indexes: summary.checksum_indexes.clone(),
    };
    rules.validate()?;
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(index: i64, raw: &str) -> LogEntry {
        let char_code = raw.encode_utf16().next().map(u32::from).unwrap_or(0);
        LogEntry::Get { wrapper: "a".into(), index, raw: raw.into(), char_code }
    }

    #[test]
    fn wrapped_pair_sum_recovers_constant_and_indexes() {
        // a[0] + a[1] with character codes 53 and 55: both reads recorded,
        // the trailing add contributes its numeric result.
        let log = vec![get(0, "5"), get(1, "7"), LogEntry::Add { a: 53.0, b: 55.0, result: 108.0 }];
        let summary = analyse_log(&log);
        assert_eq!(summary.checksum_constant, 108);
        assert_eq!(summary.checksum_indexes, vec![0, 1]);
    }

    #[test]
    fn sub_contributes_negative_delta() {
        let log = vec![get(3, "9"), LogEntry::Sub { a: 57.0, b: 7.0, result: 50.0 }];
        let summary = analyse_log(&log);
        assert_eq!(summary.checksum_constant, -50);
        assert_eq!(summary.checksum_indexes, vec![3]);
    }

    #[test]
    fn indexes_are_sorted_ascending() {
        let log = vec![
            get(9, "a"),
            LogEntry::Add { a: 0.0, b: 0.0, result: 0.0 },
            get(2, "b"),
            LogEntry::Add { a: 0.0, b: 0.0, result: 0.0 },
        ];
        assert_eq!(analyse_log(&log).checksum_indexes, vec![2, 9]);
    }

    #[test]
    fn non_arithmetic_follower_is_anomalous_not_fatal() {
        let log = vec![get(0, "5"), LogEntry::Mod { a: 5.0, b: 2.0, result: 1.0 }];
        let summary = analyse_log(&log);
        assert_eq!(summary.checksum_constant, 0);
        assert_eq!(summary.checksum_indexes, vec![0]);
        assert_eq!(summary.anomalies, vec![Diagnostic::AnomalousLogSequence { position: 0 }]);
    }

    #[test]
    fn analysis_is_pure() {
        let log = vec![get(0, "5"), get(1, "7"), LogEntry::Add { a: 53.0, b: 55.0, result: 108.0 }];
        assert_eq!(analyse_log(&log), analyse_log(&log));
    }

    #[test]
    fn sign_splits_into_prefix_and_suffix() {
        let (prefix, suffix) = split_sign("p1:abcd:ef:p2").unwrap();
        assert_eq!(prefix, "p1");
        assert_eq!(suffix, "p2");
    }

    #[test]
    fn unexpected_sign_shape_is_rejected() {
        assert!(split_sign("p1:abcd:ef").is_err());
        assert!(split_sign("p1:ab:cd:ef:p2").is_err());
    }

    #[test]
    fn static_param_is_first_hashed_line() {
        assert_eq!(static_param_of("staticpart\nrest"), "staticpart");
        assert_eq!(static_param_of("single"), "single");
    }
}
