use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fetched bundle material. Immutable after the resolver returns it.
#[derive(Debug, Clone)]
pub struct BundleSource {
    pub page_url: String,
    pub script_marker: String,
    pub script_url: String,
    pub raw_code: String,
}

/// Reference to the checksum-computing subtree: the ordinal of the matched
/// return statement in pre-order document order. Stable across the locate
/// and rewrite passes without borrowing the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathRegion {
    pub return_ordinal: usize,
}

/// One observed operation inside the sandbox. Entry order is insertion
/// order and is load-bearing: the analyzer pairs adjacent entries.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Get { wrapper: String, index: i64, raw: String, char_code: u32 },
    Add { a: f64, b: f64, result: f64 },
    Sub { a: f64, b: f64, result: f64 },
    Mod { a: f64, b: f64, result: f64 },
}

/// Non-fatal observations. Every variant is also emitted on the tracing
/// stream at `warn` level; the run proceeds best-effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    UnknownModule { id: String },
    UnknownOperator { wrapper: String, key: String },
    AnomalousLogSequence { position: usize },
    BindingMiss { binding: String, key: String },
}

#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    pub entries: Vec<LogEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

impl OperationLog {
    pub fn unknown_modules(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::UnknownModule { id } => Some(id.as_str()),
            _ => None,
        })
    }
}

/// The inferred closed-form rule set. All fields must be populated before
/// the set is considered valid; the assembler enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRuleSet {
    #[serde(rename = "app-token")]
    pub app_token: String,
    pub static_param: String,
    pub prefix: String,
    pub suffix: String,
    pub checksum_constant: i64,
    pub checksum_indexes: Vec<i64>,
}

impl SignatureRuleSet {
    pub fn validate(&self) -> Result<(), ExtractError> {
        for (field, value) in [
            ("app-token", &self.app_token),
            ("static_param", &self.static_param),
            ("prefix", &self.prefix),
            ("suffix", &self.suffix),
        ] {
            if value.is_empty() {
                return Err(ExtractError::Assembly(format!("empty field {field}")));
            }
        }
        if self.checksum_indexes.is_empty() {
            return Err(ExtractError::Assembly("no checksum indexes recovered".into()));
        }
        Ok(())
    }
}

/// Per-request runtime values consumed by the header synthesizer. The
/// timestamp is supplied by the caller so synthesis stays a pure function.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub path: String,
    pub time: String,
    pub user_id: String,
    pub cookie: String,
    pub user_agent: String,
    pub secondary_token: String,
}

/// Derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestHeaders {
    pub accept: String,
    #[serde(rename = "app-token")]
    pub app_token: String,
    pub cookie: String,
    pub sign: String,
    pub time: String,
    #[serde(rename = "user-id")]
    pub user_id: String,
    #[serde(rename = "user-agent")]
    pub user_agent: String,
    #[serde(rename = "x-bc")]
    pub x_bc: String,
}

/// Fatal pipeline failures. Every variant aborts the run before any
/// artifact is written; non-fatal conditions travel as [`Diagnostic`]s.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("fetch of {url} failed with status {status}")]
    Network { url: String, status: u16 },
    #[error("transport failure")]
    Transport(#[from] reqwest::Error),
    #[error("no script reference matching {0:?} in page")]
    ScriptNotFound(String),
    #[error("no checksum region found in bundle")]
    RegionNotFound,
    #[error("bundle source rejected: {0}")]
    Parse(String),
    #[error("rule assembly failed: {0}")]
    Assembly(String),
}
