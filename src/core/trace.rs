//! RPC trace log (`traces.jsonl`) with secret scrubbing.
//!
//! Requests carry bearer tokens and approvals carry free-text action details
//! written by agents, so both sides of every trace are redacted before they
//! touch disk.

use crate::core::error::FleetgateError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

pub const TRACES_NAME: &str = "traces.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    pub ts: String,
    pub op: String,
    pub request: Value,
    pub response: Value,
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let table: [(&str, &'static str); 5] = [
        // Session tokens minted by this crate.
        (r"fg_[0-9a-z]{52}", "[SESSION_TOKEN_REDACTED]"),
        (r"(?i)bearer\s+[a-zA-Z0-9_\-\.]{20,}", "[BEARER_REDACTED]"),
        (
            r"(A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[0-9A-Z]{16}",
            "[AWS_KEY_REDACTED]",
        ),
        (
            r#"(?i)(postgres|mysql|mongodb|redis)://[^\s'"]+:[^\s'"]+@[^\s'"]+"#,
            "[CONNECTION_STRING_REDACTED]",
        ),
        (
            r#"(?i)(password|passwd|api[_-]?key|secret[_-]?key)['"]?\s*[:=]\s*['"]?[^\s'"]{8,}['"]?"#,
            "[CREDENTIAL_REDACTED]",
        ),
    ];
    table
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
});

const SENSITIVE_KEYS: &[&str] = &["token", "secret", "password", "authorization", "api_key"];

pub fn redact_string(input: &str) -> String {
    let mut result = input.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Redact a JSON value. Sensitive keys lose their whole value; every other
/// string is pattern-scrubbed.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, val) in map {
                let lower = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|k| lower.contains(k)) && !val.is_null() {
                    out.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key, redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        Value::String(s) => Value::String(redact_string(&s)),
        other => other,
    }
}

pub fn append_trace(root: &Path, event: TraceEvent) -> Result<(), FleetgateError> {
    let event = TraceEvent {
        request: redact(event.request),
        response: redact(event.response),
        ..event
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(root.join(TRACES_NAME))?;
    writeln!(file, "{}", serde_json::to_string(&event)?)?;
    Ok(())
}

/// The last `n` raw trace lines, oldest first.
pub fn last_traces(root: &Path, n: usize) -> Result<Vec<String>, FleetgateError> {
    let path = root.join(TRACES_NAME);
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].to_vec())
}
