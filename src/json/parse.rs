//! Purpose: Provide the internal JSON decode entrypoints for response bodies.
//! Exports: `from_str`, `strip_jsonp`, `looks_like_envelope`, `is_v1_header`.
//! Role: Parser boundary so decoders avoid ad hoc JSONP and envelope sniffing.
//! Invariants: JSONP stripping only removes an outer `callback(...)` wrapper.
//! Notes: Error mapping is done by callsites so command context stays explicit.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn from_str<T: DeserializeOwned>(input: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_jsonp(input))
}

fn jsonp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^\s*[A-Za-z_$][A-Za-z0-9_$.]*\s*\((.*)\)\s*;?\s*$").expect("jsonp pattern")
    })
}

/// `callback([...]);` becomes `[...]`; anything else is returned unchanged.
pub(crate) fn strip_jsonp(input: &str) -> &str {
    match jsonp_pattern().captures(input).and_then(|captures| captures.get(1)) {
        Some(inner) => inner.as_str(),
        None => input,
    }
}

/// True when `input` decodes as a v1 (`[header, ...]`) or v3 (`{"header": ...}`) envelope.
pub(crate) fn looks_like_envelope(input: &str) -> bool {
    match from_str::<Value>(input) {
        Ok(Value::Array(items)) => is_v1_header(items.first()),
        Ok(Value::Object(map)) => map.contains_key("header"),
        _ => false,
    }
}

/// A v1 header is an array led by a numeric return code.
pub(crate) fn is_v1_header(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Array(fields)) => matches!(fields.first(), Some(Value::Number(_))),
        _ => false,
    }
}
