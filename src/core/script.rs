//! Purpose: Render values as literals of the server's script expression language.
//! Exports: `ScriptValue`, `format_string`, `format_value`, `substitute`.
//! Role: Escaping layer used by filter builders; distinct from wire-token escaping.
//! Invariants: Substituted values are always escaped before they reach an expression.
//! Invariants: Symbols render bare only when they match the identifier grammar.
use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::command::escape_value;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Symbol(String),
    Array(Vec<ScriptValue>),
    Object(Vec<(String, ScriptValue)>),
}

impl ScriptValue {
    pub fn symbol(name: impl Into<String>) -> Self {
        ScriptValue::Symbol(name.into())
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Int(i64::from(value))
    }
}

impl From<u32> for ScriptValue {
    fn from(value: u32) -> Self {
        ScriptValue::Int(i64::from(value))
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ScriptValue::Null)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(values: Vec<T>) -> Self {
        ScriptValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<&serde_json::Value> for ScriptValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ScriptValue::Int(i),
                None => ScriptValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => ScriptValue::String(s.clone()),
            Value::Array(items) => ScriptValue::Array(items.iter().map(Into::into).collect()),
            Value::Object(map) => ScriptValue::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.into()))
                    .collect(),
            ),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("identifier pattern")
    })
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"%\{([A-Za-z0-9_]+)\}").expect("placeholder pattern")
    })
}

/// Quote `value` as a script string literal; escaping matches wire tokens.
pub fn format_string(value: &str) -> String {
    format!("\"{}\"", escape_value(value))
}

pub fn format_value(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Null => "null".to_string(),
        ScriptValue::Bool(b) => b.to_string(),
        ScriptValue::Int(i) => i.to_string(),
        ScriptValue::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        ScriptValue::String(s) => format_string(s),
        ScriptValue::Symbol(s) => {
            if identifier_pattern().is_match(s) {
                s.clone()
            } else {
                format_string(s)
            }
        }
        ScriptValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        ScriptValue::Object(entries) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{}: {}", format_string(key), format_value(value)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

/// Replace `%{name}` placeholders in `template` with escaped values.
pub fn substitute(template: &str, values: &BTreeMap<String, ScriptValue>) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for captures in placeholder_pattern().captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = values.get(name.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("no value for placeholder %{{{}}}", name.as_str()))
                .with_hint(format!("expression: {template}"))
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&format_value(value));
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}
