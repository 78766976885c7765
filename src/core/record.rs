//! Purpose: Typed row model shared by every decoder that produces records.
//! Exports: `Record`, `FieldValue`, `ColumnSpec`, `build_record`, `unique_names`.
//! Role: Converts positional rows plus declared columns into named, typed fields.
//! Invariants: Duplicate column names are suffixed (`name`, `name2`, ...), never overwritten.
//! Invariants: Only `Time` columns change representation; everything else passes through.
use std::collections::HashSet;

use serde_json::Value;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Json(Value),
    Time(OffsetDateTime),
    TimeVector(Vec<OffsetDateTime>),
}

impl FieldValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<OffsetDateTime> {
        match self {
            FieldValue::Time(time) => Some(*time),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Value::as_i64)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

/// Declared column: name plus server type name (may be empty when unknown).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub value_type: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
        }
    }

    /// Accepts `["name", "Type"]` (v1) and `{"name": .., "type": ..}` (v3).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let name = items.first()?.as_str()?;
                let value_type = items.get(1).and_then(Value::as_str).unwrap_or_default();
                Some(Self::new(name, value_type))
            }
            Value::Object(map) => {
                let name = map.get("name")?.as_str()?;
                let value_type = map.get("type").and_then(Value::as_str).unwrap_or_default();
                Some(Self::new(name, value_type))
            }
            Value::String(name) => Some(Self::new(name.as_str(), "")),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Convenience for tests and callers that want plain JSON back.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.fields {
            let json = match value {
                FieldValue::Json(value) => value.clone(),
                FieldValue::Time(time) => time_to_json(*time),
                FieldValue::TimeVector(times) => {
                    Value::Array(times.iter().map(|time| time_to_json(*time)).collect())
                }
            };
            map.insert(key.clone(), json);
        }
        Value::Object(map)
    }
}

fn time_to_json(time: OffsetDateTime) -> Value {
    let nanos = time.unix_timestamp_nanos();
    serde_json::Number::from_f64(nanos as f64 / 1_000_000_000.0)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// `a, b, a, a` becomes `a, b, a2, a3`; a suffix never reuses a name already emitted.
pub fn unique_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let mut candidate = name.to_string();
        let mut suffix = 1;
        while used.contains(&candidate) {
            suffix += 1;
            candidate = format!("{name}{suffix}");
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

pub fn build_record(columns: &[ColumnSpec], values: &[Value]) -> Record {
    let names = unique_names(columns.iter().map(|column| column.name.as_str()));
    let mut record = Record::new();
    for (index, (name, column)) in names.into_iter().zip(columns).enumerate() {
        let value = values.get(index).cloned().unwrap_or(Value::Null);
        record.push(name, convert_value(value, &column.value_type));
    }
    record
}

fn convert_value(value: Value, value_type: &str) -> FieldValue {
    if value_type != "Time" {
        return FieldValue::Json(value);
    }
    match value {
        Value::Number(_) => match epoch_to_time(&value) {
            Some(time) => FieldValue::Time(time),
            None => FieldValue::Json(value),
        },
        Value::Array(items) => {
            let times: Option<Vec<_>> = items.iter().map(epoch_to_time).collect();
            match times {
                Some(times) => FieldValue::TimeVector(times),
                None => FieldValue::Json(Value::Array(items)),
            }
        }
        other => FieldValue::Json(other),
    }
}

pub fn epoch_to_time(value: &Value) -> Option<OffsetDateTime> {
    let seconds = value.as_f64()?;
    if !seconds.is_finite() {
        return None;
    }
    let nanos = (seconds * 1_000_000_000.0).round() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}
