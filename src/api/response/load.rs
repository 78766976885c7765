//! Purpose: Decode `load` results from both the bare-count and the keyed-object body.
//! Exports: `LoadResult`, `LoadError`, `decode_load`.
//! Invariants: Missing per-record errors default to success (`return_code == 0`).
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadResult {
    pub n_loaded_records: i64,
    /// Per-record id, `0` for records that failed to load.
    pub loaded_ids: Vec<i64>,
    pub errors: Vec<LoadError>,
}

impl LoadResult {
    pub fn failed_count(&self) -> usize {
        self.errors.iter().filter(|error| !error.is_success()).count()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadError {
    pub return_code: i64,
    pub message: Option<String>,
}

impl LoadError {
    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

pub fn decode_load(body: &Value) -> Result<LoadResult, String> {
    match body {
        Value::Null => Ok(LoadResult::default()),
        Value::Number(_) | Value::String(_) => Ok(LoadResult {
            n_loaded_records: as_count(body)?,
            ..LoadResult::default()
        }),
        Value::Object(map) => {
            let n_loaded_records = map
                .get("n_loaded_records")
                .map(as_count)
                .transpose()?
                .unwrap_or(0);
            let loaded_ids = match map.get("loaded_ids") {
                Some(Value::Array(ids)) => ids
                    .iter()
                    .map(|id| if id.is_null() { Ok(0) } else { as_count(id) })
                    .collect::<Result<_, _>>()?,
                Some(other) => return Err(format!("unexpected loaded_ids: {other}")),
                None => Vec::new(),
            };
            let errors = match map.get("errors") {
                Some(Value::Array(errors)) => errors.iter().map(load_error).collect(),
                Some(other) => return Err(format!("unexpected load errors: {other}")),
                None => Vec::new(),
            };
            Ok(LoadResult {
                n_loaded_records,
                loaded_ids,
                errors,
            })
        }
        other => Err(format!("unexpected load body: {other}")),
    }
}

fn load_error(value: &Value) -> LoadError {
    LoadError {
        return_code: value
            .get("return_code")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        message: value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn as_count(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| format!("bad count: {number}")),
        Value::String(text) => text.trim().parse().map_err(|_| format!("bad count: {text}")),
        other => Err(format!("bad count: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadError, decode_load};
    use serde_json::json;

    #[test]
    fn bare_count_is_legacy_shape() {
        assert_eq!(decode_load(&json!(3)).expect("load").n_loaded_records, 3);
        assert_eq!(decode_load(&json!("4")).expect("load").n_loaded_records, 4);
    }

    #[test]
    fn keyed_body_carries_ids_and_errors() {
        let result = decode_load(&json!({
            "n_loaded_records": 1,
            "loaded_ids": [1, 0],
            "errors": [{}, {"return_code": -22, "message": "bad value"}]
        }))
        .expect("load");
        assert_eq!(result.loaded_ids, vec![1, 0]);
        assert_eq!(result.errors[0], LoadError::default());
        assert!(result.errors[0].is_success());
        assert_eq!(result.errors[1].message.as_deref(), Some("bad value"));
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn unexpected_shapes_are_rejected() {
        assert!(decode_load(&json!([1])).is_err());
    }
}
