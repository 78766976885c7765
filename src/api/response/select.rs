//! Purpose: Decode `select` bodies (v1 positional blocks and v3 keyed objects) into one model.
//! Exports: `SelectResult`, `Drilldown`, `Drilldowns`, `Slice`, `decode_select`.
//! Role: Command-specific decoder selected by the registry for search commands.
//! Invariants: v1 and v3 bodies describing the same result decode to equal values.
//! Invariants: Slices carry at most one level of nested drilldowns.
use serde_json::{Map, Value};

use crate::core::command::Command;
use crate::core::record::{ColumnSpec, Record, build_record};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectResult {
    pub n_hits: i64,
    pub records: Vec<Record>,
    pub raw_columns: Vec<ColumnSpec>,
    pub raw_records: Vec<Value>,
    pub drilldowns: Drilldowns,
    pub slices: Vec<Slice>,
}

impl SelectResult {
    pub fn slice(&self, label: &str) -> Option<&Slice> {
        self.slices.iter().find(|slice| slice.label == label)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Drilldown {
    pub label: String,
    pub keys: Vec<String>,
    pub n_hits: i64,
    pub records: Vec<Record>,
    pub raw_columns: Vec<ColumnSpec>,
    pub raw_records: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Drilldowns {
    /// From `drilldown=key1,key2`; one entry per key, labeled by the key.
    Unlabeled(Vec<Drilldown>),
    /// From `drilldowns[label].keys=...`.
    Labeled(Vec<Drilldown>),
}

impl Default for Drilldowns {
    fn default() -> Self {
        Drilldowns::Unlabeled(Vec::new())
    }
}

impl Drilldowns {
    fn entries(&self) -> &[Drilldown] {
        match self {
            Drilldowns::Unlabeled(entries) | Drilldowns::Labeled(entries) => entries,
        }
    }

    pub fn get(&self, label: &str) -> Option<&Drilldown> {
        self.entries().iter().find(|drilldown| drilldown.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Drilldown> {
        self.entries().iter()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn is_labeled(&self) -> bool {
        matches!(self, Drilldowns::Labeled(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Slice {
    pub label: String,
    pub n_hits: i64,
    pub records: Vec<Record>,
    pub raw_columns: Vec<ColumnSpec>,
    pub raw_records: Vec<Value>,
    pub drilldowns: Drilldowns,
}

/// Shared `{n_hits, columns, records}` triple of every result level.
struct Block {
    n_hits: i64,
    columns: Vec<ColumnSpec>,
    rows: Vec<Value>,
}

impl Block {
    fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| match row {
                Value::Array(values) => build_record(&self.columns, values),
                other => build_record(&self.columns, std::slice::from_ref(other)),
            })
            .collect()
    }
}

pub fn decode_select(command: &Command, body: &Value) -> Result<SelectResult, String> {
    match body {
        Value::Array(items) => decode_v1(command, items),
        Value::Object(map) => decode_v3(command, map),
        Value::Null => Ok(SelectResult::default()),
        other => Err(format!("unexpected select body: {other}")),
    }
}

fn decode_v1(command: &Command, items: &[Value]) -> Result<SelectResult, String> {
    let Some(first) = items.first() else {
        return Ok(SelectResult::default());
    };
    let main = v1_block(first)?;
    let mut rest = &items[1..];
    let mut slices = Vec::new();
    if has_prefixed_argument(command, "slices[") {
        if let Some((raw_slices, tail)) = rest.split_first() {
            slices = v1_slices(command, raw_slices)?;
            rest = tail;
        }
    }
    let drilldowns = v1_drilldowns(command, "", rest)?;
    let records = main.records();
    Ok(SelectResult {
        n_hits: main.n_hits,
        records,
        raw_columns: main.columns,
        raw_records: main.rows,
        drilldowns,
        slices,
    })
}

/// `[[n_hits], [[name, type], ...], row, ...]`.
fn v1_block(value: &Value) -> Result<Block, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected a result block, got {value}"))?;
    let n_hits = items
        .first()
        .and_then(Value::as_array)
        .and_then(|count| count.first())
        .map(parse_count)
        .transpose()?
        .unwrap_or(0);
    let columns = match items.get(1) {
        Some(Value::Array(columns)) => columns.iter().filter_map(ColumnSpec::from_json).collect(),
        Some(other) => return Err(format!("expected column list, got {other}")),
        None => Vec::new(),
    };
    let rows = items.iter().skip(2).cloned().collect();
    Ok(Block {
        n_hits,
        columns,
        rows,
    })
}

fn v1_drilldowns(command: &Command, prefix: &str, items: &[Value]) -> Result<Drilldowns, String> {
    let unlabeled_key = format!("{prefix}drilldown");
    if let Some(keys) = command.argument(&unlabeled_key) {
        let mut drilldowns = Vec::new();
        for (key, item) in split_keys(keys).into_iter().zip(items) {
            let block = v1_block(item)?;
            drilldowns.push(drilldown_from_block(key.clone(), vec![key], block));
        }
        return Ok(Drilldowns::Unlabeled(drilldowns));
    }
    match items.first() {
        Some(Value::Object(map)) => {
            let mut drilldowns = Vec::new();
            for (label, raw) in map {
                let block = v1_block(raw)?;
                let keys = labeled_keys(command, prefix, label);
                drilldowns.push(drilldown_from_block(label.clone(), keys, block));
            }
            Ok(Drilldowns::Labeled(drilldowns))
        }
        Some(other) => Err(format!("unexpected drilldown section: {other}")),
        None => Ok(Drilldowns::default()),
    }
}

fn v1_slices(command: &Command, raw: &Value) -> Result<Vec<Slice>, String> {
    let map = raw
        .as_object()
        .ok_or_else(|| format!("expected slices object, got {raw}"))?;
    let mut slices = Vec::new();
    for (label, value) in map {
        let prefix = format!("slices[{label}].");
        let (block, drilldowns) = match value.as_array() {
            // `[block, {label: block}]` when the slice asked for its own drilldowns.
            Some(items) if is_nested_slice(items) => {
                let block = v1_block(&items[0])?;
                let drilldowns = v1_drilldowns(command, &prefix, &items[1..])?;
                (block, drilldowns)
            }
            _ => (v1_block(value)?, Drilldowns::default()),
        };
        slices.push(slice_from_block(label.clone(), block, drilldowns));
    }
    Ok(slices)
}

fn is_nested_slice(items: &[Value]) -> bool {
    matches!(
        items.first().and_then(Value::as_array).and_then(|block| block.first()),
        Some(Value::Array(_))
    )
}

fn decode_v3(command: &Command, map: &Map<String, Value>) -> Result<SelectResult, String> {
    let main = v3_block(map)?;
    let drilldowns = match map.get("drilldowns") {
        Some(raw) => v3_drilldowns(command, "", raw)?,
        None => Drilldowns::default(),
    };
    let mut slices = Vec::new();
    if let Some(raw) = map.get("slices") {
        let raw = raw
            .as_object()
            .ok_or_else(|| format!("expected slices object, got {raw}"))?;
        for (label, value) in raw {
            let slice_map = value
                .as_object()
                .ok_or_else(|| format!("expected slice object, got {value}"))?;
            let block = v3_block(slice_map)?;
            let prefix = format!("slices[{label}].");
            let drilldowns = match slice_map.get("drilldowns") {
                Some(raw) => v3_drilldowns(command, &prefix, raw)?,
                None => Drilldowns::default(),
            };
            slices.push(slice_from_block(label.clone(), block, drilldowns));
        }
    }
    let records = main.records();
    Ok(SelectResult {
        n_hits: main.n_hits,
        records,
        raw_columns: main.columns,
        raw_records: main.rows,
        drilldowns,
        slices,
    })
}

fn v3_block(map: &Map<String, Value>) -> Result<Block, String> {
    let n_hits = map.get("n_hits").map(parse_count).transpose()?.unwrap_or(0);
    let columns = match map.get("columns") {
        Some(Value::Array(columns)) => columns.iter().filter_map(ColumnSpec::from_json).collect(),
        Some(other) => return Err(format!("expected column list, got {other}")),
        None => Vec::new(),
    };
    let rows = match map.get("records") {
        Some(Value::Array(rows)) => rows.clone(),
        Some(other) => return Err(format!("expected record list, got {other}")),
        None => Vec::new(),
    };
    Ok(Block {
        n_hits,
        columns,
        rows,
    })
}

fn v3_drilldowns(command: &Command, prefix: &str, raw: &Value) -> Result<Drilldowns, String> {
    let map = raw
        .as_object()
        .ok_or_else(|| format!("expected drilldowns object, got {raw}"))?;
    let mut drilldowns = Vec::new();
    for (label, value) in map {
        let block_map = value
            .as_object()
            .ok_or_else(|| format!("expected drilldown object, got {value}"))?;
        let block = v3_block(block_map)?;
        drilldowns.push((label.clone(), block));
    }
    if let Some(keys) = command.argument(&format!("{prefix}drilldown")) {
        // Keyed by drilldown key; keep the order the keys were requested in.
        let mut ordered = Vec::new();
        for key in split_keys(keys) {
            if let Some(index) = drilldowns.iter().position(|(label, _)| *label == key) {
                let (_, block) = drilldowns.remove(index);
                ordered.push(drilldown_from_block(key.clone(), vec![key], block));
            }
        }
        return Ok(Drilldowns::Unlabeled(ordered));
    }
    Ok(Drilldowns::Labeled(
        drilldowns
            .into_iter()
            .map(|(label, block)| {
                let keys = labeled_keys(command, prefix, &label);
                drilldown_from_block(label, keys, block)
            })
            .collect(),
    ))
}

fn drilldown_from_block(label: String, keys: Vec<String>, block: Block) -> Drilldown {
    let records = block.records();
    Drilldown {
        label,
        keys,
        n_hits: block.n_hits,
        records,
        raw_columns: block.columns,
        raw_records: block.rows,
    }
}

fn slice_from_block(label: String, block: Block, drilldowns: Drilldowns) -> Slice {
    let records = block.records();
    Slice {
        label,
        n_hits: block.n_hits,
        records,
        raw_columns: block.columns,
        raw_records: block.rows,
        drilldowns,
    }
}

fn labeled_keys(command: &Command, prefix: &str, label: &str) -> Vec<String> {
    command
        .argument(&format!("{prefix}drilldowns[{label}].keys"))
        .map(split_keys)
        .unwrap_or_default()
}

fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_prefixed_argument(command: &Command, prefix: &str) -> bool {
    command
        .arguments()
        .iter()
        .any(|(key, _)| key.starts_with(prefix))
}

fn parse_count(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|count| count as i64))
            .ok_or_else(|| format!("bad hit count: {number}")),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| format!("bad hit count: {text}")),
        other => Err(format!("bad hit count: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{Drilldowns, decode_select};
    use crate::core::command::Command;
    use serde_json::json;

    #[test]
    fn v1_block_without_rows_keeps_hit_count() {
        let result = decode_select(
            &Command::new("select"),
            &json!([[[29], [["_id", "UInt32"]]]]),
        )
        .expect("decode");
        assert_eq!(result.n_hits, 29);
        assert!(result.records.is_empty());
    }

    #[test]
    fn v1_unlabeled_drilldowns_follow_requested_keys() {
        let command = Command::build("select", [("table", "Memos"), ("drilldown", "tag, user")]);
        let body = json!([
            [[2], [["_key", "ShortText"]], ["a"], ["b"]],
            [[1], [["_key", "ShortText"], ["_nsubrecs", "Int32"]], ["rust", 2]],
            [[1], [["_key", "ShortText"], ["_nsubrecs", "Int32"]], ["alice", 2]]
        ]);
        let result = decode_select(&command, &body).expect("decode");
        assert!(!result.drilldowns.is_labeled());
        let labels: Vec<_> = result.drilldowns.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["tag", "user"]);
        let user = result.drilldowns.get("user").expect("user");
        assert_eq!(user.records[0].to_json(), json!({"_key": "alice", "_nsubrecs": 2}));
    }

    #[test]
    fn v1_and_v3_shapes_decode_identically() {
        let command = Command::build(
            "select",
            [
                ("table", "Memos"),
                ("drilldowns[tag].keys", "tag"),
                ("slices[rust].filter", "tag == \"rust\""),
            ],
        );
        let v1 = json!([
            [[2], [["_id", "UInt32"], ["tag", "ShortText"]], [1, "rust"], [2, "go"]],
            {"rust": [[1], [["_id", "UInt32"]], [1]]},
            {"tag": [[2], [["_key", "ShortText"], ["_nsubrecs", "Int32"]], ["rust", 1], ["go", 1]]}
        ]);
        let v3 = json!({
            "n_hits": 2,
            "columns": [{"name": "_id", "type": "UInt32"}, {"name": "tag", "type": "ShortText"}],
            "records": [[1, "rust"], [2, "go"]],
            "drilldowns": {
                "tag": {
                    "n_hits": 2,
                    "columns": [{"name": "_key", "type": "ShortText"}, {"name": "_nsubrecs", "type": "Int32"}],
                    "records": [["rust", 1], ["go", 1]]
                }
            },
            "slices": {
                "rust": {"n_hits": 1, "columns": [{"name": "_id", "type": "UInt32"}], "records": [[1]]}
            }
        });
        let from_v1 = decode_select(&command, &v1).expect("v1");
        let from_v3 = decode_select(&command, &v3).expect("v3");
        assert_eq!(from_v1, from_v3);
        assert!(matches!(from_v1.drilldowns, Drilldowns::Labeled(_)));
        assert_eq!(from_v1.drilldowns.get("tag").map(|d| d.keys.clone()), Some(vec!["tag".to_string()]));
        assert_eq!(from_v1.slice("rust").map(|s| s.n_hits), Some(1));
    }

    #[test]
    fn v1_nested_slice_drilldowns_are_decoded() {
        let command = Command::build(
            "select",
            [
                ("slices[s].filter", "true"),
                ("slices[s].drilldowns[d].keys", "tag"),
            ],
        );
        let body = json!([
            [[0], [["_id", "UInt32"]]],
            {"s": [[[1], [["_id", "UInt32"]], [3]], {"d": [[1], [["_key", "ShortText"]], ["x"]]}]}
        ]);
        let result = decode_select(&command, &body).expect("decode");
        let slice = result.slice("s").expect("slice");
        assert_eq!(slice.records[0].to_json(), json!({"_id": 3}));
        let drilldown = slice.drilldowns.get("d").expect("drilldown");
        assert_eq!(drilldown.keys, vec!["tag".to_string()]);
        assert_eq!(drilldown.n_hits, 1);
    }

    #[test]
    fn string_hit_counts_are_accepted() {
        let result = decode_select(&Command::new("select"), &json!({"n_hits": "7", "records": []}))
            .expect("decode");
        assert_eq!(result.n_hits, 7);
    }

    #[test]
    fn scalar_bodies_are_rejected() {
        assert!(decode_select(&Command::new("select"), &json!(true)).is_err());
    }
}
