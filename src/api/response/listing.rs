//! Purpose: Decode `table_list` and `column_list` bodies into fixed row structs.
//! Exports: `Table`, `Column`, `decode_tables`, `decode_columns`.
//! Role: Listing decoders; the first body row declares `[property, type]` pairs.
//! Invariants: Properties are matched through a static field table by declared name.
//! Invariants: Undeclared properties are kept in `extra`, never dropped.
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub id: Option<i64>,
    pub name: String,
    pub path: Option<String>,
    pub flags: String,
    pub domain: Option<String>,
    pub range: Option<String>,
    pub default_tokenizer: Option<String>,
    pub normalizer: Option<String>,
    pub token_filters: Vec<String>,
    pub extra: Map<String, Value>,
}

impl Table {
    pub fn flag_list(&self) -> Vec<&str> {
        split_flags(&self.flags)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Column {
    pub id: Option<i64>,
    pub name: String,
    pub path: Option<String>,
    pub column_type: Option<String>,
    pub flags: String,
    /// Owning table.
    pub domain: Option<String>,
    pub range: Option<String>,
    pub source: Vec<String>,
    pub extra: Map<String, Value>,
}

impl Column {
    /// `Table.column`, or the bare name when the owner is unknown.
    pub fn full_name(&self) -> String {
        match &self.domain {
            Some(domain) if !domain.is_empty() => format!("{domain}.{}", self.name),
            _ => self.name.clone(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.has_flag("COLUMN_SCALAR")
    }

    pub fn is_vector(&self) -> bool {
        self.has_flag("COLUMN_VECTOR")
    }

    pub fn is_index(&self) -> bool {
        self.has_flag("COLUMN_INDEX")
    }

    fn has_flag(&self, flag: &str) -> bool {
        split_flags(&self.flags).contains(&flag)
    }
}

fn split_flags(flags: &str) -> Vec<&str> {
    flags
        .split('|')
        .map(str::trim)
        .filter(|flag| !flag.is_empty())
        .collect()
}

type Setter<T> = fn(&mut T, Value);

const TABLE_FIELDS: &[(&str, Setter<Table>)] = &[
    ("id", |row, value| row.id = value.as_i64()),
    ("name", |row, value| row.name = text(value).unwrap_or_default()),
    ("path", |row, value| row.path = text(value)),
    ("flags", |row, value| row.flags = text(value).unwrap_or_default()),
    ("domain", |row, value| row.domain = text(value)),
    ("range", |row, value| row.range = text(value)),
    ("default_tokenizer", |row, value| row.default_tokenizer = text(value)),
    ("normalizer", |row, value| row.normalizer = text(value)),
    ("token_filters", |row, value| row.token_filters = text_list(value)),
];

const COLUMN_FIELDS: &[(&str, Setter<Column>)] = &[
    ("id", |row, value| row.id = value.as_i64()),
    ("name", |row, value| row.name = text(value).unwrap_or_default()),
    ("path", |row, value| row.path = text(value)),
    ("type", |row, value| row.column_type = text(value)),
    ("flags", |row, value| row.flags = text(value).unwrap_or_default()),
    ("domain", |row, value| row.domain = text(value)),
    ("range", |row, value| row.range = text(value)),
    ("source", |row, value| row.source = text_list(value)),
];

trait ListingRow: Default + 'static {
    fn fields() -> &'static [(&'static str, Setter<Self>)];
    fn extra_mut(&mut self) -> &mut Map<String, Value>;
}

impl ListingRow for Table {
    fn fields() -> &'static [(&'static str, Setter<Self>)] {
        TABLE_FIELDS
    }

    fn extra_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.extra
    }
}

impl ListingRow for Column {
    fn fields() -> &'static [(&'static str, Setter<Self>)] {
        COLUMN_FIELDS
    }

    fn extra_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.extra
    }
}

pub fn decode_tables(body: &Value) -> Result<Vec<Table>, String> {
    decode_listing(body)
}

pub fn decode_columns(body: &Value) -> Result<Vec<Column>, String> {
    decode_listing(body)
}

fn decode_listing<T: ListingRow>(body: &Value) -> Result<Vec<T>, String> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Null => return Ok(Vec::new()),
        other => return Err(format!("unexpected listing body: {other}")),
    };
    let Some((header, rows)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let names: Vec<String> = header
        .as_array()
        .ok_or_else(|| format!("expected listing header, got {header}"))?
        .iter()
        .map(|field| match field {
            Value::Array(pair) => pair.first().and_then(Value::as_str).map(str::to_string),
            Value::String(name) => Some(name.clone()),
            _ => None,
        })
        .collect::<Option<_>>()
        .ok_or("listing header entries must be [name, type] pairs")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut item = T::default();
        match row {
            Value::Array(values) => {
                for (name, value) in names.iter().zip(values) {
                    assign(&mut item, name, value.clone());
                }
            }
            Value::Object(map) => {
                for (name, value) in map {
                    assign(&mut item, name, value.clone());
                }
            }
            other => return Err(format!("unexpected listing row: {other}")),
        }
        out.push(item);
    }
    Ok(out)
}

fn assign<T: ListingRow>(item: &mut T, name: &str, value: Value) {
    match T::fields().iter().find(|(field, _)| *field == name) {
        Some((_, setter)) => setter(item, value),
        None => {
            item.extra_mut().insert(name.to_string(), value);
        }
    }
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn text_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(text).collect(),
        Value::String(text) if text.is_empty() => Vec::new(),
        Value::String(text) => text.split(',').map(|item| item.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_columns, decode_tables};
    use serde_json::json;

    #[test]
    fn table_rows_fill_fixed_fields() {
        let body = json!([
            [["id", "UInt32"], ["name", "ShortText"], ["path", "ShortText"], ["flags", "ShortText"],
             ["domain", "ShortText"], ["range", "ShortText"], ["default_tokenizer", "ShortText"],
             ["normalizer", "ShortText"]],
            [256, "Users", "/db/users", "TABLE_HASH_KEY|PERSISTENT", "ShortText", null, null, "NormalizerAuto"]
        ]);
        let tables = decode_tables(&body).expect("tables");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].id, Some(256));
        assert_eq!(tables[0].name, "Users");
        assert_eq!(tables[0].range, None);
        assert_eq!(tables[0].normalizer.as_deref(), Some("NormalizerAuto"));
        assert_eq!(tables[0].flag_list(), vec!["TABLE_HASH_KEY", "PERSISTENT"]);
    }

    #[test]
    fn column_predicates_read_pipe_delimited_flags() {
        let body = json!([
            [["id", "UInt32"], ["name", "ShortText"], ["type", "ShortText"], ["flags", "ShortText"],
             ["domain", "ShortText"], ["range", "ShortText"], ["source", "ShortText"]],
            [257, "title", "var", "COLUMN_SCALAR|PERSISTENT", "Memos", "ShortText", []],
            [258, "memos_title", "index", "COLUMN_INDEX|WITH_POSITION", "Terms", "Memos", ["title"]]
        ]);
        let columns = decode_columns(&body).expect("columns");
        assert_eq!(columns[0].full_name(), "Memos.title");
        assert!(columns[0].is_scalar());
        assert!(!columns[0].is_vector());
        assert!(columns[1].is_index());
        assert_eq!(columns[1].source, vec!["title".to_string()]);
    }

    #[test]
    fn unknown_properties_go_to_extra() {
        let body = json!([
            [["id", "UInt32"], ["name", "ShortText"], ["new_property", "Bool"]],
            [1, "Logs", true]
        ]);
        let tables = decode_tables(&body).expect("tables");
        assert_eq!(tables[0].extra.get("new_property"), Some(&json!(true)));
    }

    #[test]
    fn empty_listing_is_empty() {
        assert!(decode_tables(&json!([[["id", "UInt32"]]])).expect("tables").is_empty());
    }
}
