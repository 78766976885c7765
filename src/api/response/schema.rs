//! Purpose: Decode the `schema` document and resolve its cross references by name.
//! Exports: `Schema`, `SchemaTable`, `SchemaColumn`, `IndexRef`, `NamedEntry`, `TypeRef`,
//! `decode_schema`.
//! Role: Schema decoder; the body stays one flat document held by the response.
//! Invariants: References (key types, normalizers, sources, indexes) are names, looked up on access.
//! Invariants: Each collection is built at most once per `Schema` value.
use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde_json::{Map, Value};

/// A built-in entry (type, tokenizer, normalizer, token filter, plugin).
#[derive(Clone, Debug, PartialEq)]
pub struct NamedEntry {
    pub name: String,
    pub raw: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexRef {
    pub table: String,
    pub name: String,
    pub full_name: String,
    pub section: bool,
    pub weight: bool,
    pub position: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaColumn {
    pub name: String,
    pub table: String,
    pub full_name: String,
    /// `scalar`, `vector` or `index`.
    pub column_type: String,
    pub value_type: Option<String>,
    /// Full names of source columns (index columns only).
    pub sources: Vec<String>,
    pub indexes: Vec<IndexRef>,
    pub raw: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaTable {
    pub name: String,
    pub table_type: String,
    pub key_type: Option<String>,
    pub value_type: Option<String>,
    pub tokenizer: Option<String>,
    pub normalizer: Option<String>,
    pub token_filters: Vec<String>,
    pub indexes: Vec<IndexRef>,
    pub columns: Vec<SchemaColumn>,
    pub raw: Value,
}

impl SchemaTable {
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// What a `key_type`/`value_type` name resolves to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TypeRef<'a> {
    Type(&'a NamedEntry),
    Table(&'a SchemaTable),
}

impl TypeRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Type(entry) => &entry.name,
            TypeRef::Table(table) => &table.name,
        }
    }
}

type Entries = BTreeMap<String, NamedEntry>;

#[derive(Clone, Debug, Default)]
pub struct Schema {
    raw: Value,
    types: OnceLock<Entries>,
    tokenizers: OnceLock<Entries>,
    normalizers: OnceLock<Entries>,
    token_filters: OnceLock<Entries>,
    plugins: OnceLock<Entries>,
    tables: OnceLock<BTreeMap<String, SchemaTable>>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

pub fn decode_schema(body: &Value) -> Result<Schema, String> {
    match body {
        Value::Object(_) => Ok(Schema {
            raw: body.clone(),
            ..Schema::default()
        }),
        other => Err(format!("unexpected schema body: {other}")),
    }
}

impl Schema {
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn types(&self) -> &Entries {
        self.types.get_or_init(|| entries(self.raw.get("types")))
    }

    pub fn tokenizers(&self) -> &Entries {
        self.tokenizers
            .get_or_init(|| entries(self.raw.get("tokenizers")))
    }

    pub fn normalizers(&self) -> &Entries {
        self.normalizers
            .get_or_init(|| entries(self.raw.get("normalizers")))
    }

    pub fn token_filters(&self) -> &Entries {
        self.token_filters
            .get_or_init(|| entries(self.raw.get("token_filters")))
    }

    pub fn plugins(&self) -> &Entries {
        self.plugins.get_or_init(|| entries(self.raw.get("plugins")))
    }

    pub fn tables(&self) -> &BTreeMap<String, SchemaTable> {
        self.tables.get_or_init(|| {
            let mut tables = BTreeMap::new();
            if let Some(Value::Object(map)) = self.raw.get("tables") {
                for (name, raw) in map {
                    tables.insert(name.clone(), table_from_json(name, raw));
                }
            }
            tables
        })
    }

    pub fn table(&self, name: &str) -> Option<&SchemaTable> {
        self.tables().get(name)
    }

    /// Look up `Table.column`.
    pub fn column(&self, full_name: &str) -> Option<&SchemaColumn> {
        let (table, column) = full_name.split_once('.')?;
        self.table(table)?.column(column)
    }

    pub fn key_type(&self, table: &SchemaTable) -> Option<TypeRef<'_>> {
        self.resolve_type(table.key_type.as_deref()?)
    }

    pub fn value_type(&self, table: &SchemaTable) -> Option<TypeRef<'_>> {
        self.resolve_type(table.value_type.as_deref()?)
    }

    pub fn column_value_type(&self, column: &SchemaColumn) -> Option<TypeRef<'_>> {
        self.resolve_type(column.value_type.as_deref()?)
    }

    pub fn tokenizer(&self, table: &SchemaTable) -> Option<&NamedEntry> {
        self.tokenizers().get(table.tokenizer.as_deref()?)
    }

    pub fn normalizer(&self, table: &SchemaTable) -> Option<&NamedEntry> {
        self.normalizers().get(table.normalizer.as_deref()?)
    }

    pub fn table_token_filters(&self, table: &SchemaTable) -> Vec<&NamedEntry> {
        table
            .token_filters
            .iter()
            .filter_map(|name| self.token_filters().get(name))
            .collect()
    }

    /// The index column an `IndexRef` points at.
    pub fn index_column(&self, index: &IndexRef) -> Option<&SchemaColumn> {
        self.table(&index.table)?.column(&index.name)
    }

    pub fn sources(&self, column: &SchemaColumn) -> Vec<&SchemaColumn> {
        column
            .sources
            .iter()
            .filter_map(|full_name| self.column(full_name))
            .collect()
    }

    /// Table names are checked before built-in type names.
    fn resolve_type(&self, name: &str) -> Option<TypeRef<'_>> {
        if let Some(table) = self.table(name) {
            return Some(TypeRef::Table(table));
        }
        self.types().get(name).map(TypeRef::Type)
    }
}

fn entries(raw: Option<&Value>) -> Entries {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(map)) = raw {
        for (name, value) in map {
            out.insert(
                name.clone(),
                NamedEntry {
                    name: name.clone(),
                    raw: value.clone(),
                },
            );
        }
    }
    out
}

fn table_from_json(name: &str, raw: &Value) -> SchemaTable {
    let columns = match raw.get("columns") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(column_name, column)| column_from_json(name, column_name, column))
            .collect(),
        _ => Vec::new(),
    };
    SchemaTable {
        name: name.to_string(),
        table_type: string_field(raw, "type").unwrap_or_default(),
        key_type: reference_name(raw.get("key_type")),
        value_type: reference_name(raw.get("value_type")),
        tokenizer: reference_name(raw.get("tokenizer")),
        normalizer: reference_name(raw.get("normalizer")),
        token_filters: reference_names(raw.get("token_filters")),
        indexes: index_refs(raw.get("indexes")),
        columns,
        raw: raw.clone(),
    }
}

fn column_from_json(table: &str, name: &str, raw: &Value) -> SchemaColumn {
    let sources = match raw.get("sources") {
        Some(Value::Array(sources)) => sources
            .iter()
            .filter_map(|source| {
                string_field(source, "full_name").or_else(|| {
                    let table = string_field(source, "table")?;
                    let name = string_field(source, "name")?;
                    Some(format!("{table}.{name}"))
                })
            })
            .collect(),
        _ => Vec::new(),
    };
    SchemaColumn {
        name: name.to_string(),
        table: table.to_string(),
        full_name: string_field(raw, "full_name").unwrap_or_else(|| format!("{table}.{name}")),
        column_type: string_field(raw, "type").unwrap_or_default(),
        value_type: reference_name(raw.get("value_type")),
        sources,
        indexes: index_refs(raw.get("indexes")),
        raw: raw.clone(),
    }
}

fn index_refs(raw: Option<&Value>) -> Vec<IndexRef> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| {
            let table = map_string(item, "table").unwrap_or_default();
            let name = map_string(item, "name").unwrap_or_default();
            IndexRef {
                full_name: map_string(item, "full_name")
                    .unwrap_or_else(|| format!("{table}.{name}")),
                table,
                name,
                section: map_bool(item, "section"),
                weight: map_bool(item, "weight"),
                position: map_bool(item, "position"),
            }
        })
        .collect()
}

/// References appear as `{"name": ..}` objects or bare strings.
fn reference_name(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(name) => Some(name.clone()),
        Value::Object(map) => map_string(map, "name"),
        _ => None,
    }
}

fn reference_names(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(|item| reference_name(Some(item))).collect(),
        _ => Vec::new(),
    }
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn map_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn map_bool(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{TypeRef, decode_schema};
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "types": {"ShortText": {"name": "ShortText", "size": 4096}},
            "tokenizers": {"TokenBigram": {"name": "TokenBigram"}},
            "normalizers": {"NormalizerAuto": {"name": "NormalizerAuto"}},
            "token_filters": {},
            "plugins": {},
            "tables": {
                "Users": {
                    "name": "Users",
                    "type": "hash table",
                    "key_type": {"name": "ShortText", "type": "type"},
                    "value_type": null,
                    "tokenizer": null,
                    "normalizer": null,
                    "token_filters": [],
                    "indexes": [{"table": "Terms", "name": "users_name", "full_name": "Terms.users_name", "position": true}],
                    "columns": {
                        "name": {
                            "name": "name",
                            "table": "Users",
                            "full_name": "Users.name",
                            "type": "scalar",
                            "value_type": {"name": "ShortText", "type": "type"},
                            "sources": [],
                            "indexes": [{"table": "Terms", "name": "users_name"}]
                        }
                    }
                },
                "Terms": {
                    "name": "Terms",
                    "type": "patricia trie",
                    "key_type": {"name": "ShortText", "type": "type"},
                    "tokenizer": {"name": "TokenBigram"},
                    "normalizer": {"name": "NormalizerAuto"},
                    "token_filters": [],
                    "indexes": [],
                    "columns": {
                        "users_name": {
                            "name": "users_name",
                            "type": "index",
                            "value_type": {"name": "Users", "type": "reference"},
                            "sources": [{"table": "Users", "name": "name", "full_name": "Users.name"}],
                            "indexes": []
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn key_types_resolve_to_builtin_types() {
        let schema = decode_schema(&sample()).expect("schema");
        let users = schema.table("Users").expect("users");
        match schema.key_type(users) {
            Some(TypeRef::Type(entry)) => assert_eq!(entry.raw["size"], json!(4096)),
            other => panic!("unexpected key type: {other:?}"),
        }
        assert!(schema.normalizer(users).is_none());
    }

    #[test]
    fn lexicon_references_resolve_by_name() {
        let schema = decode_schema(&sample()).expect("schema");
        let terms = schema.table("Terms").expect("terms");
        assert_eq!(schema.tokenizer(terms).map(|entry| entry.name.as_str()), Some("TokenBigram"));
        assert_eq!(schema.normalizer(terms).map(|entry| entry.name.as_str()), Some("NormalizerAuto"));
    }

    #[test]
    fn index_and_source_links_round_trip() {
        let schema = decode_schema(&sample()).expect("schema");
        let name = schema.column("Users.name").expect("column");
        let index = schema.index_column(&name.indexes[0]).expect("index column");
        assert_eq!(index.full_name, "Terms.users_name");
        assert_eq!(
            schema.column_value_type(index).map(|target| target.name().to_string()),
            Some("Users".to_string())
        );
        let sources = schema.sources(index);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].full_name, "Users.name");
    }

    #[test]
    fn collections_are_memoized() {
        let schema = decode_schema(&sample()).expect("schema");
        let first = schema.tables() as *const _;
        let second = schema.tables() as *const _;
        assert_eq!(first, second);
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(decode_schema(&json!([])).is_err());
    }
}
