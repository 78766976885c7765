//! Purpose: Map command names to the body decoder used for their responses.
//! Exports: `DecoderKind`, `DecoderRegistry`.
//! Role: Immutable lookup injected into `ResponseParser`; built once, shared by clone.
//! Invariants: Unregistered commands decode with `DecoderKind::Generic`.
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecoderKind {
    Generic,
    Select,
    Load,
    TableList,
    ColumnList,
    Schema,
}

#[derive(Clone, Debug)]
pub struct DecoderRegistry {
    entries: Arc<BTreeMap<String, DecoderKind>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::from_entries([
            ("select", DecoderKind::Select),
            ("logical_select", DecoderKind::Select),
            ("load", DecoderKind::Load),
            ("table_list", DecoderKind::TableList),
            ("column_list", DecoderKind::ColumnList),
            ("schema", DecoderKind::Schema),
        ])
    }
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self::from_entries(std::iter::empty::<(&str, DecoderKind)>())
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, DecoderKind)>,
        K: Into<String>,
    {
        Self {
            entries: Arc::new(
                entries
                    .into_iter()
                    .map(|(name, kind)| (name.into(), kind))
                    .collect(),
            ),
        }
    }

    /// A new registry with `name` mapped to `kind`; `self` is unchanged.
    pub fn with(&self, name: impl Into<String>, kind: DecoderKind) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(name.into(), kind);
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn lookup(&self, name: &str) -> DecoderKind {
        self.entries
            .get(name)
            .copied()
            .unwrap_or(DecoderKind::Generic)
    }
}
