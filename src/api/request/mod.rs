//! Purpose: Immutable parameter model for building commands out of merged fragments.
//! Exports: `Request`, `Parameters`, `Merger`, plus the select builders.
//! Role: Pure data transforms; `execute`/`execute_on` are the only side effects.
//! Invariants: Every mutator returns a new value and leaves the receiver unchanged.
//! Invariants: `And`/`Juxtapose` merges never drop a non-empty side.
#![allow(clippy::result_large_err)]

mod select;

pub use select::{DynamicColumnRequest, LabeledDrilldownRequest, SelectRequest, SliceRequest};

use tracing::debug;

use super::client::{Client, ClientOptions};
use super::pagination::Pagination;
use super::response::Response;
use crate::core::command::Command;
use crate::core::error::Error;

/// How a fragment combines with a value already present under the same key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Merger {
    /// The new value replaces the old one; `None` removes the key.
    Overwrite,
    /// `(old) && (new)`, used for filter expressions.
    And,
    /// `(old) (new)`, used for full-text query terms.
    Juxtapose,
}

impl Merger {
    fn combine(self, old: Option<&str>, new: Option<&str>) -> Option<String> {
        let old = old.filter(|value| !value.trim().is_empty());
        let new = new.filter(|value| !value.trim().is_empty());
        match self {
            Merger::Overwrite => new.map(str::to_string),
            Merger::And => join(old, new, " && "),
            Merger::Juxtapose => join(old, new, " "),
        }
    }
}

fn join(old: Option<&str>, new: Option<&str>, separator: &str) -> Option<String> {
    match (old, new) {
        (Some(old), Some(new)) => Some(format!("({old}){separator}({new})")),
        (Some(value), None) | (None, Some(value)) => Some(value.to_string()),
        (None, None) => None,
    }
}

/// Ordered, key-unique parameter set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Parameters {
    entries: Vec<(String, String)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&self, key: &str, value: Option<&str>, merger: Merger) -> Self {
        let mut next = self.clone();
        match merger.combine(self.get(key), value) {
            Some(value) => match next.entries.iter_mut().find(|(name, _)| name == key) {
                Some(slot) => slot.1 = value,
                None => next.entries.push((key.to_string(), value)),
            },
            None => next.entries.retain(|(name, _)| name != key),
        }
        next
    }
}

#[derive(Clone, Debug)]
pub struct Request {
    command_name: String,
    parameters: Parameters,
    pagination: Option<Pagination>,
    client_options: Option<ClientOptions>,
}

impl Request {
    pub fn new(command_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.into(),
            parameters: Parameters::new(),
            pagination: None,
            client_options: None,
        }
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    pub fn client_options(&self) -> Option<&ClientOptions> {
        self.client_options.as_ref()
    }

    /// Overwrite `key` with `value`.
    pub fn parameter(&self, key: &str, value: impl ToString) -> Self {
        self.merge(key, Some(&value.to_string()), Merger::Overwrite)
    }

    pub fn merge(&self, key: &str, value: Option<&str>, merger: Merger) -> Self {
        Self {
            parameters: self.parameters.merge(key, value, merger),
            ..self.clone()
        }
    }

    /// Sets `offset`/`limit` and remembers the page for the response.
    pub fn paginate(&self, page: i64, per_page: i64) -> Self {
        let pagination = Pagination::from_page(page, per_page);
        let next = self
            .parameter("offset", pagination.offset)
            .parameter("limit", pagination.limit);
        Self {
            pagination: Some(pagination),
            ..next
        }
    }

    pub fn with_client_options(&self, options: ClientOptions) -> Self {
        Self {
            client_options: Some(options),
            ..self.clone()
        }
    }

    pub fn to_command(&self) -> Command {
        Command::build(self.command_name.as_str(), self.parameters.iter())
    }

    /// Open a client from the stored options, run, then close it.
    pub fn execute(&self) -> Result<Response, Error> {
        let options = self.client_options.clone().unwrap_or_default();
        let client = Client::open(options)?;
        let result = self.execute_on(&client);
        if let Err(err) = client.close() {
            debug!(error = %err, "close after request failed");
        }
        result
    }

    /// Non-success responses become `ErrorKind::ErrorResponse` errors.
    pub fn execute_on(&self, client: &Client) -> Result<Response, Error> {
        let mut response = client.execute_command(self.to_command())?;
        if let Some(pagination) = self.pagination {
            response = response.with_pagination(pagination);
        }
        if !response.is_success() {
            return Err(response.to_error());
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::{Merger, Parameters, Request};

    #[test]
    fn and_merger_parenthesizes_both_sides() {
        let params = Parameters::new()
            .merge("filter", Some("a > 1"), Merger::And)
            .merge("filter", Some("b < 2"), Merger::And);
        assert_eq!(params.get("filter"), Some("(a > 1) && (b < 2)"));
    }

    #[test]
    fn and_merger_keeps_a_lone_side_unchanged() {
        let params = Parameters::new().merge("filter", Some("a > 1"), Merger::And);
        assert_eq!(params.get("filter"), Some("a > 1"));
        let params = params.merge("filter", None, Merger::And);
        assert_eq!(params.get("filter"), Some("a > 1"));
    }

    #[test]
    fn two_absent_sides_leave_no_key() {
        let params = Parameters::new().merge("filter", None, Merger::And);
        assert!(params.get("filter").is_none());
        assert!(params.is_empty());
    }

    #[test]
    fn juxtapose_joins_with_space() {
        let params = Parameters::new()
            .merge("query", Some("rust"), Merger::Juxtapose)
            .merge("query", Some("groonga OR mroonga"), Merger::Juxtapose);
        assert_eq!(params.get("query"), Some("(rust) (groonga OR mroonga)"));
    }

    #[test]
    fn chained_filters_nest_left_to_right() {
        let params = ["a", "b", "c"]
            .iter()
            .fold(Parameters::new(), |params, filter| {
                params.merge("filter", Some(filter), Merger::And)
            });
        assert_eq!(params.get("filter"), Some("((a) && (b)) && (c)"));
    }

    #[test]
    fn mutators_leave_receiver_untouched() {
        let base = Request::new("select").parameter("table", "Users");
        let next = base.parameter("limit", 5);
        assert_eq!(base.parameters().get("limit"), None);
        assert_eq!(next.parameters().get("limit"), Some("5"));
        assert_eq!(next.to_command().argument("table"), Some("Users"));
    }

    #[test]
    fn paginate_sets_offset_and_limit() {
        let request = Request::new("select").paginate(3, 0);
        assert_eq!(request.parameters().get("offset"), Some("20"));
        assert_eq!(request.parameters().get("limit"), Some("10"));
        assert_eq!(request.pagination().map(|p| p.offset), Some(20));
    }
}
