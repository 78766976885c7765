//! Purpose: Fluent builder for `select` with labeled drilldowns, dynamic columns and slices.
//! Exports: `SelectRequest`, `LabeledDrilldownRequest`, `DynamicColumnRequest`, `SliceRequest`.
//! Role: Thin typed layer over `Request`; every method returns a fresh `SelectRequest`.
//! Invariants: Sub-builders only write keys under their own `drilldowns[..]`/`columns[..]`/`slices[..]` prefix.
//! Invariants: Function-call output columns force `command_version` to at least 2.
#![allow(clippy::result_large_err)]

use std::collections::BTreeMap;

use super::{Merger, Parameters, Request};
use crate::api::client::{Client, ClientOptions};
use crate::api::pagination::Pagination;
use crate::api::response::Response;
use crate::core::command::Command;
use crate::core::error::Error;
use crate::core::script::{ScriptValue, format_value, substitute};

fn join_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| item.as_ref().trim().to_string())
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Debug)]
pub struct SelectRequest {
    request: Request,
}

impl SelectRequest {
    pub fn new(table: &str) -> Self {
        Self {
            request: Request::new("select").parameter("table", table),
        }
    }

    /// Same builder surface for `logical_select` and friends.
    pub fn for_command(command_name: &str, table: &str) -> Self {
        Self {
            request: Request::new(command_name).parameter("table", table),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn parameters(&self) -> &Parameters {
        self.request.parameters()
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.request.pagination()
    }

    pub fn to_command(&self) -> Command {
        self.request.to_command()
    }

    pub fn execute(&self) -> Result<Response, Error> {
        self.request.execute()
    }

    pub fn execute_on(&self, client: &Client) -> Result<Response, Error> {
        self.request.execute_on(client)
    }

    pub fn with_client_options(&self, options: ClientOptions) -> Self {
        self.wrap(self.request.with_client_options(options))
    }

    /// Raw parameter escape hatch for arguments without a dedicated method.
    pub fn parameter(&self, key: &str, value: impl ToString) -> Self {
        self.wrap(self.request.parameter(key, value))
    }

    /// ANDed with any existing filter.
    pub fn filter(&self, expression: &str) -> Self {
        self.merge("filter", Some(expression), Merger::And)
    }

    /// `column == value` with `value` escaped as a script literal.
    pub fn filter_equal(&self, column: &str, value: impl Into<ScriptValue>) -> Self {
        let expression = format!("{column} == {}", format_value(&value.into()));
        self.filter(&expression)
    }

    /// Expand `%{name}` placeholders from `values`, then AND the result in.
    pub fn filter_with(
        &self,
        template: &str,
        values: &BTreeMap<String, ScriptValue>,
    ) -> Result<Self, Error> {
        Ok(self.filter(&substitute(template, values)?))
    }

    /// Juxtaposed with any existing query, which the server reads as AND.
    pub fn query(&self, query: &str) -> Self {
        self.merge("query", Some(query), Merger::Juxtapose)
    }

    pub fn match_columns<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parameter("match_columns", join_list(columns).replace(", ", " || "))
    }

    pub fn sort_keys<I, S>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parameter("sort_keys", join_list(keys))
    }

    pub fn output_columns<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = join_list(columns);
        let uses_functions = columns.contains('(');
        let next = self.parameter("output_columns", columns);
        if uses_functions && next.to_command().command_version().unwrap_or(1) < 2 {
            next.command_version(2)
        } else {
            next
        }
    }

    pub fn offset(&self, offset: i64) -> Self {
        self.parameter("offset", offset)
    }

    pub fn limit(&self, limit: i64) -> Self {
        self.parameter("limit", limit)
    }

    pub fn paginate(&self, page: i64, per_page: i64) -> Self {
        self.wrap(self.request.paginate(page, per_page))
    }

    /// Unlabeled drilldown keys; results come back in `SelectResult::drilldowns` in key order.
    pub fn drilldown<I, S>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parameter("drilldown", join_list(keys))
    }

    pub fn scorer(&self, expression: &str) -> Self {
        self.parameter("scorer", expression)
    }

    pub fn command_version(&self, version: u32) -> Self {
        self.parameter("command_version", version)
    }

    pub fn drilldowns(&self, label: &str) -> LabeledDrilldownRequest {
        LabeledDrilldownRequest {
            parent: self.clone(),
            prefix: format!("drilldowns[{label}]."),
        }
    }

    pub fn columns(&self, label: &str) -> DynamicColumnRequest {
        DynamicColumnRequest {
            parent: self.clone(),
            prefix: format!("columns[{label}]."),
        }
    }

    pub fn slices(&self, label: &str) -> SliceRequest {
        SliceRequest {
            parent: self.clone(),
            label: label.to_string(),
        }
    }

    fn merge(&self, key: &str, value: Option<&str>, merger: Merger) -> Self {
        self.wrap(self.request.merge(key, value, merger))
    }

    fn wrap(&self, request: Request) -> Self {
        Self { request }
    }

    fn scoped(&self, prefix: &str, key: &str, value: impl ToString) -> Self {
        self.parameter(&format!("{prefix}{key}"), value)
    }
}

/// Writes `drilldowns[label].*` (or `slices[s].drilldowns[label].*`) keys.
#[derive(Clone, Debug)]
pub struct LabeledDrilldownRequest {
    parent: SelectRequest,
    prefix: String,
}

impl LabeledDrilldownRequest {
    pub fn keys<I, S>(&self, keys: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent.scoped(&self.prefix, "keys", join_list(keys))
    }

    pub fn sort_keys<I, S>(&self, keys: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent.scoped(&self.prefix, "sort_keys", join_list(keys))
    }

    pub fn output_columns<I, S>(&self, columns: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent
            .scoped(&self.prefix, "output_columns", join_list(columns))
    }

    pub fn offset(&self, offset: i64) -> SelectRequest {
        self.parent.scoped(&self.prefix, "offset", offset)
    }

    pub fn limit(&self, limit: i64) -> SelectRequest {
        self.parent.scoped(&self.prefix, "limit", limit)
    }

    pub fn filter(&self, expression: &str) -> SelectRequest {
        let key = format!("{}filter", self.prefix);
        self.parent.merge(&key, Some(expression), Merger::And)
    }

    pub fn calc_types<I, S>(&self, types: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let types = join_list(types).replace(", ", "|");
        self.parent.scoped(&self.prefix, "calc_types", types)
    }

    pub fn calc_target(&self, column: &str) -> SelectRequest {
        self.parent.scoped(&self.prefix, "calc_target", column)
    }

    /// Drill down over the result of another labeled drilldown.
    pub fn table(&self, label: &str) -> SelectRequest {
        self.parent.scoped(&self.prefix, "table", label)
    }
}

#[derive(Clone, Debug)]
pub struct DynamicColumnRequest {
    parent: SelectRequest,
    prefix: String,
}

impl DynamicColumnRequest {
    /// `initial`, `filtered`, `output`, ...
    pub fn stage(&self, stage: &str) -> SelectRequest {
        self.parent.scoped(&self.prefix, "stage", stage)
    }

    pub fn column_type(&self, value_type: &str) -> SelectRequest {
        self.parent.scoped(&self.prefix, "type", value_type)
    }

    pub fn flags<I, S>(&self, flags: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let flags = join_list(flags).replace(", ", "|");
        self.parent.scoped(&self.prefix, "flags", flags)
    }

    pub fn value(&self, expression: &str) -> SelectRequest {
        self.parent.scoped(&self.prefix, "value", expression)
    }

    pub fn window_sort_keys<I, S>(&self, keys: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent
            .scoped(&self.prefix, "window.sort_keys", join_list(keys))
    }

    pub fn window_group_keys<I, S>(&self, keys: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent
            .scoped(&self.prefix, "window.group_keys", join_list(keys))
    }
}

#[derive(Clone, Debug)]
pub struct SliceRequest {
    parent: SelectRequest,
    label: String,
}

impl SliceRequest {
    fn prefix(&self) -> String {
        format!("slices[{}].", self.label)
    }

    pub fn filter(&self, expression: &str) -> SelectRequest {
        let key = format!("{}filter", self.prefix());
        self.parent.merge(&key, Some(expression), Merger::And)
    }

    pub fn query(&self, query: &str) -> SelectRequest {
        let key = format!("{}query", self.prefix());
        self.parent.merge(&key, Some(query), Merger::Juxtapose)
    }

    pub fn match_columns<I, S>(&self, columns: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = join_list(columns).replace(", ", " || ");
        self.parent.scoped(&self.prefix(), "match_columns", columns)
    }

    pub fn sort_keys<I, S>(&self, keys: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent.scoped(&self.prefix(), "sort_keys", join_list(keys))
    }

    pub fn output_columns<I, S>(&self, columns: I) -> SelectRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parent
            .scoped(&self.prefix(), "output_columns", join_list(columns))
    }

    pub fn offset(&self, offset: i64) -> SelectRequest {
        self.parent.scoped(&self.prefix(), "offset", offset)
    }

    pub fn limit(&self, limit: i64) -> SelectRequest {
        self.parent.scoped(&self.prefix(), "limit", limit)
    }

    /// Labeled drilldown evaluated over this slice's records.
    pub fn drilldowns(&self, label: &str) -> LabeledDrilldownRequest {
        LabeledDrilldownRequest {
            parent: self.parent.clone(),
            prefix: format!("{}drilldowns[{label}].", self.prefix()),
        }
    }
}
