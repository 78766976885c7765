//! Purpose: Typed response value plus the decoding pipeline that produces it.
//! Exports: `Response`, `Body`, `ResponseParser`, `DecoderRegistry`, `DecoderKind`, decoder types.
//! Role: Uniform result of every executed command regardless of transport or output type.
//! Invariants: `return_code() == 0` (or no header) iff the response is a success.
//! Invariants: Header accessors never fail; missing fields read as `None`.
//! Invariants: The original raw bytes are always kept for diagnostics.
use bstr::ByteSlice;
use serde_json::Value;
use time::OffsetDateTime;

use crate::api::pagination::Pagination;
use crate::core::command::Command;
use crate::core::error::{Error, ErrorDetail, ErrorKind};
use crate::core::record::{Record, epoch_to_time};

mod format;
pub mod listing;
pub mod load;
mod parser;
mod registry;
pub mod schema;
pub mod select;

pub use format::{Envelope, decode_envelope};
pub use listing::{Column, Table};
pub use load::{LoadError, LoadResult};
pub use parser::ResponseParser;
pub use registry::{DecoderKind, DecoderRegistry};
pub use schema::{IndexRef, NamedEntry, Schema, SchemaColumn, SchemaTable, TypeRef};
pub use select::{Drilldown, Drilldowns, SelectResult, Slice};

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Generic(Value),
    Select(SelectResult),
    Load(LoadResult),
    TableList(Vec<Table>),
    ColumnList(Vec<Column>),
    Schema(Schema),
    /// Opaque output types (arrow, none); see `Response::raw`.
    Raw,
    /// Decoded body of a response with a non-zero return code.
    Error(Value),
}

#[derive(Clone, Debug)]
pub struct Response {
    command: Command,
    header: Option<Value>,
    body: Body,
    raw: Vec<u8>,
    trace_logs: Option<Vec<Record>>,
    pagination: Option<Pagination>,
}

impl Response {
    pub fn new(command: Command, header: Option<Value>, body: Body, raw: Vec<u8>) -> Self {
        Self {
            command,
            header,
            body,
            raw,
            trace_logs: None,
            pagination: None,
        }
    }

    pub fn with_trace_logs(mut self, trace_logs: Vec<Record>) -> Self {
        self.trace_logs = Some(trace_logs);
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_text(&self) -> String {
        self.raw.to_str_lossy().into_owned()
    }

    pub fn trace_logs(&self) -> Option<&[Record]> {
        self.trace_logs.as_deref()
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    pub fn is_success(&self) -> bool {
        self.return_code() == 0
    }

    pub fn return_code(&self) -> i64 {
        return_code_of(self.header.as_ref())
    }

    /// Server clock at request start, in epoch seconds.
    pub fn start_time(&self) -> Option<f64> {
        self.header_field(1, "start_time").and_then(Value::as_f64)
    }

    pub fn start_time_at(&self) -> Option<OffsetDateTime> {
        epoch_to_time(self.header_field(1, "start_time")?)
    }

    pub fn elapsed_time(&self) -> Option<f64> {
        self.header_field(2, "elapsed_time")
            .and_then(Value::as_f64)
    }

    pub fn error_message(&self) -> Option<String> {
        match self.header.as_ref()? {
            Value::Array(fields) => fields.get(3)?.as_str().map(str::to_string),
            Value::Object(map) => map.get("error")?.get("message")?.as_str().map(str::to_string),
            _ => None,
        }
    }

    pub fn error_function(&self) -> Option<String> {
        self.error_location(0, "function")?
            .as_str()
            .map(str::to_string)
    }

    pub fn error_file(&self) -> Option<String> {
        self.error_location(1, "file")?.as_str().map(str::to_string)
    }

    pub fn error_line(&self) -> Option<i64> {
        self.error_location(2, "line")?.as_i64()
    }

    pub fn error_detail(&self) -> ErrorDetail {
        ErrorDetail {
            return_code: self.return_code(),
            message: self.error_message(),
            function: self.error_function(),
            file: self.error_file(),
            line: self.error_line(),
        }
    }

    /// Application-level failure for a response whose return code is non-zero.
    pub fn to_error(&self) -> Error {
        let message = self
            .error_message()
            .unwrap_or_else(|| format!("return code {}", self.return_code()));
        Error::new(ErrorKind::ErrorResponse)
            .with_message(message)
            .with_command(self.command.name())
            .with_detail(self.error_detail())
    }

    pub fn select(&self) -> Option<&SelectResult> {
        match &self.body {
            Body::Select(result) => Some(result),
            _ => None,
        }
    }

    pub fn load(&self) -> Option<&LoadResult> {
        match &self.body {
            Body::Load(result) => Some(result),
            _ => None,
        }
    }

    pub fn tables(&self) -> Option<&[Table]> {
        match &self.body {
            Body::TableList(tables) => Some(tables),
            _ => None,
        }
    }

    pub fn columns(&self) -> Option<&[Column]> {
        match &self.body {
            Body::ColumnList(columns) => Some(columns),
            _ => None,
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        match &self.body {
            Body::Schema(schema) => Some(schema),
            _ => None,
        }
    }

    /// Generic or error body as decoded JSON.
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            Body::Generic(value) | Body::Error(value) => Some(value),
            _ => None,
        }
    }

    fn header_field(&self, index: usize, key: &str) -> Option<&Value> {
        match self.header.as_ref()? {
            Value::Array(fields) => fields.get(index),
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// v1 keeps `[[function, file, line]]` at index 4; v3 keeps them under `error`.
    fn error_location(&self, index: usize, key: &str) -> Option<&Value> {
        match self.header.as_ref()? {
            Value::Array(fields) => fields.get(4)?.get(0)?.get(index),
            Value::Object(map) => map.get("error")?.get(key),
            _ => None,
        }
    }
}

/// Return code of a v1 or v3 header; an absent header counts as success.
pub(crate) fn return_code_of(header: Option<&Value>) -> i64 {
    let code = match header {
        Some(Value::Array(fields)) => fields.first(),
        Some(Value::Object(map)) => map.get("return_code"),
        _ => None,
    };
    code.and_then(Value::as_i64).unwrap_or(0)
}
