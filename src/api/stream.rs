//! Purpose: Replay a stream of command lines through a `Client`, chunking bulk loads.
//! Exports: `CommandStream`, `StreamOptions`, `StreamOutcome`, `TargetFilter`, `FailurePolicy`, `Flow`.
//! Role: Engine behind the CLI; every dispatched command goes through `Client::execute_command`.
//! Invariants: Each flushed load carries exactly one chunk's rows as a JSON array.
//! Invariants: At most one load is accumulating at a time; it is flushed before any other command runs.
//! Invariants: Column projection always keeps `_key` and `_id`.
//! Notes: Transport and decoding errors propagate; unsuccessful responses follow `FailurePolicy`.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;

use getrandom::fill as fill_random;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::Client;
use super::response::Response;
use crate::core::command::Command;
use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Allow-list entry: an exact name or a `/regex/`.
#[derive(Clone, Debug)]
pub enum TargetFilter {
    Exact(String),
    Pattern(Regex),
}

impl TargetFilter {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            TargetFilter::Exact(expected) => expected == value,
            TargetFilter::Pattern(pattern) => pattern.is_match(value),
        }
    }
}

impl FromStr for TargetFilter {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let inner = value
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'));
        match inner {
            Some(pattern) if value.len() >= 2 => Regex::new(pattern)
                .map(TargetFilter::Pattern)
                .map_err(|err| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("invalid target pattern: {value}"))
                        .with_source(err)
                }),
            _ => Ok(TargetFilter::Exact(value.to_string())),
        }
    }
}

fn allowed(filters: &[TargetFilter], value: &str) -> bool {
    filters.is_empty() || filters.iter().any(|filter| filter.matches(value))
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Stop at the first unsuccessful response.
    #[default]
    Abort,
    Continue,
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Rows per flushed load; 0 sends each load in one piece.
    pub chunk_size: usize,
    pub generate_request_id: bool,
    pub target_commands: Vec<TargetFilter>,
    pub target_tables: Vec<TargetFilter>,
    pub target_columns: Vec<TargetFilter>,
    pub failure_policy: FailurePolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            generate_request_id: false,
            target_commands: Vec::new(),
            target_tables: Vec::new(),
            target_columns: Vec::new(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Result of one dispatch step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Abort(String),
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StreamOutcome {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub aborted: Option<String>,
}

/// Incremental splitter for a JSON array spread over many lines.
#[derive(Debug, Default)]
struct ArrayScanner {
    started: bool,
    done: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
    element: String,
    rest: String,
}

impl ArrayScanner {
    fn feed(&mut self, line: &str) -> Result<Vec<Value>, Error> {
        let mut elements = Vec::new();
        for ch in line.chars() {
            if self.done {
                self.rest.push(ch);
                continue;
            }
            if !self.started {
                match ch {
                    '[' => self.started = true,
                    ch if ch.is_whitespace() => {}
                    _ => {
                        return Err(Error::new(ErrorKind::Usage)
                            .with_message("load values must be a JSON array")
                            .with_hint(format!("unexpected input: {}", line.trim())));
                    }
                }
                continue;
            }
            if self.in_string {
                self.element.push(ch);
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match ch {
                '"' => {
                    self.in_string = true;
                    self.element.push(ch);
                }
                '[' | '{' => {
                    self.depth += 1;
                    self.element.push(ch);
                }
                ']' | '}' if self.depth > 0 => {
                    self.depth -= 1;
                    self.element.push(ch);
                }
                ']' => {
                    elements.extend(self.take_element()?);
                    self.done = true;
                }
                ',' if self.depth == 0 => elements.extend(self.take_element()?),
                ch if ch.is_whitespace() && self.depth == 0 => {}
                ch => self.element.push(ch),
            }
        }
        if self.depth > 0 {
            self.element.push('\n');
        }
        Ok(elements)
    }

    fn take_element(&mut self) -> Result<Option<Value>, Error> {
        let text = std::mem::take(&mut self.element);
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text).map(Some).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid load value")
                .with_hint(text.trim().chars().take(80).collect::<String>())
                .with_source(err)
        })
    }

    fn take_rest(&mut self) -> String {
        std::mem::take(&mut self.rest)
    }
}

#[derive(Debug)]
struct PendingLoad {
    command: Command,
    columns: Option<Vec<String>>,
    rows: Vec<Value>,
    rows_seen: u64,
    flushes: u64,
    scanner: ArrayScanner,
}

impl PendingLoad {
    fn new(command: Command) -> Self {
        let columns = command.argument("columns").map(split_columns);
        Self {
            command: command.without_argument("columns").without_payload(),
            columns,
            rows: Vec::new(),
            rows_seen: 0,
            flushes: 0,
            scanner: ArrayScanner::default(),
        }
    }

    /// Returns true when the row should be flushed as part of a chunk.
    fn accept(&mut self, row: Value) -> bool {
        if self.columns.is_none() && self.rows_seen == 0 {
            if let Some(header) = column_header(&row) {
                self.columns = Some(header);
                return false;
            }
        }
        self.rows_seen += 1;
        self.rows.push(row);
        true
    }
}

fn split_columns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `["_key", "name"]` as the first row names the columns.
fn column_header(row: &Value) -> Option<Vec<String>> {
    let items = row.as_array().filter(|items| !items.is_empty())?;
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Table a command operates on; table DDL names it in `name`.
fn target_table(command: &Command) -> Option<&str> {
    match command.name() {
        "table_create" | "table_remove" | "table_rename" => command.argument("name"),
        _ => command.table(),
    }
}

fn is_key_column(name: &str) -> bool {
    name == "_key" || name == "_id"
}

/// Drop columns outside `filters`; array rows are cut by header position.
fn project_rows(
    filters: &[TargetFilter],
    columns: Option<&[String]>,
    rows: Vec<Value>,
) -> (Option<Vec<String>>, Vec<Value>) {
    if filters.is_empty() {
        return (columns.map(<[String]>::to_vec), rows);
    }
    let keep = |name: &str| is_key_column(name) || allowed(filters, name);
    let kept_indexes: Option<Vec<usize>> = columns.map(|columns| {
        columns
            .iter()
            .enumerate()
            .filter(|(_, name)| keep(name))
            .map(|(index, _)| index)
            .collect()
    });
    let projected = rows
        .into_iter()
        .map(|row| match row {
            Value::Array(items) => match &kept_indexes {
                Some(indexes) => Value::Array(
                    indexes
                        .iter()
                        .filter_map(|index| items.get(*index).cloned())
                        .collect(),
                ),
                None => Value::Array(items),
            },
            Value::Object(mut map) => {
                map.retain(|name, _| keep(name));
                Value::Object(map)
            }
            other => other,
        })
        .collect();
    let columns = columns.map(|columns| columns.iter().filter(|name| keep(name)).cloned().collect());
    (columns, projected)
}

/// 128 random bits as lowercase hex.
pub fn generate_request_id() -> Result<String, Error> {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate request id: {err}"))
    })?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

fn io_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

pub struct CommandStream<'a> {
    client: &'a Client,
    options: StreamOptions,
    pending: Option<PendingLoad>,
    outcome: StreamOutcome,
    observer: Option<Box<dyn FnMut(&Response) + 'a>>,
}

impl<'a> CommandStream<'a> {
    pub fn new(client: &'a Client, options: StreamOptions) -> Self {
        Self {
            client,
            options,
            pending: None,
            outcome: StreamOutcome::default(),
            observer: None,
        }
    }

    /// Called with every response, successful or not.
    pub fn on_response(mut self, observer: impl FnMut(&Response) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn outcome(&self) -> &StreamOutcome {
        &self.outcome
    }

    /// Read `reader` to the end (or until aborted) and flush what is left.
    pub fn process<R: Read>(&mut self, reader: R) -> Result<StreamOutcome, Error> {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|err| io_error(err, "failed to read command stream"))?;
            if read == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if let Flow::Abort(_) = self.process_line(trimmed)? {
                break;
            }
        }
        self.finish()
    }

    pub fn process_line(&mut self, line: &str) -> Result<Flow, Error> {
        if let Some(reason) = &self.outcome.aborted {
            return Ok(Flow::Abort(reason.clone()));
        }
        if let Some(load) = self.pending.take() {
            return self.continue_load(load, line);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(Flow::Continue);
        }
        let command = match Command::parse_line(trimmed) {
            Ok(command) => command,
            Err(err) if self.options.failure_policy == FailurePolicy::Continue => {
                warn!(line = trimmed, error = %err, "unparsable command skipped");
                self.outcome.failed += 1;
                return Ok(Flow::Continue);
            }
            Err(err) => return Err(err),
        };
        if command.name() == "load" {
            return self.start_load(command);
        }
        self.dispatch(command)
    }

    /// Flush any partially accumulated load and return the totals.
    pub fn finish(&mut self) -> Result<StreamOutcome, Error> {
        if let Some(mut load) = self.pending.take() {
            if !load.scanner.done && self.outcome.aborted.is_none() {
                warn!(table = ?load.command.table(), "load values ended without closing bracket");
            }
            if self.outcome.aborted.is_none() {
                self.flush(&mut load)?;
            }
        }
        Ok(self.outcome.clone())
    }

    fn start_load(&mut self, command: Command) -> Result<Flow, Error> {
        let inline = command.payload().map(serde_json::from_str::<Value>);
        let mut load = PendingLoad::new(command.clone());
        match inline {
            None => {
                self.pending = Some(load);
                Ok(Flow::Continue)
            }
            Some(Ok(Value::Array(rows))) => {
                load.scanner.done = true;
                for row in rows {
                    if let Flow::Abort(reason) = self.accept_row(&mut load, row)? {
                        return Ok(Flow::Abort(reason));
                    }
                }
                self.flush(&mut load)
            }
            Some(_) => {
                debug!(table = ?command.table(), "load values are not a JSON array; sent as is");
                self.dispatch(command)
            }
        }
    }

    fn continue_load(&mut self, mut load: PendingLoad, line: &str) -> Result<Flow, Error> {
        for row in load.scanner.feed(line)? {
            if let Flow::Abort(reason) = self.accept_row(&mut load, row)? {
                return Ok(Flow::Abort(reason));
            }
        }
        if !load.scanner.done {
            self.pending = Some(load);
            return Ok(Flow::Continue);
        }
        let rest = load.scanner.take_rest();
        if let Flow::Abort(reason) = self.flush(&mut load)? {
            return Ok(Flow::Abort(reason));
        }
        if rest.trim().is_empty() {
            Ok(Flow::Continue)
        } else {
            self.process_line(&rest)
        }
    }

    fn accept_row(&mut self, load: &mut PendingLoad, row: Value) -> Result<Flow, Error> {
        let chunk_size = self.options.chunk_size;
        if load.accept(row) && chunk_size > 0 && load.rows.len() >= chunk_size {
            return self.flush(load);
        }
        Ok(Flow::Continue)
    }

    /// Send the accumulated rows as one load; an empty load is only sent if nothing was.
    fn flush(&mut self, load: &mut PendingLoad) -> Result<Flow, Error> {
        if load.rows.is_empty() && load.flushes > 0 {
            return Ok(Flow::Continue);
        }
        load.flushes += 1;
        let rows = std::mem::take(&mut load.rows);
        let (columns, rows) = project_rows(
            &self.options.target_columns,
            load.columns.as_deref(),
            rows,
        );
        let payload = serde_json::to_string(&rows).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode load values")
                .with_source(err)
        })?;
        let mut command = load.command.clone().with_payload(payload);
        if let Some(columns) = columns {
            command = command.with_argument("columns", columns.join(","));
        }
        debug!(table = ?command.table(), rows = rows.len(), chunk = load.flushes, "flush load");
        self.dispatch(command)
    }

    fn is_target(&self, command: &Command) -> bool {
        if !allowed(&self.options.target_commands, command.name()) {
            return false;
        }
        if let Some(table) = target_table(command) {
            if !allowed(&self.options.target_tables, table) {
                return false;
            }
        }
        if command.name() == "column_create" {
            if let Some(column) = command.argument("name") {
                return is_key_column(column) || allowed(&self.options.target_columns, column);
            }
        }
        true
    }

    fn dispatch(&mut self, command: Command) -> Result<Flow, Error> {
        if !self.is_target(&command) {
            debug!(command = command.name(), table = ?target_table(&command), "filtered out");
            self.outcome.skipped += 1;
            return Ok(Flow::Continue);
        }
        let command = if self.options.generate_request_id {
            command.with_request_id(generate_request_id()?)
        } else {
            command
        };
        self.outcome.dispatched += 1;
        let response = self.client.execute_command(command)?;
        if let Some(observer) = self.observer.as_mut() {
            observer(&response);
        }
        if response.is_success() {
            self.outcome.succeeded += 1;
            return Ok(Flow::Continue);
        }
        self.outcome.failed += 1;
        let reason = format!(
            "{} failed ({}): {}",
            response.command().name(),
            response.return_code(),
            response.error_message().unwrap_or_default()
        );
        warn!(command = response.command().name(), return_code = response.return_code(), "command failed");
        match self.options.failure_policy {
            FailurePolicy::Continue => Ok(Flow::Continue),
            FailurePolicy::Abort => {
                self.outcome.aborted = Some(reason.clone());
                Ok(Flow::Abort(reason))
            }
        }
    }
}

impl fmt::Debug for CommandStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStream")
            .field("options", &self.options)
            .field("pending", &self.pending.is_some())
            .field("outcome", &self.outcome)
            .finish()
    }
}
