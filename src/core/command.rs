//! Purpose: Represent one server command and render it for either wire protocol.
//! Exports: `Command`, `OutputType`, `escape_value`, `unescape_value`.
//! Role: Leaf data model shared by builders, transports, parsers and the stream processor.
//! Invariants: Argument keys are unique; insertion order is preserved.
//! Invariants: The `load` payload (`values`) is never stored in the argument map.
//! Invariants: `output_type` is a field, never an argument.
use std::fmt;

use url::form_urlencoded;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_PATH_PREFIX: &str = "/d";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputType {
    #[default]
    Json,
    Xml,
    Tsv,
    Arrow,
    None,
}

impl OutputType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(OutputType::Json),
            "xml" => Some(OutputType::Xml),
            "tsv" => Some(OutputType::Tsv),
            "arrow" | "apache-arrow" => Some(OutputType::Arrow),
            "none" => Some(OutputType::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::Json => "json",
            OutputType::Xml => "xml",
            OutputType::Tsv => "tsv",
            OutputType::Arrow => "apache-arrow",
            OutputType::None => "none",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Command {
    name: String,
    arguments: Vec<(String, String)>,
    output_type: OutputType,
    path_prefix: Option<String>,
    payload: Option<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a command from `(key, value)` pairs; later duplicates replace earlier ones.
    pub fn build<I, K, V>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        arguments
            .into_iter()
            .fold(Self::new(name), |command, (key, value)| {
                command.with_argument(key, value.to_string())
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[(String, String)] {
        &self.arguments
    }

    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_argument(&self, key: &str) -> bool {
        self.argument(key).is_some()
    }

    pub fn output_type(&self) -> OutputType {
        self.output_type
    }

    pub fn path_prefix(&self) -> &str {
        self.path_prefix.as_deref().unwrap_or(DEFAULT_PATH_PREFIX)
    }

    /// False when `path_prefix()` is only reporting the `/d` default.
    pub fn has_explicit_path_prefix(&self) -> bool {
        self.path_prefix.is_some()
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.argument("table")
    }

    pub fn request_id(&self) -> Option<&str> {
        self.argument("request_id")
    }

    pub fn with_request_id(self, id: impl Into<String>) -> Self {
        self.with_argument("request_id", id)
    }

    pub fn command_version(&self) -> Option<u32> {
        self.argument("command_version")
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "values" => {
                self.payload = Some(value);
            }
            "output_type" => {
                if let Some(output_type) = OutputType::parse(&value) {
                    self.output_type = output_type;
                }
            }
            _ => {
                if let Some(slot) = self.arguments.iter_mut().find(|(name, _)| *name == key) {
                    slot.1 = value;
                } else {
                    self.arguments.push((key, value));
                }
            }
        }
        self
    }

    pub fn without_argument(mut self, key: &str) -> Self {
        self.arguments.retain(|(name, _)| name != key);
        self
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        self.path_prefix = Some(trimmed.to_string());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn without_payload(mut self) -> Self {
        self.payload = None;
        self
    }

    /// `/d/name?k=v&...` for the HTTP transport. The payload is sent as a body instead.
    pub fn to_query_form(&self) -> String {
        let mut path = format!("{}/{}", self.path_prefix(), self.name);
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.arguments {
            serializer.append_pair(key, value);
        }
        if self.output_type != OutputType::Json {
            serializer.append_pair("output_type", self.output_type.as_str());
        }
        let query = serializer.finish();
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query);
        }
        path
    }

    /// `name --k "v" ...` for the GQTP transport. The payload is inlined as `--values`.
    pub fn to_wire_form(&self) -> String {
        let mut line = self.name.clone();
        for (key, value) in &self.arguments {
            push_wire_pair(&mut line, key, value);
        }
        if self.output_type != OutputType::Json {
            push_wire_pair(&mut line, "output_type", self.output_type.as_str());
        }
        if let Some(payload) = &self.payload {
            push_wire_pair(&mut line, "values", payload);
        }
        line
    }

    /// Parse one command line in wire form (`name --k v`) or URI form (`/d/name?k=v`).
    pub fn parse_line(line: &str) -> Result<Self, Error> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("empty command line"));
        }
        if trimmed.starts_with('/') {
            return parse_uri_form(trimmed);
        }
        parse_wire_form(trimmed)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire_form())
    }
}

fn push_wire_pair(line: &mut String, key: &str, value: &str) {
    line.push_str(" --");
    line.push_str(key);
    line.push_str(" \"");
    line.push_str(&escape_value(value));
    line.push('"');
}

/// Escape a value for a double-quoted wire token.
///
/// `"` and `\` are backslash-escaped, newline/carriage-return/tab use their
/// letter escapes and every other control character becomes `\uXXXX`.
/// Non-ASCII text is passed through unchanged.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            ch if ch.is_control() => {
                escaped.push_str(&format!("\\u{:04x}", ch as u32));
            }
            ch => escaped.push(ch),
        }
    }
    escaped
}

/// Inverse of [`escape_value`]; unknown escapes yield the escaped character itself.
pub fn unescape_value(value: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Usage)
                            .with_message(format!("invalid unicode escape: \\u{hex}"))
                    })?;
                out.push(code);
            }
            Some(other) => out.push(other),
            None => {
                return Err(
                    Error::new(ErrorKind::Usage).with_message("dangling escape at end of value")
                );
            }
        }
    }
    Ok(out)
}

fn tokenize(line: &str) -> Result<Vec<String>, Error> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '"' || ch == '\'' {
            let quote = ch;
            chars.next();
            let mut raw = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '\\' {
                    raw.push(c);
                    if let Some(next) = chars.next() {
                        raw.push(next);
                    }
                    continue;
                }
                if c == quote {
                    closed = true;
                    break;
                }
                raw.push(c);
            }
            if !closed {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("unterminated quoted value")
                    .with_command(line));
            }
            tokens.push(unescape_value(&raw)?);
            continue;
        }
        let mut raw = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            raw.push(c);
            chars.next();
        }
        tokens.push(unescape_value(&raw)?);
    }
    Ok(tokens)
}

fn positional_arguments(name: &str) -> &'static [&'static str] {
    match name {
        "select" => &[
            "table",
            "match_columns",
            "query",
            "filter",
            "scorer",
            "sortby",
            "output_columns",
            "offset",
            "limit",
            "drilldown",
            "drilldown_sortby",
            "drilldown_output_columns",
            "drilldown_offset",
            "drilldown_limit",
        ],
        "load" => &["values", "table", "columns", "ifexists", "input_type"],
        "table_create" => &[
            "name",
            "flags",
            "key_type",
            "value_type",
            "default_tokenizer",
            "normalizer",
            "token_filters",
        ],
        "column_create" => &["table", "name", "flags", "type", "source"],
        "delete" => &["table", "key", "id", "filter"],
        "table_remove" => &["name"],
        "column_remove" => &["table", "name"],
        _ => &[],
    }
}

fn parse_wire_form(line: &str) -> Result<Command, Error> {
    let mut tokens = tokenize(line)?.into_iter();
    let name = tokens
        .next()
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("missing command name"))?;
    let positional = positional_arguments(&name);
    let mut next_positional = 0usize;
    let mut command = Command::new(name);
    while let Some(token) = tokens.next() {
        if let Some(key) = token.strip_prefix("--") {
            let value = tokens.next().ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("missing value for --{key}"))
                    .with_command(line)
            })?;
            command = command.with_argument(key, value);
            continue;
        }
        let Some(key) = positional.get(next_positional) else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unexpected positional argument: {token}"))
                .with_command(line));
        };
        next_positional += 1;
        command = command.with_argument(*key, token);
    }
    Ok(command)
}

fn parse_uri_form(line: &str) -> Result<Command, Error> {
    let (path, query) = match line.split_once('?') {
        Some((path, query)) => (path, query),
        None => (line, ""),
    };
    let (prefix, last) = match path.rsplit_once('/') {
        Some((prefix, last)) => (prefix, last),
        None => ("", path),
    };
    let (name, extension) = match last.split_once('.') {
        Some((name, extension)) => (name, Some(extension)),
        None => (last, None),
    };
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("missing command name in path")
            .with_command(line));
    }
    let mut command = Command::new(name);
    if !prefix.is_empty() {
        command = command.with_path_prefix(prefix);
    }
    if let Some(output_type) = extension.and_then(OutputType::parse) {
        command = command.with_output_type(output_type);
    }
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        command = command.with_argument(key.into_owned(), value.into_owned());
    }
    Ok(command)
}
