//! Purpose: Decode raw response bytes into a header value and a body value per output type.
//! Exports: `Envelope`, `decode_envelope`.
//! Role: Format layer under the response parser; XML and TSV normalize to the v1 JSON shapes.
//! Invariants: JSON v1 headers stay arrays and v3 headers stay objects; normalization happens later.
//! Invariants: Malformed input is `InvalidResponse` with the command and raw text attached.
//! Notes: XML is read with `quick-xml` into a small element tree before conversion.
#![allow(clippy::result_large_err)]

use bstr::ByteSlice;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Value, json};

use crate::core::command::{Command, OutputType, unescape_value};
use crate::core::error::{Error, ErrorKind};
use crate::json::parse::{from_str, is_v1_header};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    pub header: Option<Value>,
    pub body: Option<Value>,
    pub trace_log: Option<Value>,
}

/// `None` means the body is opaque (arrow, none) and should stay raw.
pub fn decode_envelope(command: &Command, raw: &[u8]) -> Result<Option<Envelope>, Error> {
    let text = raw.to_str_lossy();
    let decoded = match command.output_type() {
        OutputType::Json => decode_json(&text),
        OutputType::Xml => decode_xml(&text),
        OutputType::Tsv => decode_tsv(&text),
        OutputType::Arrow | OutputType::None => return Ok(None),
    };
    decoded.map(Some).map_err(|err| {
        let kind = command.output_type().as_str();
        Error::new(ErrorKind::InvalidResponse)
            .with_message(format!("failed to decode {kind} response: {err}"))
            .with_command(command.to_wire_form())
            .with_raw(text.into_owned())
    })
}

fn decode_json(text: &str) -> Result<Envelope, String> {
    if text.trim().is_empty() {
        return Ok(Envelope::default());
    }
    let value: Value = from_str(text).map_err(|err| err.to_string())?;
    Ok(match value {
        Value::Array(mut items) if is_v1_header(items.first()) => {
            let header = items.remove(0);
            let body = if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            };
            Envelope {
                header: Some(header),
                body,
                trace_log: None,
            }
        }
        Value::Object(mut map) if map.contains_key("header") => {
            let header = map.remove("header");
            let trace_log = map.remove("trace_log").or_else(|| {
                header
                    .as_ref()
                    .and_then(|header| header.get("trace_log"))
                    .cloned()
            });
            Envelope {
                header,
                body: map.remove("body"),
                trace_log,
            }
        }
        other => Envelope {
            header: None,
            body: Some(other),
            trace_log: None,
        },
    })
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| err.to_string())?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|err| err.to_string())?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Self::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }
}

fn parse_xml_tree(text: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;
    loop {
        let event = reader.read_event().map_err(|err| err.to_string())?;
        match event {
            Event::Start(start) => stack.push(XmlNode::from_start(&start)?),
            Event::Empty(start) => {
                let node = XmlNode::from_start(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack.pop().ok_or("unbalanced closing tag")?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(content) => {
                if let Some(node) = stack.last_mut() {
                    node.text
                        .push_str(&content.unescape().map_err(|err| err.to_string())?);
                }
            }
            Event::CData(content) => {
                if let Some(node) = stack.last_mut() {
                    node.text
                        .push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err("unterminated element".to_string());
    }
    root.ok_or_else(|| "missing root element".to_string())
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

fn decode_xml(text: &str) -> Result<Envelope, String> {
    let root = parse_xml_tree(text)?;
    if root.name != "RESULT" {
        return Ok(Envelope {
            header: None,
            body: Some(xml_to_value(&root)),
            trace_log: None,
        });
    }
    let code = root
        .attribute("CODE")
        .ok_or("RESULT without CODE")?
        .trim()
        .parse::<i64>()
        .map_err(|err| format!("bad CODE attribute: {err}"))?;
    let up = parse_float_attribute(&root, "UP")?;
    let elapsed = parse_float_attribute(&root, "ELAPSED")?;
    let mut header = vec![json!(code), json!(up), json!(elapsed)];
    let message = root.text.trim();
    if code != 0 && !message.is_empty() {
        header.push(Value::String(message.to_string()));
    }
    let body = root.children.first().map(|child| {
        if child.name == "SEGMENTS" {
            Value::Array(collect_result_sets(child))
        } else {
            xml_to_value(child)
        }
    });
    Ok(Envelope {
        header: Some(Value::Array(header)),
        body,
        trace_log: None,
    })
}

fn parse_float_attribute(node: &XmlNode, key: &str) -> Result<f64, String> {
    match node.attribute(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|err| format!("bad {key} attribute: {err}")),
        None => Ok(0.0),
    }
}

fn collect_result_sets(node: &XmlNode) -> Vec<Value> {
    let mut out = Vec::new();
    for child in &node.children {
        if child.name == "RESULTSET" {
            out.push(result_set_to_block(child));
        } else {
            out.extend(collect_result_sets(child));
        }
    }
    out
}

/// `<RESULTSET NHITS=..><HIT><FIELD NAME=..>` becomes `[[n_hits], columns, rows...]`.
fn result_set_to_block(node: &XmlNode) -> Value {
    let n_hits = node
        .attribute("NHITS")
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0);
    let hits: Vec<&XmlNode> = node
        .children
        .iter()
        .filter(|child| child.name == "HIT")
        .collect();
    let columns: Vec<Value> = hits
        .first()
        .map(|hit| {
            hit.children
                .iter()
                .filter(|field| field.name == "FIELD")
                .map(|field| json!([field.attribute("NAME").unwrap_or_default(), ""]))
                .collect()
        })
        .unwrap_or_default();
    let mut block = vec![json!([n_hits]), Value::Array(columns)];
    for hit in hits {
        let row = hit
            .children
            .iter()
            .filter(|field| field.name == "FIELD")
            .map(xml_leaf_value)
            .collect();
        block.push(Value::Array(row));
    }
    Value::Array(block)
}

fn xml_to_value(node: &XmlNode) -> Value {
    if node.name == "RESULTSET" {
        return result_set_to_block(node);
    }
    if let Some(segments) = node.child("SEGMENTS") {
        return Value::Array(collect_result_sets(segments));
    }
    if node.children.is_empty() {
        return xml_leaf_value(node);
    }
    Value::Array(node.children.iter().map(xml_to_value).collect())
}

fn xml_leaf_value(node: &XmlNode) -> Value {
    let text = node.text.as_str();
    let type_name = node.attribute("TYPE").unwrap_or(node.name.as_str());
    match type_name {
        "NULL" => Value::Null,
        "INT" => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT" => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        "BOOL" => Value::Bool(text.trim() == "true"),
        _ => Value::String(text.to_string()),
    }
}

enum TsvRow {
    Columns(Vec<Value>),
    Values(Vec<Value>),
}

fn decode_tsv(text: &str) -> Result<Envelope, String> {
    let mut lines = text.lines();
    let header_line = lines.next().ok_or("empty tsv response")?;
    let header = parse_tsv_header(header_line)?;
    let mut rows = Vec::new();
    for line in lines {
        if line.trim() == "END" {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        rows.push(parse_tsv_row(line)?);
    }
    Ok(Envelope {
        header: Some(header),
        body: tsv_body(rows),
        trace_log: None,
    })
}

/// `rc start elapsed [message [function file line]]`.
fn parse_tsv_header(line: &str) -> Result<Value, String> {
    let fields: Vec<String> = line
        .split('\t')
        .map(unquote_tsv)
        .collect::<Result<_, _>>()?;
    if !matches!(fields.len(), 3 | 4 | 7) {
        return Err(format!("tsv header has {} fields", fields.len()));
    }
    let code = fields[0]
        .parse::<i64>()
        .map_err(|err| format!("bad tsv return code: {err}"))?;
    let start: f64 = fields[1]
        .parse()
        .map_err(|err| format!("bad tsv start time: {err}"))?;
    let elapsed: f64 = fields[2]
        .parse()
        .map_err(|err| format!("bad tsv elapsed time: {err}"))?;
    let mut header = vec![json!(code), json!(start), json!(elapsed)];
    if fields.len() >= 4 {
        header.push(Value::String(fields[3].clone()));
    }
    if fields.len() == 7 {
        let line_number = fields[6].parse::<i64>().map(Value::from).unwrap_or(Value::Null);
        header.push(json!([[fields[4], fields[5], line_number]]));
    }
    Ok(Value::Array(header))
}

fn parse_tsv_row(line: &str) -> Result<TsvRow, String> {
    let cells: Vec<&str> = line.split('\t').collect();
    let bracketed = cells.first().map(|cell| cell.trim()) == Some("[")
        && cells.last().map(|cell| cell.trim()) == Some("]");
    if bracketed && cells.len() >= 2 {
        let inner: Vec<String> = cells[1..cells.len() - 1]
            .iter()
            .map(|cell| unquote_tsv(cell))
            .collect::<Result<_, _>>()?;
        let columns = inner
            .chunks(2)
            .map(|pair| json!([pair[0], pair.get(1).cloned().unwrap_or_default()]))
            .collect();
        return Ok(TsvRow::Columns(columns));
    }
    let values = cells
        .iter()
        .map(|cell| unquote_tsv(cell).map(Value::String))
        .collect::<Result<_, _>>()?;
    Ok(TsvRow::Values(values))
}

fn unquote_tsv(cell: &str) -> Result<String, String> {
    let cell = cell.trim();
    if cell.len() >= 2 && cell.starts_with('"') && cell.ends_with('"') {
        let inner = &cell[1..cell.len() - 1];
        return unescape_value(&inner.replace("\"\"", "\\\"")).map_err(|err| err.to_string());
    }
    Ok(cell.to_string())
}

/// Group rows into the v1 body shapes: count-led blocks, a listing, or plain rows.
fn tsv_body(rows: Vec<TsvRow>) -> Option<Value> {
    if rows.is_empty() {
        return None;
    }
    let starts_block = |rows: &[TsvRow], index: usize| {
        matches!(rows.get(index), Some(TsvRow::Values(values)) if values.len() == 1)
            && matches!(rows.get(index + 1), Some(TsvRow::Columns(_)))
    };
    if let Some(TsvRow::Columns(_)) = rows.first() {
        let block = rows
            .into_iter()
            .map(|row| match row {
                TsvRow::Columns(columns) => Value::Array(columns),
                TsvRow::Values(values) => Value::Array(values),
            })
            .collect();
        return Some(Value::Array(block));
    }
    if starts_block(rows.as_slice(), 0) {
        let mut blocks: Vec<Vec<Value>> = Vec::new();
        for index in 0..rows.len() {
            if starts_block(rows.as_slice(), index) {
                let TsvRow::Values(values) = &rows[index] else {
                    continue;
                };
                let count = values[0]
                    .as_str()
                    .and_then(|value| value.parse::<i64>().ok())
                    .map(Value::from)
                    .unwrap_or_else(|| values[0].clone());
                blocks.push(vec![json!([count])]);
                continue;
            }
            if let Some(block) = blocks.last_mut() {
                match &rows[index] {
                    TsvRow::Columns(columns) => block.push(Value::Array(columns.clone())),
                    TsvRow::Values(values) => block.push(Value::Array(values.clone())),
                }
            }
        }
        return Some(Value::Array(blocks.into_iter().map(Value::Array).collect()));
    }
    let mut values: Vec<Value> = rows
        .into_iter()
        .map(|row| match row {
            TsvRow::Columns(columns) => Value::Array(columns),
            TsvRow::Values(mut values) if values.len() == 1 => values.remove(0),
            TsvRow::Values(values) => Value::Array(values),
        })
        .collect();
    if values.len() == 1 {
        return values.pop();
    }
    Some(Value::Array(values))
}
