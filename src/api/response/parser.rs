//! Purpose: Turn raw transport bytes into a `Response` for a given command.
//! Exports: `ResponseParser`.
//! Role: Pipeline: format decode, error precedence, per-command body decode, trace logs.
//! Invariants: A non-zero return code yields `Body::Error` even if the body would decode.
//! Invariants: Decoder failures surface as `InvalidResponse` with command and raw text.
#![allow(clippy::result_large_err)]

use bstr::ByteSlice;
use serde_json::Value;
use tracing::trace;

use super::format::decode_envelope;
use super::listing::{decode_columns, decode_tables};
use super::load::decode_load;
use super::registry::{DecoderKind, DecoderRegistry};
use super::schema::decode_schema;
use super::select::decode_select;
use super::{Body, Response, return_code_of};
use crate::core::command::Command;
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{ColumnSpec, Record, build_record};

#[derive(Clone, Debug, Default)]
pub struct ResponseParser {
    registry: DecoderRegistry,
}

impl ResponseParser {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn parse(&self, command: &Command, raw: Vec<u8>) -> Result<Response, Error> {
        let Some(envelope) = decode_envelope(command, &raw)? else {
            return Ok(Response::new(command.clone(), None, Body::Raw, raw));
        };
        let body_value = envelope.body.unwrap_or(Value::Null);
        let return_code = return_code_of(envelope.header.as_ref());

        let body = if return_code != 0 {
            trace!(command = command.name(), return_code, "error response");
            Body::Error(body_value)
        } else {
            let kind = self.registry.lookup(command.name());
            decode_body(kind, command, &body_value).map_err(|message| {
                Error::new(ErrorKind::InvalidResponse)
                    .with_message(format!("failed to decode {} body: {message}", command.name()))
                    .with_command(command.to_wire_form())
                    .with_raw(raw.to_str_lossy().into_owned())
            })?
        };

        let mut response = Response::new(command.clone(), envelope.header, body, raw);
        if let Some(trace_log) = &envelope.trace_log {
            response = response.with_trace_logs(decode_trace_log(trace_log));
        }
        Ok(response)
    }
}

fn decode_body(kind: DecoderKind, command: &Command, body: &Value) -> Result<Body, String> {
    Ok(match kind {
        DecoderKind::Generic => Body::Generic(body.clone()),
        DecoderKind::Select => Body::Select(decode_select(command, body)?),
        DecoderKind::Load => Body::Load(decode_load(body)?),
        DecoderKind::TableList => Body::TableList(decode_tables(body)?),
        DecoderKind::ColumnList => Body::ColumnList(decode_columns(body)?),
        DecoderKind::Schema => Body::Schema(decode_schema(body)?),
    })
}

/// `{"columns": [{"name": ..}], "logs": [[..], ..]}` into one record per log row.
fn decode_trace_log(raw: &Value) -> Vec<Record> {
    let columns: Vec<ColumnSpec> = raw
        .get("columns")
        .and_then(Value::as_array)
        .map(|columns| columns.iter().filter_map(ColumnSpec::from_json).collect())
        .unwrap_or_default();
    raw.get("logs")
        .and_then(Value::as_array)
        .map(|logs| {
            logs.iter()
                .filter_map(Value::as_array)
                .map(|row| build_record(&columns, row))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::ResponseParser;
    use crate::api::response::Body;
    use crate::core::command::{Command, OutputType};
    use crate::core::error::ErrorKind;
    use serde_json::json;

    fn parse(command: Command, raw: &str) -> crate::api::response::Response {
        ResponseParser::default()
            .parse(&command, raw.as_bytes().to_vec())
            .expect("parse")
    }

    #[test]
    fn non_zero_return_code_wins_over_a_decodable_body() {
        let response = parse(
            Command::new("select"),
            r#"[[-63,0.0,0.0,"syntax error"],[[[1],[["_id","UInt32"]],[1]]]]"#,
        );
        assert!(!response.is_success());
        assert!(matches!(response.body(), Body::Error(_)));
        assert_eq!(response.error_message().as_deref(), Some("syntax error"));
    }

    #[test]
    fn registered_commands_use_their_decoder() {
        let response = parse(Command::new("load"), "[[0,0.0,0.0],2]");
        assert_eq!(response.load().map(|load| load.n_loaded_records), Some(2));
        let response = parse(Command::new("status"), r#"[[0,0.0,0.0],{"alloc_count":1}]"#);
        assert_eq!(response.value(), Some(&json!({"alloc_count": 1})));
    }

    #[test]
    fn tsv_select_end_to_end() {
        let command = Command::new("select").with_output_type(OutputType::Tsv);
        let response = parse(command, " 0\t0\t0.0\n100\n[\t\"_id\"\t\"UInt32\"\t]\n1\n2\nEND\n");
        assert_eq!(response.return_code(), 0);
        let select = response.select().expect("select");
        assert_eq!(select.n_hits, 100);
        let records: Vec<_> = select.records.iter().map(|record| record.to_json()).collect();
        assert_eq!(records, vec![json!({"_id": "1"}), json!({"_id": "2"})]);
    }

    #[test]
    fn bad_body_shape_is_invalid_response() {
        let err = ResponseParser::default()
            .parse(&Command::new("select"), b"[[0,0.0,0.0],true]".to_vec())
            .expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
        assert_eq!(err.raw(), Some("[[0,0.0,0.0],true]"));
    }

    #[test]
    fn trace_logs_become_records() {
        let raw = r#"{"header":{"return_code":0,"start_time":0,"elapsed_time":0},
            "trace_log":{"columns":[{"name":"depth"},{"name":"name"}],"logs":[[1,"filter"]]},
            "body":{"n_hits":0,"columns":[],"records":[]}}"#;
        let response = parse(Command::new("select"), raw);
        let logs = response.trace_logs().expect("trace logs");
        assert_eq!(logs[0].to_json(), json!({"depth": 1, "name": "filter"}));
    }

    #[test]
    fn opaque_bodies_stay_raw() {
        let command = Command::new("select").with_output_type(OutputType::Arrow);
        let response = parse(command, "ARROW1");
        assert!(matches!(response.body(), Body::Raw));
        assert_eq!(response.raw(), b"ARROW1");
    }
}
