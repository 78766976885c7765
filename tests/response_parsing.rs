//! Purpose: Contract tests for decoding raw server output into typed responses.
//! Exports: None (integration test module).
//! Role: Exercise the public `ResponseParser` across output types and command decoders.
//! Invariants: Inputs are literal server payloads; no transport involved.

use groonga_client::api::{
    Body, Command, DecoderKind, DecoderRegistry, Error, ErrorKind, FieldValue, OutputType,
    Response, ResponseParser,
};
use serde_json::json;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn parse(command: Command, raw: &str) -> Result<Response, Error> {
    ResponseParser::default().parse(&command, raw.as_bytes().to_vec())
}

#[test]
fn select_records_convert_time_and_dedupe_names() -> TestResult<()> {
    let raw = r#"[[0,1700000000.0,0.01],[[[2],
        [["_key","ShortText"],["updated_at","Time"],["score","Int32"],["score","Int32"]],
        ["a",1700000000.5,1,2],
        ["b",1700000001.0,3,4]]]]"#;
    let response = parse(Command::new("select"), raw)?;
    let select = response.select().ok_or("select body")?;
    assert_eq!(select.n_hits, 2);
    let first = &select.records[0];
    assert_eq!(first.keys().collect::<Vec<_>>(), vec!["_key", "updated_at", "score", "score2"]);
    let updated = first
        .get("updated_at")
        .and_then(FieldValue::as_time)
        .ok_or("time column")?;
    assert_eq!(updated.unix_timestamp(), 1_700_000_000);
    assert_eq!(updated.millisecond(), 500);
    assert_eq!(first.get("score2").and_then(FieldValue::as_i64), Some(2));
    assert_eq!(select.raw_records[1], json!(["b", 1700000001.0, 3, 4]));
    Ok(())
}

#[test]
fn labeled_drilldowns_decode_from_v3() -> TestResult<()> {
    let command = Command::new("select")
        .with_argument("command_version", "3")
        .with_argument("drilldowns[tag].keys", "tag");
    let raw = r#"{"header":{"return_code":0,"start_time":0.0,"elapsed_time":0.0},
        "body":{"n_hits":3,"columns":[{"name":"_key","type":"ShortText"}],
                "records":[["a"],["b"],["c"]],
                "drilldowns":{"tag":{"n_hits":2,
                    "columns":[{"name":"_key","type":"ShortText"},{"name":"_nsubrecs","type":"Int32"}],
                    "records":[["rust",2],["groonga",1]]}}}}"#;
    let response = parse(command, raw)?;
    let select = response.select().ok_or("select body")?;
    assert!(select.drilldowns.is_labeled());
    let tag = select.drilldowns.get("tag").ok_or("tag drilldown")?;
    assert_eq!(tag.keys, vec!["tag".to_string()]);
    assert_eq!(tag.n_hits, 2);
    assert_eq!(tag.records[0].to_json(), json!({"_key": "rust", "_nsubrecs": 2}));
    Ok(())
}

#[test]
fn xml_select_matches_json_select() -> TestResult<()> {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<RESULT CODE="0" UP="0.0" ELAPSED="0.0"><SEGMENTS><SEGMENT><RESULTPAGE>
<RESULTSET OFFSET="0" LIMIT="10" NHITS="2">
<HIT NO="1"><FIELD NAME="_key">alice</FIELD></HIT>
<HIT NO="2"><FIELD NAME="_key">bob</FIELD></HIT>
</RESULTSET></RESULTPAGE></SEGMENT></SEGMENTS></RESULT>"#;
    let response = parse(Command::new("select").with_output_type(OutputType::Xml), xml)?;
    let select = response.select().ok_or("select body")?;
    assert_eq!(select.n_hits, 2);
    let keys: Vec<_> = select
        .records
        .iter()
        .filter_map(|record| record.get("_key").and_then(FieldValue::as_str))
        .collect();
    assert_eq!(keys, vec!["alice", "bob"]);
    Ok(())
}

#[test]
fn jsonp_wrapper_is_stripped() -> TestResult<()> {
    let response = parse(Command::new("status"), r#"cb([[0,0.0,0.0],{"n_queries":3}]);"#)?;
    assert_eq!(response.value(), Some(&json!({"n_queries": 3})));
    Ok(())
}

#[test]
fn table_list_rows_become_tables() -> TestResult<()> {
    let raw = r#"[[0,0.0,0.0],[
        [["id","UInt32"],["name","ShortText"],["path","ShortText"],["flags","ShortText"],
         ["domain","ShortText"],["range","ShortText"],["default_tokenizer","ShortText"],
         ["normalizer","ShortText"]],
        [256,"Users","db/users.0000100","TABLE_HASH_KEY|PERSISTENT","ShortText",null,null,null],
        [257,"Terms","db/terms.0000101","TABLE_PAT_KEY|PERSISTENT","ShortText",null,
         "TokenBigram","NormalizerAuto"]]]"#;
    let response = parse(Command::new("table_list"), raw)?;
    let tables = response.tables().ok_or("table list")?;
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].name, "Users");
    assert_eq!(tables[0].flag_list(), vec!["TABLE_HASH_KEY", "PERSISTENT"]);
    assert_eq!(tables[1].default_tokenizer.as_deref(), Some("TokenBigram"));
    Ok(())
}

#[test]
fn load_reports_counts_and_ids() -> TestResult<()> {
    let command = Command::new("load")
        .with_argument("command_version", "3")
        .with_argument("output_ids", "yes");
    let raw = r#"{"header":{"return_code":0,"start_time":0.0,"elapsed_time":0.0},
        "body":{"n_loaded_records":2,"loaded_ids":[1,2]}}"#;
    let response = parse(command, raw)?;
    let load = response.load().ok_or("load body")?;
    assert_eq!(load.n_loaded_records, 2);
    assert_eq!(load.loaded_ids, vec![1, 2]);
    Ok(())
}

#[test]
fn error_responses_keep_location_through_the_error_type() -> TestResult<()> {
    let raw = r#"[[-22,1.0,0.5,"invalid table name",[["grn_select","lib/proc.c",1234]]]]"#;
    let response = parse(Command::new("select"), raw)?;
    assert!(matches!(response.body(), Body::Error(_)));
    let err = response.to_error();
    assert_eq!(err.kind(), ErrorKind::ErrorResponse);
    assert_eq!(err.return_code(), Some(-22));
    assert_eq!(err.error_message().as_deref(), Some("invalid table name"));
    assert_eq!(err.error_function().as_deref(), Some("grn_select"));
    assert_eq!(err.error_file().as_deref(), Some("lib/proc.c"));
    assert_eq!(err.error_line(), Some(1234));
    Ok(())
}

#[test]
fn truncated_json_is_invalid_response() {
    let err = parse(Command::new("status"), "[[0,0.0,0.0],{\"a\":").expect_err("truncated");
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert_eq!(err.raw(), Some("[[0,0.0,0.0],{\"a\":"));
}

#[test]
fn custom_registry_routes_new_commands() -> TestResult<()> {
    let registry = DecoderRegistry::default().with("my_select", DecoderKind::Select);
    let parser = ResponseParser::new(registry);
    let raw = br#"[[0,0.0,0.0],[[[1],[["_id","UInt32"]],[1]]]]"#.to_vec();
    let response = parser.parse(&Command::new("my_select"), raw)?;
    assert_eq!(response.select().map(|select| select.n_hits), Some(1));
    Ok(())
}
