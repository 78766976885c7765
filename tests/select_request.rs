//! Purpose: Tests for building and executing select requests against a client.
//! Exports: None (integration test module).
//! Role: Validate merged parameters reach the transport and responses carry pagination.
//! Invariants: Uses an in-process transport that echoes canned select bodies.

use groonga_client::api::{
    Client, Command, DecoderRegistry, Error, ErrorKind, Paginated, SelectRequest, Transport,
};
use std::sync::{Arc, Mutex};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Clone)]
struct Canned {
    body: &'static str,
    last: Arc<Mutex<Option<Command>>>,
}

impl Canned {
    fn new(body: &'static str) -> Self {
        Self {
            body,
            last: Arc::new(Mutex::new(None)),
        }
    }

    fn last(&self) -> Option<Command> {
        self.last
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl Transport for Canned {
    fn send(&mut self, command: &Command) -> Result<Vec<u8>, Error> {
        *self.last.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(command.clone());
        Ok(self.body.as_bytes().to_vec())
    }
}

const HITS_25: &str = r#"[[0,0.0,0.0],[[[25],[["_key","ShortText"]],["a"],["b"],["c"],["d"],["e"]]]]"#;

#[test]
fn builder_parameters_reach_the_transport() -> TestResult<()> {
    let transport = Canned::new(HITS_25);
    let client = Client::with_transport(transport.clone(), DecoderRegistry::default());
    let request = SelectRequest::new("Users")
        .filter("age >= 20")
        .filter_equal("country", "jp")
        .sort_keys(["-age", "_key"])
        .drilldown(["country"]);
    request.execute_on(&client)?;

    let sent = transport.last().ok_or("no command sent")?;
    assert_eq!(sent.name(), "select");
    assert_eq!(sent.table(), Some("Users"));
    assert_eq!(sent.argument("filter"), Some(r#"(age >= 20) && (country == "jp")"#));
    assert_eq!(sent.argument("sort_keys"), Some("-age, _key"));
    assert!(sent.to_query_form().starts_with("/d/select?table=Users&filter="));
    Ok(())
}

#[test]
fn paginated_responses_know_their_page() -> TestResult<()> {
    let client = Client::with_transport(Canned::new(HITS_25), DecoderRegistry::default());
    let response = SelectRequest::new("Users").paginate(2, 5).execute_on(&client)?;
    assert_eq!(response.total_count(), 25);
    assert_eq!(response.current_page(), 2);
    assert_eq!(response.total_pages(), 5);
    assert_eq!(response.previous_page(), Some(1));
    assert_eq!(response.next_page(), Some(3));
    assert!(!response.is_last_page());
    Ok(())
}

#[test]
fn unsuccessful_select_is_an_error_response() {
    let client = Client::with_transport(
        Canned::new(r#"[[-22,0.0,0.0,"invalid table name: <Nope>"]]"#),
        DecoderRegistry::default(),
    );
    let err = SelectRequest::new("Nope")
        .execute_on(&client)
        .expect_err("error response");
    assert_eq!(err.kind(), ErrorKind::ErrorResponse);
    assert_eq!(err.return_code(), Some(-22));
    assert_eq!(err.error_message().as_deref(), Some("invalid table name: <Nope>"));
    assert_eq!(err.detail().map(|detail| detail.return_code), Some(-22));
}

#[test]
fn builders_are_immutable_and_shareable() {
    let base = SelectRequest::new("Memos").limit(10);
    let tagged = base.drilldowns("tag").keys(["tag"]);
    let ranked = base.columns("rank").value("_score * 2");
    assert_eq!(base.parameters().len(), 2);
    assert_eq!(tagged.parameters().get("drilldowns[tag].keys"), Some("tag"));
    assert_eq!(tagged.parameters().get("columns[rank].value"), None);
    assert_eq!(ranked.parameters().get("columns[rank].value"), Some("_score * 2"));
}
