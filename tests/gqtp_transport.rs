//! Purpose: End-to-end tests for the GQTP transport against a fake framed server.
//! Exports: None (integration test module).
//! Role: Validate request framing, multi-frame responses, status mapping and socket errors.
//! Invariants: Loopback-only listener on an ephemeral port; one connection per test.
//! Invariants: Bounded read timeouts keep failing tests from hanging.

use groonga_client::api::{Client, ClientOptions, Command, ErrorKind, Protocol};
use groonga_client::core::frame::{FLAG_MORE, FLAG_TAIL, FRAME_HEADER_LEN, FrameHeader, QueryType};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// One reply: `(status, frames)`; every frame but the last carries `MORE`.
type Reply = (i16, Vec<&'static str>);

fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    if let Err(err) = stream.read_exact(&mut header) {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err);
    }
    let header = FrameHeader::decode(&header)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
    let mut payload = vec![0u8; header.size as usize];
    stream.read_exact(&mut payload)?;
    Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
}

fn write_reply(stream: &mut TcpStream, (status, frames): &Reply) -> std::io::Result<()> {
    for (index, frame) in frames.iter().enumerate() {
        let last = index + 1 == frames.len();
        let header = FrameHeader {
            query_type: QueryType::Json,
            flags: if last { FLAG_TAIL } else { FLAG_MORE },
            status: *status as u16,
            size: frame.len() as u32,
            ..FrameHeader::default()
        };
        stream.write_all(&header.encode())?;
        stream.write_all(frame.as_bytes())?;
    }
    stream.flush()
}

/// Serves `replies` in order on one connection; received command lines go to the channel.
fn spawn_server(replies: Vec<Reply>) -> TestResult<(u16, mpsc::Receiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        for reply in &replies {
            match read_request(&mut stream) {
                Ok(Some(line)) => {
                    let _ = tx.send(line);
                }
                _ => return,
            }
            if write_reply(&mut stream, reply).is_err() {
                return;
            }
        }
    });
    Ok((port, rx))
}

fn client(port: u16) -> groonga_client::api::ApiResult<Client> {
    let options = ClientOptions::new()
        .with_protocol(Protocol::Gqtp)
        .with_host("127.0.0.1")
        .with_port(port)
        .with_read_timeout(Duration::from_secs(5));
    Client::open(options)
}

#[test]
fn multi_frame_bodies_are_joined_and_wrapped() -> TestResult<()> {
    let (port, requests) = spawn_server(vec![(0, vec!["{\"alloc_", "count\":1}"])])?;
    let client = client(port)?;
    let response = client.execute_command(Command::new("status"))?;

    assert!(response.is_success());
    assert_eq!(response.value(), Some(&json!({"alloc_count": 1})));
    assert!(response.elapsed_time().is_some());
    assert_eq!(requests.recv_timeout(Duration::from_secs(5))?, "status");
    assert!(client.is_connected());
    Ok(())
}

#[test]
fn negative_status_becomes_error_response() -> TestResult<()> {
    let (port, _requests) = spawn_server(vec![(-22, vec!["invalid table name"])])?;
    let client = client(port)?;
    let response = client.execute("select", [("table", "Nope")])?;

    assert!(!response.is_success());
    assert_eq!(response.return_code(), -22);
    assert_eq!(response.error_message().as_deref(), Some("invalid table name"));
    Ok(())
}

#[test]
fn commands_share_one_connection_in_order() -> TestResult<()> {
    let (port, requests) = spawn_server(vec![(0, vec!["1"]), (0, vec!["[[[0],[]]]"])])?;
    let client = client(port)?;
    let load = Command::new("load")
        .with_argument("table", "Users")
        .with_payload(r#"[{"_key":"alice"}]"#);
    let loaded = client.execute_command(load)?;
    let selected = client.execute("select", [("table", "Users")])?;

    assert_eq!(loaded.load().map(|load| load.n_loaded_records), Some(1));
    assert_eq!(selected.select().map(|select| select.n_hits), Some(0));
    let first = requests.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(first, r#"load --table "Users" --values "[{\"_key\":\"alice\"}]""#);
    assert_eq!(
        requests.recv_timeout(Duration::from_secs(5))?,
        r#"select --table "Users""#
    );
    Ok(())
}

#[test]
fn corrupt_frame_drops_the_connection() -> TestResult<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let server = thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        if let Ok(Some(_)) = read_request(&mut stream) {
            let _ = stream.write_all(&[0u8; FRAME_HEADER_LEN]);
            let _ = stream.flush();
        }
        thread::sleep(Duration::from_millis(200));
    });

    let client = client(port)?;
    let err = client
        .execute_command(Command::new("status"))
        .expect_err("bad magic");
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert!(!client.is_connected());
    let _ = server.join();
    Ok(())
}

#[test]
fn refused_connection_is_connection_error() -> TestResult<()> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let err = client(port).expect_err("refused");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.is_transport());
    Ok(())
}

#[test]
fn silent_server_times_out() -> TestResult<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || {
        let accepted = listener.accept();
        let _ = release_rx.recv_timeout(Duration::from_secs(10));
        drop(accepted);
    });

    let options = ClientOptions::new()
        .with_protocol(Protocol::Gqtp)
        .with_host("127.0.0.1")
        .with_port(port)
        .with_read_timeout(Duration::from_millis(200));
    let client = Client::open(options)?;
    let err = client
        .execute_command(Command::new("status"))
        .expect_err("timeout");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!client.is_connected());

    let _ = release_tx.send(());
    let _ = server.join();
    Ok(())
}
