//! Purpose: Send commands over the binary GQTP protocol on one persistent TCP connection.
//! Exports: `GqtpTransport`, `DEFAULT_GQTP_PORT`.
//! Role: Framed implementation of `Transport`; rewraps frames into text envelopes.
//! Invariants: Responses are read in submission order; one request in flight per connection.
//! Invariants: Frames flagged `MORE` are concatenated into one body.
//! Invariants: A broken connection is dropped and reopened lazily on the next send.
#![allow(clippy::result_large_err)]

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bstr::ByteSlice;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::transport::Transport;
use crate::core::command::{Command, OutputType};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{FRAME_HEADER_LEN, FrameHeader, encode_request};

pub const DEFAULT_GQTP_PORT: u16 = 10043;

type ApiResult<T> = Result<T, Error>;

pub struct GqtpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    read_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl GqtpTransport {
    /// Connects eagerly so an unreachable server fails at open time.
    pub fn connect(host: impl Into<String>, port: u16) -> ApiResult<Self> {
        Self::connect_with(host, port, None, None)
    }

    pub fn connect_with(
        host: impl Into<String>,
        port: u16,
        read_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
    ) -> ApiResult<Self> {
        let mut transport = Self {
            host: host.into(),
            port,
            stream: None,
            read_timeout,
            connect_timeout,
        };
        transport.ensure_connected()?;
        Ok(transport)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn ensure_connected(&mut self) -> ApiResult<&mut TcpStream> {
        if self.stream.is_none() {
            let stream = self.open_stream()?;
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("gqtp stream missing after connect")
        })
    }

    fn open_stream(&self) -> ApiResult<TcpStream> {
        let target = format!("{}:{}", self.host, self.port);
        debug!(target = target.as_str(), "gqtp connect");
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| connect_error(&target, err))?;
        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream
                        .set_read_timeout(self.read_timeout)
                        .map_err(|err| connect_error(&target, err))?;
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        let err = last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"));
        Err(connect_error(&target, err))
    }

    fn round_trip(&mut self, command: &Command) -> ApiResult<(FrameHeader, Vec<u8>)> {
        let frame = encode_request(command.to_wire_form().as_bytes())?;
        let stream = self.ensure_connected()?;
        stream
            .write_all(&frame)
            .and_then(|()| stream.flush())
            .map_err(|err| io_error(err, "failed to write gqtp request", command))?;
        trace!(command = command.name(), bytes = frame.len(), "gqtp frame sent");

        let mut body = Vec::new();
        loop {
            let header = read_frame(stream, &mut body)
                .map_err(|err| io_error(err, "failed to read gqtp response", command))??;
            trace!(
                status = header.status,
                size = header.size,
                more = header.has_more(),
                "gqtp frame received"
            );
            if !header.has_more() {
                return Ok((header, body));
            }
        }
    }
}

impl Transport for GqtpTransport {
    fn send(&mut self, command: &Command) -> ApiResult<Vec<u8>> {
        let started_at = SystemTime::now();
        let started = Instant::now();
        let result = self.round_trip(command);
        let (header, body) = match result {
            Ok(parts) => parts,
            Err(err) => {
                if err.is_transport() || err.kind() == ErrorKind::InvalidResponse {
                    debug!(error = %err, "gqtp connection dropped");
                    self.stream = None;
                }
                return Err(err);
            }
        };
        let start = started_at
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs_f64())
            .unwrap_or_default();
        let elapsed = started.elapsed().as_secs_f64();
        Ok(wrap_body(
            command.output_type(),
            header.return_code(),
            start,
            elapsed,
            body,
        ))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> ApiResult<()> {
        if let Some(stream) = self.stream.take() {
            debug!(host = self.host.as_str(), port = self.port, "gqtp close");
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }
}

impl Drop for GqtpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Appends one frame's body to `body`; the outer result carries socket errors.
fn read_frame(stream: &mut TcpStream, body: &mut Vec<u8>) -> io::Result<ApiResult<FrameHeader>> {
    let mut header_buf = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header_buf)?;
    let header = match FrameHeader::decode(&header_buf) {
        Ok(header) => header,
        Err(err) => return Ok(Err(err)),
    };
    let start = body.len();
    body.resize(start + header.size as usize, 0);
    stream.read_exact(&mut body[start..])?;
    Ok(Ok(header))
}

/// Rebuild the envelope the HTTP interface would have produced for this body.
fn wrap_body(
    output_type: OutputType,
    return_code: i64,
    start: f64,
    elapsed: f64,
    body: Vec<u8>,
) -> Vec<u8> {
    match output_type {
        OutputType::Json => wrap_json(return_code, start, elapsed, body),
        OutputType::Xml => wrap_xml(return_code, start, elapsed, &body),
        OutputType::Tsv => {
            let mut out = format!("{return_code}\t{start}\t{elapsed}\n").into_bytes();
            out.extend_from_slice(&body);
            out
        }
        OutputType::Arrow | OutputType::None => body,
    }
}

fn wrap_json(return_code: i64, start: f64, elapsed: f64, body: Vec<u8>) -> Vec<u8> {
    let trimmed = body.trim_start();
    if trimmed.starts_with(b"{") && crate::json::parse::looks_like_envelope(&body.to_str_lossy()) {
        return body;
    }
    let mut header = vec![json!(return_code), json!(start), json!(elapsed)];
    let text = body.to_str_lossy();
    let body_is_json = !trimmed.is_empty() && serde_json::from_str::<Value>(&text).is_ok();
    if return_code != 0 && !body_is_json && !trimmed.is_empty() {
        header.push(Value::String(text.trim().to_string()));
    }
    let header = Value::Array(header).to_string();
    if body_is_json {
        format!("[{header},{text}]").into_bytes()
    } else {
        format!("[{header}]").into_bytes()
    }
}

fn wrap_xml(return_code: i64, start: f64, elapsed: f64, body: &[u8]) -> Vec<u8> {
    let text = body.to_str_lossy();
    let mut inner = text.trim_start();
    if inner.starts_with("<?xml") {
        inner = inner
            .find("?>")
            .map(|end| inner[end + 2..].trim_start())
            .unwrap_or(inner);
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<RESULT CODE=\"{return_code}\" UP=\"{start}\" ELAPSED=\"{elapsed}\">{inner}</RESULT>\n"
    )
    .into_bytes()
}

fn connect_error(target: &str, err: io::Error) -> Error {
    let kind = if matches!(err.kind(), io::ErrorKind::TimedOut) {
        ErrorKind::Timeout
    } else {
        ErrorKind::Connection
    };
    Error::new(kind)
        .with_message(format!("failed to connect to gqtp server {target}"))
        .with_source(err)
}

fn io_error(err: io::Error, message: &str, command: &Command) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        _ => ErrorKind::Connection,
    };
    Error::new(kind)
        .with_message(message)
        .with_command(command.name())
        .with_source(err)
}
