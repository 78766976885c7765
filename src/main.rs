//! Purpose: `groonga-client` CLI: replay command files (or stdin) against a Groonga server.
//! Role: Binary crate root; maps flags onto `ClientOptions`/`StreamOptions` and drives `CommandStream`.
//! Invariants: Each response is printed raw on stdout, one per line, in dispatch order.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use groonga_client::api::{
    Client, ClientOptions, CommandStream, DEFAULT_CHUNK_SIZE, Error, ErrorKind, FailurePolicy,
    Protocol, Response, StreamOptions, StreamOutcome, TargetFilter, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "groonga-client",
    version,
    about = "Send Groonga commands over HTTP or GQTP",
    long_about = None,
    after_help = r#"EXAMPLES
  $ groonga-client --url http://localhost:10041/ dump.grn
  $ echo 'status' | groonga-client --protocol gqtp --port 10043
  $ groonga-client --target-table Users --target-column '/^name/' dump.grn"#
)]
struct Cli {
    #[arg(long, help = "Server URL (http://, https:// or gqtp://); overrides host/port/protocol")]
    url: Option<String>,
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, value_enum, default_value = "http")]
    protocol: ProtocolArg,
    #[arg(long)]
    user: Option<String>,
    #[arg(long, requires = "user")]
    password: Option<String>,
    #[arg(long, value_name = "SECONDS", help = "Read timeout; negative disables")]
    read_timeout: Option<f64>,
    #[arg(long, value_name = "SECONDS")]
    connect_timeout: Option<f64>,
    #[arg(long, help = "Send load bodies with a fixed Content-Length instead of chunked")]
    no_chunked: bool,
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help = "Rows per load request; 0 disables splitting")]
    load_chunk_size: usize,
    #[arg(long, help = "Attach a random request_id to every command")]
    generate_request_id: bool,
    #[arg(long = "target-command", value_name = "NAME|/REGEX/")]
    target_commands: Vec<String>,
    #[arg(long = "target-table", value_name = "NAME|/REGEX/")]
    target_tables: Vec<String>,
    #[arg(long = "target-column", value_name = "NAME|/REGEX/")]
    target_columns: Vec<String>,
    #[arg(long, value_enum, default_value = "abort")]
    on_error: OnErrorArg,
    #[arg(long, help = "Print dispatch totals as JSON on stderr when done")]
    summary: bool,
    #[arg(value_hint = ValueHint::FilePath, help = "Command files; stdin when omitted")]
    files: Vec<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ProtocolArg {
    Http,
    Gqtp,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OnErrorArg {
    Abort,
    Continue,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Gqtp => Protocol::Gqtp,
        }
    }
}

impl From<OnErrorArg> for FailurePolicy {
    fn from(value: OnErrorArg) -> Self {
        match value {
            OnErrorArg::Abort => FailurePolicy::Abort,
            OnErrorArg::Continue => FailurePolicy::Continue,
        }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run(std::env::args_os()) {
        Ok(exit_code) => exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run<I>(args: I) -> Result<i32, Error>
where
    I: IntoIterator<Item = OsString>,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `groonga-client --help`."));
            }
        },
    };

    let client = Client::open(client_options(&cli)?)?;
    let outcome = replay(&client, &cli);
    if let Err(err) = client.close() {
        tracing::debug!(error = %err, "close failed");
    }
    let outcome = outcome?;

    if cli.summary {
        emit_summary(&outcome);
    }
    if outcome.aborted.is_some() || outcome.failed > 0 {
        return Ok(to_exit_code(ErrorKind::ErrorResponse));
    }
    Ok(0)
}

fn client_options(cli: &Cli) -> Result<ClientOptions, Error> {
    let mut options = ClientOptions::new()
        .with_host(cli.host.clone())
        .with_protocol(cli.protocol.into())
        .with_chunked(!cli.no_chunked);
    if let Some(url) = &cli.url {
        options = options.with_url(url.clone());
    }
    if let Some(port) = cli.port {
        options = options.with_port(port);
    }
    if let Some(user) = &cli.user {
        options = options.with_credentials(user.clone(), cli.password.clone().unwrap_or_default());
    }
    if let Some(timeout) = seconds(cli.read_timeout, "--read-timeout")? {
        options = options.with_read_timeout(timeout);
    }
    if let Some(timeout) = seconds(cli.connect_timeout, "--connect-timeout")? {
        options = options.with_connect_timeout(timeout);
    }
    Ok(options)
}

/// Negative values mean "no timeout".
fn seconds(value: Option<f64>, flag: &str) -> Result<Option<Duration>, Error> {
    match value {
        None => Ok(None),
        Some(value) if value < 0.0 => Ok(None),
        Some(value) => Duration::try_from_secs_f64(value).map(Some).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid {flag}: {value}"))
                .with_source(err)
        }),
    }
}

fn stream_options(cli: &Cli) -> Result<StreamOptions, Error> {
    let parse = |values: &[String]| -> Result<Vec<TargetFilter>, Error> {
        values.iter().map(|value| value.parse()).collect()
    };
    Ok(StreamOptions {
        chunk_size: cli.load_chunk_size,
        generate_request_id: cli.generate_request_id,
        target_commands: parse(&cli.target_commands)?,
        target_tables: parse(&cli.target_tables)?,
        target_columns: parse(&cli.target_columns)?,
        failure_policy: cli.on_error.into(),
    })
}

fn replay(client: &Client, cli: &Cli) -> Result<StreamOutcome, Error> {
    let mut stdout = io::stdout().lock();
    let mut stream = CommandStream::new(client, stream_options(cli)?)
        .on_response(move |response: &Response| emit_response(&mut stdout, response));

    if cli.files.is_empty() {
        return stream.process(io::stdin().lock());
    }
    let mut outcome = StreamOutcome::default();
    for path in &cli.files {
        outcome = stream.process(open_input(path)?)?;
        if outcome.aborted.is_some() {
            break;
        }
    }
    Ok(outcome)
}

fn open_input(path: &Path) -> Result<impl Read, Error> {
    File::open(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to open {}", path.display()))
            .with_hint("Pass readable command files or pipe commands on stdin.")
            .with_source(err)
    })
}

fn emit_response(out: &mut impl Write, response: &Response) {
    let text = response.raw_text();
    let result = if text.ends_with('\n') {
        out.write_all(text.as_bytes())
    } else {
        writeln!(out, "{text}")
    };
    if let Err(err) = result.and_then(|()| out.flush()) {
        tracing::warn!(error = %err, "failed to write response");
    }
}

fn emit_summary(outcome: &StreamOutcome) {
    eprintln!("{}", json!({ "summary": outcome }));
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Connection => "connection failed".to_string(),
        ErrorKind::Timeout => "request timed out".to_string(),
        ErrorKind::InvalidResponse => "invalid response".to_string(),
        ErrorKind::ErrorResponse => "server returned an error".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(command) = err.command() {
        inner.insert("command".to_string(), json!(command));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(return_code) = err.return_code() {
        inner.insert("return_code".to_string(), json!(return_code));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(command) = err.command() {
        lines.push(format!("command: {command}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
