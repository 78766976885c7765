//! Purpose: Open a transport from options and execute commands into typed responses.
//! Exports: `Client`, `ClientOptions`, `Protocol`.
//! Role: The `open` / `execute` / `close` surface used by builders, streams and the CLI.
//! Invariants: Application errors come back as responses; only transport/decoding failures are `Err`.
//! Invariants: Every execution is a fresh round trip; nothing is cached between calls.
//! Notes: Blocking, callback and tokio-future execution share the same send/parse path.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use super::gqtp::{DEFAULT_GQTP_PORT, GqtpTransport};
use super::http::HttpTransport;
use super::response::{DecoderRegistry, Response, ResponseParser};
use super::transport::{PendingRequest, SharedTransport, Transport};
use crate::core::command::Command;
use crate::core::error::{Error, ErrorKind};

pub type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_HTTP_PORT: u16 = 10041;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Protocol {
    #[default]
    Http,
    Gqtp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => DEFAULT_HTTP_PORT,
            Protocol::Gqtp => DEFAULT_GQTP_PORT,
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Protocol::Http),
            "gqtp" => Ok(Protocol::Gqtp),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported protocol: {other}"))
                .with_hint("Use http or gqtp.")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub url: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub user: Option<String>,
    pub password: Option<String>,
    pub read_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub chunked: bool,
    pub path_prefix: Option<String>,
    pub registry: DecoderRegistry,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_HOST.to_string(),
            port: None,
            protocol: Protocol::default(),
            user: None,
            password: None,
            read_timeout: None,
            connect_timeout: None,
            chunked: true,
            path_prefix: None,
            registry: DecoderRegistry::default(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `http://`, `https://` or `gqtp://`; takes precedence over host/port/protocol.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_registry(mut self, registry: DecoderRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn open_transport(&self) -> ApiResult<Box<dyn Transport>> {
        let (protocol, host, port, secure) = self.resolve_target()?;
        match protocol {
            Protocol::Http => {
                // The original url is kept so its user-info still yields credentials.
                let base_url = match &self.url {
                    Some(url) => url.clone(),
                    None => {
                        let scheme = if secure { "https" } else { "http" };
                        format!("{scheme}://{host}:{port}/")
                    }
                };
                let mut transport = HttpTransport::new(base_url)?.with_chunked(self.chunked);
                if let Some(user) = &self.user {
                    transport =
                        transport.with_credentials(user, self.password.as_deref().unwrap_or(""));
                }
                if let Some(timeout) = self.read_timeout {
                    transport = transport.with_read_timeout(timeout);
                }
                if let Some(timeout) = self.connect_timeout {
                    transport = transport.with_connect_timeout(timeout);
                }
                if let Some(prefix) = &self.path_prefix {
                    transport = transport.with_path_prefix(prefix.clone());
                }
                Ok(Box::new(transport))
            }
            Protocol::Gqtp => Ok(Box::new(GqtpTransport::connect_with(
                host,
                port,
                self.read_timeout,
                self.connect_timeout,
            )?)),
        }
    }

    /// `(protocol, host, port, tls)` from the url or the discrete options.
    fn resolve_target(&self) -> ApiResult<(Protocol, String, u16, bool)> {
        let Some(raw) = &self.url else {
            let port = self.port.unwrap_or(self.protocol.default_port());
            return Ok((self.protocol, self.host.clone(), port, false));
        };
        let url = Url::parse(raw).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid server url: {raw}"))
                .with_source(err)
        })?;
        let protocol: Protocol = url.scheme().parse()?;
        let host = url.host_str().unwrap_or(DEFAULT_HOST).to_string();
        let port = url
            .port()
            .or(self.port)
            .unwrap_or(match url.scheme() {
                "https" => 443,
                _ => protocol.default_port(),
            });
        Ok((protocol, host, port, url.scheme() == "https"))
    }
}

#[derive(Clone)]
pub struct Client {
    transport: SharedTransport,
    parser: Arc<ResponseParser>,
}

impl Client {
    pub fn open(options: ClientOptions) -> ApiResult<Self> {
        let transport = options.open_transport()?;
        debug!(protocol = ?options.protocol, url = ?options.url, "client open");
        Ok(Self::with_transport(transport, options.registry))
    }

    /// Wrap an already constructed transport (custom protocols, tests).
    pub fn with_transport(transport: impl Transport + 'static, registry: DecoderRegistry) -> Self {
        Self {
            transport: SharedTransport::new(transport),
            parser: Arc::new(ResponseParser::new(registry)),
        }
    }

    /// Execute `name` with stringified `parameters`.
    pub fn execute<I, K, V>(&self, name: &str, parameters: I) -> ApiResult<Response>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.execute_command(Command::build(name, parameters))
    }

    pub fn execute_command(&self, command: Command) -> ApiResult<Response> {
        debug!(command = command.name(), "execute");
        let raw = self.transport.send(&command)?;
        self.parser.parse(&command, raw)
    }

    /// Returns immediately; `on_complete` receives the parsed response on a background thread.
    pub fn execute_with<F>(&self, command: Command, on_complete: F) -> PendingRequest
    where
        F: FnOnce(ApiResult<Response>) + Send + 'static,
    {
        let parser = Arc::clone(&self.parser);
        let parse_command = command.clone();
        self.transport.send_with(command, move |raw| {
            on_complete(raw.and_then(|raw| parser.parse(&parse_command, raw)));
        })
    }

    /// Future form of `execute_command`, run on tokio's blocking pool.
    pub async fn execute_async(&self, command: Command) -> ApiResult<Response> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.execute_command(command))
            .await
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("blocking execute task failed")
                    .with_source(err)
            })?
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn close(&self) -> ApiResult<()> {
        self.transport.close()
    }

    pub fn close_with<F>(&self, on_complete: F) -> PendingRequest
    where
        F: FnOnce(ApiResult<()>) + Send + 'static,
    {
        self.transport.close_with(on_complete)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport)
            .finish()
    }
}
