//! Purpose: Public client surface: transports, request builders, response decoding, command streams.
//! Exports: `Client`, `ClientOptions`, request builders, `Response` and its decoded bodies, stream types.
//! Role: The only path callers use; transports and parsers are reachable through it.
//! Invariants: Every execution path ends in `ResponseParser::parse` on the raw transport bytes.
//! Invariants: Internal helpers (envelope sniffing, frame codec) stay out of this surface.

mod client;
mod gqtp;
mod http;
mod pagination;
mod request;
pub mod response;
mod stream;
mod transport;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::command::{Command, OutputType};
pub use crate::core::error::{Error, ErrorDetail, ErrorKind};
pub use crate::core::record::{ColumnSpec, FieldValue, Record};
pub use crate::core::script::ScriptValue;
pub use client::{ApiResult, Client, ClientOptions, DEFAULT_HOST, DEFAULT_HTTP_PORT, Protocol};
pub use gqtp::{DEFAULT_GQTP_PORT, GqtpTransport};
pub use http::HttpTransport;
pub use pagination::{DEFAULT_PER_PAGE, Paginated, Pagination};
pub use request::{
    DynamicColumnRequest, LabeledDrilldownRequest, Merger, Parameters, Request, SelectRequest,
    SliceRequest,
};
pub use response::{Body, DecoderKind, DecoderRegistry, Response, ResponseParser};
pub use stream::{
    CommandStream, DEFAULT_CHUNK_SIZE, FailurePolicy, Flow, StreamOptions, StreamOutcome,
    TargetFilter, generate_request_id,
};
pub use transport::{PendingRequest, SharedTransport, Transport};
