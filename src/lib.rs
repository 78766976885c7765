//! Purpose: Client library for Groonga's command protocol over HTTP and GQTP.
//! Exports: `api` (client, requests, responses, command streams), `core` (command model, errors, codecs).
//! Role: Library backing the `groonga-client` CLI and integration tests.
//! Invariants: `core` stays free of I/O; sockets and HTTP live under `api`.
pub mod api;
pub mod core;
mod json;
