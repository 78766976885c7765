//! Purpose: Internal JSON parsing boundary shared by response decoders and transports.
//! Exports: `parse` module with decode helpers.
//! Role: Single seam for JSONP and envelope handling so callsites avoid ad hoc decode logic.
//! Invariants: Helper APIs stay small and deterministic (no hidden global state).

pub(crate) mod parse;
