// Core modules: command model, script escaping, frame codec, records and errors.
pub mod command;
pub mod error;
pub mod frame;
pub mod record;
pub mod script;
