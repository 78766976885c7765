//! Purpose: Define the uniform transport contract and its blocking/callback execution wrappers.
//! Exports: `Transport`, `SharedTransport`, `PendingRequest`.
//! Role: Narrow "send(command) -> raw bytes" seam consumed by the client and stream processor.
//! Invariants: One transport instance owns exactly one connection/session.
//! Invariants: Overlapping sends on one instance are serialized (single request in flight).
//! Invariants: `PendingRequest::wait` only joins; in-flight requests are never cancelled.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::core::command::Command;
use crate::core::error::{Error, ErrorKind};

/// A wire protocol implementation that turns one command into the raw response text.
pub trait Transport: Send {
    /// Block until the raw response for `command` is available.
    fn send(&mut self, command: &Command) -> Result<Vec<u8>, Error>;

    /// Whether a persistent connection is currently established.
    fn is_connected(&self) -> bool {
        false
    }

    /// Release any held connection. Must tolerate being called more than once.
    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, command: &Command) -> Result<Vec<u8>, Error> {
        (**self).send(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }
}

/// Handle for work started by `send_with`/`close_with`.
#[must_use = "call wait() to join the background request"]
pub struct PendingRequest {
    handle: Option<JoinHandle<()>>,
}

impl PendingRequest {
    /// A request that already completed on the calling thread.
    pub fn ready() -> Self {
        Self { handle: None }
    }

    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            handle: Some(std::thread::spawn(work)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    pub fn wait(mut self) -> Result<(), Error> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                Error::new(ErrorKind::Internal).with_message("background request panicked")
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl SharedTransport {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(transport))),
        }
    }

    pub fn send(&self, command: &Command) -> Result<Vec<u8>, Error> {
        self.lock()?.send(command)
    }

    /// Returns immediately; `on_complete` runs on a background thread with the raw response.
    pub fn send_with<F>(&self, command: Command, on_complete: F) -> PendingRequest
    where
        F: FnOnce(Result<Vec<u8>, Error>) + Send + 'static,
    {
        let transport = self.clone();
        PendingRequest::spawn(move || {
            let result = transport.send(&command);
            on_complete(result);
        })
    }

    pub fn is_connected(&self) -> bool {
        self.lock()
            .map(|transport| transport.is_connected())
            .unwrap_or(false)
    }

    pub fn close(&self) -> Result<(), Error> {
        self.lock()?.close()
    }

    pub fn close_with<F>(&self, on_complete: F) -> PendingRequest
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let transport = self.clone();
        PendingRequest::spawn(move || on_complete(transport.close()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Transport>>, Error> {
        self.inner.lock().map_err(|_| {
            Error::new(ErrorKind::Internal)
                .with_message("transport lock poisoned by an earlier panic")
        })
    }
}

impl fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingRequest, SharedTransport, Transport};
    use crate::core::command::Command;
    use crate::core::error::Error;
    use std::sync::mpsc;

    struct Echo {
        closed: bool,
    }

    impl Transport for Echo {
        fn send(&mut self, command: &Command) -> Result<Vec<u8>, Error> {
            Ok(command.name().as_bytes().to_vec())
        }

        fn is_connected(&self) -> bool {
            !self.closed
        }

        fn close(&mut self) -> Result<(), Error> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn ready_request_waits_immediately() {
        let pending = PendingRequest::ready();
        assert!(pending.is_finished());
        pending.wait().expect("wait");
    }

    #[test]
    fn send_with_invokes_callback_from_background_thread() {
        let transport = SharedTransport::new(Echo { closed: false });
        let (tx, rx) = mpsc::channel();
        let pending = transport.send_with(Command::new("status"), move |result| {
            let _ = tx.send(result.map(|raw| String::from_utf8_lossy(&raw).to_string()));
        });
        pending.wait().expect("wait");
        assert_eq!(rx.recv().expect("result").expect("raw"), "status");
    }

    #[test]
    fn close_with_reports_completion() {
        let transport = SharedTransport::new(Echo { closed: false });
        assert!(transport.is_connected());
        let (tx, rx) = mpsc::channel();
        transport
            .close_with(move |result| {
                let _ = tx.send(result.is_ok());
            })
            .wait()
            .expect("wait");
        assert!(rx.recv().expect("closed"));
        assert!(!transport.is_connected());
    }
}
