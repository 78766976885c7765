//! Purpose: Define the single error type shared by transports, parsers and builders.
//! Exports: `Error`, `ErrorKind`, `ErrorDetail`, `to_exit_code`.
//! Role: Uniform failure category for callers; transport identity never leaks.
//! Invariants: Connection and timeout failures are both "transport" errors.
//! Invariants: Error-response accessors never fail when the header is absent.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Connection,
    Timeout,
    InvalidResponse,
    ErrorResponse,
    Io,
}

/// Header fields of a failed server response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorDetail {
    pub return_code: i64,
    pub message: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<i64>,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    command: Option<String>,
    raw: Option<String>,
    status: Option<u16>,
    detail: Option<Box<ErrorDetail>>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            command: None,
            raw: None,
            status: None,
            detail: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// True for failures below the application layer (connect, read, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Connection | ErrorKind::Timeout)
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn detail(&self) -> Option<&ErrorDetail> {
        self.detail.as_deref()
    }

    pub fn return_code(&self) -> Option<i64> {
        self.detail.as_ref().map(|detail| detail.return_code)
    }

    pub fn error_message(&self) -> Option<String> {
        self.detail.as_ref()?.message.clone()
    }

    pub fn error_function(&self) -> Option<String> {
        self.detail.as_ref()?.function.clone()
    }

    pub fn error_file(&self) -> Option<String> {
        self.detail.as_ref()?.file.clone()
    }

    pub fn error_line(&self) -> Option<i64> {
        self.detail.as_ref()?.line
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(Box::new(detail));
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(command) = &self.command {
            write!(f, " (command: {command})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        if let Some(function) = self.error_function() {
            write!(f, " (function: {function})")?;
        }
        if let (Some(file), Some(line)) = (self.error_file(), self.error_line()) {
            write!(f, " (location: {file}:{line})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Connection => 3,
        ErrorKind::Timeout => 4,
        ErrorKind::InvalidResponse => 5,
        ErrorKind::ErrorResponse => 6,
        ErrorKind::Io => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorDetail, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::Connection, 3),
            (ErrorKind::Timeout, 4),
            (ErrorKind::InvalidResponse, 5),
            (ErrorKind::ErrorResponse, 6),
            (ErrorKind::Io, 7),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn transport_category_covers_connect_and_timeout() {
        assert!(Error::new(ErrorKind::Connection).is_transport());
        assert!(Error::new(ErrorKind::Timeout).is_transport());
        assert!(!Error::new(ErrorKind::InvalidResponse).is_transport());
    }

    #[test]
    fn header_accessors_are_none_without_response() {
        let err = Error::new(ErrorKind::ErrorResponse).with_message("boom");
        assert_eq!(err.return_code(), None);
        assert_eq!(err.error_message(), None);
        assert_eq!(err.error_line(), None);
        assert_eq!(err.to_string(), "ErrorResponse: boom");
    }

    #[test]
    fn detail_feeds_accessors_and_display() {
        let err = Error::new(ErrorKind::ErrorResponse)
            .with_message("invalid table name")
            .with_detail(ErrorDetail {
                return_code: -22,
                message: Some("invalid table name".to_string()),
                function: Some("grn_select".to_string()),
                file: Some("proc.c".to_string()),
                line: Some(12),
            });
        assert_eq!(err.return_code(), Some(-22));
        assert_eq!(err.error_function().as_deref(), Some("grn_select"));
        assert_eq!(
            err.to_string(),
            "ErrorResponse: invalid table name (function: grn_select) (location: proc.c:12)"
        );
    }
}
