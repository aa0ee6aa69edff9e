// Error kinds and builder-style context shared by the codec, planner, and orchestration layers.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    TransactionExpired,
    NotFound,
    AlreadyExists,
    Aborted,
    PermissionDenied,
    Unavailable,
    DeadlineExceeded,
    Cancelled,
    Decode,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::TransactionExpired => "transaction_expired",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Aborted => "aborted",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Decode => "decode",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Message carried by every [`ErrorKind::TransactionExpired`] error.
pub const TRANSACTION_EXPIRED_MESSAGE: &str = "transaction expired";

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    method: Option<&'static str>,
    status: Option<u16>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            method: None,
            status: None,
            source: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument).with_message(message)
    }

    pub fn transaction_expired() -> Self {
        Self::new(ErrorKind::TransactionExpired).with_message(TRANSACTION_EXPIRED_MESSAGE)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode).with_message(message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// RPC method the error was raised for, when it came from a dispatch.
    pub fn method(&self) -> Option<&'static str> {
        self.method
    }

    /// HTTP status reported by the transport, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn is_transaction_expired(&self) -> bool {
        self.kind == ErrorKind::TransactionExpired
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_method(mut self, method: &'static str) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
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
        if let Some(method) = self.method {
            write!(f, " (method: {method})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
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
