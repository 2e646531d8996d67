//! Error type for the plumbing underneath the redirect flow.
//!
//! Storage, HTTP transport, process spawning and configuration all fail with
//! [`Error`], which pairs a coarse [`ErrorKind`] with the underlying error.
//! The kinds borrow their names from gRPC status codes.
//!
//! Failures the user gets to see have their own types:
//! [`resolver::Error`](crate::resolver::Error) and
//! [`redirect::Failure`](crate::redirect::Failure).

use std::fmt;
use thiserror::Error;

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
pub enum ErrorKind {
    /// Bad input from the user or the command line.
    #[error("invalid argument")]
    InvalidArgument,

    /// The operation needs something to be set up first.
    #[error("invalid state")]
    FailedPrecondition,

    #[error("not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    /// A size or rate limit was hit.
    #[error("limit exceeded")]
    ResourceExhausted,

    #[error("timed out")]
    DeadlineExceeded,

    /// The API, the state file or the URL handler could not be reached.
    #[error("unavailable")]
    Unavailable,

    /// Persisted state cannot be read back.
    #[error("corrupt data")]
    DataLoss,

    #[error("internal error")]
    Internal,

    #[error("unknown error")]
    Unknown,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// For example when no preferred platform has been chosen yet.
    pub fn failed_precondition<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FailedPrecondition, error)
    }

    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    pub fn resource_exhausted<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ResourceExhausted, error)
    }

    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DataLoss, error)
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::NotFound => Self::not_found(err),
            Io::PermissionDenied => Self::permission_denied(err),
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrNotAvailable
            | Io::BrokenPipe => Self::unavailable(err),
            Io::TimedOut => Self::deadline_exceeded(err),
            Io::InvalidInput => Self::invalid_argument(err),
            Io::InvalidData | Io::UnexpectedEof => Self::data_loss(err),
            Io::WriteZero | Io::OutOfMemory => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Maps transport failures of the resolution API.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::deadline_exceeded(err)
        } else if err.is_connect() || err.is_request() {
            Self::unavailable(err)
        } else if err.is_body() || err.is_decode() {
            Self::data_loss(err)
        } else if err.is_redirect() {
            Self::resource_exhausted(err)
        } else if err.is_builder() {
            Self::internal(err)
        } else {
            Self::unknown(err)
        }
    }
}

/// Malformed API responses.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            std::io::Error::from(err).into()
        } else {
            Self::data_loss(err)
        }
    }
}

/// Unparsable state file.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::data_loss(e)
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::internal(e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}
