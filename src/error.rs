//! Error handling for shadowcast.
//!
//! All fallible operations of the crate, and of the collaborator traits it
//! drives (control channel, streamer factory, connector), return the same
//! [`struct@Error`]. An error carries a coarse [`ErrorKind`] modelled after the
//! gRPC status codes and the underlying cause.
//!
//! Nothing in the session layer is fatal: errors are logged where they
//! surface and the session loop retries. The kind mostly decides how loud the
//! log line is and whether a retry makes sense.
//!
//! # Example
//!
//! ```rust
//! use shadowcast::error::{Error, ErrorKind, Result};
//!
//! fn connect() -> Result<()> {
//!     Err(Error::unavailable("access point unreachable"))
//! }
//!
//! assert_eq!(connect().unwrap_err().kind, ErrorKind::Unavailable);
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for shadowcast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    #[error("operation was cancelled")]
    Cancelled = 1,

    #[error("unknown error")]
    Unknown = 2,

    #[error("invalid argument specified")]
    InvalidArgument = 3,

    #[error("operation timed out")]
    DeadlineExceeded = 4,

    #[error("not found")]
    NotFound = 5,

    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    #[error("permission denied")]
    PermissionDenied = 7,

    /// Authentication with the control channel was refused.
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// The operation does not fit the current session state, e.g. a shared
    /// lock that is already bound to another player.
    #[error("invalid state")]
    FailedPrecondition = 9,

    #[error("operation aborted")]
    Aborted = 10,

    #[error("internal error")]
    Internal = 13,

    /// Remote end (access point, renderer) cannot be reached right now.
    #[error("service unavailable")]
    Unavailable = 14,

    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

/// Generates one constructor per error kind.
macro_rules! constructors {
    ($($(#[$meta:meta])* $name:ident => $kind:ident),+ $(,)?) => {
        impl Error {
            $(
                $(#[$meta])*
                pub fn $name<E>(error: E) -> Self
                where
                    E: Into<Box<dyn std::error::Error + Send + Sync>>,
                {
                    Self::new(ErrorKind::$kind, error)
                }
            )+
        }
    };
}

constructors! {
    aborted => Aborted,
    already_exists => AlreadyExists,
    cancelled => Cancelled,
    data_loss => DataLoss,
    deadline_exceeded => DeadlineExceeded,
    /// Use when an operation cannot proceed due to the current session state.
    failed_precondition => FailedPrecondition,
    internal => Internal,
    invalid_argument => InvalidArgument,
    not_found => NotFound,
    permission_denied => PermissionDenied,
    resource_exhausted => ResourceExhausted,
    /// Use when the control channel refuses the credentials.
    unauthenticated => Unauthenticated,
    /// Use when a remote end is temporarily unreachable and a retry makes
    /// sense.
    unavailable => Unavailable,
    unknown => Unknown,
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Whether retrying the failed operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Unavailable
                | ErrorKind::DeadlineExceeded
                | ErrorKind::Aborted
                | ErrorKind::Cancelled
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Sockets of the zero-conf endpoint and the configuration file are the
/// usual sources:
/// * `NotFound` -> `NotFound`
/// * `ConnectionReset` -> `Aborted`
/// * `AddrInUse` -> `AlreadyExists`
/// * etc.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts configuration parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts malformed zero-conf form bodies to `InvalidArgument`.
impl From<serde_urlencoded::de::Error> for Error {
    fn from(e: serde_urlencoded::de::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts mDNS advertisement errors into appropriate error kinds.
///
/// * `Again` -> `Unavailable`
/// * `ParseIpAddr` -> `InvalidArgument`
/// * `Msg` and others -> `Unknown`
impl From<mdns_sd::Error> for Error {
    fn from(e: mdns_sd::Error) -> Self {
        use mdns_sd::Error::*;
        match e {
            Again => Self::unavailable(e.to_string()),
            ParseIpAddr(_) => Self::invalid_argument(e.to_string()),
            _ => Self::unknown(e.to_string()),
        }
    }
}

/// Converts IP address parsing errors to `InvalidArgument`.
impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}
