//! Error handling for the BFCP connection engine.
//!
//! Contains the `ErrorKind` enum enumerating every failure surfaced by the
//! engine (see `SPEC_FULL.md` §7), as well as extensions of the standard
//! library's `Result` type to work with our own `Error` type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type, used to wrap its
/// error in a `bfcp_engine::error::Error`.
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Different from `ResultWrappedExt`, this trait drops the underlying
/// error type in the `Result`. Useful when the error type doesn't
/// implement `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_string()))
    }
}

/// Wrapper result type for `std::result::Result`.
pub type Result<T> = result::Result<T, Error>;

/// Every kind of failure the connection engine can surface.
///
/// See `SPEC_FULL.md` §7 for the policy governing each kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Attempted to change addresses after connect, or supplied an
    /// invalid local/remote address string.
    ConfigError,
    /// Socket creation, sockopt configuration, bind, or non-blocking
    /// mode set failure.
    TransportSetupError,
    /// Active connect failed.
    ConnectError,
    /// `send` was invoked on a stream socket that isn't fully connected.
    NotConnected,
    /// `send`/inspection was invoked on a handle not in the peer table.
    UnknownSocket,
    /// Incoming bytes do not form a valid message.
    ParseError,
    /// A framed length exceeds `BFCP_MAX_ALLOWED_SIZE`.
    OversizedMessage,
    /// A stream write did not complete before its deadline.
    WriteTimeout,
    /// No answer arrived within the T1 schedule.
    TransactionExpired,
    /// `send` was invoked after the close flag was set.
    EndpointClosing,
}

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
}

enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => f.debug_tuple("Simple").field(k).finish(),
            ErrorInner::Wrapped(k, e) => {
                f.debug_tuple("Wrapped").field(k).field(&e.to_string()).finish()
            }
        }
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation, with
    /// kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        Error { inner: ErrorInner::Simple(kind) }
    }

    /// Wraps an arbitrary error in an `Error`, with kind of type
    /// `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error { inner: ErrorInner::Wrapped(kind, e.into()) }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
        }
    }

    /// Swaps the `ErrorKind` of this `Error`, keeping any wrapped cause.
    pub fn swap_kind(self, k: ErrorKind) -> Self {
        let inner = match self.inner {
            ErrorInner::Simple(_) => ErrorInner::Simple(k),
            ErrorInner::Wrapped(_, e) => ErrorInner::Wrapped(k, e),
        };
        Error { inner }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(fmt, "{:?}", k),
            ErrorInner::Wrapped(k, e) => write!(fmt, "{:?}: {}", k, e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::TransportSetupError, e)
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_preserves_kind_and_message() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let err: Result<()> = Err(io_err).wrapped(ErrorKind::ParseError);
        let err = err.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn swap_kind_keeps_wrapped_cause() {
        let err = Error::wrapped(ErrorKind::ConnectError, "nope".to_string());
        let err = err.swap_kind(ErrorKind::NotConnected);
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn simple_has_no_cause_text_beyond_kind() {
        let err = Error::simple(ErrorKind::EndpointClosing);
        assert_eq!(format!("{:?}", err.kind()), "EndpointClosing");
    }
}
