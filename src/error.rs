use std::fmt;

use thiserror::Error;

use crate::proxy::ProxyError;
use crate::response::Response;
use crate::BoxError;

/// Which deadline elapsed when a [`Error::Timeout`] is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// Establishing the transport took too long.
    Connect,
    /// Waiting for bytes from the remote end took too long.
    Read,
    /// Handing bytes to the transport took too long.
    Write,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Connect => f.write_str("connect"),
            TimeoutKind::Read => f.write_str("read"),
            TimeoutKind::Write => f.write_str("write"),
        }
    }
}

/// Connection error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The proxy setting could not be turned into a usable proxy.
    #[error("proxy: {0}")]
    Proxy(#[from] ProxyError),

    /// The connection or request parameters are contradictory or incomplete.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error occured with the underlying socket, while writing the request
    /// or reading the response.
    #[error("socket: {0}")]
    Socket(#[source] BoxError),

    /// A transport deadline elapsed.
    #[error("{0} timeout")]
    Timeout(TimeoutKind),

    /// A mock middleware was active but had no stub for this request.
    #[error("no stub matched {method} {path}")]
    StubNotFound {
        /// Method of the unmatched request.
        method: http::Method,
        /// Path of the unmatched request.
        path: String,
    },

    /// The response status was not one of the expected statuses.
    #[error("expected status in {expected:?}, got {}", .response.status())]
    HttpStatus {
        /// Statuses which were acceptable for the request.
        expected: Vec<u16>,
        /// The response which carried the unexpected status.
        response: Box<Response>,
    },

    /// The pipelining API was used incorrectly.
    #[error("pipeline: {0}")]
    Pipeline(&'static str),
}

impl Error {
    /// Wrap any error as a socket error.
    pub fn socket<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Socket(error.into())
    }

    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Errors which already carry final semantics and are never re-wrapped.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::StubNotFound { .. } | Error::HttpStatus { .. }
        )
    }

    /// Errors which are worth re-issuing an idempotent request for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Socket(_) | Error::Timeout(_) | Error::HttpStatus { .. }
        )
    }

    /// Re-wrap this error as a socket error, unless it is terminal or already a socket error.
    pub fn reclassify(self) -> Self {
        if self.is_terminal() || matches!(self, Error::Socket(_)) {
            self
        } else {
            Error::Socket(Box::new(self))
        }
    }

    /// The status of the offending response, for [`Error::HttpStatus`].
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Error::HttpStatus { response, .. } => Some(response.status()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Socket(error.into())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<BoxError>);

    #[test]
    fn terminal_errors_are_not_rewrapped() {
        let error = Error::Timeout(TimeoutKind::Read).reclassify();
        assert!(matches!(error, Error::Timeout(TimeoutKind::Read)));

        let error = Error::StubNotFound {
            method: http::Method::GET,
            path: "/".into(),
        }
        .reclassify();
        assert!(matches!(error, Error::StubNotFound { .. }));
    }

    #[test]
    fn other_errors_become_socket_errors() {
        let error = Error::config("bad").reclassify();
        assert!(matches!(error, Error::Socket(_)));
        assert_eq!(error.to_string(), "socket: invalid configuration: bad");
    }

    #[test]
    fn io_errors_are_socket_errors() {
        let error: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(error, Error::Socket(_)));
        assert!(error.is_retryable());
        assert!(!error.is_terminal());
    }

    #[test]
    fn timeout_display() {
        assert_eq!(Error::Timeout(TimeoutKind::Connect).to_string(), "connect timeout");
    }
}
