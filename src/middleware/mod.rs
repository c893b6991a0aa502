//! Middleware wrapped around the socket I/O of each request.
//!
//! A middleware sees every request three ways: [`Middleware::request_call`] before
//! the request is written, [`Middleware::response_call`] after the response is read,
//! and [`Middleware::error_call`] when anything fails. The configured list is
//! ordered outermost first: request hooks run in list order, response hooks run in
//! reverse, like layers of an onion around the socket.
//!
//! Once any hook has set [`RequestDatum::response`] the remaining request hooks and
//! the socket write are skipped.

use std::fmt;
use std::sync::Arc;

use crate::connection::RequestDatum;
use crate::Error;

mod idempotent;
mod instrument;
mod mock;

pub use self::idempotent::Idempotent;
pub use self::instrument::{Instrument, Instrumentor, TracingInstrumentor};
pub use self::mock::{Mock, Stub};

/// Option keys every request understands, independent of middleware.
pub const KNOWN_OPTIONS: &[&str] = &[
    "scheme",
    "host",
    "port",
    "path",
    "query",
    "headers",
    "body",
    "socket",
    "ciphers",
    "proxy",
    "retry_limit",
    "retry_interval",
    "instrumentor",
    "instrumentor_name",
    "persistent",
    "chunk_size",
    "middlewares",
    "user",
    "password",
    "idempotent",
    "pipeline",
    "request_block",
    "response_block",
    "expects",
];

/// What an error handler decided to do with the error on the datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Pass the error to the next handler, and finally to the caller.
    Propagate,
    /// The handler put a substitute [`Response`][crate::Response] on the datum.
    Recover,
    /// Issue the request again.
    Retry,
}

/// One layer of the request pipeline.
pub trait Middleware: fmt::Debug + Send + Sync {
    /// Free-form option keys this middleware reads from [`RequestDatum::options`].
    fn valid_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called before the request is written.
    fn request_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        let _ = datum;
        Ok(())
    }

    /// Called after the response is read, innermost layer first.
    fn response_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        let _ = datum;
        Ok(())
    }

    /// Called with [`RequestDatum::error`] set when the request failed.
    fn error_call(&self, datum: &mut RequestDatum) -> ErrorAction {
        let _ = datum;
        ErrorAction::Propagate
    }
}

/// The middleware chain for one request, built from the configured list.
#[derive(Debug, Clone)]
pub(crate) struct Stack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Stack {
    pub(crate) fn new(layers: &[Arc<dyn Middleware>]) -> Self {
        Self {
            layers: layers.to_vec(),
        }
    }

    /// Is `key` understood by the request itself or by some layer?
    pub(crate) fn is_valid_key(&self, key: &str) -> bool {
        KNOWN_OPTIONS.contains(&key)
            || self
                .layers
                .iter()
                .any(|layer| layer.valid_keys().contains(&key))
    }

    pub(crate) fn request_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        for layer in &self.layers {
            if datum.response.is_some() {
                break;
            }
            layer.request_call(datum)?;
        }
        Ok(())
    }

    pub(crate) fn response_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        for layer in self.layers.iter().rev() {
            layer.response_call(datum)?;
        }
        Ok(())
    }

    pub(crate) fn error_call(&self, datum: &mut RequestDatum) -> ErrorAction {
        for layer in &self.layers {
            match layer.error_call(datum) {
                ErrorAction::Propagate => continue,
                action => return action,
            }
        }
        ErrorAction::Propagate
    }
}
