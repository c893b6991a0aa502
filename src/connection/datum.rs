use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::body::{Body, RequestBlock, ResponseBlock};
use crate::config::{Query, Scheme};
use crate::headers::Headers;
use crate::middleware::Instrumentor;
use crate::pool::SocketKey;
use crate::proxy::ProxyDescriptor;
use crate::response::Response;
use crate::Error;

/// The state of one request while it moves through the middleware chain.
///
/// A datum is the connection's configuration overlaid with the caller's
/// [`RequestParams`][crate::RequestParams], plus the execution state filled in on the
/// way: the `response` once one is known, and the `error` while error handlers run.
/// It lives exactly as long as the call which created it.
///
/// Middleware may change any field. Setting `response` during `request_call`
/// satisfies the request without touching the socket.
#[derive(Debug)]
#[non_exhaustive]
pub struct RequestDatum {
    /// Request method.
    pub method: Method,
    /// Endpoint scheme.
    pub scheme: Scheme,
    /// Endpoint host, for TCP endpoints.
    pub host: Option<String>,
    /// Endpoint port, for TCP endpoints.
    pub port: Option<u16>,
    /// Socket path, for unix endpoints.
    pub socket: Option<PathBuf>,
    /// Absolute request path.
    pub path: String,
    /// Request query.
    pub query: Option<Query>,
    /// Resolved request headers.
    pub headers: Headers,
    /// Request body.
    pub body: Option<Body>,
    /// Chunked body producer.
    pub request_block: Option<RequestBlock>,
    /// Response body sink.
    pub response_block: Option<ResponseBlock>,
    /// Proxy the request goes through.
    pub proxy: Option<ProxyDescriptor>,
    /// Bytes moved per body read or write.
    pub chunk_size: usize,
    /// Keep the socket open after this request.
    pub persistent: bool,
    /// Part of a pipelined batch.
    pub pipeline: bool,
    /// The request may be retried.
    pub idempotent: bool,
    /// Number of attempts for an idempotent request.
    pub retry_limit: u32,
    /// Attempts left, including the current one.
    pub retries_remaining: u32,
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Acceptable response statuses.
    pub expects: Option<Vec<u16>>,
    /// Leave the well-known port out of the `Host` header.
    pub omit_default_port: bool,
    /// Deadline for each read.
    pub read_timeout: Option<Duration>,
    /// Deadline for each write.
    pub write_timeout: Option<Duration>,
    /// Receives instrumentation events.
    pub instrumentor: Arc<dyn Instrumentor>,
    /// Prefix of instrumentation event names.
    pub instrumentor_name: String,
    /// Pool key of the socket this request uses.
    pub socket_key: SocketKey,
    /// Typed data for middleware.
    pub extensions: http::Extensions,
    /// Free-form string data for middleware.
    pub options: Vec<(String, String)>,
    /// The response, once one is known.
    pub response: Option<Response>,
    /// The error being handled, during `error_call`.
    pub error: Option<Error>,
    pub(crate) socket_reusable: bool,
}

impl RequestDatum {
    /// First value of the free-form option `key`.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Emit an instrumentation event named `<instrumentor_name>.<suffix>`.
    pub fn instrument(&self, suffix: &str) {
        let event = format!("{}.{}", self.instrumentor_name, suffix);
        self.instrumentor.instrument(&event, self);
    }
}
