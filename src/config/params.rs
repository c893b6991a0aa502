use std::time::Duration;

use http::Method;

use super::Query;
use crate::body::{Body, RequestBlock, ResponseBlock};
use crate::headers::Headers;

/// Per-request overrides of a connection's defaults.
///
/// Every `None` field falls back to the connection's [`ConnectionConfig`][super::ConnectionConfig].
/// Headers are merged per key, with these headers winning.
///
/// Middleware-specific data travels either as typed values in `extensions`, or as
/// string `options`. Option keys are checked against the keys declared by the
/// configured middleware; unknown keys are reported with a warning and kept.
#[derive(Debug, Default)]
pub struct RequestParams {
    /// Request method.
    pub method: Option<Method>,
    /// Request path. Made absolute if it is not already.
    pub path: Option<String>,
    /// Request query.
    pub query: Option<Query>,
    /// Headers overriding the connection's headers, per key.
    pub headers: Headers,
    /// Request body.
    pub body: Option<Body>,
    /// Chunked body producer. Takes precedence over `body`.
    pub request_block: Option<RequestBlock>,
    /// Response body sink.
    pub response_block: Option<ResponseBlock>,
    /// Acceptable response statuses.
    pub expects: Option<Vec<u16>>,
    /// Allow the request to be retried.
    pub idempotent: Option<bool>,
    /// Number of attempts for an idempotent request.
    pub retry_limit: Option<u32>,
    /// Attempts left, when resuming a retried request.
    pub retries_remaining: Option<u32>,
    /// Pause between attempts.
    pub retry_interval: Option<Duration>,
    /// Keep the socket open after this request.
    pub persistent: Option<bool>,
    /// Part of a pipelined batch.
    pub pipeline: Option<bool>,
    /// Bytes moved per body read or write.
    pub chunk_size: Option<usize>,
    /// Deadline for each read.
    pub read_timeout: Option<Duration>,
    /// Deadline for each write.
    pub write_timeout: Option<Duration>,
    /// Typed data for middleware.
    pub extensions: http::Extensions,
    /// Free-form string data for middleware.
    pub options: Vec<(String, String)>,
}

impl RequestParams {
    /// Empty overrides: the request uses the connection's defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request with `method` and `path`.
    pub fn with_method<P: Into<String>>(method: Method, path: P) -> Self {
        Self::new().method(method).path(path)
    }

    /// A `GET` request for `path`.
    pub fn get<P: Into<String>>(path: P) -> Self {
        Self::with_method(Method::GET, path)
    }

    /// A `POST` request for `path`.
    pub fn post<P: Into<String>>(path: P) -> Self {
        Self::with_method(Method::POST, path)
    }

    /// A `PUT` request for `path`.
    pub fn put<P: Into<String>>(path: P) -> Self {
        Self::with_method(Method::PUT, path)
    }

    /// A `DELETE` request for `path`.
    pub fn delete<P: Into<String>>(path: P) -> Self {
        Self::with_method(Method::DELETE, path)
    }

    /// A `HEAD` request for `path`.
    pub fn head<P: Into<String>>(path: P) -> Self {
        Self::with_method(Method::HEAD, path)
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the path.
    pub fn path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the query.
    pub fn query<Q: Into<Query>>(mut self, query: Q) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Append a header line.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.append(name, value);
        self
    }

    /// Set the body.
    pub fn body<B: Into<Body>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Stream the body from a chunk producer, using chunked framing.
    pub fn request_block(mut self, block: RequestBlock) -> Self {
        self.request_block = Some(block);
        self
    }

    /// Deliver the response body to a sink instead of buffering it.
    pub fn response_block(mut self, block: ResponseBlock) -> Self {
        self.response_block = Some(block);
        self
    }

    /// Set the acceptable response statuses.
    pub fn expects<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.expects = Some(statuses.into_iter().collect());
        self
    }

    /// Mark the request as safe to retry.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Set the number of attempts for an idempotent request.
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    /// Set the pause between attempts.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Keep the socket open after this request.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Set the number of bytes moved per body read or write.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Set the read deadline.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the write deadline.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Attach typed data for middleware.
    pub fn extension<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value);
        self
    }

    /// Attach a free-form option for middleware.
    pub fn option<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options.push((key.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fluent_construction() {
        let params = RequestParams::post("/upload")
            .header("Content-Type", "text/plain")
            .body("hello")
            .expects([200, 201])
            .option("trace", "on");

        assert_eq!(params.method, Some(Method::POST));
        assert_eq!(params.path.as_deref(), Some("/upload"));
        assert_eq!(params.headers.get("content-type"), Some("text/plain"));
        assert!(matches!(params.body, Some(Body::Full(ref b)) if b.as_ref() == b"hello"));
        assert_eq!(params.expects, Some(vec![200, 201]));
        assert_eq!(params.options, vec![("trace".to_owned(), "on".to_owned())]);
    }

    #[test]
    fn extensions_are_typed() {
        #[derive(Debug, Clone, PartialEq)]
        struct Tag(&'static str);

        let params = RequestParams::get("/").extension(Tag("a"));
        assert_eq!(params.extensions.get::<Tag>(), Some(&Tag("a")));
    }
}
