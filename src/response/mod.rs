//! Response records, the HTTP/1.1 response parser and the response body streamer.

use bytes::Bytes;
use http::StatusCode;

use crate::headers::Headers;

pub(crate) mod parse;
pub(crate) mod stream;

pub use self::parse::ParseError;

/// A parsed response.
///
/// Responses do not depend on the scheme or transport they were read from. Once a
/// response has been handed to the caller it is not modified again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Create a response with the given status, the canonical reason phrase, no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub(crate) fn from_parts(status: StatusCode, reason: String, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            reason,
            headers,
            body,
        }
    }

    /// Replace the reason phrase.
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = reason.into();
        self
    }

    /// Append a header line.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.append(name, value);
        self
    }

    /// Replace the body.
    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase from the status line.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response headers, including any chunked trailers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The buffered body. Empty when the body was delivered to a response block.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response, returning the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub(crate) fn take_body(&mut self) -> Bytes {
        std::mem::take(&mut self.body)
    }

    /// Does the `Connection` header carry a `close` token?
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("Connection", "close")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_style() {
        let response = Response::new(StatusCode::CREATED)
            .with_header("Location", "/items/1")
            .with_body("made");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.reason(), "Created");
        assert_eq!(response.headers().get("location"), Some("/items/1"));
        assert_eq!(response.body().as_ref(), b"made");
    }

    #[test]
    fn close_token_is_case_insensitive() {
        let response = Response::new(StatusCode::OK).with_header("connection", "Close");
        assert!(response.wants_close());

        let response = Response::new(StatusCode::OK).with_header("Connection", "keep-alive");
        assert!(!response.wants_close());
    }
}
