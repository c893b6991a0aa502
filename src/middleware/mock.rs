//! Canned responses for tests.

use http::Method;

use super::Middleware;
use crate::config::Query;
use crate::connection::RequestDatum;
use crate::response::Response;
use crate::Error;

/// Request matcher for a [`Mock`] stub. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct Stub {
    method: Option<Method>,
    host: Option<String>,
    path: Option<String>,
    query: Option<String>,
    headers: Vec<(String, String)>,
}

impl Stub {
    /// A stub matching every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match requests with this method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match requests to this host, ignoring case.
    pub fn host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Match requests for this path.
    pub fn path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match requests whose encoded query equals this one.
    pub fn query<Q: Into<Query>>(mut self, query: Q) -> Self {
        self.query = Some(query.into().encode());
        self
    }

    /// Match requests carrying this header value.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn matches(&self, datum: &RequestDatum) -> bool {
        let query = datum.query.as_ref().map(Query::encode).unwrap_or_default();

        self.method.as_ref().map_or(true, |m| *m == datum.method)
            && self.host.as_deref().map_or(true, |h| {
                datum
                    .host
                    .as_deref()
                    .is_some_and(|host| host.eq_ignore_ascii_case(h))
            })
            && self.path.as_deref().map_or(true, |p| p == datum.path)
            && self.query.as_deref().map_or(true, |q| q == query)
            && self
                .headers
                .iter()
                .all(|(name, value)| datum.headers.get_all(name).any(|v| v == value))
    }
}

/// Middleware which answers requests from a stub table instead of the socket.
///
/// The first matching stub wins. A request which matches no stub fails with
/// [`Error::StubNotFound`]. Setting the option `mock` to `false` on a request sends
/// it to the socket instead.
#[derive(Debug, Clone, Default)]
pub struct Mock {
    stubs: Vec<(Stub, Response)>,
}

impl Mock {
    /// An empty stub table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests matching `stub` with `response`.
    pub fn stub(mut self, stub: Stub, response: Response) -> Self {
        self.stubs.push((stub, response));
        self
    }

    /// Number of stubs.
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// True if there are no stubs.
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }
}

impl Middleware for Mock {
    fn valid_keys(&self) -> &'static [&'static str] {
        &["mock"]
    }

    fn request_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        if datum.option("mock") == Some("false") {
            return Ok(());
        }

        match self.stubs.iter().find(|(stub, _)| stub.matches(datum)) {
            Some((_, response)) => {
                tracing::trace!(method = %datum.method, path = %datum.path, "stubbed response");
                datum.response = Some(response.clone());
                Ok(())
            }
            None => Err(Error::StubNotFound {
                method: datum.method.clone(),
                path: datum.path.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::middleware::tests::datum;
    use crate::RequestParams;

    fn mock() -> Mock {
        Mock::new()
            .stub(
                Stub::new().method(Method::GET).path("/users").query("page=2"),
                Response::new(StatusCode::OK).with_body("page two"),
            )
            .stub(
                Stub::new().header("Accept", "text/plain"),
                Response::new(StatusCode::ACCEPTED),
            )
    }

    #[test]
    fn first_matching_stub_answers() {
        let mut listing = datum(RequestParams::get("/users").query("page=2"));
        mock().request_call(&mut listing).unwrap();
        assert_eq!(listing.response.unwrap().body().as_ref(), b"page two");

        let mut accepted = datum(RequestParams::post("/x").header("accept", "text/plain"));
        mock().request_call(&mut accepted).unwrap();
        assert_eq!(accepted.response.unwrap().status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn unmatched_request_is_an_error() {
        let mut datum = datum(RequestParams::get("/users").query("page=3"));
        let error = mock().request_call(&mut datum).unwrap_err();
        assert!(matches!(error, Error::StubNotFound { ref path, .. } if path == "/users"));
        assert!(datum.response.is_none());
    }

    #[test]
    fn mock_can_be_bypassed() {
        let mut datum = datum(RequestParams::get("/nothing").option("mock", "false"));
        mock().request_call(&mut datum).unwrap();
        assert!(datum.response.is_none());
    }
}
