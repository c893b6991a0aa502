use http::StatusCode;

use tether::proxy::ProxyEnvironment;
use tether::transport::mock::MockTransport;
use tether::{Builder, Error, ErrorAction, Middleware, RequestDatum, RequestParams, Response};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn builder(transport: &MockTransport) -> Builder {
    Builder::http("example.com")
        .with_proxy_environment(ProxyEnvironment::default())
        .with_transport(transport.clone())
}

#[tokio::test]
async fn all_requests_written_before_first_read() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.respond(format!("{}{}{}", response("a"), response("bb"), response("ccc")));

    let mut connection = builder(&transport).with_persistent(true).build()?;
    let responses = connection
        .requests(vec![
            RequestParams::get("/a"),
            RequestParams::get("/b"),
            RequestParams::get("/c"),
        ])
        .await?;

    let bodies: Vec<_> = responses.iter().map(|r| r.body().clone()).collect();
    assert_eq!(bodies, vec!["a", "bb", "ccc"]);

    assert_eq!(transport.connects(), 1);
    let socket = &transport.connections()[0];
    let written = socket.written_string();
    assert_eq!(socket.first_read_at(), Some(written.len()));
    assert_eq!(written.matches(" HTTP/1.1\r\n").count(), 3);
    assert_eq!(written.matches("Connection: TE\r\n").count(), 3);

    let a = written.find("GET /a ").unwrap();
    let b = written.find("GET /b ").unwrap();
    let c = written.find("GET /c ").unwrap();
    assert!(a < b && b < c);

    assert!(connection.pool().contains(connection.socket_key()));
    Ok(())
}

#[tokio::test]
async fn last_request_closes_without_persistence() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.respond(format!("{}{}", response("one"), response("two")));

    let mut connection = builder(&transport).build()?;
    let responses = connection
        .requests(vec![RequestParams::get("/1"), RequestParams::get("/2")])
        .await?;
    assert_eq!(responses.len(), 2);

    let written = transport.connections()[0].written_string();
    let (first, second) = written.split_at(written.find("GET /2 ").unwrap());
    assert!(first.contains("Connection: TE\r\n"));
    assert!(second.contains("Connection: TE, close\r\n"));

    assert!(connection.pool().is_empty());
    assert!(transport.connections()[0].is_closed());
    Ok(())
}

#[tokio::test]
async fn close_on_last_response_resets() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.respond(format!(
        "{}HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        response("first")
    ));

    let mut connection = builder(&transport).with_persistent(true).build()?;
    let responses = connection
        .requests(vec![RequestParams::get("/"), RequestParams::head("/")])
        .await?;

    assert!(responses[1].wants_close());
    assert!(connection.pool().is_empty());
    Ok(())
}

#[tokio::test]
async fn failure_mid_batch_resets() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.respond(format!(
        "{}HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n",
        response("ok")
    ));

    let mut connection = builder(&transport).with_persistent(true).build()?;
    let error = connection
        .requests(vec![
            RequestParams::get("/"),
            RequestParams::get("/").expects([200]),
            RequestParams::get("/"),
        ])
        .await
        .unwrap_err();

    assert_eq!(error.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert!(connection.pool().is_empty());
    assert!(transport.connections()[0].is_closed());
    Ok(())
}

#[tokio::test]
async fn pipelined_requests_are_not_retried() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.fail_writes().respond(response("unused"));

    let mut connection = builder(&transport).with_idempotent(true).build()?;
    let error = connection
        .requests(vec![RequestParams::get("/"), RequestParams::get("/")])
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Socket(_)));
    assert_eq!(transport.connects(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_batch_is_rejected() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    let mut connection = builder(&transport).build()?;
    let error = connection.requests(Vec::new()).await.unwrap_err();
    assert!(matches!(error, Error::Pipeline(_)));
    assert_eq!(transport.connects(), 0);
    Ok(())
}

/// Fails any request for `/boom` before it is written, and substitutes a 503.
#[derive(Debug)]
struct Boom;

impl Middleware for Boom {
    fn request_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        if datum.path == "/boom" {
            return Err(Error::socket("boom"));
        }
        Ok(())
    }

    fn error_call(&self, datum: &mut RequestDatum) -> ErrorAction {
        datum.response = Some(Response::new(StatusCode::SERVICE_UNAVAILABLE));
        ErrorAction::Recover
    }
}

#[tokio::test]
async fn recovered_failure_after_writes_fails_the_batch() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.respond(response("for-a")).respond(response("for-c"));

    let mut connection = builder(&transport)
        .with_persistent(true)
        .with_middleware(Boom)
        .build()?;
    let error = connection
        .requests(vec![
            RequestParams::get("/a"),
            RequestParams::get("/boom"),
            RequestParams::get("/c"),
        ])
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Socket(_)));
    assert_eq!(transport.connects(), 1);
    let socket = &transport.connections()[0];
    assert!(socket.is_closed());
    let written = socket.written_string();
    assert!(written.starts_with("GET /a "));
    assert!(!written.contains("GET /c "));
    assert!(connection.pool().is_empty());
    Ok(())
}

#[tokio::test]
async fn recovered_failure_before_writes_keeps_framing() -> Result<(), BoxError> {
    let transport = MockTransport::new();
    transport.respond(response("for-a"));

    let mut connection = builder(&transport)
        .with_persistent(true)
        .with_middleware(Boom)
        .build()?;
    let responses = connection
        .requests(vec![RequestParams::get("/boom"), RequestParams::get("/a")])
        .await?;

    assert_eq!(responses[0].status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(responses[1].body(), "for-a");
    assert_eq!(transport.connects(), 1);
    Ok(())
}
