//! TCP transport.
//!
//! [`TcpTransport`] resolves the endpoint host and tries each address in turn until
//! one accepts. When the endpoint carries a proxy, the socket is opened to the proxy
//! instead of the origin server.

use std::fmt;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use futures_core::future::BoxFuture;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{trace, warn, Instrument};

use super::Endpoint;
use crate::BoxError;

/// A TCP connector.
///
/// # Example
/// ```no_run
/// # use tether::transport::tcp::TcpTransport;
/// # use tether::{ConnectionConfig, Connection};
/// # async fn run() -> Result<(), tether::Error> {
/// let mut config = ConnectionConfig::from_url("http://example.com")?;
/// config.transport = Some(tether::transport::IntoBoxTransport::into_box_transport(TcpTransport::default()));
/// let connection = Connection::new(config)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    _priv: (),
}

impl tower::Service<Endpoint> for TcpTransport {
    type Response = TcpStream;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, endpoint: Endpoint) -> Self::Future {
        Box::pin(async move {
            let (host, port) = match endpoint.proxy() {
                Some(proxy) => (proxy.host.clone(), proxy.port),
                None => {
                    let (host, port) = endpoint.target()?;
                    (host.to_owned(), port)
                }
            };
            let stream = connect(&host, port, &endpoint).await?;
            Ok(stream)
        })
    }
}

/// Open a TCP stream to `host:port`, applying the endpoint's socket options.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    endpoint: &Endpoint,
) -> Result<TcpStream, TcpConnectionError> {
    let span = tracing::trace_span!("tcp", host = %host, port = %port);
    async move {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(TcpConnectionError::msg("dns resolution"))?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    trace!(remote.addr = %addr, "tcp connected");
                    configure(&stream, endpoint);
                    return Ok(stream);
                }
                Err(error) => {
                    trace!(remote.addr = %addr, "tcp connect error: {error}");
                    last_error = Some(error);
                }
            }
        }

        Err(match last_error {
            Some(error) => TcpConnectionError::build("tcp connect error", error),
            None => TcpConnectionError::new(format!("no addresses found for {host}")),
        })
    }
    .instrument(span)
    .await
}

fn configure(stream: &TcpStream, endpoint: &Endpoint) {
    if endpoint.tcp_nodelay() {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    if let Some(dur) = endpoint.tcp_keepalive() {
        let conf = socket2::TcpKeepalive::new().with_time(dur);
        if let Err(e) = socket2::SockRef::from(stream).set_tcp_keepalive(&conf) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }
}

/// Error type for TCP connections.
#[derive(Debug, Error)]
pub struct TcpConnectionError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TcpConnectionError {
    pub(super) fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub(super) fn msg<S, E>(message: S) -> impl FnOnce(E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        move |error| Self {
            message: message.into(),
            source: Some(error.into()),
        }
    }

    pub(super) fn build<S, E>(message: S, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(error)),
        }
    }
}

impl fmt::Display for TcpConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref source) = self.source {
            write!(f, "{}: {}", self.message, source)
        } else {
            write!(f, "{}", self.message)
        }
    }
}
