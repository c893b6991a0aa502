//! Unix domain socket transport.
//!
//! [`UnixTransport`] connects to the filesystem path carried by the endpoint. Unix
//! endpoints never go through a proxy.

use std::task::{Context, Poll};

use futures_core::future::BoxFuture;
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::trace;

use super::Endpoint;
use crate::BoxError;

/// Errors raised while connecting to a unix socket.
#[derive(Debug, Error)]
pub enum UnixConnectionError {
    /// The endpoint has no socket path.
    #[error("no socket path in endpoint")]
    NoAddress,

    /// Connecting to the socket failed.
    #[error("unix connect error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport which connects to unix domain sockets.
#[derive(Debug, Clone, Default)]
pub struct UnixTransport {
    _priv: (),
}

impl tower::Service<Endpoint> for UnixTransport {
    type Response = UnixStream;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, endpoint: Endpoint) -> Self::Future {
        let path = endpoint.socket().map(ToOwned::to_owned);
        Box::pin(async move {
            let path = path.ok_or(UnixConnectionError::NoAddress)?;
            let stream = UnixStream::connect(&path)
                .await
                .map_err(UnixConnectionError::Io)?;
            trace!(path = %path.display(), "unix connected");
            Ok(stream)
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;
    use tower::ServiceExt as _;

    use super::*;
    use crate::config::ConnectionConfig;

    #[tokio::test]
    async fn connects_to_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ok").await.unwrap();
        });

        let endpoint = Endpoint::new(&ConnectionConfig::unix(&path), None);
        let mut stream = UnixTransport::default().oneshot(endpoint).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_socket_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::new(&ConnectionConfig::unix(dir.path().join("absent.sock")), None);
        let error = UnixTransport::default().oneshot(endpoint).await.unwrap_err();
        assert!(error.to_string().starts_with("unix connect error"));
    }
}
