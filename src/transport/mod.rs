//! Transports open sockets to remote servers.
//!
//! A transport is a [`tower::Service`] which takes an [`Endpoint`] and returns a byte
//! stream. The default [`AutoTransport`] picks plain TCP, TLS over TCP, or a unix domain
//! socket based on the endpoint's scheme. Any other transport can be supplied to a
//! connection, which is how the in-memory mock transport is used in tests.
//!
//! Opened streams are wrapped in a [`Socket`], which adds read buffering and the
//! connection's read and write deadlines.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tower::ServiceExt as _;

use crate::config::{ConnectionConfig, Scheme};
use crate::error::TimeoutKind;
use crate::proxy::ProxyDescriptor;
use crate::{BoxError, Error};

#[cfg(feature = "mocks")]
pub mod mock;
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
#[cfg(target_family = "unix")]
pub mod unix;

/// A bidirectional byte stream.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A type-erased byte stream.
pub type BoxedIo = Box<dyn AsyncIo>;

/// A type-erased transport.
pub type BoxTransport = tower::util::BoxCloneSyncService<Endpoint, BoxedIo, BoxError>;

/// Conversion of a transport service into a [`BoxTransport`].
pub trait IntoBoxTransport {
    /// Box the transport.
    fn into_box_transport(self) -> BoxTransport;
}

impl<T> IntoBoxTransport for T
where
    T: tower::Service<Endpoint, Error = BoxError> + Clone + Send + Sync + 'static,
    T::Response: AsyncIo + 'static,
    T::Future: Send + 'static,
{
    fn into_box_transport(self) -> BoxTransport {
        BoxTransport::new(self.map_response(|io| Box::new(io) as BoxedIo))
    }
}

/// Everything a transport needs to know to open a socket.
#[derive(Debug, Clone)]
pub struct Endpoint {
    scheme: Scheme,
    host: Option<String>,
    port: Option<u16>,
    socket: Option<PathBuf>,
    proxy: Option<ProxyDescriptor>,
    ciphers: Option<String>,
    tcp_nodelay: bool,
    tcp_keepalive: Option<Duration>,
    #[cfg(feature = "tls")]
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Endpoint {
    pub(crate) fn new(config: &ConnectionConfig, proxy: Option<ProxyDescriptor>) -> Self {
        Self {
            scheme: config.scheme,
            host: config.host.clone(),
            port: config.effective_port(),
            socket: config.socket.clone(),
            proxy,
            ciphers: config.ciphers.clone(),
            tcp_nodelay: config.tcp_nodelay,
            tcp_keepalive: config.tcp_keepalive,
            #[cfg(feature = "tls")]
            tls_config: config.tls_config.clone(),
        }
    }

    /// Endpoint scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Remote host, for TCP endpoints.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Remote port, for TCP endpoints.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Socket path, for unix endpoints.
    pub fn socket(&self) -> Option<&Path> {
        self.socket.as_deref()
    }

    /// Proxy to connect through.
    pub fn proxy(&self) -> Option<&ProxyDescriptor> {
        self.proxy.as_ref()
    }

    /// Allowed TLS cipher suites.
    pub fn ciphers(&self) -> Option<&str> {
        self.ciphers.as_deref()
    }

    /// Host and port of the remote server.
    pub fn target(&self) -> Result<(&str, u16), BoxError> {
        let host = self.host().ok_or("endpoint has no host")?;
        let port = self.port().ok_or("endpoint has no port")?;
        Ok((host, port))
    }

    pub(crate) fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    pub(crate) fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls_config(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls_config.as_ref()
    }
}

/// Open a socket for `endpoint` with `transport`, within `timeout`.
pub(crate) async fn connect(
    transport: BoxTransport,
    endpoint: Endpoint,
    timeout: Option<Duration>,
) -> Result<BoxedIo, Error> {
    let connecting = transport.oneshot(endpoint);
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, connecting).await {
            Ok(result) => result.map_err(Error::Socket),
            Err(_) => Err(Error::Timeout(TimeoutKind::Connect)),
        },
        None => connecting.await.map_err(Error::Socket),
    }
}

async fn deadline<F, T>(limit: Option<Duration>, kind: TimeoutKind, operation: F) -> Result<T, Error>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout(kind)),
        },
        None => operation.await.map_err(Error::from),
    }
}

/// An open, buffered byte stream with read and write deadlines.
///
/// Socket operations return [`Error::Socket`] for I/O failures and [`Error::Timeout`]
/// when a deadline elapses.
pub struct Socket {
    io: BufReader<BoxedIo>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("buffered", &self.io.buffer().len())
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl Socket {
    /// Wrap a stream, with no deadlines.
    pub fn new<IO>(io: IO) -> Self
    where
        IO: AsyncIo + 'static,
    {
        Self::from_boxed(Box::new(io))
    }

    pub(crate) fn from_boxed(io: BoxedIo) -> Self {
        Self {
            io: BufReader::new(io),
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Set the read and write deadlines.
    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) {
        self.read_timeout = read;
        self.write_timeout = write;
    }

    /// Write all of `buf` and flush it.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        let io = self.io.get_mut();
        deadline(self.write_timeout, TimeoutKind::Write, async move {
            io.write_all(buf).await?;
            io.flush().await
        })
        .await
    }

    /// Read up to `max` bytes. An empty result means the remote end closed the stream.
    pub async fn read(&mut self, max: usize) -> Result<Bytes, Error> {
        let io = &mut self.io;
        deadline(self.read_timeout, TimeoutKind::Read, async move {
            let available = io.fill_buf().await?;
            let n = available.len().min(max);
            let bytes = Bytes::copy_from_slice(&available[..n]);
            io.consume(n);
            Ok(bytes)
        })
        .await
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes, Error> {
        let io = &mut self.io;
        deadline(self.read_timeout, TimeoutKind::Read, async move {
            let mut buf = vec![0; n];
            io.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
        .await
    }

    /// Read one line, including its terminating `\n`, of at most `limit` bytes.
    ///
    /// Returns an empty buffer at end of stream. A line longer than `limit` is returned
    /// truncated and without a `\n`.
    pub async fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, Error> {
        let io = &mut self.io;
        deadline(self.read_timeout, TimeoutKind::Read, async move {
            let mut line = Vec::new();
            io.take(limit as u64).read_until(b'\n', &mut line).await?;
            Ok(line)
        })
        .await
    }

    /// Shut the stream down.
    pub async fn close(mut self) -> Result<(), Error> {
        let io = self.io.get_mut();
        deadline(self.write_timeout, TimeoutKind::Write, io.shutdown()).await
    }
}

/// Transport which chooses TCP, TLS or unix sockets from the endpoint scheme.
#[derive(Debug, Clone, Default)]
pub struct AutoTransport {
    tcp: tcp::TcpTransport,
    #[cfg(feature = "tls")]
    tls: tls::TlsTransport,
    #[cfg(target_family = "unix")]
    unix: unix::UnixTransport,
}

impl tower::Service<Endpoint> for AutoTransport {
    type Response = BoxedIo;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, endpoint: Endpoint) -> Self::Future {
        match endpoint.scheme() {
            Scheme::Http => {
                let transport = self.tcp.clone();
                Box::pin(async move {
                    let stream = transport.oneshot(endpoint).await?;
                    Ok(Box::new(stream) as BoxedIo)
                })
            }

            #[cfg(feature = "tls")]
            Scheme::Https => {
                let transport = self.tls.clone();
                Box::pin(async move {
                    let stream = transport.oneshot(endpoint).await?;
                    Ok(Box::new(stream) as BoxedIo)
                })
            }

            #[cfg(not(feature = "tls"))]
            Scheme::Https => Box::pin(std::future::ready(Err(
                "https requires the tls feature".into()
            ))),

            #[cfg(target_family = "unix")]
            Scheme::Unix => {
                let transport = self.unix.clone();
                Box::pin(async move {
                    let stream = transport.oneshot(endpoint).await?;
                    Ok(Box::new(stream) as BoxedIo)
                })
            }

            #[cfg(not(target_family = "unix"))]
            Scheme::Unix => Box::pin(std::future::ready(Err(
                "unix sockets are not supported on this platform".into(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Socket: Send, fmt::Debug);
    assert_impl_all!(BoxTransport: Clone, Send, Sync);
    assert_impl_all!(Endpoint: Clone, Send, Sync);

    #[tokio::test]
    async fn socket_reads_lines_and_bytes() {
        let mut socket = Socket::new(Cursor::new(b"first line\r\nrest of it".to_vec()));
        assert_eq!(socket.read_line(1024).await.unwrap(), b"first line\r\n");
        assert_eq!(socket.read(4).await.unwrap().as_ref(), b"rest");
        assert_eq!(socket.read_exact(3).await.unwrap().as_ref(), b" of");
        assert_eq!(socket.read(100).await.unwrap().as_ref(), b" it");
        assert!(socket.read(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn line_limit_truncates() {
        let mut socket = Socket::new(Cursor::new(b"abcdefgh\n".to_vec()));
        assert_eq!(socket.read_line(4).await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn read_timeout_elapses() {
        let (client, _server) = tokio::io::duplex(64);
        let mut socket = Socket::new(client);
        socket.set_timeouts(Some(Duration::from_millis(10)), None);
        let error = socket.read(10).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(TimeoutKind::Read)));
    }
}
