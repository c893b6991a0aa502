//! TLS transport over TCP, with `CONNECT` tunnelling through HTTP proxies.

use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures_core::future::BoxFuture;
use rustls::pki_types::ServerName;
use rustls::ClientConfig as TlsClientConfig;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, Instrument};

use super::tcp::{self, TcpConnectionError};
use super::Endpoint;
use crate::proxy::ProxyDescriptor;
use crate::BoxError;

const MAX_TUNNEL_HEADER: usize = 16 * 1024;

/// Errors raised while establishing a TLS session.
#[derive(Debug, Error)]
pub enum TlsConnectionError {
    /// The underlying TCP connection failed.
    #[error(transparent)]
    Connection(#[from] TcpConnectionError),

    /// The endpoint has no host to present as the server name.
    #[error("no domain found in endpoint")]
    NoDomain,

    /// The host is not a valid TLS server name.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// No usable crypto provider is installed or compiled in.
    #[error("no TLS crypto provider available")]
    NoProvider,

    /// None of the requested cipher suites are supported.
    #[error("no supported cipher suite in {0:?}")]
    NoCipherSuites(String),

    /// Building the client configuration failed.
    #[error("tls configuration: {0}")]
    Config(#[from] rustls::Error),

    /// The proxy refused to open a tunnel.
    #[error("proxy refused tunnel: {0}")]
    Tunnel(String),

    /// I/O error during the tunnel request or the handshake.
    #[error("tls handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport via TLS.
///
/// Uses the endpoint's client configuration when it has one, and otherwise a default
/// configuration trusting the platform's native roots.
#[derive(Debug, Clone, Default)]
pub struct TlsTransport {
    _priv: (),
}

impl tower::Service<Endpoint> for TlsTransport {
    type Response = TlsStream<TcpStream>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, endpoint: Endpoint) -> Self::Future {
        Box::pin(async move { connect(endpoint).await.map_err(BoxError::from) })
    }
}

async fn connect(endpoint: Endpoint) -> Result<TlsStream<TcpStream>, TlsConnectionError> {
    let host = endpoint.host().ok_or(TlsConnectionError::NoDomain)?.to_owned();
    let port = endpoint.port().ok_or(TlsConnectionError::NoDomain)?;
    let span = tracing::trace_span!("tls", host = %host, port = %port);

    async move {
        let stream = match endpoint.proxy() {
            Some(proxy) => {
                let stream = tcp::connect(&proxy.host, proxy.port, &endpoint).await?;
                tunnel(stream, proxy, &host, port).await?
            }
            None => tcp::connect(&host, port, &endpoint).await?,
        };

        let config = client_config(&endpoint)?;
        let domain = ServerName::try_from(host.clone())
            .map_err(|_| TlsConnectionError::InvalidServerName(host.clone()))?;

        let stream = TlsConnector::from(config).connect(domain, stream).await?;
        trace!("tls handshake complete");
        Ok(stream)
    }
    .instrument(span)
    .await
}

/// Ask an HTTP proxy to open a tunnel to `host:port`.
///
/// The proxy must answer with a 2xx status and must not send anything after its
/// response head, since the next bytes on the stream belong to the TLS handshake.
async fn tunnel(
    stream: TcpStream,
    proxy: &ProxyDescriptor,
    host: &str,
    port: u16,
) -> Result<TcpStream, TlsConnectionError> {
    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(credentials) = proxy.basic_auth() {
        request.push_str(&format!("Proxy-Authorization: {credentials}\r\n"));
    }
    request.push_str("Proxy-Connection: Keep-Alive\r\n\r\n");

    let mut reader = BufReader::new(stream);
    reader.get_mut().write_all(request.as_bytes()).await?;
    reader.get_mut().flush().await?;

    let mut line = Vec::new();
    let mut read = 0;
    reader.read_until(b'\n', &mut line).await?;
    let status = String::from_utf8_lossy(&line).trim_end().to_owned();
    let code = status
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TlsConnectionError::Tunnel(status.clone()))?;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        read += n;
        if n == 0 || read > MAX_TUNNEL_HEADER {
            return Err(TlsConnectionError::Tunnel("incomplete response".into()));
        }
        if line == b"\r\n" || line == b"\n" {
            break;
        }
    }

    if !(200..300).contains(&code) {
        return Err(TlsConnectionError::Tunnel(status));
    }
    if !reader.buffer().is_empty() {
        return Err(TlsConnectionError::Tunnel(
            "unexpected data after response".into(),
        ));
    }

    debug!(proxy.host = %proxy.host, proxy.port = proxy.port, "tunnel established");
    Ok(reader.into_inner())
}

fn client_config(endpoint: &Endpoint) -> Result<Arc<TlsClientConfig>, TlsConnectionError> {
    if let Some(config) = endpoint.tls_config() {
        return Ok(config.clone());
    }

    match endpoint.ciphers() {
        Some(ciphers) => build_config(Some(ciphers)).map(Arc::new),
        None => default_tls_config(),
    }
}

/// Default TLS client configuration, trusting the platform's native certificates.
///
/// The configuration is built once and shared between connections.
pub fn default_tls_config() -> Result<Arc<TlsClientConfig>, TlsConnectionError> {
    static DEFAULT: OnceLock<Arc<TlsClientConfig>> = OnceLock::new();

    if let Some(config) = DEFAULT.get() {
        return Ok(config.clone());
    }

    let config = Arc::new(build_config(None)?);
    Ok(DEFAULT.get_or_init(|| config).clone())
}

fn build_config(ciphers: Option<&str>) -> Result<TlsClientConfig, TlsConnectionError> {
    let mut provider = crypto_provider()?;
    if let Some(ciphers) = ciphers {
        let wanted: Vec<&str> = ciphers
            .split([':', ','])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            wanted.iter().any(|w| w.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(TlsConnectionError::NoCipherSuites(ciphers.to_owned()));
        }
    }

    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        debug!("native certificate error: {error}");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    trace!(added, ignored, "loaded native roots");

    let mut cfg = TlsClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    Ok(cfg)
}

fn crypto_provider() -> Result<rustls::crypto::CryptoProvider, TlsConnectionError> {
    if let Some(provider) = rustls::crypto::CryptoProvider::get_default() {
        return Ok(provider.as_ref().clone());
    }

    #[cfg(feature = "tls-ring")]
    {
        Ok(rustls::crypto::ring::default_provider())
    }

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    {
        Ok(rustls::crypto::aws_lc_rs::default_provider())
    }

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    {
        Err(TlsConnectionError::NoProvider)
    }
}
