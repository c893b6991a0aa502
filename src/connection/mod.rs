//! The connection controller.
//!
//! A [`Connection`] owns its configuration, the proxy resolved for it, and a
//! [`SocketPool`]. Each request overlays the caller's [`RequestParams`] on the
//! configuration to build a [`RequestDatum`], then drives it through the middleware
//! chain around the socket:
//!
//! 1. `request_call` hooks, outermost first.
//! 2. The request is written to the pooled socket, unless a hook already supplied a
//!    response.
//! 3. The response is read, or checked against `expects` when a hook supplied it,
//!    and streamed to the response block.
//! 4. `response_call` hooks, innermost first.
//!
//! After a successful request the socket stays in the pool only when the request was
//! persistent, the response did not ask to close, and the response framing left the
//! socket usable. Any failure resets the socket before error hooks run, so a broken
//! socket is never reused.

use std::path::Path;

use tracing::{debug, warn};

use crate::body::Body;
use crate::config::{port_string, ConnectionConfig, RequestParams, Scheme};
use crate::middleware::{ErrorAction, Stack};
use crate::pool::{SocketKey, SocketPool};
use crate::proxy::{self, ProxyDescriptor, ProxyEnvironment};
use crate::response::parse::{self, ParseOptions};
use crate::response::{stream, Response};
use crate::transport::{self, AutoTransport, BoxTransport, Endpoint, Socket};
use crate::{request, Error};

mod datum;

pub use self::datum::RequestDatum;

/// A connection to one endpoint.
///
/// Requests on a connection run one at a time, since every method takes `&mut self`.
/// Use one connection per task.
///
/// # Example
/// ```no_run
/// # use tether::{Connection, ConnectionConfig, RequestParams};
/// # async fn run() -> Result<(), tether::Error> {
/// let config = ConnectionConfig::from_url("https://example.com")?;
/// let mut connection = Connection::new(config)?;
/// let response = connection.request(RequestParams::get("/status")).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    proxy: Option<ProxyDescriptor>,
    endpoint: Endpoint,
    host: String,
    key: SocketKey,
    transport: BoxTransport,
    pool: SocketPool,
}

enum Outcome {
    Recovered(Response),
    Retry(Error),
    Failed(Error),
}

impl Connection {
    /// Create a connection, reading proxy settings from the process environment.
    pub fn new(config: ConnectionConfig) -> Result<Self, Error> {
        Self::with_environment(config, &ProxyEnvironment::from_env())
    }

    /// Create a connection with an explicit proxy environment.
    ///
    /// The configuration is validated, the proxy is resolved once, and credentials in
    /// `user`/`password` become a default `Authorization` header.
    pub fn with_environment(
        mut config: ConnectionConfig,
        environment: &ProxyEnvironment,
    ) -> Result<Self, Error> {
        config.validate()?;

        #[cfg(not(feature = "tls"))]
        if config.scheme == Scheme::Https && config.transport.is_none() {
            return Err(Error::config("https requires the tls feature"));
        }

        let proxy = proxy::resolve(&mut config, environment)?;

        if config.user.is_some() || config.password.is_some() {
            let credentials = proxy::basic_auth(
                config.user.as_deref().unwrap_or_default(),
                config.password.as_deref().unwrap_or_default(),
            );
            config.headers.insert_if_absent("Authorization", credentials);
        }

        let key = SocketKey::from_config(&config)
            .ok_or_else(|| Error::config("connection has no host or socket"))?;
        let transport = config
            .transport
            .clone()
            .unwrap_or_else(|| BoxTransport::new(AutoTransport::default()));

        let endpoint = Endpoint::new(&config, proxy.clone());
        let host = host_header(&config);

        debug!(%key, proxy = ?proxy, "connection configured");
        Ok(Self {
            config,
            proxy,
            endpoint,
            host,
            key,
            transport,
            pool: SocketPool::new(),
        })
    }

    /// Use `pool` for this connection's sockets.
    pub fn with_pool(mut self, pool: SocketPool) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the socket pool, returning the previous one.
    pub fn replace_pool(&mut self, pool: SocketPool) -> SocketPool {
        std::mem::replace(&mut self.pool, pool)
    }

    /// Consume the connection, keeping its open sockets.
    pub fn into_pool(self) -> SocketPool {
        self.pool
    }

    /// The connection's defaults.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Mutable access to the defaults, affecting later requests.
    ///
    /// The endpoint (scheme, host, port, socket path and socket options), the `Host`
    /// header derived from it, and the proxy are fixed when the connection is created.
    /// Changing those fields here has no effect on this connection.
    pub fn config_mut(&mut self) -> &mut ConnectionConfig {
        &mut self.config
    }

    /// Pool key of this connection's socket.
    pub fn socket_key(&self) -> &SocketKey {
        &self.key
    }

    /// The proxy requests go through.
    pub fn proxy(&self) -> Option<&ProxyDescriptor> {
        self.proxy.as_ref()
    }

    /// The socket pool.
    pub fn pool(&self) -> &SocketPool {
        &self.pool
    }

    /// Close and forget this connection's pooled socket.
    pub async fn reset(&mut self) {
        self.pool.reset(&self.key).await;
    }

    /// Issue a `GET` request.
    pub async fn get(&mut self, params: RequestParams) -> Result<Response, Error> {
        self.request(params.method(http::Method::GET)).await
    }

    /// Issue a `HEAD` request.
    pub async fn head(&mut self, params: RequestParams) -> Result<Response, Error> {
        self.request(params.method(http::Method::HEAD)).await
    }

    /// Issue a `POST` request.
    pub async fn post(&mut self, params: RequestParams) -> Result<Response, Error> {
        self.request(params.method(http::Method::POST)).await
    }

    /// Issue a `PUT` request.
    pub async fn put(&mut self, params: RequestParams) -> Result<Response, Error> {
        self.request(params.method(http::Method::PUT)).await
    }

    /// Issue a `DELETE` request.
    pub async fn delete(&mut self, params: RequestParams) -> Result<Response, Error> {
        self.request(params.method(http::Method::DELETE)).await
    }

    /// Issue one request and read its response.
    ///
    /// When error hooks ask for a retry the request is issued again after
    /// `retry_interval`. A hook may also recover from an error with a substitute
    /// response, which is then returned.
    ///
    /// Requests with `pipeline` set are rejected with [`Error::Pipeline`]; batches go
    /// through [`Connection::requests`].
    #[tracing::instrument(level = "debug", skip_all, fields(key = %self.key))]
    pub async fn request(&mut self, params: RequestParams) -> Result<Response, Error> {
        if params.pipeline == Some(true) {
            return Err(Error::Pipeline("pipelined requests must be issued with `requests`"));
        }

        let stack = Stack::new(&self.config.middlewares);
        let mut datum = self.prepare(params);
        check_options(&stack, &datum);

        loop {
            match self.round_trip(&stack, &mut datum).await {
                Ok(response) => {
                    self.settle(&datum, &response).await;
                    return Ok(response);
                }
                Err(error) => match self.fail(&stack, &mut datum, error).await {
                    Outcome::Recovered(response) => return Ok(response),
                    Outcome::Failed(error) => return Err(error),
                    Outcome::Retry(error) => {
                        debug!(%error, retries_remaining = datum.retries_remaining, "retrying request");
                        if !datum.retry_interval.is_zero() {
                            tokio::time::sleep(datum.retry_interval).await;
                        }
                    }
                },
            }
        }
    }

    /// Issue a batch of requests on one socket, writing every request before reading
    /// any response.
    ///
    /// Every request but the last is persistent. The last request uses the
    /// connection's own `persistent` setting, and the socket is reset afterwards
    /// unless the connection is persistent and the last response allows reuse.
    /// Responses are returned in request order. Pipelined requests are never retried.
    ///
    /// An error hook may recover a failed request with a substitute response. If the
    /// failure happens while requests written earlier in the batch still await their
    /// responses, the socket carrying them has been reset and the whole batch fails
    /// with [`Error::Socket`].
    #[tracing::instrument(level = "debug", skip_all, fields(key = %self.key, batch = batch.len()))]
    pub async fn requests(&mut self, batch: Vec<RequestParams>) -> Result<Vec<Response>, Error> {
        let Some(last) = batch.len().checked_sub(1) else {
            return Err(Error::Pipeline("empty request batch"));
        };

        let stack = Stack::new(&self.config.middlewares);
        let persistent = self.config.persistent;
        let mut data = Vec::with_capacity(batch.len());
        for (index, mut params) in batch.into_iter().enumerate() {
            params.pipeline = Some(true);
            params.persistent = Some(if index == last { persistent } else { true });
            let datum = self.prepare(params);
            check_options(&stack, &datum);
            data.push(datum);
        }

        // Requests written to the current socket whose responses are still unread.
        let mut outstanding = 0;
        for datum in data.iter_mut() {
            match self.issue(&stack, datum).await {
                Ok(()) if datum.response.is_none() => outstanding += 1,
                Ok(()) => {}
                Err(error) => match self.fail(&stack, datum, error).await {
                    Outcome::Recovered(response) if outstanding == 0 => {
                        datum.response = Some(response)
                    }
                    Outcome::Recovered(_) => {
                        return Err(Error::socket(format!(
                            "socket reset with {outstanding} pipelined responses unread"
                        )))
                    }
                    Outcome::Failed(error) | Outcome::Retry(error) => return Err(error),
                },
            }
        }
        debug!(requests = data.len(), "pipelined requests written");

        let mut responses = Vec::with_capacity(data.len());
        for datum in data.iter_mut() {
            match self.receive(&stack, datum).await {
                Ok(response) => responses.push(response),
                Err(error) => match self.fail(&stack, datum, error).await {
                    Outcome::Recovered(response) => responses.push(response),
                    Outcome::Failed(error) | Outcome::Retry(error) => return Err(error),
                },
            }
        }

        let close = responses.last().is_some_and(Response::wants_close);
        let reusable = data.iter().all(|datum| datum.socket_reusable);
        if !persistent || close || !reusable {
            self.reset().await;
        }
        Ok(responses)
    }

    /// Overlay `params` on the connection's defaults.
    pub(crate) fn prepare(&self, params: RequestParams) -> RequestDatum {
        let config = &self.config;

        let mut headers = config.headers.clone();
        headers.merge(&params.headers);
        headers.insert_if_absent("Host", self.host.clone());

        let mut path = params.path.unwrap_or_else(|| config.path.clone());
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        let pipeline = params.pipeline.unwrap_or(false);
        let mut idempotent = params.idempotent.unwrap_or(config.idempotent);
        if idempotent && params.request_block.is_some() {
            warn!("a request with a request block cannot be idempotent; it will not be retried");
            idempotent = false;
        }
        if idempotent && pipeline {
            warn!("a pipelined request cannot be idempotent; it will not be retried");
            idempotent = false;
        }

        let retry_limit = params.retry_limit.unwrap_or(config.retry_limit);

        RequestDatum {
            method: params.method.unwrap_or_else(|| config.method.clone()),
            scheme: self.endpoint.scheme(),
            host: self.endpoint.host().map(str::to_owned),
            port: self.endpoint.port(),
            socket: self.endpoint.socket().map(Path::to_path_buf),
            path,
            query: params.query.or_else(|| config.query.clone()),
            headers,
            body: params.body.or_else(|| config.body.clone().map(Body::Full)),
            request_block: params.request_block,
            response_block: params.response_block,
            proxy: self.proxy.clone(),
            chunk_size: params.chunk_size.unwrap_or(config.chunk_size),
            persistent: params.persistent.unwrap_or(config.persistent),
            pipeline,
            idempotent,
            retry_limit,
            retries_remaining: params.retries_remaining.unwrap_or(retry_limit),
            retry_interval: params.retry_interval.unwrap_or(config.retry_interval),
            expects: params.expects.or_else(|| config.expects.clone()),
            omit_default_port: config.omit_default_port,
            read_timeout: params.read_timeout.or(config.read_timeout),
            write_timeout: params.write_timeout.or(config.write_timeout),
            instrumentor: config.instrumentor.clone(),
            instrumentor_name: config.instrumentor_name.clone(),
            socket_key: self.key.clone(),
            extensions: params.extensions,
            options: params.options,
            response: None,
            error: None,
            socket_reusable: true,
        }
    }

    async fn round_trip(&mut self, stack: &Stack, datum: &mut RequestDatum) -> Result<Response, Error> {
        self.issue(stack, datum).await?;
        self.receive(stack, datum).await
    }

    /// Run request hooks, then write the request unless a hook answered it.
    async fn issue(&mut self, stack: &Stack, datum: &mut RequestDatum) -> Result<(), Error> {
        stack.request_call(datum)?;
        if datum.response.is_none() {
            let socket = self.socket(datum).await?;
            request::write_request(socket, datum).await?;
        }
        Ok(())
    }

    /// Obtain the response, then run response hooks.
    async fn receive(&mut self, stack: &Stack, datum: &mut RequestDatum) -> Result<Response, Error> {
        self.read_response(datum).await.map_err(Error::reclassify)?;
        stack.response_call(datum)?;
        datum
            .response
            .take()
            .ok_or_else(|| Error::socket("response discarded by middleware"))
    }

    async fn read_response(&mut self, datum: &mut RequestDatum) -> Result<(), Error> {
        if let Some(response) = datum.response.take() {
            if let Some(expects) = &datum.expects {
                if !expects.contains(&response.status().as_u16()) {
                    return Err(Error::HttpStatus {
                        expected: expects.clone(),
                        response: Box::new(response),
                    });
                }
            }
            datum.response = Some(response);
        } else {
            let socket = self
                .pool
                .get_cached(&datum.socket_key)
                .ok_or_else(|| Error::socket("no open socket to read a response from"))?;
            socket.set_timeouts(datum.read_timeout, datum.write_timeout);

            let options = ParseOptions {
                method: &datum.method,
                expects: datum.expects.as_deref(),
                chunk_size: datum.chunk_size,
                response_block: datum.response_block.as_mut(),
            };
            let parsed = parse::parse(socket, options).await?;
            datum.socket_reusable = parsed.reusable;
            datum.response = Some(parsed.response);
        }

        if let Some(response) = datum.response.as_mut() {
            stream::stream(response, datum.response_block.as_mut(), datum.chunk_size);
        }
        Ok(())
    }

    /// The pooled socket for this connection, opening one if needed.
    async fn socket(&mut self, datum: &RequestDatum) -> Result<&mut Socket, Error> {
        let service = self.transport.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.config.connect_timeout;

        let socket = self
            .pool
            .get(&self.key, || async move {
                let io = transport::connect(service, endpoint, timeout).await?;
                Ok(Socket::from_boxed(io))
            })
            .await?;
        socket.set_timeouts(datum.read_timeout, datum.write_timeout);
        Ok(socket)
    }

    async fn settle(&mut self, datum: &RequestDatum, response: &Response) {
        if !datum.persistent || response.wants_close() || !datum.socket_reusable {
            self.reset().await;
        }
    }

    /// Reset the socket and hand the error to the error hooks.
    async fn fail(&mut self, stack: &Stack, datum: &mut RequestDatum, error: Error) -> Outcome {
        debug!(%error, "request failed; resetting socket");
        self.reset().await;

        datum.response = None;
        datum.socket_reusable = true;
        datum.error = Some(error);

        match stack.error_call(datum) {
            ErrorAction::Recover => match datum.response.take() {
                Some(response) => {
                    datum.error = None;
                    Outcome::Recovered(response)
                }
                None => Outcome::Failed(take_error(datum)),
            },
            ErrorAction::Retry => Outcome::Retry(take_error(datum)),
            ErrorAction::Propagate => Outcome::Failed(take_error(datum)),
        }
    }
}

/// `Host` header value: the socket path for unix sockets, otherwise host and port.
fn host_header(config: &ConnectionConfig) -> String {
    match config.scheme {
        Scheme::Unix => config
            .socket
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        scheme => {
            let host = config.host.as_deref().unwrap_or_default();
            let port = port_string(scheme, config.effective_port(), config.omit_default_port);
            if host.contains(':') {
                format!("[{host}]{port}")
            } else {
                format!("{host}{port}")
            }
        }
    }
}

fn take_error(datum: &mut RequestDatum) -> Error {
    datum
        .error
        .take()
        .unwrap_or_else(|| Error::socket("error discarded by middleware"))
}

fn check_options(stack: &Stack, datum: &RequestDatum) {
    for (key, _) in &datum.options {
        if !stack.is_valid_key(key) {
            warn!(option = %key, "unknown request option");
        }
    }
}
