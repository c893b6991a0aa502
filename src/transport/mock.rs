//! A scripted in-memory transport, suitable for testing connection behavior.
//!
//! Each call to the transport consumes the next scripted connection. Bytes written by
//! the client are recorded on a [`MockConnection`] handle so tests can inspect exactly
//! what went over the wire.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::Endpoint;
use crate::BoxError;

/// An error returned when the transport has nothing scripted or a refusal was scripted.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("mock connection refused")]
pub struct MockConnectionError;

#[derive(Debug)]
enum Script {
    Serve { response: Bytes, fail_writes: bool },
    Refuse,
}

#[derive(Debug, Default)]
struct TransportState {
    scripts: VecDeque<Script>,
    connections: Vec<MockConnection>,
    endpoints: Vec<Endpoint>,
}

/// A mock transport which serves scripted responses.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// Create a transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a connection which answers every read from `response`, then reports EOF.
    pub fn respond<B: Into<Bytes>>(&self, response: B) -> &Self {
        self.state.lock().scripts.push_back(Script::Serve {
            response: response.into(),
            fail_writes: false,
        });
        self
    }

    /// Script a connection which accepts, but fails every write.
    pub fn fail_writes(&self) -> &Self {
        self.state.lock().scripts.push_back(Script::Serve {
            response: Bytes::new(),
            fail_writes: true,
        });
        self
    }

    /// Script a refused connection attempt.
    pub fn refuse(&self) -> &Self {
        self.state.lock().scripts.push_back(Script::Refuse);
        self
    }

    /// Handles for every connection opened so far, in order.
    pub fn connections(&self) -> Vec<MockConnection> {
        self.state.lock().connections.clone()
    }

    /// Number of connection attempts so far, including refused ones.
    pub fn connects(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    /// Endpoints passed to each connection attempt.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().endpoints.clone()
    }
}

impl tower::Service<Endpoint> for MockTransport {
    type Response = MockStream;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, endpoint: Endpoint) -> Self::Future {
        let mut state = self.state.lock();
        state.endpoints.push(endpoint);

        let result = match state.scripts.pop_front() {
            Some(Script::Serve {
                response,
                fail_writes,
            }) => {
                let connection = MockConnection::default();
                state.connections.push(connection.clone());
                Ok(MockStream {
                    response,
                    fail_writes,
                    connection,
                })
            }
            Some(Script::Refuse) | None => Err(MockConnectionError.into()),
        };

        Box::pin(std::future::ready(result))
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    written: Vec<u8>,
    first_read_at: Option<usize>,
    closed: bool,
}

/// Observer for one mock connection.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl MockConnection {
    /// Every byte written by the client so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Written bytes as (lossy) UTF-8.
    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().written).into_owned()
    }

    /// Number of bytes which had been written when the client first read.
    pub fn first_read_at(&self) -> Option<usize> {
        self.state.lock().first_read_at
    }

    /// True once the client has shut the stream down or dropped it.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// The client side of a mock connection.
#[derive(Debug)]
pub struct MockStream {
    response: Bytes,
    fail_writes: bool,
    connection: MockConnection,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        {
            let mut state = self.connection.state.lock();
            if state.first_read_at.is_none() {
                state.first_read_at = Some(state.written.len());
            }
        }

        let n = buf.remaining().min(self.response.len());
        buf.put_slice(&self.response[..n]);
        self.response.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        self.connection.state.lock().written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.connection.state.lock().closed = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.connection.state.lock().closed = true;
    }
}
