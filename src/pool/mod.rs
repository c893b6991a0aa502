//! Socket pooling for connections.
//!
//! A [`SocketPool`] caches at most one open socket per [`SocketKey`]. The pool is a
//! plain value: it is owned by a [`Connection`][crate::Connection] (or handed between
//! the connections of one task), never shared across tasks, and so needs no locking.
//! The flip side is that two tasks talking to the same endpoint each pay for their own
//! handshake.
//!
//! The pool owns every socket it holds, and is the only place sockets are closed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;

use tracing::{debug, trace};

use crate::transport::Socket;
use crate::Error;

mod key;

pub use self::key::SocketKey;

/// A per-task cache of open sockets.
#[derive(Debug, Default)]
pub struct SocketPool {
    sockets: HashMap<SocketKey, Socket>,
}

impl SocketPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// True if no sockets are cached.
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Is a socket cached for `key`?
    pub fn contains(&self, key: &SocketKey) -> bool {
        self.sockets.contains_key(key)
    }

    /// The cached socket for `key`, if any.
    pub fn get_cached(&mut self, key: &SocketKey) -> Option<&mut Socket> {
        self.sockets.get_mut(key)
    }

    /// The cached socket for `key`, or a new one from `factory` which is then cached.
    pub async fn get<F, Fut>(&mut self, key: &SocketKey, factory: F) -> Result<&mut Socket, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Socket, Error>>,
    {
        match self.sockets.entry(key.clone()) {
            Entry::Occupied(entry) => {
                trace!(%key, "reusing pooled socket");
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let socket = factory().await?;
                debug!(%key, "opened socket");
                Ok(entry.insert(socket))
            }
        }
    }

    /// Evict and close the socket for `key`.
    ///
    /// Close errors are logged and otherwise ignored: a reset usually happens while
    /// another error is being reported, and must not replace it.
    pub async fn reset(&mut self, key: &SocketKey) {
        if let Some(socket) = self.sockets.remove(key) {
            debug!(%key, "resetting socket");
            if let Err(error) = socket.close().await {
                trace!(%key, %error, "error closing socket during reset");
            }
        }
    }

    /// Close every cached socket.
    pub async fn clear(&mut self) {
        for (key, socket) in self.sockets.drain() {
            if let Err(error) = socket.close().await {
                trace!(%key, %error, "error closing socket");
            }
        }
    }
}
