//! Tether
//!
//! Persistent HTTP/1.1 connections over TCP, TLS and unix domain sockets, with
//! request pipelining and an ordered middleware chain.
//!
//! A [`Connection`] talks to one endpoint. It keeps its socket in a [`SocketPool`]
//! between requests when asked to be persistent, writes pipelined batches of
//! requests before reading any response, and resets the socket whenever a request
//! fails so a broken socket is never reused.
//!
//! ```no_run
//! # async fn run() -> Result<(), tether::Error> {
//! use tether::{Builder, RequestParams};
//!
//! let mut connection = Builder::url("http://example.com")?
//!     .with_persistent(true)
//!     .build()?;
//!
//! let response = connection.request(RequestParams::get("/")).await?;
//! assert!(response.status().is_success());
//!
//! let responses = connection
//!     .requests(vec![RequestParams::get("/a"), RequestParams::get("/b")])
//!     .await?;
//! assert_eq!(responses.len(), 2);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod body;
pub mod config;
pub mod connection;
mod error;
pub mod headers;
pub mod middleware;
pub mod pool;
pub mod proxy;
mod request;
pub mod response;
pub mod transport;

pub use self::body::{Body, RequestBlock, ResponseBlock};
pub use self::config::{Builder, ConnectionConfig, Query, RequestParams, Scheme};
pub use self::connection::{Connection, RequestDatum};
pub use self::error::{Error, TimeoutKind};
pub use self::headers::Headers;
pub use self::middleware::{ErrorAction, Middleware};
pub use self::pool::{SocketKey, SocketPool};
pub use self::proxy::{ProxyDescriptor, ProxyEnvironment};
pub use self::response::Response;

/// A boxed error type which is `Send + Sync + 'static`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
