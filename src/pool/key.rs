use std::fmt;
use std::path::PathBuf;

use crate::config::{ConnectionConfig, Scheme};

/// Pool key which is used to identify a socket - using scheme
/// and host/port, or scheme and socket path.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum SocketKey {
    /// A TCP endpoint.
    Inet {
        /// `http` or `https`.
        scheme: Scheme,
        /// Host, in lowercase.
        host: String,
        /// Port.
        port: u16,
    },

    /// A unix domain socket.
    Unix {
        /// Path to the socket.
        path: PathBuf,
    },
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKey::Inet { scheme, host, port } if host.contains(':') => {
                write!(f, "{scheme}://[{host}]:{port}")
            }
            SocketKey::Inet { scheme, host, port } => write!(f, "{scheme}://{host}:{port}"),
            SocketKey::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

impl SocketKey {
    pub(crate) fn from_config(config: &ConnectionConfig) -> Option<Self> {
        match config.scheme {
            Scheme::Unix => config
                .socket
                .clone()
                .map(|path| SocketKey::Unix { path }),
            scheme => Some(SocketKey::Inet {
                scheme,
                host: config.host.as_deref()?.to_ascii_lowercase(),
                port: config.effective_port()?,
            }),
        }
    }
}
