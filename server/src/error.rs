use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures while bringing the listening socket up.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create listening socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to set socket option: {0}")]
    SocketOption(#[source] io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
