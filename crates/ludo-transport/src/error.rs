use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tcp accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The client connected but the HTTP upgrade did not complete.
    #[cfg(feature = "websocket")]
    #[error("websocket upgrade from {peer} failed: {source}")]
    Upgrade {
        peer: SocketAddr,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[cfg(feature = "websocket")]
    #[error("websocket error on {peer}: {source}")]
    Socket {
        peer: SocketAddr,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("connection to {0} is closed")]
    Closed(SocketAddr),
}
