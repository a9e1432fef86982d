use std::net::SocketAddr;

use tandem_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the reliable connection to the server failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        /// Server address.
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Binding a listener or socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The writer task has already exited.
    #[error("connection closed")]
    ConnectionClosed,

    /// The bytes on the wire could not be framed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
