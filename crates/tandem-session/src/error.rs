//! Error types for the session layer.

use std::net::SocketAddr;

/// Errors from connection bookkeeping and listener registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Every connection id up to the configured maximum is in use.
    #[error("connection table is full ({max} connections)")]
    Full {
        /// The table's capacity.
        max: usize,
    },

    /// A table was asked to hold more connections than one-byte ids allow.
    #[error("{requested} connections requested, at most {max} supported")]
    TooManyConnections {
        /// Requested capacity.
        requested: usize,
        /// Hard limit.
        max: usize,
    },

    /// A listener was registered for a packet name the registry lacks.
    #[error("unknown packet \"{0}\"")]
    UnknownPacket(String),

    /// A connection is already registered for this remote endpoint.
    #[error("endpoint {0} already has a connection")]
    EndpointInUse(SocketAddr),
}
