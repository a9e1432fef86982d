//! Unified error type for Tandem.

use tandem_protocol::ProtocolError;
use tandem_session::SessionError;
use tandem_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tandem` meta-crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each wrapping variant generates a `From` impl, so `?`
/// converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TandemError {
    /// A transport-level error (bind, connect, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, decoding, registry construction).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (capacity, unknown packet name).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// `connect` was called while a connection is pending or live.
    #[error("client is already connecting or connected")]
    AlreadyConnected,

    /// `start` was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,
}
