//! # Tandem
//!
//! Paired reliable/unreliable client-server transport for real-time
//! applications.
//!
//! Every connection carries two channels between the same two endpoints:
//! a TCP stream for frames that must arrive in order, and a UDP socket on
//! the same port number for frames that may be dropped. Both channels use
//! the same `[length][packet id][body]` framing, and both peers share a
//! closed set of named packets.
//!
//! Socket work runs on Tokio tasks. Nothing the application registers is
//! called from those tasks: events are queued, and listeners run when the
//! host calls `drain` on its own thread.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::prelude::*;
//!
//! # async fn run() -> Result<(), TandemError> {
//! let defs = || [PacketDef::new("chat")];
//!
//! let mut server = ServerSession::<()>::new(defs(), ServerConfig::default())?;
//! server.add_listener("chat", |sender, _| println!("chat from {sender}"))?;
//! let addr = server.start(0, 8).await?;
//!
//! let client = ClientSession::<()>::new(defs(), ClientConfig::default())?;
//! client.connect(addr).await?;
//! # Ok(())
//! # }
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod client;
mod config;
mod decode;
mod error;
mod handler;
mod server;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use client::ClientSession;
pub use config::{ClientConfig, DEFAULT_RECV_BUFFER_SIZE, ServerConfig};
pub use error::TandemError;
pub use server::ServerSession;

pub use tandem_protocol as protocol;
pub use tandem_session as session;
pub use tandem_transport as transport;

/// Everything needed to build a client or server.
pub mod prelude {
    pub use crate::{ClientConfig, ClientSession, ServerConfig, ServerSession, TandemError};
    pub use tandem_protocol::{
        ByteCursor, ConnectionId, ConnectionState, DisconnectReason, FrameWriter, PacketDef,
        PacketId, Payload, ProtocolError,
    };
    pub use tandem_session::{ListenerId, SessionError};
    pub use tandem_transport::TransportError;
}
