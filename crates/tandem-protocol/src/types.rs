//! Core protocol types shared by every layer of Tandem.
//!
//! Identity newtypes ([`ConnectionId`], [`PacketId`]), the connection
//! lifecycle ([`ConnectionState`]) and why a connection ended
//! ([`DisconnectReason`]).

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one connection on a server.
///
/// Ids are single bytes, handed out densely from zero and recycled after
/// a disconnect. A client sees every packet as coming from id 0, since it
/// only ever has the one peer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(u8);

impl ConnectionId {
    /// The sender id reported for packets arriving at a client.
    pub const SERVER: Self = Self(0);

    /// Creates a `ConnectionId` from its wire value.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the wire value.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Numeric id of a registered packet type.
///
/// Assigned by the [`PacketRegistry`](crate::PacketRegistry); the same set
/// of names always produces the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(pub u16);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// The life stage of a client connection.
///
/// ```text
/// NotInitialized ──connect──→ Connecting ──handshake──→ Connected
///                                  │                        │
///                                  └──────disconnect────────┴──→ Disconnected
/// ```
///
/// `Disconnected` can go back to `Connecting` with a fresh `connect`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    #[default]
    NotInitialized,
    /// The reliable channel is being opened or the handshake is pending.
    Connecting,
    /// The handshake arrived; both channels carry traffic.
    Connected,
    /// The connection ended.
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` while a connection attempt or session is live.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "NotInitialized"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// ---------------------------------------------------------------------------
// DisconnectReason
// ---------------------------------------------------------------------------

/// Why a connection ended. Attached to the disconnect notification only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The local application asked to disconnect.
    UserInitiated,
    /// The peer closed the connection.
    LostConnection,
    /// A read, write, or framing error ended the connection.
    Error,
    /// The server rejected the connection because it was at capacity.
    ServerFull,
    /// Application-defined reason.
    Custom(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "user initiated"),
            Self::LostConnection => write!(f, "lost connection"),
            Self::Error => write!(f, "error"),
            Self::ServerFull => write!(f, "server full"),
            Self::Custom(description) => write!(f, "custom: {description}"),
        }
    }
}
