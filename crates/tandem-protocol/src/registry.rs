//! The packet registry: a closed name ↔ id ↔ decoder table.
//!
//! Both ends of a connection build a registry from the same set of packet
//! names. Names are sorted before ids are handed out, so the mapping only
//! depends on *which* names are registered, never on the order they were
//! listed in. Two reserved packets ([`HANDSHAKE`] and [`SERVER_FULL`]) are
//! always merged in.
//!
//! Decoding produces a [`Payload`]: the reserved packets get their own
//! variants, and application packets decode into the application's own
//! type `P` (usually an enum with one variant per packet kind).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::{
    ByteCursor, ConnectionId, FrameWriter, PacketId, ProtocolError, RawFrame,
};

/// Name of the server → client packet that assigns the connection id.
pub const HANDSHAKE: &str = "tandem.handshake";

/// Name of the server → client packet that rejects a connection at capacity.
pub const SERVER_FULL: &str = "tandem.server_full";

/// Most packet types a registry can hold (the whole `u16` id space).
pub const MAX_PACKET_TYPES: usize = u16::MAX as usize + 1;

/// Application decoder: reads one packet body into `P`.
pub type DecodeFn<P> =
    Arc<dyn Fn(&mut ByteCursor) -> Result<P, ProtocolError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A decoded packet body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<P> {
    /// The server assigned this connection id.
    Handshake {
        /// Id the server will know this client by.
        connection_id: ConnectionId,
    },
    /// The server was at capacity and refused the connection.
    ServerFull,
    /// A packet registered without a decoder; the body is not inspected.
    Empty,
    /// An application packet.
    Custom(P),
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

enum Decoder<P> {
    None,
    Handshake,
    ServerFull,
    Custom(DecodeFn<P>),
}

impl<P> Clone for Decoder<P> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Handshake => Self::Handshake,
            Self::ServerFull => Self::ServerFull,
            Self::Custom(f) => Self::Custom(Arc::clone(f)),
        }
    }
}

/// One entry handed to [`PacketRegistry::new`].
pub struct PacketDef<P> {
    name: String,
    decoder: Decoder<P>,
}

impl<P> PacketDef<P> {
    /// A packet whose body is never decoded; listeners get [`Payload::Empty`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decoder: Decoder::None,
        }
    }

    /// A packet whose body is decoded by `decode`.
    ///
    /// The cursor starts at the first byte after the packet id.
    pub fn with_decoder<F>(name: impl Into<String>, decode: F) -> Self
    where
        F: Fn(&mut ByteCursor) -> Result<P, ProtocolError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            decoder: Decoder::Custom(Arc::new(decode)),
        }
    }

    /// The packet's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn reserved() -> [Self; 2] {
        [
            Self {
                name: HANDSHAKE.to_string(),
                decoder: Decoder::Handshake,
            },
            Self {
                name: SERVER_FULL.to_string(),
                decoder: Decoder::ServerFull,
            },
        ]
    }
}

impl<P> Clone for PacketDef<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            decoder: self.decoder.clone(),
        }
    }
}

impl<P> fmt::Debug for PacketDef<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDef").field("name", &self.name).finish()
    }
}

/// A registered packet: name, assigned id, and optional decoder.
pub struct PacketType<P> {
    name: String,
    id: PacketId,
    decoder: Decoder<P>,
}

impl<P> PacketType<P> {
    /// The packet's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The packet's id.
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// Returns `true` unless the packet was registered without a decoder.
    pub fn has_decoder(&self) -> bool {
        !matches!(self.decoder, Decoder::None)
    }

    /// Decodes a frame body of this packet type.
    pub fn decode(&self, body: &[u8]) -> Result<Payload<P>, ProtocolError> {
        let mut cursor = ByteCursor::from_slice(body);
        match &self.decoder {
            Decoder::None => Ok(Payload::Empty),
            Decoder::Handshake => Ok(Payload::Handshake {
                connection_id: ConnectionId::new(cursor.next_u8()?),
            }),
            Decoder::ServerFull => Ok(Payload::ServerFull),
            Decoder::Custom(decode) => decode(&mut cursor).map(Payload::Custom),
        }
    }
}

impl<P> fmt::Debug for PacketType<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketType")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("has_decoder", &self.has_decoder())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PacketRegistry
// ---------------------------------------------------------------------------

/// Closed mapping of packet name ↔ id ↔ decoder, built once at startup.
pub struct PacketRegistry<P> {
    /// Indexed by id: `packets[id]` has that id.
    packets: Vec<PacketType<P>>,
    by_name: HashMap<String, PacketId>,
}

impl<P> PacketRegistry<P> {
    /// Builds a registry from the application's packets plus the reserved ones.
    ///
    /// # Errors
    /// - [`ProtocolError::DuplicatePacket`] if a name appears twice
    ///   (including an application packet reusing a reserved name).
    /// - [`ProtocolError::RegistryFull`] if there are more than
    ///   [`MAX_PACKET_TYPES`] packets in total.
    pub fn new(
        defs: impl IntoIterator<Item = PacketDef<P>>,
    ) -> Result<Self, ProtocolError> {
        let mut all: Vec<PacketDef<P>> =
            PacketDef::reserved().into_iter().chain(defs).collect();
        // Ordinal (byte-wise) name order is the one and only id order.
        all.sort_by(|a, b| a.name.cmp(&b.name));

        let mut packets = Vec::with_capacity(all.len().min(MAX_PACKET_TYPES));
        let mut by_name = HashMap::with_capacity(packets.capacity());

        for def in all {
            if by_name.contains_key(&def.name) {
                return Err(ProtocolError::DuplicatePacket(def.name));
            }
            let id = u16::try_from(packets.len())
                .map(PacketId)
                .map_err(|_| ProtocolError::RegistryFull {
                    max: MAX_PACKET_TYPES,
                })?;
            by_name.insert(def.name.clone(), id);
            packets.push(PacketType {
                name: def.name,
                id,
                decoder: def.decoder,
            });
        }

        tracing::debug!(count = packets.len(), "packet registry built");
        Ok(Self { packets, by_name })
    }

    /// Looks up a packet by id. `None` if the id is out of range.
    pub fn get(&self, id: PacketId) -> Option<&PacketType<P>> {
        self.packets.get(usize::from(id.0))
    }

    /// Looks up a packet by name.
    pub fn get_by_name(&self, name: &str) -> Option<&PacketType<P>> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    /// Returns the id assigned to `name`.
    pub fn id_of(&self, name: &str) -> Option<PacketId> {
        self.by_name.get(name).copied()
    }

    /// Number of registered packets, reserved ones included.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Never `true` in practice: the reserved packets are always present.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// All packets in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PacketType<P>> {
        self.packets.iter()
    }

    /// Starts a frame for the named packet.
    pub fn writer(&self, name: &str) -> Option<FrameWriter> {
        self.id_of(name).map(FrameWriter::new)
    }

    /// Decodes a frame. Returns `Ok(None)` for ids nobody registered.
    pub fn decode(
        &self,
        frame: &RawFrame,
    ) -> Result<Option<Payload<P>>, ProtocolError> {
        match self.get(frame.id) {
            Some(packet) => packet.decode(&frame.body).map(Some),
            None => Ok(None),
        }
    }

    /// Id of the reserved handshake packet.
    pub fn handshake_id(&self) -> PacketId {
        self.reserved_id(HANDSHAKE)
    }

    /// Id of the reserved server-full packet.
    pub fn server_full_id(&self) -> PacketId {
        self.reserved_id(SERVER_FULL)
    }

    /// Encodes the handshake that assigns `id` to a new connection.
    pub fn handshake_frame(&self, id: ConnectionId) -> Bytes {
        let mut writer = FrameWriter::new(self.handshake_id());
        writer.write_u8(id.get());
        writer.build()
    }

    /// Encodes the rejection sent when the server is at capacity.
    pub fn server_full_frame(&self) -> Bytes {
        FrameWriter::new(self.server_full_id()).build()
    }

    fn reserved_id(&self, name: &str) -> PacketId {
        // Reserved names are inserted by `new`, so the lookup cannot miss.
        self.id_of(name).unwrap_or(PacketId(0))
    }
}

impl<P> fmt::Debug for PacketRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.packets.iter()).finish()
    }
}
