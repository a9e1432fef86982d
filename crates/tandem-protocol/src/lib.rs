//! Wire protocol for Tandem.
//!
//! This crate defines the bytes that clients and servers exchange:
//!
//! - **Frames** ([`FrameWriter`], [`FrameAssembler`], [`RawFrame`]): every
//!   packet travels as `[length:i32][id:u16][body]`, little-endian.
//! - **Primitives** ([`ByteCursor`]): sequential decoding of integers,
//!   floats, booleans and length-prefixed strings from a body.
//! - **Registry** ([`PacketRegistry`], [`PacketDef`], [`Payload`]): the
//!   closed name ↔ id ↔ decoder table both peers build at startup.
//! - **Types** ([`ConnectionId`], [`ConnectionState`], [`DisconnectReason`]).
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets. It sits between the
//! transport (raw chunks and datagrams) and the sessions (typed events):
//!
//! ```text
//! Transport (bytes) → Protocol (RawFrame → Payload) → Session (events)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod cursor;
mod error;
mod frame;
mod registry;
mod types;
mod writer;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use cursor::ByteCursor;
pub use error::ProtocolError;
pub use frame::{FrameAssembler, RawFrame, decode_datagram, decode_sender_datagram};
pub use registry::{
    DecodeFn, HANDSHAKE, MAX_PACKET_TYPES, PacketDef, PacketRegistry, PacketType,
    Payload, SERVER_FULL,
};
pub use types::{ConnectionId, ConnectionState, DisconnectReason, PacketId};
pub use writer::{FrameWriter, LENGTH_PREFIX};
