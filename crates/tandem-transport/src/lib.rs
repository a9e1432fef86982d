//! Socket plumbing for Tandem.
//!
//! Every Tandem connection pairs two channels:
//!
//! - a **reliable** TCP stream, read by a [`ReliableReader`] (which
//!   reassembles frames from arbitrary chunks) and written by a dedicated
//!   writer task fed through a [`ReliableSender`];
//! - an **unreliable** UDP path, wrapped by [`UnreliableChannel`]. Each
//!   datagram carries exactly one frame.
//!
//! [`connect`] and [`listen`] open both channels on matching ports: the
//! client's UDP socket shares its TCP local port, and the server's UDP
//! socket shares its listener port.
//!
//! This crate moves bytes and frames. It does not know what a packet
//! means; that belongs to the registry and the sessions above it.

mod error;
mod reliable;
mod socket;
mod unreliable;

pub use error::TransportError;
pub use reliable::{ReliableReader, ReliableSender, run_writer, writer_channel};
pub use socket::{connect, listen};
pub use unreliable::UnreliableChannel;
