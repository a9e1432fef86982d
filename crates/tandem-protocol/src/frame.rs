//! Frame reassembly for the reliable stream and parsing for datagrams.
//!
//! TCP hands us bytes in whatever chunks the OS felt like: half a length
//! prefix, three frames glued together, a body split across four reads.
//! [`FrameAssembler`] turns that back into whole frames:
//!
//! ```text
//! push(chunk) → loop {
//!     < 4 bytes unread            → wait for more
//!     peek length L
//!     L < 2 (incl. L <= 0)        → MalformedLength (stream is desynced)
//!     L > max_frame_len           → FrameTooLarge
//!     < L bytes after the prefix  → wait for more
//!     skip prefix, take L bytes   → one frame
//! }
//! ```
//!
//! UDP keeps message boundaries, so a datagram is parsed as exactly one
//! frame with [`decode_datagram`] / [`decode_sender_datagram`].

use bytes::{Buf, Bytes};

use crate::writer::LENGTH_PREFIX;
use crate::{ByteCursor, ConnectionId, PacketId, ProtocolError};

/// Size of the packet id at the start of every frame body.
const ID_LEN: usize = size_of::<u16>();

/// One complete frame with the length prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Packet id from the first two bytes.
    pub id: PacketId,
    /// Everything after the id.
    pub body: Bytes,
}

impl RawFrame {
    /// Splits a length-stripped frame into id and body.
    fn from_payload(mut payload: Bytes) -> Self {
        let id = PacketId(payload.get_u16_le());
        Self { id, body: payload }
    }
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Rebuilds frames from an arbitrarily chunked byte stream.
#[derive(Debug)]
pub struct FrameAssembler {
    cursor: ByteCursor,
    max_frame_len: usize,
}

impl FrameAssembler {
    /// Default ceiling on a single frame's declared length (1 MiB).
    pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

    /// Creates an assembler that rejects frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            cursor: ByteCursor::new(),
            max_frame_len,
        }
    }

    /// Appends one raw read to the unread remainder.
    pub fn push(&mut self, chunk: &[u8]) {
        self.cursor.append(chunk);
    }

    /// Bytes buffered but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.cursor.unread_len()
    }

    /// Takes the next complete frame, if one has fully arrived.
    ///
    /// Returns `Ok(None)` when more bytes are needed. An error means the
    /// length prefix at the front is unusable; nothing is consumed, so the
    /// same error is returned until the assembler is dropped.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, ProtocolError> {
        if self.cursor.unread_len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = checked_length(self.cursor.peek_i32()?, self.max_frame_len)?;
        if self.cursor.unread_len() - LENGTH_PREFIX < len {
            return Ok(None);
        }

        self.cursor.skip(LENGTH_PREFIX);
        let payload = self.cursor.next_bytes(len)?;
        Ok(Some(RawFrame::from_payload(payload)))
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_FRAME_LEN)
    }
}

/// Validates a declared frame length.
fn checked_length(declared: i32, max: usize) -> Result<usize, ProtocolError> {
    let len = usize::try_from(declared)
        .ok()
        .filter(|&len| len >= ID_LEN)
        .ok_or(ProtocolError::MalformedLength(declared))?;
    if len > max {
        return Err(ProtocolError::FrameTooLarge { len, max });
    }
    Ok(len)
}

// ---------------------------------------------------------------------------
// Datagrams
// ---------------------------------------------------------------------------

/// Parses a datagram laid out as `[length][id][body]`.
///
/// Bytes past the declared length are ignored. A datagram that declares
/// more than it carries is rejected.
pub fn decode_datagram(
    datagram: &[u8],
    max_frame_len: usize,
) -> Result<RawFrame, ProtocolError> {
    let mut cursor = ByteCursor::from_slice(datagram);
    read_datagram_frame(&mut cursor, max_frame_len)
}

/// Parses a client datagram laid out as `[sender][length][id][body]`.
pub fn decode_sender_datagram(
    datagram: &[u8],
    max_frame_len: usize,
) -> Result<(ConnectionId, RawFrame), ProtocolError> {
    let mut cursor = ByteCursor::from_slice(datagram);
    let sender = ConnectionId::new(cursor.next_u8()?);
    let frame = read_datagram_frame(&mut cursor, max_frame_len)?;
    Ok((sender, frame))
}

fn read_datagram_frame(
    cursor: &mut ByteCursor,
    max_frame_len: usize,
) -> Result<RawFrame, ProtocolError> {
    let len = checked_length(cursor.next_i32()?, max_frame_len)?;
    if cursor.unread_len() < len {
        return Err(ProtocolError::TruncatedDatagram {
            declared: len,
            available: cursor.unread_len(),
        });
    }
    Ok(RawFrame::from_payload(cursor.next_bytes(len)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameWriter;

    /// Three frames of different sizes, concatenated.
    fn sample_stream() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend_from_slice(&FrameWriter::new(PacketId(1)).build());
        let mut second = FrameWriter::new(PacketId(2));
        second.write_str("a longer body").write_i64(-9);
        stream.extend_from_slice(&second.build());
        let mut third = FrameWriter::new(PacketId(3));
        third.write_u8(7);
        stream.extend_from_slice(&third.build());
        stream
    }

    fn drain(assembler: &mut FrameAssembler) -> Vec<RawFrame> {
        let mut out = Vec::new();
        while let Some(frame) = assembler.next_frame().unwrap() {
            out.push(frame);
        }
        out
    }

    fn feed_in_chunks(stream: &[u8], chunk: usize) -> Vec<RawFrame> {
        let mut assembler = FrameAssembler::default();
        let mut out = Vec::new();
        for piece in stream.chunks(chunk) {
            assembler.push(piece);
            out.extend(drain(&mut assembler));
        }
        assert_eq!(assembler.buffered(), 0);
        out
    }

    #[test]
    fn test_single_push_yields_all_frames_in_order() {
        let frames = feed_in_chunks(&sample_stream(), usize::MAX);
        let ids: Vec<u16> = frames.iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(frames[0].body.is_empty());
        assert_eq!(frames[2].body.as_ref(), &[7]);
    }

    #[test]
    fn test_any_chunk_size_matches_single_push() {
        let stream = sample_stream();
        let expected = feed_in_chunks(&stream, usize::MAX);
        for chunk in 1..=stream.len() {
            assert_eq!(
                feed_in_chunks(&stream, chunk),
                expected,
                "chunk size {chunk}"
            );
        }
    }

    #[test]
    fn test_any_two_way_split_matches_single_push() {
        let stream = sample_stream();
        let expected = feed_in_chunks(&stream, usize::MAX);
        for split in 0..=stream.len() {
            let mut assembler = FrameAssembler::default();
            assembler.push(&stream[..split]);
            let mut frames = drain(&mut assembler);
            assembler.push(&stream[split..]);
            frames.extend(drain(&mut assembler));
            assert_eq!(frames, expected, "split at {split}");
        }
    }

    #[test]
    fn test_partial_length_prefix_waits() {
        let mut assembler = FrameAssembler::default();
        assembler.push(&[4, 0]);
        assert_eq!(assembler.next_frame().unwrap(), None);
        assert_eq!(assembler.buffered(), 2);
    }

    #[test]
    fn test_partial_body_is_not_released() {
        let mut assembler = FrameAssembler::default();
        assembler.push(&[4, 0, 0, 0, 5, 0, 0xaa]);
        assert_eq!(assembler.next_frame().unwrap(), None);

        assembler.push(&[0xbb]);
        let frame = assembler.next_frame().unwrap().unwrap();
        assert_eq!(frame.id, PacketId(5));
        assert_eq!(frame.body.as_ref(), &[0xaa, 0xbb]);
    }

    #[test]
    fn test_non_positive_length_is_malformed() {
        for declared in [0i32, -1, i32::MIN] {
            let mut assembler = FrameAssembler::default();
            assembler.push(&declared.to_le_bytes());
            assert_eq!(
                assembler.next_frame(),
                Err(ProtocolError::MalformedLength(declared))
            );
            // Nothing consumed: the error is sticky.
            assert_eq!(assembler.buffered(), 4);
        }
    }

    #[test]
    fn test_length_too_short_for_id_is_malformed() {
        let mut assembler = FrameAssembler::default();
        assembler.push(&[1, 0, 0, 0, 9]);
        assert_eq!(
            assembler.next_frame(),
            Err(ProtocolError::MalformedLength(1))
        );
    }

    #[test]
    fn test_oversized_length_rejected_before_body_arrives() {
        let mut assembler = FrameAssembler::new(16);
        assembler.push(&17i32.to_le_bytes());
        assert_eq!(
            assembler.next_frame(),
            Err(ProtocolError::FrameTooLarge { len: 17, max: 16 })
        );
    }

    #[test]
    fn test_decode_datagram() {
        let mut writer = FrameWriter::new(PacketId(4));
        writer.write_u16(300);
        let frame = decode_datagram(&writer.build(), 1024).unwrap();
        assert_eq!(frame.id, PacketId(4));
        assert_eq!(frame.body.as_ref(), &300u16.to_le_bytes());
    }

    #[test]
    fn test_decode_datagram_ignores_trailing_bytes() {
        let mut bytes = FrameWriter::new(PacketId(4)).build().to_vec();
        bytes.push(0xff);
        let frame = decode_datagram(&bytes, 1024).unwrap();
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_decode_datagram_truncated() {
        let mut writer = FrameWriter::new(PacketId(4));
        writer.write_u32(1);
        let bytes = writer.build();
        assert_eq!(
            decode_datagram(&bytes[..bytes.len() - 1], 1024),
            Err(ProtocolError::TruncatedDatagram {
                declared: 6,
                available: 5
            })
        );
    }

    #[test]
    fn test_decode_datagram_too_short_for_prefix() {
        assert!(matches!(
            decode_datagram(&[1, 0], 1024),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_decode_sender_datagram() {
        let mut writer = FrameWriter::new(PacketId(2));
        writer.write_bool(true);
        let bytes = writer.build_with_sender(ConnectionId::new(3));
        let (sender, frame) = decode_sender_datagram(&bytes, 1024).unwrap();
        assert_eq!(sender, ConnectionId::new(3));
        assert_eq!(frame.id, PacketId(2));
        assert_eq!(frame.body.as_ref(), &[1]);
    }
}
