//! Sequential little-endian encoding into a length-prefixed frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ConnectionId, PacketId};

/// Size of the `i32` length prefix in front of every frame.
pub const LENGTH_PREFIX: usize = size_of::<i32>();

/// Builds one frame: `[length:i32][id:u16][body]`.
///
/// The writer starts out holding the packet id; every `write_*` call
/// appends to the body. Nothing touches a socket; [`build`](Self::build)
/// just returns the finished bytes.
///
/// ```rust
/// use tandem_protocol::{ByteCursor, FrameWriter, PacketId};
///
/// let mut writer = FrameWriter::new(PacketId(3));
/// writer.write_str("hello").write_f32(1.5);
/// let frame = writer.build();
///
/// let mut cursor = ByteCursor::from_slice(&frame);
/// assert_eq!(cursor.next_i32().unwrap() as usize, frame.len() - 4);
/// assert_eq!(cursor.next_u16().unwrap(), 3);
/// assert_eq!(cursor.next_string().unwrap(), "hello");
/// assert_eq!(cursor.next_f32().unwrap(), 1.5);
/// ```
#[derive(Debug, Clone)]
pub struct FrameWriter {
    /// Packet id followed by the body written so far.
    data: BytesMut,
}

impl FrameWriter {
    /// Starts a frame for the given packet id.
    pub fn new(id: PacketId) -> Self {
        let mut data = BytesMut::with_capacity(64);
        data.put_u16_le(id.0);
        Self { data }
    }

    /// Bytes counted by the length prefix (id plus body).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`: the id is written on construction.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.data.put_u8(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.data.put_i8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.data.put_u16_le(value);
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.data.put_i16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.data.put_u32_le(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.data.put_i32_le(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.data.put_u64_le(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.data.put_i64_le(value);
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.data.put_f32_le(value);
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.data.put_f64_le(value);
        self
    }

    /// Writes a boolean as one byte (`1` or `0`).
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.data.put_u8(u8::from(value));
        self
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.data.put_slice(value);
        self
    }

    /// Writes an `i32` byte count followed by one byte per character.
    ///
    /// Characters outside ASCII are written as `?`.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        let count = value.chars().count();
        self.data.put_i32_le(count as i32);
        for c in value.chars() {
            self.data.put_u8(if c.is_ascii() { c as u8 } else { b'?' });
        }
        self
    }

    /// Finishes the frame: `[length][id][body]`.
    pub fn build(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + self.data.len());
        frame.put_i32_le(self.data.len() as i32);
        frame.put_slice(&self.data);
        frame.freeze()
    }

    /// Finishes the frame with the sender's id in front:
    /// `[sender][length][id][body]`.
    ///
    /// This is the layout the server expects for unreliable packets
    /// coming from a client.
    pub fn build_with_sender(&self, sender: ConnectionId) -> Bytes {
        let mut frame =
            BytesMut::with_capacity(1 + LENGTH_PREFIX + self.data.len());
        frame.put_u8(sender.get());
        frame.put_i32_le(self.data.len() as i32);
        frame.put_slice(&self.data);
        frame.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteCursor;

    /// Builds a frame and returns a cursor positioned at the body.
    fn body_cursor(writer: &FrameWriter) -> ByteCursor {
        let frame = writer.build();
        let mut cursor = ByteCursor::from_slice(&frame);
        let len = cursor.next_i32().unwrap();
        assert_eq!(len as usize, cursor.unread_len());
        cursor.next_u16().unwrap();
        cursor
    }

    #[test]
    fn test_empty_body_layout() {
        let frame = FrameWriter::new(PacketId(0x0102)).build();
        assert_eq!(frame.as_ref(), &[2, 0, 0, 0, 0x02, 0x01]);
    }

    #[test]
    fn test_build_with_sender_layout() {
        let mut writer = FrameWriter::new(PacketId(5));
        writer.write_u8(0xaa);
        let frame = writer.build_with_sender(ConnectionId::new(9));
        assert_eq!(frame.as_ref(), &[9, 3, 0, 0, 0, 5, 0, 0xaa]);
    }

    #[test]
    fn test_integer_boundaries_round_trip() {
        let mut writer = FrameWriter::new(PacketId(1));
        writer
            .write_u8(u8::MAX)
            .write_i8(i8::MIN)
            .write_u16(u16::MAX)
            .write_i16(i16::MIN)
            .write_u32(u32::MAX)
            .write_i32(i32::MIN)
            .write_i32(0)
            .write_i32(-1)
            .write_u64(u64::MAX)
            .write_i64(i64::MIN);

        let mut cursor = body_cursor(&writer);
        assert_eq!(cursor.next_u8().unwrap(), u8::MAX);
        assert_eq!(cursor.next_i8().unwrap(), i8::MIN);
        assert_eq!(cursor.next_u16().unwrap(), u16::MAX);
        assert_eq!(cursor.next_i16().unwrap(), i16::MIN);
        assert_eq!(cursor.next_u32().unwrap(), u32::MAX);
        assert_eq!(cursor.next_i32().unwrap(), i32::MIN);
        assert_eq!(cursor.next_i32().unwrap(), 0);
        assert_eq!(cursor.next_i32().unwrap(), -1);
        assert_eq!(cursor.next_u64().unwrap(), u64::MAX);
        assert_eq!(cursor.next_i64().unwrap(), i64::MIN);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_floats_and_bools_round_trip() {
        let mut writer = FrameWriter::new(PacketId(1));
        writer
            .write_f32(-0.0)
            .write_f32(f32::MAX)
            .write_f64(f64::MIN_POSITIVE)
            .write_f64(-12.5)
            .write_bool(true)
            .write_bool(false);

        let mut cursor = body_cursor(&writer);
        assert_eq!(cursor.next_f32().unwrap().to_bits(), (-0.0f32).to_bits());
        assert_eq!(cursor.next_f32().unwrap(), f32::MAX);
        assert_eq!(cursor.next_f64().unwrap(), f64::MIN_POSITIVE);
        assert_eq!(cursor.next_f64().unwrap(), -12.5);
        assert!(cursor.next_bool().unwrap());
        assert!(!cursor.next_bool().unwrap());
    }

    #[test]
    fn test_strings_round_trip() {
        let mut writer = FrameWriter::new(PacketId(1));
        writer.write_str("").write_str("hello world");

        let mut cursor = body_cursor(&writer);
        assert_eq!(cursor.next_string().unwrap(), "");
        assert_eq!(cursor.next_string().unwrap(), "hello world");
    }

    #[test]
    fn test_non_ascii_string_is_one_byte_per_char() {
        let mut writer = FrameWriter::new(PacketId(1));
        writer.write_str("né");

        let mut cursor = body_cursor(&writer);
        assert_eq!(cursor.peek_i32().unwrap(), 2);
        assert_eq!(cursor.next_string().unwrap(), "n?");
    }

    #[test]
    fn test_len_counts_id_and_body() {
        let mut writer = FrameWriter::new(PacketId(1));
        assert_eq!(writer.len(), 2);
        writer.write_u32(0);
        assert_eq!(writer.len(), 6);
        assert!(!writer.is_empty());
    }
}
