//! Sequential little-endian decoding over a growable byte buffer.
//!
//! [`ByteCursor`] is the read side of the wire format. It is used in two
//! ways:
//!
//! - as a one-shot reader over a single frame body (decoders receive one),
//! - as the streaming accumulator behind [`FrameAssembler`](crate::FrameAssembler),
//!   where [`append`](ByteCursor::append) glues each new TCP chunk onto
//!   whatever was left unread by the previous one.
//!
//! Consumed bytes are dropped from the front of the buffer as soon as they
//! are read, so the read position is always zero and nothing is ever
//! scanned twice.

use bytes::{Buf, Bytes, BytesMut};

use crate::ProtocolError;

/// Generates a `peek_*` / `next_*` pair for one fixed-width primitive.
///
/// `$get` is the matching [`Buf`] getter (`get_i32_le`, `get_u8`, ...).
macro_rules! primitive {
    ($peek:ident, $next:ident, $ty:ty, $get:ident) => {
        #[doc = concat!("Reads a `", stringify!($ty), "` without advancing.")]
        pub fn $peek(&self) -> Result<$ty, ProtocolError> {
            self.require(size_of::<$ty>())?;
            let mut view: &[u8] = &self.buf;
            Ok(view.$get())
        }

        #[doc = concat!("Reads a `", stringify!($ty), "` and advances past it.")]
        pub fn $next(&mut self) -> Result<$ty, ProtocolError> {
            self.require(size_of::<$ty>())?;
            Ok(self.buf.$get())
        }
    };
}

/// A read cursor over bytes that may still be arriving.
#[derive(Debug, Default, Clone)]
pub struct ByteCursor {
    /// The unread remainder. Everything before it has been consumed.
    buf: BytesMut,
}

impl ByteCursor {
    /// Creates an empty cursor, ready for [`append`](Self::append).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cursor over a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
        }
    }

    /// Appends `data` after the unread remainder.
    ///
    /// Reading resumes at the first unread byte, which is now position
    /// zero of the combined buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes that can still be decoded.
    pub fn unread_len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The unread bytes, without consuming them.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Advances past `n` bytes without decoding them.
    ///
    /// Returns `false` (and leaves the cursor untouched) if fewer than
    /// `n` bytes are unread.
    pub fn skip(&mut self, n: usize) -> bool {
        if n > self.buf.len() {
            return false;
        }
        self.buf.advance(n);
        true
    }

    primitive!(peek_u8, next_u8, u8, get_u8);
    primitive!(peek_i8, next_i8, i8, get_i8);
    primitive!(peek_u16, next_u16, u16, get_u16_le);
    primitive!(peek_i16, next_i16, i16, get_i16_le);
    primitive!(peek_u32, next_u32, u32, get_u32_le);
    primitive!(peek_i32, next_i32, i32, get_i32_le);
    primitive!(peek_u64, next_u64, u64, get_u64_le);
    primitive!(peek_i64, next_i64, i64, get_i64_le);
    primitive!(peek_f32, next_f32, f32, get_f32_le);
    primitive!(peek_f64, next_f64, f64, get_f64_le);

    /// Reads a one-byte boolean (non-zero is `true`) without advancing.
    pub fn peek_bool(&self) -> Result<bool, ProtocolError> {
        Ok(self.peek_u8()? != 0)
    }

    /// Reads a one-byte boolean and advances past it.
    pub fn next_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.next_u8()? != 0)
    }

    /// Copies the next `n` bytes without advancing.
    pub fn peek_bytes(&self, n: usize) -> Result<Bytes, ProtocolError> {
        self.require(n)?;
        Ok(Bytes::copy_from_slice(&self.buf[..n]))
    }

    /// Splits off the next `n` bytes.
    pub fn next_bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        self.require(n)?;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Reads a length-prefixed string without advancing.
    ///
    /// Strings are an `i32` byte count followed by one byte per
    /// character. Bytes outside ASCII decode as `?`.
    pub fn peek_string(&self) -> Result<String, ProtocolError> {
        self.string_at_front().map(|(text, _)| text)
    }

    /// Reads a length-prefixed string and advances past it.
    pub fn next_string(&mut self) -> Result<String, ProtocolError> {
        let (text, consumed) = self.string_at_front()?;
        self.buf.advance(consumed);
        Ok(text)
    }

    /// Decodes the string at the front and reports how many bytes it spans.
    fn string_at_front(&self) -> Result<(String, usize), ProtocolError> {
        let declared = self.peek_i32()?;
        let len = usize::try_from(declared)
            .map_err(|_| ProtocolError::InvalidStringLength(declared))?;
        let total = size_of::<i32>() + len;
        self.require(total)?;

        let text = self.buf[size_of::<i32>()..total]
            .iter()
            .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
            .collect();
        Ok((text, total))
    }

    fn require(&self, needed: usize) -> Result<(), ProtocolError> {
        if needed > self.buf.len() {
            return Err(ProtocolError::InsufficientData {
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_does_not_advance() {
        let cursor = ByteCursor::from_slice(&[7, 0, 0, 0]);
        assert_eq!(cursor.peek_i32().unwrap(), 7);
        assert_eq!(cursor.peek_i32().unwrap(), 7);
        assert_eq!(cursor.unread_len(), 4);
    }

    #[test]
    fn test_next_advances() {
        let mut cursor = ByteCursor::from_slice(&[1, 2, 0]);
        assert_eq!(cursor.next_u8().unwrap(), 1);
        assert_eq!(cursor.next_u16().unwrap(), 2);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_values_are_little_endian() {
        let cursor = ByteCursor::from_slice(&[0x34, 0x12]);
        assert_eq!(cursor.peek_u16().unwrap(), 0x1234);
    }

    #[test]
    fn test_read_past_end_is_insufficient_data() {
        let mut cursor = ByteCursor::from_slice(&[1, 2]);
        let err = cursor.next_i32().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InsufficientData {
                needed: 4,
                available: 2
            }
        );
        // A failed read consumes nothing.
        assert_eq!(cursor.unread_len(), 2);
    }

    #[test]
    fn test_append_keeps_unread_remainder() {
        let mut cursor = ByteCursor::from_slice(&[9, 1, 0]);
        assert_eq!(cursor.next_u8().unwrap(), 9);

        // Only [1, 0] is unread; the new bytes go after it.
        cursor.append(&[0, 0]);
        assert_eq!(cursor.unread_len(), 4);
        assert_eq!(cursor.next_i32().unwrap(), 1);
    }

    #[test]
    fn test_append_to_empty_cursor() {
        let mut cursor = ByteCursor::new();
        cursor.append(&[5]);
        assert_eq!(cursor.next_u8().unwrap(), 5);
    }

    #[test]
    fn test_skip_within_bounds() {
        let mut cursor = ByteCursor::from_slice(&[1, 2, 3]);
        assert!(cursor.skip(2));
        assert_eq!(cursor.next_u8().unwrap(), 3);
    }

    #[test]
    fn test_skip_overrun_is_noop() {
        let mut cursor = ByteCursor::from_slice(&[1, 2, 3]);
        assert!(!cursor.skip(4));
        assert_eq!(cursor.unread_len(), 3);
    }

    #[test]
    fn test_bool_is_any_nonzero_byte() {
        let mut cursor = ByteCursor::from_slice(&[0, 1, 42]);
        assert!(!cursor.next_bool().unwrap());
        assert!(cursor.next_bool().unwrap());
        assert!(cursor.next_bool().unwrap());
    }

    #[test]
    fn test_string_read() {
        let mut cursor = ByteCursor::from_slice(&[2, 0, 0, 0, b'h', b'i', 0xff]);
        assert_eq!(cursor.peek_string().unwrap(), "hi");
        assert_eq!(cursor.next_string().unwrap(), "hi");
        assert_eq!(cursor.unread_len(), 1);
    }

    #[test]
    fn test_string_non_ascii_bytes_become_question_marks() {
        let mut cursor = ByteCursor::from_slice(&[2, 0, 0, 0, b'a', 0xe9]);
        assert_eq!(cursor.next_string().unwrap(), "a?");
    }

    #[test]
    fn test_string_negative_length_rejected() {
        let mut cursor = ByteCursor::from_slice(&(-1i32).to_le_bytes());
        assert_eq!(
            cursor.next_string().unwrap_err(),
            ProtocolError::InvalidStringLength(-1)
        );
    }

    #[test]
    fn test_string_truncated_body() {
        let mut cursor = ByteCursor::from_slice(&[5, 0, 0, 0, b'a']);
        assert!(matches!(
            cursor.next_string(),
            Err(ProtocolError::InsufficientData { needed: 9, .. })
        ));
        assert_eq!(cursor.unread_len(), 5);
    }

    #[test]
    fn test_next_bytes_splits_front() {
        let mut cursor = ByteCursor::from_slice(&[1, 2, 3, 4]);
        assert_eq!(cursor.peek_bytes(2).unwrap().as_ref(), &[1, 2]);
        assert_eq!(cursor.next_bytes(3).unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(cursor.as_slice(), &[4]);
    }
}
