//! Error types for the protocol layer.
//!
//! Each crate in Tandem defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong (too short, malformed,
//! unregistered), never that a socket failed.

/// Errors that can occur while encoding, decoding, or framing packets,
/// and while building the packet registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read asked for more bytes than remain unread in the cursor.
    #[error("insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData {
        /// Bytes the read required.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },

    /// A string was prefixed with a negative byte count.
    #[error("invalid string length {0}")]
    InvalidStringLength(i32),

    /// A frame declared a length that cannot hold a packet id.
    ///
    /// Any value `<= 0` desynchronizes the stream; values `0 < len < 2`
    /// are positive but still too short for the 16-bit id.
    #[error("malformed frame length {0}")]
    MalformedLength(i32),

    /// A frame declared a length above the configured ceiling.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared frame length.
        len: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// A datagram declared more frame bytes than it actually carried.
    #[error("truncated datagram: declared {declared} bytes, {available} available")]
    TruncatedDatagram {
        /// Length from the frame prefix.
        declared: usize,
        /// Bytes after the prefix.
        available: usize,
    },

    /// Two packet definitions used the same name.
    #[error("packet \"{0}\" is already registered")]
    DuplicatePacket(String),

    /// More packet definitions than the 16-bit id space can address.
    #[error("packet registry is full ({max} types maximum)")]
    RegistryFull {
        /// Maximum number of packet types.
        max: usize,
    },

    /// The message is invalid at the protocol level.
    ///
    /// Application decoders return this for logical errors that pass
    /// the primitive reads but violate their own rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = ProtocolError::InsufficientData {
            needed: 4,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data: needed 4 bytes, 1 available"
        );
    }

    #[test]
    fn test_duplicate_packet_names_the_packet() {
        let err = ProtocolError::DuplicatePacket("chat".into());
        assert!(err.to_string().contains("\"chat\""));
    }
}
