//! Frame decoding shared by the client and server I/O tasks.

use tandem_protocol::{PacketRegistry, Payload, RawFrame};

/// Decodes `frame`, logging and discarding anything that cannot be
/// delivered: unknown ids are ignored, decoder failures drop the frame.
pub(crate) fn decode_frame<P>(registry: &PacketRegistry<P>, frame: &RawFrame) -> Option<Payload<P>> {
    match registry.decode(frame) {
        Ok(Some(payload)) => Some(payload),
        Ok(None) => {
            tracing::trace!(packet = %frame.id, "unknown packet id ignored");
            None
        }
        Err(e) => {
            tracing::debug!(packet = %frame.id, error = %e, "packet decode failed, frame dropped");
            None
        }
    }
}
