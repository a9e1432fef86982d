//! The reliable (TCP) channel: a frame reader and a queued writer.
//!
//! A TCP stream is split into halves. The read half is wrapped in a
//! [`ReliableReader`], which the connection's read task drives with
//! [`next_frame`](ReliableReader::next_frame). The write half is owned by
//! a writer task running [`run_writer`]; everyone else talks to it through
//! a cloneable [`ReliableSender`].
//!
//! ```text
//!                 ReliableSender ──┐
//! send_reliable ─→ (clone)         ├──→ mpsc<Bytes> ──→ run_writer ──→ TCP
//!                 ReliableSender ──┘
//!
//! TCP ──→ ReliableReader (read chunk → FrameAssembler) ──→ RawFrame
//! ```
//!
//! Queuing a send never blocks and never waits for the socket, so it can be
//! called from any thread, including listener callbacks.

use bytes::Bytes;
use tandem_protocol::{FrameAssembler, RawFrame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::TransportError;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Reads whole frames from the read half of a reliable stream.
#[derive(Debug)]
pub struct ReliableReader<R> {
    reader: R,
    assembler: FrameAssembler,
    /// Scratch space for one raw read.
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ReliableReader<R> {
    /// Wraps `reader`, reading at most `recv_buffer_size` bytes per call and
    /// rejecting frames declared longer than `max_frame_len`.
    pub fn new(reader: R, recv_buffer_size: usize, max_frame_len: usize) -> Self {
        Self {
            reader,
            assembler: FrameAssembler::new(max_frame_len),
            chunk: vec![0; recv_buffer_size.max(1)],
        }
    }

    /// Returns the next complete frame.
    ///
    /// Frames already reassembled from an earlier chunk are returned before
    /// the socket is read again. Returns `Ok(None)` when the peer closed the
    /// stream; any partial frame still buffered at that point is discarded.
    ///
    /// # Errors
    /// [`TransportError::ReceiveFailed`] on an I/O error, or
    /// [`TransportError::Protocol`] when the stream carries a malformed or
    /// oversized length prefix. Both are fatal for the connection.
    pub async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self
                .reader
                .read(&mut self.chunk)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                if self.assembler.buffered() > 0 {
                    tracing::debug!(
                        buffered = self.assembler.buffered(),
                        "stream closed mid-frame"
                    );
                }
                return Ok(None);
            }
            tracing::trace!(bytes = n, "reliable chunk received");
            self.assembler.push(&self.chunk[..n]);
        }
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.assembler.buffered()
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Cloneable handle that queues frames for a connection's writer task.
#[derive(Debug, Clone)]
pub struct ReliableSender {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ReliableSender {
    /// Queues `frame` for sending.
    ///
    /// # Errors
    /// [`TransportError::ConnectionClosed`] if the writer task has exited.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Returns `true` once the writer task has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates the sender handle and the queue a writer task drains.
pub fn writer_channel() -> (ReliableSender, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ReliableSender { tx }, rx)
}

/// Writes queued frames to `writer` until every [`ReliableSender`] is gone.
///
/// When the queue closes, the frames already queued are written and the
/// stream is shut down. Dropping all senders is how a connection's write
/// side is closed.
///
/// # Errors
/// [`TransportError::SendFailed`] on the first write error. The remaining
/// queue is abandoned.
pub async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer
            .write_all(&frame)
            .await
            .map_err(TransportError::SendFailed)?;
    }
    // A peer that already reset the stream makes shutdown fail; nothing
    // is left to deliver either way.
    if let Err(e) = writer.shutdown().await {
        tracing::trace!(error = %e, "reliable shutdown failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::{FrameWriter, PacketId, ProtocolError};
    use tokio_test::io::Builder;

    fn frame(id: u16, body: &[u8]) -> Bytes {
        let mut writer = FrameWriter::new(PacketId(id));
        writer.write_bytes(body);
        writer.build()
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let bytes = frame(5, &[0xaa, 0xbb]);
        let mock = Builder::new().read(&bytes[..3]).read(&bytes[3..]).build();
        let mut reader = ReliableReader::new(mock, 64, 1024);

        let got = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(got.id, PacketId(5));
        assert_eq!(got.body.as_ref(), &[0xaa, 0xbb]);
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_coalesced_frames_returned_one_at_a_time() {
        let mut both = frame(1, &[1]).to_vec();
        both.extend_from_slice(&frame(2, &[2, 2]));
        let mock = Builder::new().read(&both).build();
        let mut reader = ReliableReader::new(mock, 64, 1024);

        assert_eq!(reader.next_frame().await.unwrap().unwrap().id, PacketId(1));
        assert_eq!(reader.next_frame().await.unwrap().unwrap().id, PacketId(2));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_small_read_buffer_still_reassembles() {
        let bytes = frame(9, b"hello world");
        let mock = Builder::new().read(&bytes).build();
        let mut reader = ReliableReader::new(mock, 3, 1024);

        let got = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(got.body.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_end_of_stream() {
        let bytes = frame(1, &[1, 2, 3]);
        let mock = Builder::new().read(&bytes[..5]).build();
        let mut reader = ReliableReader::new(mock, 64, 1024);

        assert_eq!(reader.next_frame().await.unwrap(), None);
        assert_eq!(reader.buffered(), 5);
    }

    #[tokio::test]
    async fn test_malformed_length_is_an_error() {
        let mock = Builder::new().read(&0i32.to_le_bytes()).build();
        let mut reader = ReliableReader::new(mock, 64, 1024);

        let err = reader.next_frame().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::MalformedLength(0))
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_receive_failed() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut reader = ReliableReader::new(mock, 64, 1024);

        assert!(matches!(
            reader.next_frame().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_writer_flushes_queue_then_exits() {
        let first = frame(1, &[1]);
        let second = frame(2, &[]);
        let mock = Builder::new().write(&first).write(&second).build();

        let (sender, rx) = writer_channel();
        sender.send(first.clone()).unwrap();
        sender.send(second.clone()).unwrap();
        drop(sender);

        run_writer(mock, rx).await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_stops_on_write_error() {
        let mock = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "gone",
            ))
            .build();

        let (sender, rx) = writer_channel();
        sender.send(frame(1, &[])).unwrap();

        let result = run_writer(mock, rx).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
        // The receiver went down with the task.
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(frame(1, &[])),
            Err(TransportError::ConnectionClosed)
        ));
    }
}
