//! Server I/O tasks: accepting, per-connection reading and writing, and the
//! shared datagram loop.
//!
//! Each accepted connection gets two Tokio tasks:
//!   1. a reader: reassemble frames → decode → queue `Packet` events
//!   2. a writer: drain the connection's send queue into the socket
//!
//! Either one ending (EOF, I/O error, malformed length) closes the
//! connection. Tasks carry the run number and the connection's
//! [`Generation`], so a task that outlives its connection can never close
//! the next one to receive the same id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tandem_protocol::{ConnectionId, decode_sender_datagram};
use tandem_session::Generation;
use tandem_transport::{ReliableReader, UnreliableChannel, run_writer, writer_channel};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::MAX_DATAGRAM_LEN;
use crate::server::{Peer, ServerEvent, ServerShared};

/// How long a rejected stream stays open waiting for the peer to hang up.
const REJECT_LINGER: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Accepting
// ---------------------------------------------------------------------------

/// Accepts connections until the task is aborted by `stop`.
pub(crate) async fn accept_loop<P: Send + 'static>(
    shared: Arc<ServerShared<P>>,
    listener: TcpListener,
    run: u64,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => shared.admit(run, stream, peer),
            Err(e) => tracing::error!(error = %e, "accept failed"),
        }
    }
}

impl<P: Send + 'static> ServerShared<P> {
    /// Registers a new connection, or rejects it if the table is full.
    ///
    /// Runs entirely under the table lock, so the handshake is the first
    /// frame queued for the connection and nobody can address the new id
    /// before `Accepted` is queued.
    fn admit(self: &Arc<Self>, run: u64, stream: TcpStream, peer: SocketAddr) {
        let mut inner = self.inner.lock();
        let Some(running) = inner.running.as_mut().filter(|r| r.run == run) else {
            return;
        };

        if running.table.is_full() {
            tracing::warn!(%peer, max = running.table.capacity(), "server full, connection rejected");
            if let Err(e) = running
                .udp
                .try_send_to(&self.registry.server_full_frame(), peer)
            {
                tracing::warn!(%peer, error = %e, "failed to send server-full notice");
            }
            tokio::spawn(linger(stream));
            return;
        }

        let (read_half, write_half) = stream.into_split();
        let (reliable, queue) = writer_channel();
        let admitted = running.table.insert_with(peer, |conn_id, generation| {
            tokio::spawn(write_loop(
                Arc::clone(self),
                write_half,
                queue,
                run,
                conn_id,
                generation,
            ));
            let reader = ReliableReader::new(
                read_half,
                self.config.recv_buffer_size,
                self.config.max_frame_len,
            );
            let reader = tokio::spawn(read_loop(
                Arc::clone(self),
                reader,
                run,
                conn_id,
                generation,
            ));
            Peer {
                reliable: reliable.clone(),
                reader,
            }
        });

        match admitted {
            Ok((conn_id, _)) => {
                if let Err(e) = reliable.send(self.registry.handshake_frame(conn_id)) {
                    tracing::warn!(%conn_id, error = %e, "failed to queue handshake");
                }
                tracing::info!(%conn_id, %peer, "connection accepted");
                self.events.send(ServerEvent::Accepted(conn_id));
            }
            Err(e) => tracing::warn!(%peer, error = %e, "connection rejected"),
        }
    }
}

/// Holds a rejected stream open until the peer closes it or
/// [`REJECT_LINGER`] passes, so the rejection datagram arrives before the
/// reliable channel ends.
async fn linger(mut stream: TcpStream) {
    let mut sink = [0u8; 64];
    let drained = tokio::time::timeout(REJECT_LINGER, async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::trace!("rejected peer did not hang up, closing");
    }
}

// ---------------------------------------------------------------------------
// Per-connection tasks
// ---------------------------------------------------------------------------

async fn read_loop<P>(
    shared: Arc<ServerShared<P>>,
    mut reader: ReliableReader<OwnedReadHalf>,
    run: u64,
    conn_id: ConnectionId,
    generation: Generation,
) {
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => shared.deliver(run, conn_id, generation, frame),
            Ok(None) => {
                tracing::debug!(%conn_id, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "reliable read failed");
                break;
            }
        }
    }
    shared.close_if(run, conn_id, generation);
}

async fn write_loop<P>(
    shared: Arc<ServerShared<P>>,
    writer: OwnedWriteHalf,
    queue: mpsc::UnboundedReceiver<Bytes>,
    run: u64,
    conn_id: ConnectionId,
    generation: Generation,
) {
    if let Err(e) = run_writer(writer, queue).await {
        tracing::warn!(%conn_id, error = %e, "reliable write failed");
        shared.close_if(run, conn_id, generation);
    }
}

// ---------------------------------------------------------------------------
// Datagrams
// ---------------------------------------------------------------------------

/// Receives client datagrams on the shared UDP socket.
///
/// A datagram is accepted only if its source endpoint belongs to a live
/// connection and its sender byte matches that connection's id.
pub(crate) async fn datagram_loop<P>(shared: Arc<ServerShared<P>>, udp: UnreliableChannel, run: u64) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (n, from) = match udp.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "datagram receive failed");
                continue;
            }
        };
        let (sender, frame) = match decode_sender_datagram(&buf[..n], shared.config.max_frame_len) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(%from, error = %e, "malformed datagram dropped");
                continue;
            }
        };
        let Some((conn_id, generation)) = shared.lookup_endpoint(run, &from) else {
            tracing::trace!(%from, "datagram from unknown endpoint dropped");
            continue;
        };
        if sender != conn_id {
            tracing::debug!(%from, claimed = %sender, %conn_id, "datagram sender id mismatch, dropped");
            continue;
        }
        shared.deliver(run, conn_id, generation, frame);
    }
}
