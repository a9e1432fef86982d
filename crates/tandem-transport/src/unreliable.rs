//! The unreliable (UDP) channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::TransportError;

/// A shared UDP socket. One datagram carries exactly one frame.
///
/// Clones share the socket: the receive loop holds one clone and the
/// session's send paths hold another. Sends use the non-blocking
/// `try_send*` calls so they can run outside the runtime, from whatever
/// thread drains the event queue.
#[derive(Debug, Clone)]
pub struct UnreliableChannel {
    socket: Arc<UdpSocket>,
}

impl UnreliableChannel {
    /// Binds a UDP socket to `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Restricts the socket to one peer, enabling [`try_send`](Self::try_send).
    pub async fn connect(&self, peer: SocketAddr) -> Result<(), TransportError> {
        self.socket
            .connect(peer)
            .await
            .map_err(|source| TransportError::ConnectFailed { addr: peer, source })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::BindFailed)
    }

    /// Sends one datagram to the connected peer without waiting.
    pub fn try_send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket
            .try_send(datagram)
            .map(|_| ())
            .map_err(TransportError::SendFailed)
    }

    /// Sends one datagram to `target` without waiting.
    pub fn try_send_to(
        &self,
        datagram: &[u8],
        target: SocketAddr,
    ) -> Result<(), TransportError> {
        self.socket
            .try_send_to(datagram, target)
            .map(|_| ())
            .map_err(TransportError::SendFailed)
    }

    /// Waits for the next datagram from the connected peer.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.socket
            .recv(buf)
            .await
            .map_err(TransportError::ReceiveFailed)
    }

    /// Waits for the next datagram from anyone.
    pub async fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> Result<(usize, SocketAddr), TransportError> {
        self.socket
            .recv_from(buf)
            .await
            .map_err(TransportError::ReceiveFailed)
    }
}
