//! Opening the TCP/UDP pair behind a connection.
//!
//! Both peers keep their two channels on one port number, so a datagram's
//! source endpoint equals the TCP peer endpoint of the same connection.
//! That is how the server maps datagrams back to connections.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::{TransportError, UnreliableChannel};

/// Connects to a server and opens the matching UDP socket.
///
/// The TCP socket is bound to an ephemeral port first; the UDP socket is
/// then bound to that same port and connected to `server` before the TCP
/// connect starts, so a datagram the server sends in reply to the connect
/// (a capacity rejection, say) is already receivable.
pub async fn connect(
    server: SocketAddr,
) -> Result<(TcpStream, UnreliableChannel), TransportError> {
    let (socket, unspecified) = match server {
        SocketAddr::V4(_) => (TcpSocket::new_v4(), IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        SocketAddr::V6(_) => (TcpSocket::new_v6(), IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
    };
    let socket = socket.map_err(TransportError::BindFailed)?;
    socket
        .bind(SocketAddr::new(unspecified, 0))
        .map_err(TransportError::BindFailed)?;
    let local = socket.local_addr().map_err(TransportError::BindFailed)?;

    let udp = UnreliableChannel::bind(SocketAddr::new(unspecified, local.port())).await?;
    udp.connect(server).await?;

    let stream = socket
        .connect(server)
        .await
        .map_err(|source| TransportError::ConnectFailed { addr: server, source })?;
    tracing::debug!(%server, local_port = local.port(), "reliable channel connected");
    Ok((stream, udp))
}

/// Binds a TCP listener and a UDP socket on the same address.
///
/// With port 0 the OS picks the TCP port and UDP follows it.
pub async fn listen(
    ip: IpAddr,
    port: u16,
) -> Result<(TcpListener, UnreliableChannel), TransportError> {
    let listener = TcpListener::bind(SocketAddr::new(ip, port))
        .await
        .map_err(TransportError::BindFailed)?;
    let addr = listener.local_addr().map_err(TransportError::BindFailed)?;
    let udp = UnreliableChannel::bind(addr).await?;
    Ok((listener, udp))
}
