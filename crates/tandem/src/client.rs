//! The client side of a connection.
//!
//! A [`ClientSession`] owns one connection to a server:
//!
//! ```text
//!            connect()                 handshake frame
//! NotInitialized ──→ Connecting ─────────────────────→ Connected
//!                        │                                 │
//!                        └── ServerFull datagram,          │
//!                            EOF, error, disconnect() ─────┴──→ Disconnected
//! ```
//!
//! Three tasks serve a live connection: a reliable reader, a reliable
//! writer, and a datagram reader. They never call application code.
//! They turn frames into events and queue them; the host runs the
//! listeners by calling [`drain`](ClientSession::drain) on its own thread.
//!
//! Every connect attempt gets a new epoch. Tasks carry the epoch they were
//! started with, so a task left over from an earlier attempt cannot touch
//! a later one.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_protocol::{
    ConnectionId, ConnectionState, DisconnectReason, FrameWriter, PacketDef,
    PacketId, PacketRegistry, Payload, RawFrame, decode_datagram,
};
use tandem_session::{EventDispatcher, EventSender, ListenerId, ListenerSet, SessionError};
use tandem_transport::{
    ReliableReader, ReliableSender, UnreliableChannel, run_writer, writer_channel,
};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::TandemError;
use crate::config::{ClientConfig, MAX_DATAGRAM_LEN};
use crate::decode::decode_frame;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Queued for the host's next drain.
enum ClientEvent<P> {
    Connected,
    Disconnected {
        reason: DisconnectReason,
        description: String,
    },
    Packet {
        packet: PacketId,
        payload: Payload<P>,
    },
}

/// Resources of a live connection attempt.
struct Link {
    reliable: ReliableSender,
    unreliable: UnreliableChannel,
    reader: JoinHandle<()>,
    datagrams: JoinHandle<()>,
}

impl Link {
    /// Stops both read tasks. Dropping `reliable` lets the writer flush
    /// what is queued and shut the stream down.
    fn close(self) {
        self.reader.abort();
        self.datagrams.abort();
    }
}

#[derive(Default)]
struct ClientInner {
    state: ConnectionState,
    connection_id: Option<ConnectionId>,
    epoch: u64,
    link: Option<Link>,
}

/// State shared between the session handle and its I/O tasks.
struct ClientShared<P> {
    registry: PacketRegistry<P>,
    config: ClientConfig,
    events: EventSender<ClientEvent<P>>,
    inner: Mutex<ClientInner>,
}

impl<P> ClientShared<P> {
    /// Moves to `Connecting` under a fresh epoch.
    fn begin_attempt(&self) -> Result<u64, TandemError> {
        let mut inner = self.inner.lock();
        if inner.state.is_active() {
            return Err(TandemError::AlreadyConnected);
        }
        inner.epoch += 1;
        inner.state = ConnectionState::Connecting;
        inner.connection_id = None;
        Ok(inner.epoch)
    }

    /// A connect that failed before any task started: back to
    /// `Disconnected`, no notification.
    fn abandon_attempt(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.epoch == epoch && inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Disconnects if the connection is still the one from `epoch`
    /// (or unconditionally with `None`).
    fn disconnect(
        &self,
        epoch: Option<u64>,
        reason: DisconnectReason,
        description: String,
    ) -> bool {
        let mut inner = self.inner.lock();
        if epoch.is_some_and(|epoch| epoch != inner.epoch) {
            return false;
        }
        self.disconnect_locked(&mut inner, reason, description)
    }

    fn disconnect_locked(
        &self,
        inner: &mut ClientInner,
        reason: DisconnectReason,
        description: String,
    ) -> bool {
        if !inner.state.is_active() {
            return false;
        }
        if let Some(link) = inner.link.take() {
            link.close();
        }
        inner.state = ConnectionState::Disconnected;
        inner.connection_id = None;
        tracing::info!(%reason, %description, "disconnected from server");
        self.events.send(ClientEvent::Disconnected {
            reason,
            description,
        });
        true
    }

    /// A frame from the reliable channel. The handshake completes the
    /// connection; every decoded frame is then queued for listeners.
    fn handle_reliable(&self, epoch: u64, frame: RawFrame) {
        let Some(payload) = decode_frame(&self.registry, &frame) else {
            return;
        };
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || !inner.state.is_active() {
            return;
        }
        if let Payload::Handshake { connection_id } = &payload {
            if inner.state == ConnectionState::Connecting {
                inner.state = ConnectionState::Connected;
                inner.connection_id = Some(*connection_id);
                tracing::info!(conn_id = %connection_id, "handshake received, connected");
                self.events.send(ClientEvent::Connected);
            } else {
                tracing::debug!(conn_id = %connection_id, "repeated handshake ignored");
            }
        }
        self.events.send(ClientEvent::Packet {
            packet: frame.id,
            payload,
        });
    }

    /// A frame from the unreliable channel. Before the handshake only a
    /// capacity rejection is honoured.
    fn handle_datagram(&self, epoch: u64, frame: RawFrame) {
        let Some(payload) = decode_frame(&self.registry, &frame) else {
            return;
        };
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return;
        }
        let state = inner.state;
        match state {
            ConnectionState::Connected => {
                self.events.send(ClientEvent::Packet {
                    packet: frame.id,
                    payload,
                });
            }
            ConnectionState::Connecting if matches!(payload, Payload::ServerFull) => {
                tracing::warn!("server is full, connection rejected");
                self.events.send(ClientEvent::Packet {
                    packet: frame.id,
                    payload,
                });
                self.disconnect_locked(
                    &mut inner,
                    DisconnectReason::ServerFull,
                    "server is full".to_string(),
                );
            }
            state => {
                tracing::debug!(packet = %frame.id, %state, "datagram before handshake dropped");
            }
        }
    }
}

impl<P: Send + 'static> ClientShared<P> {
    async fn connect(self: Arc<Self>, server: SocketAddr) -> Result<(), TandemError> {
        let epoch = self.begin_attempt()?;
        tracing::info!(%server, "connecting");

        match tandem_transport::connect(server).await {
            Ok((stream, udp)) => {
                self.attach(epoch, stream, udp);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%server, error = %e, "connect failed");
                self.abandon_attempt(epoch);
                Err(e.into())
            }
        }
    }

    /// Starts the I/O tasks for a freshly opened connection.
    fn attach(self: &Arc<Self>, epoch: u64, stream: TcpStream, udp: UnreliableChannel) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            tracing::debug!("connect attempt abandoned before it completed");
            return;
        }

        let (read_half, write_half) = stream.into_split();
        let (reliable, queue) = writer_channel();
        tokio::spawn(write_reliable(Arc::clone(self), write_half, queue, epoch));

        let reader = ReliableReader::new(
            read_half,
            self.config.recv_buffer_size,
            self.config.max_frame_len,
        );
        let reader = tokio::spawn(read_reliable(Arc::clone(self), reader, epoch));
        let datagrams = tokio::spawn(read_datagrams(Arc::clone(self), udp.clone(), epoch));

        inner.link = Some(Link {
            reliable,
            unreliable: udp,
            reader,
            datagrams,
        });
    }
}

// ---------------------------------------------------------------------------
// I/O tasks
// ---------------------------------------------------------------------------

async fn read_reliable<P>(
    shared: Arc<ClientShared<P>>,
    mut reader: ReliableReader<OwnedReadHalf>,
    epoch: u64,
) {
    let (reason, description) = loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => shared.handle_reliable(epoch, frame),
            Ok(None) => {
                break (DisconnectReason::LostConnection, "connection ended".to_string());
            }
            Err(e) => {
                tracing::debug!(error = %e, "reliable read failed");
                break (DisconnectReason::Error, e.to_string());
            }
        }
    };
    shared.disconnect(Some(epoch), reason, description);
}

async fn write_reliable<P>(
    shared: Arc<ClientShared<P>>,
    writer: OwnedWriteHalf,
    queue: mpsc::UnboundedReceiver<bytes::Bytes>,
    epoch: u64,
) {
    if let Err(e) = run_writer(writer, queue).await {
        tracing::warn!(error = %e, "reliable write failed");
        shared.disconnect(Some(epoch), DisconnectReason::Error, e.to_string());
    }
}

async fn read_datagrams<P>(shared: Arc<ClientShared<P>>, udp: UnreliableChannel, epoch: u64) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let n = match udp.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                // The reliable channel decides whether the connection lives.
                tracing::debug!(error = %e, "datagram receive failed, unreliable channel closed");
                return;
            }
        };
        match decode_datagram(&buf[..n], shared.config.max_frame_len) {
            Ok(frame) => shared.handle_datagram(epoch, frame),
            Err(e) => tracing::debug!(error = %e, len = n, "malformed datagram dropped"),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

type ConnectedHook = Box<dyn FnMut() + Send>;
type DisconnectedHook = Box<dyn FnMut(&DisconnectReason, &str) + Send>;

/// One client connection to a server.
///
/// Socket work happens on Tokio tasks; everything observable (listeners,
/// hooks) runs inside [`drain`](Self::drain), on whichever thread calls it.
///
/// ```rust,no_run
/// use tandem::prelude::*;
///
/// # async fn run() -> Result<(), TandemError> {
/// let mut client = ClientSession::<()>::new(
///     [PacketDef::new("ping")],
///     ClientConfig::default(),
/// )?;
/// client.on_connected(|| println!("connected"));
/// client.connect("127.0.0.1:7777".parse().unwrap()).await?;
///
/// loop {
///     client.drain();
///     client.send_reliable(&client.packet("ping")?);
///     tokio::time::sleep(std::time::Duration::from_millis(16)).await;
/// }
/// # }
/// ```
pub struct ClientSession<P> {
    shared: Arc<ClientShared<P>>,
    dispatcher: EventDispatcher<ClientEvent<P>>,
    listeners: ListenerSet<P>,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
}

impl<P> ClientSession<P> {
    /// Builds the packet registry. No socket is opened yet.
    ///
    /// # Errors
    /// [`TandemError::Protocol`] if the packet names are duplicated or
    /// too many.
    pub fn new(
        defs: impl IntoIterator<Item = PacketDef<P>>,
        config: ClientConfig,
    ) -> Result<Self, TandemError> {
        let registry = PacketRegistry::new(defs)?;
        let dispatcher = EventDispatcher::new();
        let shared = Arc::new(ClientShared {
            registry,
            config: config.validated(),
            events: dispatcher.sender(),
            inner: Mutex::new(ClientInner::default()),
        });
        Ok(Self {
            shared,
            dispatcher,
            listeners: ListenerSet::new(),
            on_connected: None,
            on_disconnected: None,
        })
    }

    /// Closes the connection and queues a disconnect notification.
    ///
    /// Does nothing (and returns `false`) unless connecting or connected,
    /// so repeated calls notify once.
    pub fn disconnect(
        &self,
        reason: DisconnectReason,
        description: impl Into<String>,
    ) -> bool {
        self.shared.disconnect(None, reason, description.into())
    }

    /// Sends `packet` over the reliable channel.
    ///
    /// Fire-and-forget: dropped with a log line unless connected.
    pub fn send_reliable(&self, packet: &FrameWriter) {
        let inner = self.shared.inner.lock();
        match (inner.state, &inner.link) {
            (ConnectionState::Connected, Some(link)) => {
                if let Err(e) = link.reliable.send(packet.build()) {
                    tracing::warn!(error = %e, "reliable send failed");
                }
            }
            (state, _) => tracing::debug!(%state, "reliable send while not connected dropped"),
        }
    }

    /// Sends `packet` over the unreliable channel, tagged with this
    /// client's connection id.
    ///
    /// Fire-and-forget: dropped with a log line unless connected.
    pub fn send_unreliable(&self, packet: &FrameWriter) {
        let inner = self.shared.inner.lock();
        match (inner.state, inner.connection_id, &inner.link) {
            (ConnectionState::Connected, Some(id), Some(link)) => {
                if let Err(e) = link.unreliable.try_send(&packet.build_with_sender(id)) {
                    tracing::warn!(error = %e, "unreliable send failed");
                }
            }
            (state, ..) => tracing::debug!(%state, "unreliable send while not connected dropped"),
        }
    }

    /// Starts a frame for the named packet.
    pub fn packet(&self, name: &str) -> Result<FrameWriter, TandemError> {
        self.shared
            .registry
            .writer(name)
            .ok_or_else(|| SessionError::UnknownPacket(name.to_string()).into())
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// The id the server assigned, once connected.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.inner.lock().connection_id
    }

    /// The packet registry this client was built with.
    pub fn registry(&self) -> &PacketRegistry<P> {
        &self.shared.registry
    }

    /// Registers a callback for packets named `name`.
    ///
    /// The sender id passed to client listeners is always
    /// [`ConnectionId::SERVER`].
    pub fn add_listener<F>(&mut self, name: &str, listener: F) -> Result<ListenerId, TandemError>
    where
        F: FnMut(ConnectionId, &Payload<P>) + Send + 'static,
    {
        let packet = self
            .shared
            .registry
            .id_of(name)
            .ok_or_else(|| SessionError::UnknownPacket(name.to_string()))?;
        Ok(self.listeners.add(packet, listener))
    }

    /// Removes a listener added with [`add_listener`](Self::add_listener).
    pub fn remove_listener(&mut self, name: &str, id: ListenerId) -> bool {
        match self.shared.registry.id_of(name) {
            Some(packet) => self.listeners.remove(packet, id),
            None => false,
        }
    }

    /// Called during a drain when the handshake completes.
    pub fn on_connected(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_connected = Some(Box::new(hook));
    }

    /// Called during a drain when the connection ends.
    pub fn on_disconnected(&mut self, hook: impl FnMut(&DisconnectReason, &str) + Send + 'static) {
        self.on_disconnected = Some(Box::new(hook));
    }

    /// Runs hooks and listeners for everything queued since the last
    /// drain, in arrival order. Never blocks. Returns the number of events.
    pub fn drain(&mut self) -> usize {
        let Self {
            dispatcher,
            listeners,
            on_connected,
            on_disconnected,
            ..
        } = self;
        dispatcher.drain(|event| match event {
            ClientEvent::Connected => {
                if let Some(hook) = on_connected {
                    hook();
                }
            }
            ClientEvent::Disconnected {
                reason,
                description,
            } => {
                if let Some(hook) = on_disconnected {
                    hook(&reason, &description);
                }
            }
            ClientEvent::Packet { packet, payload } => {
                listeners.dispatch(packet, ConnectionId::SERVER, &payload);
            }
        })
    }
}

impl<P: Send + 'static> ClientSession<P> {
    /// Opens both channels to `server` and waits for the reliable connect.
    ///
    /// On success the state is `Connecting`; it becomes `Connected` when
    /// the server's handshake arrives, and the connected hook runs on the
    /// next drain. Reconnecting after a disconnect is allowed. The returned
    /// future does not borrow the session, so it can be handed to
    /// `tokio::spawn`.
    ///
    /// # Errors
    /// - [`TandemError::AlreadyConnected`] while connecting or connected.
    /// - [`TandemError::Transport`] if a socket cannot be bound or the
    ///   server refuses the connection. The state is then `Disconnected`
    ///   and no notification is queued.
    pub fn connect(
        &self,
        server: SocketAddr,
    ) -> impl Future<Output = Result<(), TandemError>> + Send + use<P> {
        Arc::clone(&self.shared).connect(server)
    }
}

impl<P> Drop for ClientSession<P> {
    fn drop(&mut self) {
        self.shared
            .disconnect(None, DisconnectReason::UserInitiated, String::new());
    }
}
