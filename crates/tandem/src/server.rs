//! `ServerSession` and the state it shares with its I/O tasks.
//!
//! This is the entry point for running a Tandem server. It ties the layers
//! together: transport (sockets) → protocol (frames, registry) → session
//! (connection table, event queue).

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tandem_protocol::{
    ConnectionId, FrameWriter, PacketDef, PacketId, PacketRegistry, Payload, RawFrame,
};
use tandem_session::{
    ConnectionTable, EventDispatcher, EventSender, Generation, ListenerId, ListenerSet,
    SessionError,
};
use tandem_transport::{ReliableSender, TransportError, UnreliableChannel};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::TandemError;
use crate::config::ServerConfig;
use crate::decode::decode_frame;
use crate::handler::{accept_loop, datagram_loop};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Queued for the host's next drain.
pub(crate) enum ServerEvent<P> {
    Accepted(ConnectionId),
    Closed(ConnectionId),
    Packet {
        sender: ConnectionId,
        packet: PacketId,
        payload: Payload<P>,
    },
}

/// One accepted connection.
pub(crate) struct Peer {
    pub(crate) reliable: ReliableSender,
    pub(crate) reader: JoinHandle<()>,
}

/// Everything that exists only between `start` and `stop`.
pub(crate) struct Running {
    /// Distinguishes this run's tasks from a previous run's.
    pub(crate) run: u64,
    pub(crate) local_addr: SocketAddr,
    pub(crate) table: ConnectionTable<Peer>,
    pub(crate) udp: UnreliableChannel,
    accept_task: JoinHandle<()>,
    datagram_task: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct ServerInner {
    pub(crate) running: Option<Running>,
    runs: u64,
    /// Aborted accept and datagram tasks of the last run. They still own
    /// the listening sockets until the runtime drops them.
    retired: Vec<JoinHandle<()>>,
}

/// State shared between the session handle and its I/O tasks.
///
/// Wrapped in `Arc` so it can be cheaply cloned into tasks. The mutex is
/// never held across an `.await`.
pub(crate) struct ServerShared<P> {
    pub(crate) registry: PacketRegistry<P>,
    pub(crate) config: ServerConfig,
    pub(crate) events: EventSender<ServerEvent<P>>,
    pub(crate) inner: Mutex<ServerInner>,
}

impl<P> ServerShared<P> {
    /// Removes a connection, stops its reader, and queues `Closed`.
    ///
    /// Dropping the peer's sender lets its writer flush and shut down.
    pub(crate) fn close_locked(&self, running: &mut Running, conn_id: ConnectionId) -> bool {
        match running.table.release(conn_id) {
            Some(peer) => {
                peer.reader.abort();
                tracing::info!(%conn_id, "connection closed");
                self.events.send(ServerEvent::Closed(conn_id));
                true
            }
            None => false,
        }
    }

    /// Closes `conn_id` only if it is still the connection a task was
    /// started for.
    pub(crate) fn close_if(&self, run: u64, conn_id: ConnectionId, generation: Generation) {
        let mut inner = self.inner.lock();
        let Some(running) = inner.running.as_mut().filter(|r| r.run == run) else {
            return;
        };
        if running.table.generation(conn_id) == Some(generation) {
            self.close_locked(running, conn_id);
        }
    }

    /// Maps a datagram's source to a live connection of this run.
    pub(crate) fn lookup_endpoint(
        &self,
        run: u64,
        endpoint: &SocketAddr,
    ) -> Option<(ConnectionId, Generation)> {
        let inner = self.inner.lock();
        let running = inner.running.as_ref().filter(|r| r.run == run)?;
        let conn_id = running.table.id_for_endpoint(endpoint)?;
        Some((conn_id, running.table.generation(conn_id)?))
    }

    /// Decodes a frame and queues it, unless its connection has gone.
    pub(crate) fn deliver(
        &self,
        run: u64,
        conn_id: ConnectionId,
        generation: Generation,
        frame: RawFrame,
    ) {
        let Some(payload) = decode_frame(&self.registry, &frame) else {
            return;
        };
        let inner = self.inner.lock();
        let live = inner
            .running
            .as_ref()
            .is_some_and(|r| r.run == run && r.table.generation(conn_id) == Some(generation));
        if live {
            self.events.send(ServerEvent::Packet {
                sender: conn_id,
                packet: frame.id,
                payload,
            });
        }
    }

    fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(mut running) = inner.running.take() else {
            return false;
        };
        running.accept_task.abort();
        running.datagram_task.abort();
        inner.retired.push(running.accept_task);
        inner.retired.push(running.datagram_task);
        for (conn_id, peer) in running.table.release_all() {
            peer.reader.abort();
            tracing::info!(%conn_id, "connection closed");
            self.events.send(ServerEvent::Closed(conn_id));
        }
        tracing::info!(addr = %running.local_addr, "server stopped");
        true
    }
}

impl<P: Send + 'static> ServerShared<P> {
    async fn start(
        self: Arc<Self>,
        port: u16,
        max_connections: usize,
    ) -> Result<SocketAddr, TandemError> {
        let running = self.inner.lock().running.is_some();
        if running {
            return Err(TandemError::AlreadyRunning);
        }
        let table = ConnectionTable::new(max_connections)?;

        // Let the previous run release its port before binding again.
        let retired = std::mem::take(&mut self.inner.lock().retired);
        for task in retired {
            let _ = task.await;
        }

        let (listener, udp) = tandem_transport::listen(self.config.bind_ip, port).await?;
        self.launch(listener, udp, table)
    }

    fn launch(
        self: &Arc<Self>,
        listener: TcpListener,
        udp: UnreliableChannel,
        table: ConnectionTable<Peer>,
    ) -> Result<SocketAddr, TandemError> {
        let local_addr = listener.local_addr().map_err(TransportError::BindFailed)?;

        let mut inner = self.inner.lock();
        if inner.running.is_some() {
            return Err(TandemError::AlreadyRunning);
        }
        inner.runs += 1;
        let run = inner.runs;

        let accept_task = tokio::spawn(accept_loop(Arc::clone(self), listener, run));
        let datagram_task = tokio::spawn(datagram_loop(Arc::clone(self), udp.clone(), run));
        tracing::info!(%local_addr, max_connections = table.capacity(), "server listening");
        inner.running = Some(Running {
            run,
            local_addr,
            table,
            udp,
            accept_task,
            datagram_task,
        });
        Ok(local_addr)
    }
}

// ---------------------------------------------------------------------------
// ServerSession
// ---------------------------------------------------------------------------

type ConnectionHook = Box<dyn FnMut(ConnectionId) + Send>;

/// A server accepting up to 255 simultaneous connections.
///
/// Each connection gets a one-byte id, announced to the client in a
/// handshake. Socket work happens on Tokio tasks; hooks and listeners run
/// inside [`drain`](Self::drain), on whichever thread calls it.
///
/// ```rust,no_run
/// use tandem::prelude::*;
///
/// # async fn run() -> Result<(), TandemError> {
/// let mut server = ServerSession::<()>::new(
///     [PacketDef::new("ping")],
///     ServerConfig::default(),
/// )?;
/// server.on_accepted(|id| println!("{id} joined"));
/// server.start(7777, 16).await?;
///
/// loop {
///     server.drain();
///     tokio::time::sleep(std::time::Duration::from_millis(16)).await;
/// }
/// # }
/// ```
pub struct ServerSession<P> {
    shared: Arc<ServerShared<P>>,
    dispatcher: EventDispatcher<ServerEvent<P>>,
    listeners: ListenerSet<P>,
    on_accepted: Option<ConnectionHook>,
    on_closed: Option<ConnectionHook>,
}

impl<P> ServerSession<P> {
    /// Builds the packet registry. Nothing is bound until [`start`](Self::start).
    ///
    /// # Errors
    /// [`TandemError::Protocol`] if the packet names are duplicated or
    /// too many.
    pub fn new(
        defs: impl IntoIterator<Item = PacketDef<P>>,
        config: ServerConfig,
    ) -> Result<Self, TandemError> {
        let registry = PacketRegistry::new(defs)?;
        let dispatcher = EventDispatcher::new();
        let shared = Arc::new(ServerShared {
            registry,
            config: config.validated(),
            events: dispatcher.sender(),
            inner: Mutex::new(ServerInner::default()),
        });
        Ok(Self {
            shared,
            dispatcher,
            listeners: ListenerSet::new(),
            on_accepted: None,
            on_closed: None,
        })
    }

    /// Closes every connection (one `Closed` notification each) and both
    /// listening sockets. Returns `false` if the server was not running.
    ///
    /// The sockets are released by the runtime shortly after; a following
    /// [`start`](Self::start) waits for that before binding, so restarting
    /// on the same port works.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    /// Closes one connection and queues its `Closed` notification.
    ///
    /// Returns `false` (and queues nothing) if `conn_id` is not live, so
    /// repeated calls notify once.
    pub fn disconnect(&self, conn_id: ConnectionId) -> bool {
        let mut inner = self.shared.inner.lock();
        match inner.running.as_mut() {
            Some(running) => self.shared.close_locked(running, conn_id),
            None => false,
        }
    }

    // -- Reliable sends ---------------------------------------------------

    /// Sends `packet` to one connection over the reliable channel.
    pub fn send_reliable(&self, conn_id: ConnectionId, packet: &FrameWriter) {
        let inner = self.shared.inner.lock();
        let Some(running) = inner.running.as_ref() else {
            tracing::debug!(%conn_id, "reliable send while stopped dropped");
            return;
        };
        match running.table.get(conn_id) {
            Some(peer) => send_reliable_to(conn_id, peer, packet.build()),
            None => tracing::debug!(%conn_id, "reliable send to unknown connection dropped"),
        }
    }

    /// Sends `packet` to every connection over the reliable channel.
    pub fn send_reliable_all(&self, packet: &FrameWriter) {
        self.broadcast_reliable(packet, None);
    }

    /// Sends `packet` to every connection but `except`.
    pub fn send_reliable_all_except(&self, except: ConnectionId, packet: &FrameWriter) {
        self.broadcast_reliable(packet, Some(except));
    }

    fn broadcast_reliable(&self, packet: &FrameWriter, except: Option<ConnectionId>) {
        let frame = packet.build();
        let inner = self.shared.inner.lock();
        let Some(running) = inner.running.as_ref() else {
            return;
        };
        for (conn_id, peer) in running.table.iter() {
            if Some(conn_id) != except {
                send_reliable_to(conn_id, peer, frame.clone());
            }
        }
    }

    // -- Unreliable sends -------------------------------------------------

    /// Sends `packet` to one connection over the unreliable channel.
    pub fn send_unreliable(&self, conn_id: ConnectionId, packet: &FrameWriter) {
        let inner = self.shared.inner.lock();
        let Some(running) = inner.running.as_ref() else {
            tracing::debug!(%conn_id, "unreliable send while stopped dropped");
            return;
        };
        match running.table.endpoint(conn_id) {
            Some(endpoint) => send_unreliable_to(running, conn_id, endpoint, &packet.build()),
            None => tracing::debug!(%conn_id, "unreliable send to unknown connection dropped"),
        }
    }

    /// Sends `packet` to every connection over the unreliable channel.
    pub fn send_unreliable_all(&self, packet: &FrameWriter) {
        self.broadcast_unreliable(packet, None);
    }

    /// Sends `packet` to every connection but `except`, unreliably.
    pub fn send_unreliable_all_except(&self, except: ConnectionId, packet: &FrameWriter) {
        self.broadcast_unreliable(packet, Some(except));
    }

    fn broadcast_unreliable(&self, packet: &FrameWriter, except: Option<ConnectionId>) {
        let frame = packet.build();
        let inner = self.shared.inner.lock();
        let Some(running) = inner.running.as_ref() else {
            return;
        };
        for conn_id in running.table.ids() {
            if Some(conn_id) == except {
                continue;
            }
            if let Some(endpoint) = running.table.endpoint(conn_id) {
                send_unreliable_to(running, conn_id, endpoint, &frame);
            }
        }
    }

    // -- Accessors --------------------------------------------------------

    /// Starts a frame for the named packet.
    pub fn packet(&self, name: &str) -> Result<FrameWriter, TandemError> {
        self.shared
            .registry
            .writer(name)
            .ok_or_else(|| SessionError::UnknownPacket(name.to_string()).into())
    }

    /// Returns `true` between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().running.is_some()
    }

    /// The address the listeners are bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .inner
            .lock()
            .running
            .as_ref()
            .map(|r| r.local_addr)
    }

    /// Ids of the live connections in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.shared
            .inner
            .lock()
            .running
            .as_ref()
            .map(|r| r.table.ids())
            .unwrap_or_default()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared
            .inner
            .lock()
            .running
            .as_ref()
            .map_or(0, |r| r.table.len())
    }

    /// The packet registry this server was built with.
    pub fn registry(&self) -> &PacketRegistry<P> {
        &self.shared.registry
    }

    // -- Listeners and drain ----------------------------------------------

    /// Registers a callback for packets named `name`. It receives the
    /// sending connection's id.
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

    /// Called during a drain for each accepted connection.
    pub fn on_accepted(&mut self, hook: impl FnMut(ConnectionId) + Send + 'static) {
        self.on_accepted = Some(Box::new(hook));
    }

    /// Called during a drain for each closed connection.
    pub fn on_closed(&mut self, hook: impl FnMut(ConnectionId) + Send + 'static) {
        self.on_closed = Some(Box::new(hook));
    }

    /// Runs hooks and listeners for everything queued since the last
    /// drain, in arrival order. Never blocks. Returns the number of events.
    pub fn drain(&mut self) -> usize {
        let Self {
            dispatcher,
            listeners,
            on_accepted,
            on_closed,
            ..
        } = self;
        dispatcher.drain(|event| match event {
            ServerEvent::Accepted(conn_id) => {
                if let Some(hook) = on_accepted {
                    hook(conn_id);
                }
            }
            ServerEvent::Closed(conn_id) => {
                if let Some(hook) = on_closed {
                    hook(conn_id);
                }
            }
            ServerEvent::Packet {
                sender,
                packet,
                payload,
            } => {
                listeners.dispatch(packet, sender, &payload);
            }
        })
    }
}

impl<P: Send + 'static> ServerSession<P> {
    /// Binds the TCP listener and the UDP socket on `port` and starts
    /// accepting. Port 0 lets the OS choose; the UDP socket follows.
    ///
    /// Returns the bound address. The returned future does not borrow the
    /// session, so it can be handed to `tokio::spawn`.
    ///
    /// # Errors
    /// - [`TandemError::AlreadyRunning`] if the server is running.
    /// - [`TandemError::Session`] if `max_connections` exceeds 255.
    /// - [`TandemError::Transport`] if either socket cannot be bound.
    pub fn start(
        &self,
        port: u16,
        max_connections: usize,
    ) -> impl Future<Output = Result<SocketAddr, TandemError>> + Send + use<P> {
        Arc::clone(&self.shared).start(port, max_connections)
    }
}

impl<P> Drop for ServerSession<P> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

// ---------------------------------------------------------------------------
// Send helpers
// ---------------------------------------------------------------------------

fn send_reliable_to(conn_id: ConnectionId, peer: &Peer, frame: Bytes) {
    if let Err(e) = peer.reliable.send(frame) {
        tracing::warn!(%conn_id, error = %e, "reliable send failed");
    }
}

fn send_unreliable_to(running: &Running, conn_id: ConnectionId, endpoint: SocketAddr, frame: &[u8]) {
    if let Err(e) = running.udp.try_send_to(frame, endpoint) {
        tracing::warn!(%conn_id, %endpoint, error = %e, "unreliable send failed");
    }
}
