//! The connection table: tracks every live connection on a server.
//!
//! This is the server's bookkeeping core. It is responsible for:
//! - Handing out connection ids (one byte each, dense, recycled)
//! - Indexing connections by id *and* by remote endpoint, so a datagram
//!   can be mapped back to the connection that owns its source address
//! - Stamping each connection with a [`Generation`], so tasks belonging
//!   to an old connection cannot tear down a newer one that reused its id
//!
//! # Concurrency note
//!
//! `ConnectionTable` is NOT thread-safe by itself; it uses plain
//! `HashMap`s. The server keeps it behind a single mutex and never holds
//! that lock across an `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;

use tandem_protocol::ConnectionId;

use crate::SessionError;

/// Most connections a table can hold: one per one-byte id.
pub const MAX_CONNECTIONS: usize = u8::MAX as usize;

/// Distinguishes successive connections that share an id.
///
/// Every insert gets a fresh value. A task that captured the generation of
/// the connection it serves can use [`ConnectionTable::release_if`] to
/// remove *that* connection and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Debug)]
struct Slot<T> {
    generation: Generation,
    endpoint: SocketAddr,
    value: T,
}

/// Live connections, indexed by id and by remote endpoint.
///
/// ## Id allocation
///
/// ```text
/// insert ──→ free-list non-empty? ──yes──→ pop most recently freed id
///                   │
///                   no ──→ next sequential id (0, 1, 2, ...)
///
/// release ──→ push id onto the free-list
/// ```
///
/// With capacity 3: A, B, C get 0, 1, 2; after B leaves, D gets 1.
#[derive(Debug)]
pub struct ConnectionTable<T> {
    slots: HashMap<ConnectionId, Slot<T>>,
    by_endpoint: HashMap<SocketAddr, ConnectionId>,
    /// Released ids, most recent last.
    free: Vec<ConnectionId>,
    /// The next never-used id.
    next_id: u8,
    next_generation: u64,
    max: usize,
}

impl<T> ConnectionTable<T> {
    /// Creates an empty table holding at most `max` connections.
    ///
    /// # Errors
    /// [`SessionError::TooManyConnections`] if `max` exceeds
    /// [`MAX_CONNECTIONS`].
    pub fn new(max: usize) -> Result<Self, SessionError> {
        if max > MAX_CONNECTIONS {
            return Err(SessionError::TooManyConnections {
                requested: max,
                max: MAX_CONNECTIONS,
            });
        }
        Ok(Self {
            slots: HashMap::with_capacity(max),
            by_endpoint: HashMap::with_capacity(max),
            free: Vec::new(),
            next_id: 0,
            next_generation: 0,
            max,
        })
    }

    /// Registers a connection from `endpoint`.
    ///
    /// `build` receives the allocated id and generation and returns the
    /// value to store, so per-connection state can be created knowing its
    /// own id.
    ///
    /// # Errors
    /// - [`SessionError::Full`] if the table is at capacity.
    /// - [`SessionError::EndpointInUse`] if `endpoint` is already registered.
    pub fn insert_with(
        &mut self,
        endpoint: SocketAddr,
        build: impl FnOnce(ConnectionId, Generation) -> T,
    ) -> Result<(ConnectionId, Generation), SessionError> {
        if self.is_full() {
            return Err(SessionError::Full { max: self.max });
        }
        if self.by_endpoint.contains_key(&endpoint) {
            return Err(SessionError::EndpointInUse(endpoint));
        }

        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                // Below capacity with an empty free-list means every id
                // under `next_id` is live, so `next_id < max <= 255`.
                let id = ConnectionId::new(self.next_id);
                self.next_id += 1;
                id
            }
        };
        let generation = Generation(self.next_generation);
        self.next_generation += 1;

        let value = build(id, generation);
        self.slots.insert(
            id,
            Slot {
                generation,
                endpoint,
                value,
            },
        );
        self.by_endpoint.insert(endpoint, id);
        Ok((id, generation))
    }

    /// Removes a connection and recycles its id.
    ///
    /// Returns `None` (and changes nothing) if `id` is not live.
    pub fn release(&mut self, id: ConnectionId) -> Option<T> {
        let slot = self.slots.remove(&id)?;
        self.by_endpoint.remove(&slot.endpoint);
        self.free.push(id);
        Some(slot.value)
    }

    /// Like [`release`](Self::release), but only if `id` still belongs to
    /// the connection stamped with `generation`.
    pub fn release_if(
        &mut self,
        id: ConnectionId,
        generation: Generation,
    ) -> Option<T> {
        match self.slots.get(&id) {
            Some(slot) if slot.generation == generation => self.release(id),
            _ => None,
        }
    }

    /// Removes every connection. Returns them in id order.
    pub fn release_all(&mut self) -> Vec<(ConnectionId, T)> {
        let mut ids: Vec<ConnectionId> = self.slots.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.release(id).map(|value| (id, value)))
            .collect()
    }

    /// Looks up a live connection.
    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.slots.get(&id).map(|slot| &slot.value)
    }

    /// Looks up a live connection mutably.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut T> {
        self.slots.get_mut(&id).map(|slot| &mut slot.value)
    }

    /// Returns the generation of the connection currently holding `id`.
    pub fn generation(&self, id: ConnectionId) -> Option<Generation> {
        self.slots.get(&id).map(|slot| slot.generation)
    }

    /// Returns the remote endpoint of a live connection.
    pub fn endpoint(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.slots.get(&id).map(|slot| slot.endpoint)
    }

    /// Maps a remote endpoint to the connection registered for it.
    pub fn id_for_endpoint(&self, endpoint: &SocketAddr) -> Option<ConnectionId> {
        self.by_endpoint.get(endpoint).copied()
    }

    /// Live connection ids in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.slots.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Iterates over live connections in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &T)> {
        self.slots.iter().map(|(id, slot)| (*id, &slot.value))
    }

    /// Returns `true` if no more connections can be inserted.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.max
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The table's capacity.
    pub fn capacity(&self) -> usize {
        self.max
    }
}

// =========================================================================
// Tests
// =========================================================================
