//! Session plumbing for Tandem.
//!
//! The pieces both client and server sessions are built from:
//!
//! 1. **Event queue** ([`EventDispatcher`], [`EventSender`]): I/O tasks
//!    enqueue typed events from any thread; the host drains them on its
//!    own thread.
//! 2. **Listeners** ([`ListenerSet`]): callbacks keyed by packet id,
//!    invoked during a drain.
//! 3. **Connection table** ([`ConnectionTable`]): the server's id
//!    allocator with free-list reuse and an endpoint index.
//!
//! # How it fits in the stack
//!
//! ```text
//! tandem (above)            ← ClientSession / ServerSession
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below)    ← ConnectionId, PacketId, Payload
//! ```

mod dispatcher;
mod error;
mod listeners;
mod table;

pub use dispatcher::{EventDispatcher, EventSender};
pub use error::SessionError;
pub use listeners::{Listener, ListenerId, ListenerSet};
pub use table::{ConnectionTable, Generation, MAX_CONNECTIONS};
