//! Hand-off of events from I/O tasks to the host's thread.
//!
//! Socket reads complete on runtime worker threads, but application code
//! wants its callbacks on one thread it controls (a game loop, a UI
//! thread). The dispatcher sits between the two:
//!
//! ```text
//! read task ──┐
//! read task ──┼──→ EventSender::send ──→ [ unbounded queue ] ──→ drain() on host thread
//! accept loop ┘
//! ```
//!
//! Senders never block and never run application code. `drain` takes
//! `&mut self`, so only one thread can be consuming at a time.

use tokio::sync::mpsc;

/// The consuming end of the event queue. Owned by a session.
#[derive(Debug)]
pub struct EventDispatcher<E> {
    tx: mpsc::UnboundedSender<E>,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> EventDispatcher<E> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Returns a handle I/O tasks use to enqueue events.
    pub fn sender(&self) -> EventSender<E> {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Runs `handle` on the events queued when the call starts, in
    /// enqueue order.
    ///
    /// Never waits. Events enqueued while the drain runs, by I/O tasks or
    /// by `handle` itself (a disconnect from inside a listener, say), are
    /// left for the next call, so one drain is bounded even under a steady
    /// flood of traffic. Returns the number of events handled.
    pub fn drain(&mut self, mut handle: impl FnMut(E)) -> usize {
        let queued = self.rx.len();
        let mut count = 0;
        while count < queued {
            let Ok(event) = self.rx.try_recv() else {
                break;
            };
            handle(event);
            count += 1;
        }
        count
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle for an [`EventDispatcher`]. Cheap to clone.
#[derive(Debug)]
pub struct EventSender<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> EventSender<E> {
    /// Enqueues `event`. Returns `false` if the dispatcher is gone.
    pub fn send(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
