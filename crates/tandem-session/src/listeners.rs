//! Per-packet listener lists.

use std::collections::HashMap;

use tandem_protocol::{ConnectionId, PacketId, Payload};

/// A packet callback: receives the sender's id and the decoded payload.
pub type Listener<P> = Box<dyn FnMut(ConnectionId, &Payload<P>) + Send>;

/// Handle for removing a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners keyed by packet id, each list kept in registration order.
pub struct ListenerSet<P> {
    next_id: u64,
    by_packet: HashMap<PacketId, Vec<(ListenerId, Listener<P>)>>,
}

impl<P> ListenerSet<P> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            by_packet: HashMap::new(),
        }
    }

    /// Adds `listener` for `packet` after any already registered.
    pub fn add<F>(&mut self, packet: PacketId, listener: F) -> ListenerId
    where
        F: FnMut(ConnectionId, &Payload<P>) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.by_packet
            .entry(packet)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Removes one listener. Returns `false` if it was not registered for
    /// `packet`.
    pub fn remove(&mut self, packet: PacketId, id: ListenerId) -> bool {
        let Some(list) = self.by_packet.get_mut(&packet) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.by_packet.remove(&packet);
        }
        removed
    }

    /// Invokes every listener for `packet` in registration order and
    /// returns how many ran.
    pub fn dispatch(
        &mut self,
        packet: PacketId,
        sender: ConnectionId,
        payload: &Payload<P>,
    ) -> usize {
        match self.by_packet.get_mut(&packet) {
            Some(list) => {
                for (_, listener) in list.iter_mut() {
                    listener(sender, payload);
                }
                list.len()
            }
            None => 0,
        }
    }

    /// Number of listeners registered for `packet`.
    pub fn count(&self, packet: PacketId) -> usize {
        self.by_packet.get(&packet).map_or(0, Vec::len)
    }
}

impl<P> Default for ListenerSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for ListenerSet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .by_packet
            .iter()
            .map(|(packet, list)| (*packet, list.len()))
            .collect();
        f.debug_struct("ListenerSet").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    const CHAT: PacketId = PacketId(3);
    const MOVE: PacketId = PacketId(4);

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Listener<u8>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Listener<u8> {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Box::new(move |sender: ConnectionId, _payload: &Payload<u8>| {
                    log.lock().unwrap().push(format!("{tag}:{}", sender.get()));
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_dispatch_runs_listeners_in_registration_order() {
        let (log, make) = recorder();
        let mut set = ListenerSet::<u8>::new();
        set.add(CHAT, make("a"));
        set.add(CHAT, make("b"));

        let ran = set.dispatch(CHAT, ConnectionId::new(2), &Payload::Empty);

        assert_eq!(ran, 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:2", "b:2"]);
    }

    #[test]
    fn test_dispatch_only_reaches_matching_packet() {
        let (log, make) = recorder();
        let mut set = ListenerSet::<u8>::new();
        set.add(CHAT, make("chat"));

        assert_eq!(set.dispatch(MOVE, ConnectionId::SERVER, &Payload::Empty), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_listener() {
        let (log, make) = recorder();
        let mut set = ListenerSet::<u8>::new();
        let a = set.add(CHAT, make("a"));
        set.add(CHAT, make("b"));

        assert!(set.remove(CHAT, a));
        assert!(!set.remove(CHAT, a), "second removal is a no-op");
        assert_eq!(set.count(CHAT), 1);

        set.dispatch(CHAT, ConnectionId::SERVER, &Payload::Empty);
        assert_eq!(*log.lock().unwrap(), vec!["b:0"]);
    }

    #[test]
    fn test_remove_under_wrong_packet_fails() {
        let (_log, make) = recorder();
        let mut set = ListenerSet::<u8>::new();
        let a = set.add(CHAT, make("a"));

        assert!(!set.remove(MOVE, a));
        assert_eq!(set.count(CHAT), 1);
    }

    #[test]
    fn test_listener_sees_payload() {
        let seen = Arc::new(Mutex::new(None));
        let mut set = ListenerSet::<u8>::new();
        {
            let seen = Arc::clone(&seen);
            set.add(CHAT, move |_, payload| {
                *seen.lock().unwrap() = Some(payload.clone());
            });
        }

        set.dispatch(CHAT, ConnectionId::SERVER, &Payload::Custom(7));
        assert_eq!(*seen.lock().unwrap(), Some(Payload::Custom(7)));
    }
}
