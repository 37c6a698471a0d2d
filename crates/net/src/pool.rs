//! Slot container owning the live sessions.

use std::net::SocketAddr;

use crate::session::Session;

/// Index-addressable slot pool. Slots go empty when sessions close and are
/// compacted by [`SessionPool::rebuild`]; session indices are monotonic and
/// never reused, so assigned tunnel addresses stay unique.
pub struct SessionPool {
    slots: Vec<Option<Session>>,
    next_index: u32,
    live: usize,
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_index: 1,
            live: 0,
        }
    }

    /// Claim the next session index.
    pub fn next_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn append(&mut self, session: Session) {
        self.slots.push(Some(session));
        self.live += 1;
    }

    /// Positional access; slots may be empty while the pool remains valid.
    pub fn get(&self, slot: usize) -> Option<&Session> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Number of live sessions.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Size of the backing storage, including empty slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    pub fn by_index_mut(&mut self, index: u32) -> Option<&mut Session> {
        self.iter_mut().find(|session| session.index == index)
    }

    /// Datagram demultiplexing: sessions are keyed by the peer's transport
    /// address.
    pub fn by_peer_mut(&mut self, peer: SocketAddr) -> Option<&mut Session> {
        self.iter_mut().find(|session| session.peer_addr == peer)
    }

    /// Remove a session from the pool, handing ownership to the caller for
    /// teardown.
    pub fn take_by_index(&mut self, index: u32) -> Option<Session> {
        let slot = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.index == index))?;
        let session = self.slots[slot].take();
        self.live -= 1;
        session
    }

    /// Compact live sessions into a fresh backing of the given capacity.
    pub fn rebuild(&mut self, capacity: usize) {
        let mut fresh = Vec::with_capacity(capacity);
        fresh.extend(self.slots.drain(..).flatten().map(Some));
        self.slots = fresh;
    }

    /// Rebuild is due when the backing has outgrown the admission ceiling
    /// and fewer than half the slots are live.
    pub fn should_rebuild(&self, max_clients: usize) -> bool {
        self.slots.len() > max_clients && self.slots.len() / 2 > self.live
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}
