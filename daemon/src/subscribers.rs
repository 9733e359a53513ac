//! Connections receiving server list updates

use indexmap::IndexMap;

use crate::connection::{ConnectionId, Outbox};

#[derive(Debug, Default)]
pub struct Subscribers {
    members: IndexMap<ConnectionId, Outbox>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `id` was already subscribed
    pub fn add(&mut self, id: ConnectionId, outbox: Outbox) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        self.members.insert(id, outbox);
        true
    }

    /// Returns `false` if `id` wasn't subscribed
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.members.swap_remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Queue `frame` to every subscriber
    pub fn broadcast(&self, frame: &[u8]) {
        for outbox in self.members.values() {
            outbox.send(frame.to_vec());
        }
    }
}
