//! Relay client bookkeeping.
//!
//! Every admitted client is either being polled by the dispatcher or in flight
//! inside a worker. Both count against the capacity: a client does not give
//! up its slot while a worker is answering it.

use std::collections::HashMap;
use turnstile_core::{Endpoint, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Registered with the dispatcher's readiness strategy.
    Polling,
    /// Handed to a worker together with a request.
    InFlight,
}

#[derive(Debug, Clone, Copy)]
struct ClientEntry {
    peer: Endpoint,
    state: ClientState,
}

/// Bounded table of live relay clients, owned by the dispatcher task.
#[derive(Debug)]
pub struct ClientRegistry {
    capacity: usize,
    next_id: SessionId,
    clients: HashMap<SessionId, ClientEntry>,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 0,
            clients: HashMap::with_capacity(capacity),
        }
    }

    /// Registers a newly accepted client in the `Polling` state and returns
    /// its id, or `None` if the registry is full.
    pub fn admit(&mut self, peer: Endpoint) -> Option<SessionId> {
        if self.is_full() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.clients.insert(
            id,
            ClientEntry {
                peer,
                state: ClientState::Polling,
            },
        );
        Some(id)
    }

    /// Marks `id` as handed to a worker.
    pub fn hand_off(&mut self, id: SessionId) -> bool {
        self.transition(id, ClientState::Polling, ClientState::InFlight)
    }

    /// Marks `id` as back with the dispatcher.
    pub fn restore(&mut self, id: SessionId) -> bool {
        self.transition(id, ClientState::InFlight, ClientState::Polling)
    }

    /// Forgets `id`, freeing its slot. Returns the client's peer address.
    pub fn remove(&mut self, id: SessionId) -> Option<Endpoint> {
        self.clients.remove(&id).map(|entry| entry.peer)
    }

    fn transition(&mut self, id: SessionId, from: ClientState, to: ClientState) -> bool {
        match self.clients.get_mut(&id) {
            Some(entry) if entry.state == from => {
                entry.state = to;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, id: SessionId) -> Option<ClientState> {
        self.clients.get(&id).map(|entry| entry.state)
    }

    pub fn in_flight(&self) -> usize {
        self.clients
            .values()
            .filter(|entry| entry.state == ClientState::InFlight)
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.capacity
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
