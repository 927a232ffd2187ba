//! Client Registry: clients are referenced from multiple indices (poll set,
//! connection edges, subgraph chain), so they live in an arena keyed by a
//! generational [`ClientId`] rather than behind raw pointers or an
//! intrusive list — removing a client mid-broadcast can never leave a
//! dangling reference, and `fed_by` sets of plain `ClientId`s stay
//! trivially copyable.

use std::collections::HashSet;
use std::os::fd::RawFd;

use engine_proto::PortId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId {
    pub slot: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    External,
    InProcess,
    Driver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotTriggered,
    Triggered,
    Running,
    Finished,
}

pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub kind: ClientKind,
    pub active: bool,
    pub dead: bool,
    pub ports: Vec<PortId>,
    /// Transitive set of clients that feed this one. Rebuilt on every
    /// structural graph mutation.
    pub fed_by: HashSet<ClientId>,
    pub execution_order: u32,
    pub state: ClientState,
    pub nframes: u32,
    /// >= 0 if this client starts an external subgraph.
    pub subgraph_start_fd: Option<RawFd>,
    /// Some(fd) for the terminating client of a subgraph run; the engine
    /// blocks on this fd to conclude the subgraph.
    pub subgraph_wait_fd: Option<RawFd>,
    pub request_fd: Option<RawFd>,
    pub event_fd: Option<RawFd>,
    pub timed_out: u32,
    pub error_count: u32,
    pub pid: Option<i32>,
    pub signalled_at: Option<u64>,
    pub awake_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub is_timebase: bool,
}

impl Client {
    fn new(id: ClientId, name: String, kind: ClientKind) -> Self {
        Client {
            id,
            name,
            kind,
            active: false,
            dead: false,
            ports: Vec::new(),
            fed_by: HashSet::new(),
            execution_order: 0,
            state: ClientState::NotTriggered,
            nframes: 0,
            subgraph_start_fd: None,
            subgraph_wait_fd: None,
            request_fd: None,
            event_fd: None,
            timed_out: 0,
            error_count: 0,
            pid: None,
            signalled_at: None,
            awake_at: None,
            finished_at: None,
            is_timebase: false,
        }
    }
}

pub struct ClientRegistry {
    slots: Vec<Option<Client>>,
    generations: Vec<u32>,
    by_name: std::collections::HashMap<String, ClientId>,
    next_free_hint: usize,
    timebase: Option<ClientId>,
    external_client_cnt: u32,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry {
            slots: Vec::new(),
            generations: Vec::new(),
            by_name: std::collections::HashMap::new(),
            next_free_hint: 0,
            timebase: None,
            external_client_cnt: 0,
        }
    }

    pub fn register(&mut self, name: String, kind: ClientKind) -> Option<ClientId> {
        if self.by_name.contains_key(&name) {
            return None;
        }
        let slot = loop {
            if self.next_free_hint < self.slots.len() {
                if self.slots[self.next_free_hint].is_none() {
                    break self.next_free_hint;
                }
                self.next_free_hint += 1;
            } else {
                self.slots.push(None);
                self.generations.push(0);
                break self.slots.len() - 1;
            }
        };
        let id = ClientId {
            slot: slot as u32,
            generation: self.generations[slot],
        };
        self.slots[slot] = Some(Client::new(id, name.clone(), kind));
        self.by_name.insert(name, id);
        self.next_free_hint = slot + 1;
        Some(id)
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let slot = id.slot as usize;
        if slot >= self.slots.len() || self.generations[slot] != id.generation {
            return None;
        }
        let client = self.slots[slot].take()?;
        self.by_name.remove(&client.name);
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.next_free_hint = self.next_free_hint.min(slot);
        if self.timebase == Some(id) {
            self.timebase = None;
        }
        Some(client)
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        let slot = id.slot as usize;
        if slot >= self.slots.len() || self.generations[slot] != id.generation {
            return None;
        }
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        let slot = id.slot as usize;
        if slot >= self.slots.len() || self.generations[slot] != id.generation {
            return None;
        }
        self.slots[slot].as_mut()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ClientId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.slots.iter_mut().flatten()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.iter().map(|c| c.id).collect()
    }

    pub fn set_timebase(&mut self, id: ClientId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if let Some(prev) = self.timebase.take() {
            if let Some(c) = self.get_mut(prev) {
                c.is_timebase = false;
            }
        }
        if let Some(c) = self.get_mut(id) {
            c.is_timebase = true;
        }
        self.timebase = Some(id);
        true
    }

    pub fn timebase(&self) -> Option<ClientId> {
        self.timebase
    }

    /// Drop the timebase role if currently held by `id` (used when
    /// zombifying a client).
    pub fn clear_timebase_if(&mut self, id: ClientId) {
        if self.timebase == Some(id) {
            self.timebase = None;
        }
        if let Some(c) = self.get_mut(id) {
            c.is_timebase = false;
        }
    }

    pub fn external_client_count(&self) -> u32 {
        self.external_client_cnt
    }

    pub fn bump_external_count(&mut self) -> u32 {
        self.external_client_cnt += 1;
        self.external_client_cnt
    }

    pub fn decrement_external_count(&mut self) {
        self.external_client_cnt = self.external_client_cnt.saturating_sub(1);
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_duplicate_name() {
        let mut reg = ClientRegistry::new();
        reg.register("a".into(), ClientKind::External).unwrap();
        assert!(reg.register("a".into(), ClientKind::External).is_none());
    }

    #[test]
    fn removed_slot_id_does_not_alias_new_registration() {
        let mut reg = ClientRegistry::new();
        let id = reg.register("a".into(), ClientKind::External).unwrap();
        reg.remove(id);
        let id2 = reg.register("b".into(), ClientKind::External).unwrap();
        assert_eq!(id2.slot, id.slot);
        assert_ne!(id2.generation, id.generation);
        assert!(reg.get(id).is_none());
    }
}
