//! Port Table: a fixed-capacity dense array of port descriptors, shared in
//! spirit with clients (mirrored to a real control block in production),
//! plus a parallel private array of per-port engine-only state.

use engine_proto::{PortFlags, PortId, PortTypeId};

use crate::buffer::BufferHandle;
use crate::error::{EngineError, Result};

/// Public-ish descriptor: the fields a client or the wire protocol cares
/// about.
#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub type_id: PortTypeId,
    pub owner_client_id: u32,
    pub name: String,
    pub flags: PortFlags,
    pub latency: u32,
    pub total_latency: u32,
    /// Offset into this port's type's shared segment. For an output port
    /// this is its own allocated slot; for an input it is resolved by
    /// [`crate::graph::resolve_input_buffers`] to its source's offset, the
    /// shared silent buffer, or a private mixdown slot.
    pub buffer_offset: usize,
    pub locked: bool,
    pub monitor_requests: u32,
    pub in_use: bool,
}

/// Engine-private state kept alongside each port: its connection list and
/// buffer assignment. Never exposed across the wire.
#[derive(Debug, Default, Clone)]
pub struct PortInternal {
    /// For an output port: the single other-end port ids it feeds.
    /// For an input port: the (usually ≤1, >1 only with mixdown) sources
    /// connected to it.
    pub connections: Vec<PortId>,
    pub buffer: Option<BufferHandle>,
}

pub struct PortTable {
    slots: Vec<Option<Port>>,
    internal: Vec<PortInternal>,
    generations: Vec<u32>,
    capacity: usize,
}

impl PortTable {
    pub fn new(capacity: usize) -> Self {
        PortTable {
            slots: (0..capacity).map(|_| None).collect(),
            internal: vec![PortInternal::default(); capacity],
            generations: vec![0; capacity],
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Linear scan for the first free slot; registers the port there.
    pub fn register(
        &mut self,
        type_id: PortTypeId,
        owner_client_id: u32,
        name: String,
        flags: PortFlags,
    ) -> Result<PortId> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(EngineError::NoFreePortSlot)?;
        let generation = self.generations[slot];
        let id = PortId {
            slot: slot as u32,
            generation,
        };
        self.slots[slot] = Some(Port {
            id,
            type_id,
            owner_client_id,
            name,
            flags,
            latency: 0,
            total_latency: 0,
            buffer_offset: 0,
            locked: false,
            monitor_requests: 0,
            in_use: true,
        });
        self.internal[slot] = PortInternal::default();
        Ok(id)
    }

    /// Requires the caller's client id to match the port's owner.
    pub fn unregister(&mut self, client_id: u32, id: PortId) -> Result<PortInternal> {
        let port = self.get(id)?;
        if port.owner_client_id != client_id {
            return Err(EngineError::OwnerMismatch);
        }
        let slot = id.slot as usize;
        let internal = std::mem::take(&mut self.internal[slot]);
        self.slots[slot] = None;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        Ok(internal)
    }

    /// Remove every port owned by `client_id` (used when a client is
    /// zombified/removed), returning the freed internal states.
    pub fn unregister_all_owned_by(&mut self, client_id: u32) -> Vec<(PortId, PortInternal)> {
        let mut removed = Vec::new();
        for slot in 0..self.capacity {
            let owns = matches!(&self.slots[slot], Some(p) if p.owner_client_id == client_id);
            if owns {
                let id = self.slots[slot].as_ref().unwrap().id;
                let internal = std::mem::take(&mut self.internal[slot]);
                self.slots[slot] = None;
                self.generations[slot] = self.generations[slot].wrapping_add(1);
                removed.push((id, internal));
            }
        }
        removed
    }

    fn check_generation(&self, id: PortId) -> Result<usize> {
        let slot = id.slot as usize;
        if slot >= self.capacity || self.generations[slot] != id.generation {
            return Err(EngineError::PortDoesNotExist);
        }
        Ok(slot)
    }

    pub fn get(&self, id: PortId) -> Result<&Port> {
        let slot = self.check_generation(id)?;
        self.slots[slot].as_ref().ok_or(EngineError::PortDoesNotExist)
    }

    pub fn get_mut(&mut self, id: PortId) -> Result<&mut Port> {
        let slot = self.check_generation(id)?;
        self.slots[slot]
            .as_mut()
            .ok_or(EngineError::PortDoesNotExist)
    }

    pub fn internal(&self, id: PortId) -> Result<&PortInternal> {
        let slot = self.check_generation(id)?;
        Ok(&self.internal[slot])
    }

    pub fn internal_mut(&mut self, id: PortId) -> Result<&mut PortInternal> {
        let slot = self.check_generation(id)?;
        Ok(&mut self.internal[slot])
    }

    /// Linear name lookup, scoped to an owning client if given.
    pub fn find_by_name(&self, name: &str) -> Option<PortId> {
        self.slots
            .iter()
            .flatten()
            .find(|p| p.name == name)
            .map(|p| p.id)
    }

    pub fn iter_in_use(&self) -> impl Iterator<Item = &Port> {
        self.slots.iter().flatten()
    }

    pub fn iter_in_use_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.slots.iter_mut().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(f: u8) -> PortFlags {
        PortFlags::from_bits_truncate(f)
    }

    #[test]
    fn register_unregister_round_trips_generation() {
        let mut table = PortTable::new(4);
        let id = table
            .register(PortTypeId::AUDIO, 1, "out".into(), flags(0b0010))
            .unwrap();
        assert_eq!(id.generation, 0);
        table.unregister(1, id).unwrap();
        let id2 = table
            .register(PortTypeId::AUDIO, 1, "out2".into(), flags(0b0010))
            .unwrap();
        assert_eq!(id2.slot, id.slot);
        assert_eq!(id2.generation, 1);
        assert!(table.get(id).is_err());
    }

    #[test]
    fn unregister_requires_owner_match() {
        let mut table = PortTable::new(4);
        let id = table
            .register(PortTypeId::AUDIO, 1, "out".into(), flags(0b0010))
            .unwrap();
        assert!(matches!(
            table.unregister(2, id),
            Err(EngineError::OwnerMismatch)
        ));
    }

    #[test]
    fn registration_rejects_when_full() {
        let mut table = PortTable::new(1);
        table
            .register(PortTypeId::AUDIO, 1, "a".into(), flags(0b0010))
            .unwrap();
        assert!(matches!(
            table.register(PortTypeId::AUDIO, 1, "b".into(), flags(0b0010)),
            Err(EngineError::NoFreePortSlot)
        ));
    }
}
