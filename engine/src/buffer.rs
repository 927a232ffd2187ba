//! Shared Port-Buffer Pool: one shared segment per port type, partitioned
//! into fixed-size buffers; a free list guarded by a dedicated mutex
//! distinct from the graph lock.

use std::collections::VecDeque;
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::debug;

use engine_proto::{BufferSizePolicy, PortTypeId};

use crate::error::{EngineError, Result};

/// A handle into a type's shared segment. Offsets are stable for the
/// lifetime of the buffer's assignment; they never overlap for two
/// concurrently in-use buffers of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    pub type_id: PortTypeId,
    pub offset: usize,
}

struct Segment {
    mmap: MmapMut,
    name: String,
}

impl Segment {
    fn anonymous(size: usize, name: String) -> Self {
        // A real deployment backs this with a named POSIX shm segment
        // (`shm_open` + `ftruncate` + `mmap`) so external clients can
        // attach by name; tests and in-process-only configurations use an
        // anonymous mapping with the same layout.
        let mmap = MmapMut::map_anon(size.max(1)).expect("failed to map port-type segment");
        Segment { mmap, name }
    }

    fn zero_fill(&mut self, offset: usize, len: usize) {
        self.mmap[offset..offset + len].fill(0);
    }
}

/// One port type's buffer pool: the shared segment, the per-buffer size,
/// and the FIFO free list of unused buffer offsets.
pub struct PortTypeBuffers {
    pub type_id: PortTypeId,
    pub name: String,
    pub policy: BufferSizePolicy,
    pub has_mixdown: bool,
    segment: Mutex<Segment>,
    one_buffer: Mutex<usize>,
    free_list: Mutex<VecDeque<usize>>,
    /// Offset of the process-wide silent buffer, set only on the primary
    /// audio type.
    pub silent_buffer: Mutex<Option<usize>>,
}

impl PortTypeBuffers {
    fn one_buffer_size(policy: BufferSizePolicy, period_frames: u32) -> usize {
        match policy {
            BufferSizePolicy::FixedBytes(n) => n,
            BufferSizePolicy::Scaled {
                scale_factor,
                sample_size,
            } => scale_factor * period_frames as usize * sample_size,
        }
    }

    pub fn new(
        type_id: PortTypeId,
        name: String,
        policy: BufferSizePolicy,
        has_mixdown: bool,
        nports: usize,
        period_frames: u32,
    ) -> Self {
        let one_buffer = Self::one_buffer_size(policy, period_frames);
        let shm_name = format!("/jck-[{name}]");
        let segment = Segment::anonymous(one_buffer * nports.max(1), shm_name);
        let mut free_list = VecDeque::with_capacity(nports);
        for i in 0..nports {
            free_list.push_back(i * one_buffer);
        }
        PortTypeBuffers {
            type_id,
            name,
            policy,
            has_mixdown,
            segment: Mutex::new(segment),
            one_buffer: Mutex::new(one_buffer),
            free_list: Mutex::new(free_list),
            silent_buffer: Mutex::new(None),
        }
    }

    pub fn shm_name(&self) -> String {
        self.segment.lock().name.clone()
    }

    pub fn segment_size(&self) -> usize {
        self.segment.lock().mmap.len()
    }

    /// Reserve buffer offset 0 as the process-wide silent buffer for this
    /// (the primary audio) type, zero-filling it.
    pub fn reserve_silent_buffer(&self) {
        let one_buffer = *self.one_buffer.lock();
        {
            let mut free = self.free_list.lock();
            free.retain(|&off| off != 0);
        }
        self.segment.lock().zero_fill(0, one_buffer);
        *self.silent_buffer.lock() = Some(0);
        debug!(type_id = ?self.type_id, "reserved silent buffer");
    }

    /// FIFO allocation from the head of the free list.
    pub fn allocate(&self) -> Result<BufferHandle> {
        let mut free = self.free_list.lock();
        let offset = free.pop_front().ok_or(EngineError::NoFreePortSlot)?;
        Ok(BufferHandle {
            type_id: self.type_id,
            offset,
        })
    }

    /// Release returns the offset to the head of the free list.
    pub fn release(&self, handle: BufferHandle) {
        debug_assert_eq!(handle.type_id, self.type_id);
        self.free_list.lock().push_front(handle.offset);
    }

    /// Resize on a buffer-size change: rebuild the segment and the free
    /// list in ascending offset order, re-reserving the silent buffer if
    /// this is the primary type.
    pub fn resize(&self, nports: usize, period_frames: u32) {
        let one_buffer = Self::one_buffer_size(self.policy, period_frames);
        *self.one_buffer.lock() = one_buffer;
        let shm_name = self.segment.lock().name.clone();
        *self.segment.lock() = Segment::anonymous(one_buffer * nports.max(1), shm_name);
        let mut free = self.free_list.lock();
        free.clear();
        for i in 0..nports {
            free.push_back(i * one_buffer);
        }
        drop(free);
        if self.type_id == PortTypeId::AUDIO {
            self.reserve_silent_buffer();
        }
    }

    pub fn one_buffer_len(&self) -> usize {
        *self.one_buffer.lock()
    }
}

/// Registry of all port types, keyed by [`PortTypeId`].
pub struct BufferPool {
    types: parking_lot::RwLock<Vec<Arc<PortTypeBuffers>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            types: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn register_type(
        &self,
        name: String,
        policy: BufferSizePolicy,
        has_mixdown: bool,
        nports: usize,
        period_frames: u32,
    ) -> Arc<PortTypeBuffers> {
        let mut types = self.types.write();
        let type_id = PortTypeId(types.len() as u32);
        let buffers = Arc::new(PortTypeBuffers::new(
            type_id,
            name,
            policy,
            has_mixdown,
            nports,
            period_frames,
        ));
        types.push(buffers.clone());
        if type_id == PortTypeId::AUDIO {
            buffers.reserve_silent_buffer();
        }
        buffers
    }

    pub fn get(&self, type_id: PortTypeId) -> Option<Arc<PortTypeBuffers>> {
        self.types.read().get(type_id.0 as usize).cloned()
    }

    pub fn iter(&self) -> Vec<Arc<PortTypeBuffers>> {
        self.types.read().clone()
    }

    pub fn resize_all(&self, nports: usize, period_frames: u32) {
        for t in self.types.read().iter() {
            t.resize(nports, period_frames);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_allocation_no_duplicate_offsets() {
        let pool = BufferPool::new();
        let t = pool.register_type(
            "audio".into(),
            BufferSizePolicy::Scaled {
                scale_factor: 1,
                sample_size: 4,
            },
            false,
            4,
            256,
        );
        // offset 0 is reserved as the silent buffer.
        let a = t.allocate().unwrap();
        let b = t.allocate().unwrap();
        let c = t.allocate().unwrap();
        assert_ne!(a.offset, b.offset);
        assert_ne!(b.offset, c.offset);
        assert!(t.allocate().is_err());
        t.release(b);
        let d = t.allocate().unwrap();
        assert_eq!(d.offset, b.offset);
    }
}
