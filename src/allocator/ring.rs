//! `RingAllocator`: a fixed-slot ring allocator backing one memory domain.
//!
//! Grounded on two sources: the mmap/region mechanics mirror
//! `flux::disruptor::spsc::shared_ring_buffer::SharedRingBuffer` (a header
//! plus a flat slot array over one mapped region); the allocate/deallocate
//! bookkeeping (fixed-size slots, refcounted, FIFO-biased reuse) mirrors the
//! original `cpu_ringbuf_allocator`'s `count`/`rear_it` semantics exercised
//! in `hazcat_allocator_test.cpp`.
//!
//! Accelerator domains are modeled the same way: a `RingAllocator` tagged
//! with a non-CPU [`DomainId`] is still host-backed (this crate has no real
//! accelerator to allocate on — spec §1 treats allocators as an external
//! collaborator), but it is only ever addressed, copied into, and shared
//! through the [`Allocator`] trait, never through direct pointer aliasing
//! with a CPU allocator's region, so the domain boundary is real at the API
//! level even though the backing pages happen to both be host memory.

use std::ptr;
use std::sync::Mutex;

use crate::allocator::{next_allocator_id, Allocator, AllocatorId, Offset};
use crate::constants::{DEFAULT_ALLOC_SLOT_COUNT, DEFAULT_ALLOC_SLOT_SIZE};
use crate::domain::DomainId;
use crate::error::{DomainMqError, Result};

/// Dimensions of a [`RingAllocator`]'s fixed-size slot pool.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Size in bytes of each slot. An `allocate(size)` call with
    /// `size > slot_size` fails.
    pub slot_size: usize,
    /// Number of slots in the ring.
    pub slot_count: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            slot_size: DEFAULT_ALLOC_SLOT_SIZE,
            slot_count: DEFAULT_ALLOC_SLOT_COUNT,
        }
    }
}

struct Slots {
    /// Per-slot share count. `0` means free.
    refcounts: Vec<u32>,
    /// Index to start the next free-slot scan from (keeps allocation
    /// FIFO-biased, matching the source allocator's `rear_it` cursor).
    cursor: usize,
}

/// A fixed-slot ring allocator serving one memory domain.
pub struct RingAllocator {
    id: AllocatorId,
    domain: DomainId,
    config: AllocatorConfig,
    region: *mut u8,
    region_len: usize,
    slots: Mutex<Slots>,
}

// SAFETY: `region` is a private heap allocation never aliased outside this
// struct's own methods, which all go through the `slots` mutex for
// bookkeeping; concurrent reads/writes to distinct slots are the caller's
// responsibility, same contract `RingBuffer<T>` documents in the teacher
// crate.
unsafe impl Send for RingAllocator {}
unsafe impl Sync for RingAllocator {}

impl RingAllocator {
    /// Create a new ring allocator for `domain` with the given slot
    /// dimensions.
    pub fn new(domain: DomainId, config: AllocatorConfig) -> Self {
        let region_len = config.slot_size * config.slot_count;
        let region = unsafe {
            let layout = std::alloc::Layout::from_size_align(region_len.max(1), 16)
                .expect("slot_size * slot_count must fit a valid layout");
            let ptr = std::alloc::alloc_zeroed(layout);
            assert!(!ptr.is_null(), "allocation of ring allocator region failed");
            ptr
        };

        Self {
            id: next_allocator_id(),
            domain,
            config,
            region,
            region_len,
            slots: Mutex::new(Slots {
                refcounts: vec![0u32; config.slot_count],
                cursor: 0,
            }),
        }
    }

    /// Create a ring allocator for the host CPU domain using the default
    /// dimensions (spec §9 "Default allocator fallback").
    pub fn default_host() -> Self {
        Self::new(DomainId::CPU, AllocatorConfig::default())
    }

    fn slot_index(&self, offset: Offset) -> usize {
        offset as usize / self.config.slot_size
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        unsafe { self.region.add(index * self.config.slot_size) }
    }
}

impl Allocator for RingAllocator {
    fn id(&self) -> AllocatorId {
        self.id
    }

    fn domain(&self) -> DomainId {
        self.domain
    }

    fn allocate(&self, size: usize) -> Result<Offset> {
        if size > self.config.slot_size {
            return Err(DomainMqError::AllocatorOutOfSpace);
        }

        let mut slots = self.slots.lock().unwrap();
        let count = slots.refcounts.len();
        for step in 0..count {
            let idx = (slots.cursor + step) % count;
            if slots.refcounts[idx] == 0 {
                slots.refcounts[idx] = 1;
                slots.cursor = (idx + 1) % count;
                return Ok((idx * self.config.slot_size) as Offset);
            }
        }
        Err(DomainMqError::AllocatorOutOfSpace)
    }

    fn deallocate(&self, offset: Offset) {
        let idx = self.slot_index(offset);
        let mut slots = self.slots.lock().unwrap();
        if let Some(count) = slots.refcounts.get_mut(idx) {
            *count = count.saturating_sub(1);
        }
    }

    fn share(&self, offset: Offset) {
        let idx = self.slot_index(offset);
        let mut slots = self.slots.lock().unwrap();
        if let Some(count) = slots.refcounts.get_mut(idx) {
            *count += 1;
        }
    }

    unsafe fn ptr_from_offset(&self, offset: Offset) -> *mut u8 {
        self.region.add(offset as usize)
    }

    fn copy_to(&self, dst_offset: Offset, src: &[u8]) -> Result<()> {
        if src.len() > self.config.slot_size {
            return Err(DomainMqError::AllocatorOutOfSpace);
        }
        unsafe {
            let dst = self.slot_ptr(self.slot_index(dst_offset));
            ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        Ok(())
    }

    fn copy_from(&self, src_offset: Offset, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.config.slot_size {
            return Err(DomainMqError::AllocatorOutOfSpace);
        }
        unsafe {
            let src = self.slot_ptr(self.slot_index(src_offset));
            ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn copy(&self, dst_offset: Offset, src_alloc: &dyn Allocator, src_offset: Offset, len: usize) -> Result<()> {
        if len > self.config.slot_size {
            return Err(DomainMqError::AllocatorOutOfSpace);
        }
        unsafe {
            let src = src_alloc.ptr_from_offset(src_offset);
            let dst = self.slot_ptr(self.slot_index(dst_offset));
            ptr::copy_nonoverlapping(src, dst, len);
        }
        Ok(())
    }
}

impl Drop for RingAllocator {
    fn drop(&mut self) {
        if self.region_len > 0 {
            let layout = std::alloc::Layout::from_size_align(self.region_len, 16).unwrap();
            unsafe {
                std::alloc::dealloc(self.region, layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_deallocate_balance() {
        let alloc = RingAllocator::new(DomainId::CPU, AllocatorConfig { slot_size: 8, slot_count: 3 });

        let a1 = alloc.allocate(4).unwrap();
        let a2 = alloc.allocate(4).unwrap();
        let a3 = alloc.allocate(4).unwrap();
        assert!(alloc.allocate(4).is_err(), "ring should be full");

        alloc.deallocate(a1);
        alloc.deallocate(a2);

        let a4 = alloc.allocate(4).unwrap();
        let a5 = alloc.allocate(4).unwrap();
        assert_eq!(a4, a1);
        assert_eq!(a5, a2);

        alloc.deallocate(a3);
        alloc.deallocate(a4);
        alloc.deallocate(a5);
    }

    #[test]
    fn share_keeps_slot_alive_until_balanced() {
        let alloc = RingAllocator::new(DomainId::CPU, AllocatorConfig { slot_size: 8, slot_count: 1 });
        let offset = alloc.allocate(8).unwrap();
        alloc.share(offset); // refcount now 2

        alloc.deallocate(offset); // refcount 1, still "occupied"
        assert!(alloc.allocate(8).is_err(), "slot should still be held");

        alloc.deallocate(offset); // refcount 0, now free
        assert!(alloc.allocate(8).is_ok());
    }

    #[test]
    fn copy_to_and_copy_from_round_trip() {
        let alloc = RingAllocator::new(DomainId::CPU, AllocatorConfig::default());
        let offset = alloc.allocate(5).unwrap();

        alloc.copy_to(offset, b"hello").unwrap();
        let mut buf = [0u8; 5];
        alloc.copy_from(offset, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn oversized_allocation_is_rejected() {
        let alloc = RingAllocator::new(DomainId::CPU, AllocatorConfig { slot_size: 8, slot_count: 2 });
        assert!(matches!(alloc.allocate(9), Err(DomainMqError::AllocatorOutOfSpace)));
    }
}
