//! The allocator capability (spec §4.5): the small contract any
//! domain-specific allocator must meet to plug into a topic ring.
//!
//! The core never allocates raw memory itself — it only ever holds
//! `(allocator_id, offset, length)` triples and routes through this trait to
//! move bytes in, out, or between domains.

mod ring;

pub use ring::{AllocatorConfig, RingAllocator};

use crate::domain::DomainId;
use crate::error::Result;
use std::sync::atomic::{AtomicU32, Ordering};

/// Offset into an allocator's mapped region, relative to that allocator's
/// own base address. Never a raw pointer — the mapped base differs per
/// process, so offsets are the only thing that may cross a process boundary.
pub type Offset = u32;

/// Process-local identifier for an allocator instance (the shared-memory id
/// a topic's `Entry` rows reference). Assigned when the allocator is
/// constructed; looked up again via [`crate::registry::AllocatorRegistry`].
pub type AllocatorId = u32;

static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(1);

/// Reserve a fresh process-wide unique allocator id.
pub fn next_allocator_id() -> AllocatorId {
    NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Capability exposed by any allocator that can back a topic's payloads.
///
/// Implementors own a contiguously-mappable region inside one memory domain.
/// The core calls these methods under whatever locking it already holds
/// (segment lock, row lock); an allocator does not need its own external
/// locking for calls made through this trait, though it may use internal
/// locking to protect its own bookkeeping.
pub trait Allocator: Send + Sync {
    /// This allocator's process-local id, as stored in `Entry::allocator_id`.
    fn id(&self) -> AllocatorId;

    /// The memory domain this allocator's region lives in.
    fn domain(&self) -> DomainId;

    /// Reserve `size` bytes. Returns the offset of the new allocation, or
    /// [`crate::error::DomainMqError::AllocatorOutOfSpace`] if no slot is
    /// free.
    fn allocate(&self, size: usize) -> Result<Offset>;

    /// Decrement the share count at `offset`; reclaim the slot once it hits
    /// zero.
    fn deallocate(&self, offset: Offset);

    /// Increment the share count at `offset` without allocating — the
    /// zero-copy case, used when a subscriber's preferred domain already has
    /// a cached copy.
    fn share(&self, offset: Offset);

    /// Resolve `offset` to a pointer valid in the calling process.
    ///
    /// # Safety
    /// The returned pointer is valid only for as long as the caller holds a
    /// share on `offset` (via a prior `allocate`/`share`) and must not be
    /// dereferenced past `length` bytes from the original allocation.
    unsafe fn ptr_from_offset(&self, offset: Offset) -> *mut u8;

    /// Copy `src` into this allocator's region at `dst_offset`. Used when the
    /// source side is CPU memory (spec §4.5 three-way copy rule, case 1).
    fn copy_to(&self, dst_offset: Offset, src: &[u8]) -> Result<()>;

    /// Copy from this allocator's region at `src_offset` into `dst`. Used
    /// when the destination side is CPU memory (case 2).
    fn copy_from(&self, src_offset: Offset, dst: &mut [u8]) -> Result<()>;

    /// Drive a direct transfer from `src_alloc`'s region into this
    /// allocator's region at `dst_offset`, with neither side being CPU
    /// memory (case 3). The destination allocator is responsible for
    /// knowing how to pull from a foreign allocator of its own domain (e.g.
    /// peer-to-peer device copy).
    fn copy(&self, dst_offset: Offset, src_alloc: &dyn Allocator, src_offset: Offset, len: usize) -> Result<()>;
}

/// Three-way copy routing used by the take path on a cross-domain miss
/// (spec §4.5): if the source is CPU, drive the copy through the
/// destination's `copy_to`; if the destination is CPU, drive it through the
/// source's `copy_from`; otherwise the destination allocator drives a direct
/// device-to-device transfer.
pub fn route_copy(
    dst_alloc: &dyn Allocator,
    dst_offset: Offset,
    src_alloc: &dyn Allocator,
    src_offset: Offset,
    len: usize,
) -> Result<()> {
    if src_alloc.domain().is_cpu() {
        let mut buf = vec![0u8; len];
        // SAFETY: offset was produced by a live allocation of at least `len` bytes.
        unsafe {
            let ptr = src_alloc.ptr_from_offset(src_offset);
            std::ptr::copy_nonoverlapping(ptr, buf.as_mut_ptr(), len);
        }
        dst_alloc.copy_to(dst_offset, &buf)
    } else if dst_alloc.domain().is_cpu() {
        let mut buf = vec![0u8; len];
        src_alloc.copy_from(src_offset, &mut buf)?;
        // SAFETY: offset was just allocated with room for `len` bytes.
        unsafe {
            let ptr = dst_alloc.ptr_from_offset(dst_offset);
            std::ptr::copy_nonoverlapping(buf.as_ptr(), ptr, len);
        }
        Ok(())
    } else {
        dst_alloc.copy(dst_offset, src_alloc, src_offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_ids_are_unique_and_increasing() {
        let a = next_allocator_id();
        let b = next_allocator_id();
        assert!(b > a);
    }
}
