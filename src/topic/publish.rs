//! Publish path (spec.md §4.3): claim a ring slot, drain anything a
//! previous publish left there that no subscriber ever took, write the new
//! entry, and make it visible.

use std::sync::atomic::Ordering;

use crate::allocator::{AllocatorId, Offset};
use crate::error::Result;
use crate::registry::AllocatorRegistry;
use crate::topic::locking::RowLock;
use crate::topic::segment::TopicSegment;

/// Deposit a `(allocator_id, offset, length)` descriptor into `domain_col`'s
/// column of the next ring slot. Caller must already hold the segment lock
/// in shared mode.
pub fn publish(
    segment: &TopicSegment,
    registry: &AllocatorRegistry,
    domain_col: usize,
    allocator_id: AllocatorId,
    offset: Offset,
    length: usize,
) -> Result<()> {
    let header = segment.header();
    let len = header.len;
    let sub_count = header.sub_count as u32;
    let num_domains = header.num_domains as usize;

    // fetch_add, then self-correcting wrap CAS — mirrors the source's
    // two-step index advance so a burst of concurrent publishers converges
    // on a valid wrapped index without ever serializing on a single lock.
    let i = header.index.fetch_add(1, Ordering::AcqRel);
    let mut v = i.wrapping_add(1);
    loop {
        let wrapped = v % len;
        match header
            .index
            .compare_exchange_weak(v, wrapped, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => break,
            Err(actual) => v = actual,
        }
    }
    let slot = (i % len) as usize;

    let ref_cell_ptr = segment.ref_cell_ptr(slot);
    // SAFETY: `lock` lives inside the RefCell at this pointer for the
    // segment's lifetime; the guard below ensures no other writer touches
    // this row concurrently.
    let row_lock = RowLock::new(unsafe { &(*ref_cell_ptr).lock });
    let _guard = row_lock.lock();
    let ref_cell = unsafe { &mut *ref_cell_ptr };

    if ref_cell.interest_count > 0 {
        for d in 0..num_domains {
            if ref_cell.availability & (1u32 << d) != 0 {
                let stale = segment.entry(d, slot);
                if let Ok(src_alloc) = registry.get(stale.allocator_id) {
                    src_alloc.deallocate(stale.offset);
                }
            }
        }
        log::warn!("publish: slot {slot} still had {} undrained reader(s); overwriting", ref_cell.interest_count);
    }

    let entry_ptr = segment.entry_ptr(domain_col, slot);
    unsafe {
        (*entry_ptr).allocator_id = allocator_id;
        (*entry_ptr).offset = offset;
        (*entry_ptr).length = length as u64;
    }

    ref_cell.availability = 1u32 << domain_col;
    ref_cell.interest_count = sub_count;

    log::trace!("publish: slot {slot} domain {domain_col} interest {sub_count}");

    Ok(())
}
