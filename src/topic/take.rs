//! Take path (spec.md §4.4): find the next relevant slot (skipping ahead
//! over a backlog the subscriber has fallen behind on), fetch or
//! materialize a copy of it in the subscriber's preferred domain, and
//! retire the slot once the last interested subscriber has read it.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::allocator::{route_copy, Allocator, Offset};
use crate::error::Result;
use crate::registry::AllocatorRegistry;
use crate::topic::locking::RowLock;
use crate::topic::segment::TopicSegment;

/// A reference to a taken message.
///
/// The ring owns the underlying share, not the caller: there is no
/// `return_loan`/`Drop` release here. The share counted at `allocate`/
/// `share` time is later released by a publisher's drain-on-reuse sweep or
/// by this same take path's free-on-zero sweep, never by the `Loan` itself.
pub struct Loan {
    allocator: Arc<dyn Allocator>,
    offset: Offset,
    length: usize,
}

impl Loan {
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Borrow the payload directly out of the allocator's region.
    ///
    /// # Safety
    /// The slice is valid only as long as this `Loan` is alive and no
    /// concurrent writer holds the row this message came from.
    pub unsafe fn as_slice(&self) -> &[u8] {
        let ptr = self.allocator.ptr_from_offset(self.offset);
        std::slice::from_raw_parts(ptr, self.length)
    }
}

/// Result of a take attempt: the loan (if a message was available) and the
/// subscriber's updated `next_index` cursor.
pub struct TakeOutcome {
    pub loan: Option<Loan>,
    pub next_index: u32,
}

/// Fetch the next message visible to `subscriber_col`, or `None` if the
/// subscriber is caught up. Caller must already hold the segment lock in
/// shared mode.
pub fn take(
    segment: &TopicSegment,
    registry: &AllocatorRegistry,
    subscriber_col: usize,
    subscriber_alloc: &Arc<dyn Allocator>,
    next_index: u32,
    depth: u32,
) -> Result<TakeOutcome> {
    let header = segment.header();
    let len = header.len;
    let current_index = header.index.load(Ordering::Acquire);

    // Lag/depth jump: if we've fallen further behind than `depth` allows,
    // skip straight to the oldest slot still within the history window
    // instead of replaying everything we missed.
    let lag = (current_index + len - next_index) % len;
    let i = if lag > depth {
        (current_index + len - depth) % len
    } else {
        next_index
    };

    if i == current_index {
        return Ok(TakeOutcome { loan: None, next_index: i });
    }

    let slot = i as usize;
    let ref_cell_ptr = segment.ref_cell_ptr(slot);
    // SAFETY: guard below serializes all row mutation through the spinlock.
    let row_lock = RowLock::new(unsafe { &(*ref_cell_ptr).lock });
    let _guard = row_lock.lock();
    let ref_cell = unsafe { &mut *ref_cell_ptr };
    let num_domains = header.num_domains as usize;

    let loan = if ref_cell.availability & (1u32 << subscriber_col) != 0 {
        // Hit: the subscriber's own domain already has a copy. Zero-copy —
        // just bump the share count.
        let entry = segment.entry(subscriber_col, slot);
        let src_alloc = registry.get(entry.allocator_id)?;
        src_alloc.share(entry.offset);
        Loan {
            allocator: src_alloc,
            offset: entry.offset,
            length: entry.length as usize,
        }
    } else {
        // Miss: copy from the first domain that has it into the
        // subscriber's domain, caching the result for later takers.
        let source_domain = (0..num_domains)
            .find(|&d| ref_cell.availability & (1u32 << d) != 0)
            .expect("a published slot always has at least one available domain");

        let src_entry = segment.entry(source_domain, slot);
        let src_alloc = registry.get(src_entry.allocator_id)?;
        let length = src_entry.length as usize;
        let src_offset = src_entry.offset;

        let dst_offset = subscriber_alloc.allocate(length)?;
        route_copy(subscriber_alloc.as_ref(), dst_offset, src_alloc.as_ref(), src_offset, length)?;

        let dst_entry_ptr = segment.entry_ptr(subscriber_col, slot);
        unsafe {
            (*dst_entry_ptr).allocator_id = subscriber_alloc.id();
            (*dst_entry_ptr).offset = dst_offset;
            (*dst_entry_ptr).length = length as u64;
        }
        ref_cell.availability |= 1u32 << subscriber_col;

        log::warn!("take: materialized cross-domain copy for slot {slot} into column {subscriber_col}");

        Loan {
            allocator: subscriber_alloc.clone(),
            offset: dst_offset,
            length,
        }
    };

    // One ring copy per message: once the last interested subscriber has
    // read it, every domain's copy is freed.
    if ref_cell.interest_count > 0 {
        ref_cell.interest_count -= 1;
    }
    if ref_cell.interest_count == 0 {
        for d in 0..num_domains {
            if ref_cell.availability & (1u32 << d) != 0 {
                let entry = segment.entry(d, slot);
                if let Ok(alloc) = registry.get(entry.allocator_id) {
                    alloc.deallocate(entry.offset);
                }
            }
        }
    }

    Ok(TakeOutcome {
        loan: Some(loan),
        next_index: (i + 1) % len,
    })
}
