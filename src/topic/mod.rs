//! A topic: one shared-memory segment plus the publish/take operations
//! defined over it.

mod header;
mod locking;
mod publish;
mod segment;
mod take;

pub use header::{Entry, RefCell, TopicHeader};
pub use locking::{RowLock, SegmentLock};
pub use segment::TopicSegment;
pub use take::{Loan, TakeOutcome};

use locking::SegmentLockGuard;

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use crate::allocator::{Allocator, AllocatorId, Offset};
use crate::constants::MAX_ENDPOINT_COUNT;
use crate::domain::DomainId;
use crate::error::{DomainMqError, Result};
use crate::registry::AllocatorRegistry;

/// One topic: a named ring of cross-domain message references plus the
/// locking that lets many publishers and subscribers share it safely.
pub struct Topic {
    name: String,
    segment: RwLock<TopicSegment>,
    allocators: Arc<AllocatorRegistry>,
}

impl Topic {
    pub fn open_or_create(
        name: &str,
        allocators: Arc<AllocatorRegistry>,
        initial_domain: DomainId,
        initial_depth: usize,
    ) -> Result<Self> {
        let segment = TopicSegment::create_or_open(name, initial_domain, initial_depth)?;
        Ok(Self {
            name: name.to_string(),
            segment: RwLock::new(segment),
            allocators,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an endpoint's domain with the topic, growing it if needed,
    /// and bump `pub_count`/`sub_count`. Returns the endpoint's domain
    /// column and the ring's current index (the subscriber's starting
    /// `next_index`, ignoring any pre-existing backlog).
    pub fn register_endpoint(&self, domain: DomainId, depth: usize, is_publisher: bool) -> Result<(usize, u32)> {
        let mut segment = self.segment.write().unwrap();
        let seg_lock = segment.lock();
        let _guard = SegmentLockGuard::exclusive(&seg_lock)?;

        let outcome = (|| -> Result<(usize, u32)> {
            let column = segment.bind_domain(domain, depth)?;

            let header = segment.header_mut();
            if is_publisher {
                if header.pub_count >= MAX_ENDPOINT_COUNT {
                    return Err(DomainMqError::EndpointCountExceeded { max: MAX_ENDPOINT_COUNT });
                }
                header.pub_count += 1;
            } else if header.sub_count >= MAX_ENDPOINT_COUNT {
                return Err(DomainMqError::EndpointCountExceeded { max: MAX_ENDPOINT_COUNT });
            } else {
                header.sub_count += 1;
            }

            let next_index = segment.header().index.load(Ordering::Acquire);
            Ok((column, next_index))
        })();

        log::debug!(
            "register_endpoint: topic={} publisher={is_publisher} depth={depth} -> {:?}",
            self.name,
            outcome.as_ref().map(|(c, idx)| (*c, *idx))
        );
        outcome
    }

    /// Decrement the relevant endpoint count. Returns `true` if both counts
    /// have reached zero and the segment should now be destroyed.
    pub fn unregister_endpoint(&self, is_publisher: bool) -> Result<bool> {
        let mut segment = self.segment.write().unwrap();
        let seg_lock = segment.lock();
        let _guard = SegmentLockGuard::exclusive(&seg_lock)?;

        let header = segment.header_mut();
        if is_publisher {
            if header.pub_count == 0 {
                return Err(DomainMqError::NotRegistered);
            }
            header.pub_count -= 1;
        } else {
            if header.sub_count == 0 {
                return Err(DomainMqError::NotRegistered);
            }
            header.sub_count -= 1;
        }
        Ok(header.pub_count == 0 && header.sub_count == 0)
    }

    /// Publish `length` bytes, already deposited at `offset` in
    /// `allocator_id`'s region, into `domain_col`'s column.
    pub fn publish(&self, domain_col: usize, allocator_id: AllocatorId, offset: Offset, length: usize) -> Result<()> {
        let segment = self.segment.read().unwrap();
        let seg_lock = segment.lock();
        let _guard = SegmentLockGuard::shared(&seg_lock)?;
        publish::publish(&segment, &self.allocators, domain_col, allocator_id, offset, length)
    }

    /// Fetch the next message visible to `subscriber_col`, if any.
    pub fn take(
        &self,
        subscriber_col: usize,
        subscriber_alloc: &Arc<dyn Allocator>,
        next_index: u32,
        depth: u32,
    ) -> Result<TakeOutcome> {
        let segment = self.segment.read().unwrap();
        let seg_lock = segment.lock();
        let _guard = SegmentLockGuard::shared(&seg_lock)?;
        take::take(&segment, &self.allocators, subscriber_col, subscriber_alloc, next_index, depth)
    }

    /// Consume the topic, unmapping and `shm_unlink`ing its segment. Only
    /// valid once `pub_count == 0 && sub_count == 0`.
    pub fn destroy(self) -> Result<()> {
        let segment = self.segment.into_inner().unwrap();
        segment.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::RingAllocator;

    fn unique_topic(label: &str) -> String {
        format!("/domainmq-topic-test-{label}-{}", std::process::id())
    }

    #[test]
    fn publish_then_take_same_domain_is_a_hit() {
        let name = unique_topic("hit");
        let allocators = Arc::new(AllocatorRegistry::new());
        let alloc: Arc<dyn Allocator> = Arc::new(RingAllocator::default_host());
        let alloc_id = allocators.insert(alloc.clone());

        let topic = Topic::open_or_create(&name, allocators, DomainId::CPU, 4).unwrap();
        let (pub_col, _) = topic.register_endpoint(DomainId::CPU, 4, true).unwrap();
        let (sub_col, next_index) = topic.register_endpoint(DomainId::CPU, 4, false).unwrap();
        assert_eq!(pub_col, sub_col);

        let offset = alloc.allocate(5).unwrap();
        alloc.copy_to(offset, b"hello").unwrap();
        topic.publish(pub_col, alloc_id, offset, 5).unwrap();

        let outcome = topic.take(sub_col, &alloc, next_index, 4).unwrap();
        let loan = outcome.loan.expect("message should be available");
        assert_eq!(loan.length(), 5);
        let bytes = unsafe { loan.as_slice() };
        assert_eq!(bytes, b"hello");

        assert!(topic.unregister_endpoint(true).unwrap() == false);
        assert!(topic.unregister_endpoint(false).unwrap());
        topic.destroy().unwrap();
    }

    #[test]
    fn take_on_empty_topic_returns_none() {
        let name = unique_topic("empty");
        let allocators = Arc::new(AllocatorRegistry::new());
        let alloc: Arc<dyn Allocator> = Arc::new(RingAllocator::default_host());

        let topic = Topic::open_or_create(&name, allocators, DomainId::CPU, 4).unwrap();
        let (sub_col, next_index) = topic.register_endpoint(DomainId::CPU, 4, false).unwrap();

        let outcome = topic.take(sub_col, &alloc, next_index, 4).unwrap();
        assert!(outcome.loan.is_none());

        topic.unregister_endpoint(false).unwrap();
        topic.destroy().unwrap();
    }
}
