//! domainmq - Heterogeneous zero-copy message queue
//!
//! A topic-backed ring of cross-domain message references: publishers
//! deposit `(allocator, offset, length)` descriptors into a shared-memory
//! segment, and subscribers fetch them back out either as a zero-copy share
//! (their domain already has a copy) or a materialized cross-domain copy
//! that gets cached for the next subscriber in that same domain.

pub mod allocator;
pub mod constants;
pub mod context;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod topic;

pub use allocator::{route_copy, Allocator, AllocatorConfig, AllocatorId, Offset, RingAllocator};
pub use context::{Context, TopicConfig};
pub use domain::{DeviceType, DomainId};
pub use endpoint::{Publisher, Subscriber};
pub use error::{DomainMqError, Result};
pub use topic::{Loan, Topic};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn publisher_and_subscriber_see_the_same_message() {
        let ctx = Context::new();
        let name = format!("/domainmq-lib-test-{}", std::process::id());
        let alloc: Arc<dyn Allocator> = Arc::new(RingAllocator::default_host());

        let publisher = ctx
            .register_publisher(&name, alloc.clone(), TopicConfig::default())
            .unwrap();
        let mut subscriber = ctx
            .register_subscriber(&name, alloc, TopicConfig::default())
            .unwrap();

        publisher.publish(b"domainmq").unwrap();
        let loan = subscriber.take().unwrap().unwrap();
        assert_eq!(unsafe { loan.as_slice() }, b"domainmq");

        ctx.unregister_publisher(publisher).unwrap();
        ctx.unregister_subscriber(subscriber).unwrap();
    }
}
