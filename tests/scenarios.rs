//! End-to-end coverage of the six scenarios this crate's design is built
//! around, driven entirely through the public `Context`/`Publisher`/
//! `Subscriber` surface against a single in-process `Context`.

use std::path::PathBuf;
use std::sync::Arc;

use domainmq::{
    Allocator, AllocatorConfig, Context, DeviceType, DomainId, RingAllocator, TopicConfig,
};

fn unique_topic(label: &str) -> String {
    format!("/domainmq-scenario-{label}-{}", std::process::id())
}

fn shm_path(topic_name: &str) -> PathBuf {
    let shm_name = domainmq::topic::TopicSegment::shm_name_for(topic_name);
    PathBuf::from("/dev/shm").join(shm_name.trim_start_matches('/'))
}

/// Scenario 1: lone publish-take.
#[test]
fn lone_publish_take() {
    let ctx = Context::new();
    let name = unique_topic("lone-publish-take");

    let publisher = ctx
        .register_publisher(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 3 })
        .unwrap();
    let mut subscriber = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 3 })
        .unwrap();

    publisher.publish(&[1, 2, 3, 4]).unwrap();

    let loan = subscriber.take().unwrap().expect("message should be available");
    assert_eq!(unsafe { loan.as_slice() }, &[1, 2, 3, 4]);

    // Slot was freed on the only interested subscriber's take; nothing left to read.
    assert!(subscriber.take().unwrap().is_none());

    ctx.unregister_publisher(publisher).unwrap();
    ctx.unregister_subscriber(subscriber).unwrap();
}

/// Scenario 2: overflow drops the oldest message once the backlog exceeds
/// the subscriber's depth. The publisher registers with a longer depth than
/// the subscriber so the ring itself has room for all three publishes and
/// the history-skip logic (not slot overwrite) is what drops `m1`.
#[test]
fn overflow_drops_oldest() {
    let ctx = Context::new();
    let name = unique_topic("overflow-drops-oldest");

    let publisher = ctx
        .register_publisher(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 8 })
        .unwrap();
    let mut subscriber = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 2 })
        .unwrap();

    publisher.publish(b"m1").unwrap();
    publisher.publish(b"m2").unwrap();
    publisher.publish(b"m3").unwrap();

    let first = subscriber.take().unwrap().expect("m2 should survive");
    assert_eq!(unsafe { first.as_slice() }, b"m2");

    let second = subscriber.take().unwrap().expect("m3 should survive");
    assert_eq!(unsafe { second.as_slice() }, b"m3");

    assert!(subscriber.take().unwrap().is_none());

    ctx.unregister_publisher(publisher).unwrap();
    ctx.unregister_subscriber(subscriber).unwrap();
}

/// Scenario 3: a subscriber that registers after a backlog already exists
/// starts caught up, ignoring it entirely.
#[test]
fn late_subscriber_ignores_backlog() {
    let ctx = Context::new();
    let name = unique_topic("late-subscriber");

    let publisher = ctx
        .register_publisher(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 8 })
        .unwrap();

    publisher.publish(b"m1").unwrap();
    publisher.publish(b"m2").unwrap();

    let mut subscriber = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 8 })
        .unwrap();

    assert!(subscriber.take().unwrap().is_none(), "late subscriber must not see pre-registration backlog");

    publisher.publish(b"m3").unwrap();
    let loan = subscriber.take().unwrap().expect("m3 should be visible");
    assert_eq!(unsafe { loan.as_slice() }, b"m3");

    ctx.unregister_publisher(publisher).unwrap();
    ctx.unregister_subscriber(subscriber).unwrap();
}

/// Scenario 4: a GPU-column publisher registers first (the segment is
/// created with a non-CPU initial domain, exactly the creation-sizing path
/// that must account for both columns up front). A CPU subscriber
/// materializes a cross-domain copy on its first take; a second CPU
/// subscriber sharing the same allocator then hits the cached copy instead
/// of triggering a second materialization — proven by giving that shared
/// CPU allocator room for only one slot, so a second `allocate()` would fail.
#[test]
fn cross_domain_materialization_is_shared_not_recopied() {
    let ctx = Context::new();
    let name = unique_topic("cross-domain-materialization");

    let gpu_domain = DomainId::new(DeviceType::Cuda, 0);
    let gpu_alloc = Arc::new(RingAllocator::new(gpu_domain, AllocatorConfig { slot_size: 64, slot_count: 1 }));
    let cpu_alloc: Arc<dyn Allocator> =
        Arc::new(RingAllocator::new(DomainId::CPU, AllocatorConfig { slot_size: 64, slot_count: 1 }));

    let publisher = ctx
        .register_publisher(&name, gpu_alloc, TopicConfig { initial_depth: 4 })
        .unwrap();
    let mut sub_b = ctx
        .register_subscriber(&name, cpu_alloc.clone(), TopicConfig { initial_depth: 4 })
        .unwrap();
    let mut sub_c = ctx
        .register_subscriber(&name, cpu_alloc, TopicConfig { initial_depth: 4 })
        .unwrap();

    publisher.publish(b"on-device").unwrap();

    let loan_b = sub_b.take().unwrap().expect("cross-domain copy should materialize");
    assert_eq!(unsafe { loan_b.as_slice() }, b"on-device");

    // If this take tried to allocate a second CPU slot instead of sharing
    // the one `sub_b` just materialized, it would fail: the CPU allocator
    // only has one slot and it's still held.
    let loan_c = sub_c.take().unwrap().expect("second subscriber should hit the cached copy");
    assert_eq!(unsafe { loan_c.as_slice() }, b"on-device");

    ctx.unregister_publisher(publisher).unwrap();
    ctx.unregister_subscriber(sub_b).unwrap();
    ctx.unregister_subscriber(sub_c).unwrap();
}

/// Scenario 5: two subscribers on the same (publisher's) domain both read
/// the same slot via zero-copy share; neither take errors and both see the
/// same bytes. (Releasing the extra share count a `Loan` carries is left to
/// whatever owns the loan, same as upstream — there's no `return_loan` here,
/// so this doesn't assert the allocator slot count afterward.)
#[test]
fn two_subscribers_share_the_same_slot() {
    let ctx = Context::new();
    let name = unique_topic("two-subs-same-slot");

    let publisher = ctx
        .register_publisher(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 3 })
        .unwrap();
    let mut sub1 = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 3 })
        .unwrap();
    let mut sub2 = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 3 })
        .unwrap();

    publisher.publish(b"shared").unwrap();

    let loan1 = sub1.take().unwrap().expect("first subscriber should see the message");
    assert_eq!(unsafe { loan1.as_slice() }, b"shared");

    let loan2 = sub2.take().unwrap().expect("second subscriber should see the same message");
    assert_eq!(unsafe { loan2.as_slice() }, b"shared");

    ctx.unregister_publisher(publisher).unwrap();
    ctx.unregister_subscriber(sub1).unwrap();
    ctx.unregister_subscriber(sub2).unwrap();
}

/// Scenario 6: tearing down the last endpoints unlinks the backing shared
/// memory object, and re-registering under the same name starts a fresh
/// segment (no message from the first life leaks into the second).
#[test]
fn segment_teardown_and_reregister() {
    let ctx = Context::new();
    let name = unique_topic("teardown-and-reregister");
    let path = shm_path(&name);

    let publisher = ctx
        .register_publisher(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 4 })
        .unwrap();
    let mut subscriber = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 4 })
        .unwrap();

    assert!(path.exists(), "segment should exist once an endpoint has registered");

    publisher.publish(b"first-life").unwrap();
    let loan = subscriber.take().unwrap().expect("message should be available");
    assert_eq!(unsafe { loan.as_slice() }, b"first-life");

    ctx.unregister_publisher(publisher).unwrap();
    ctx.unregister_subscriber(subscriber).unwrap();

    assert!(!path.exists(), "segment should be shm_unlink'd once both endpoints are gone");

    let publisher2 = ctx
        .register_publisher(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 4 })
        .unwrap();
    let mut subscriber2 = ctx
        .register_subscriber(&name, Arc::new(RingAllocator::default_host()), TopicConfig { initial_depth: 4 })
        .unwrap();

    assert!(path.exists(), "re-registering should recreate the segment");
    assert!(subscriber2.take().unwrap().is_none(), "fresh segment must not carry over the first life's message");

    ctx.unregister_publisher(publisher2).unwrap();
    ctx.unregister_subscriber(subscriber2).unwrap();
}
