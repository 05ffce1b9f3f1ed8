//! Explicit context handle.
//!
//! The source this crate is modeled on keeps its allocator hashtable and
//! open-segment list as process-wide globals (`hazcat_init`/`hazcat_fini`),
//! which makes more than one independent middleware instance per process
//! impossible and teardown order implicit. `Context` bundles the same two
//! registries as an owned value instead, so tests (and applications that
//! want more than one domain of topics) can construct and drop as many as
//! they need.

use std::sync::Arc;

use crate::allocator::{Allocator, AllocatorId};
use crate::domain::DomainId;
use crate::endpoint::{Publisher, Subscriber};
use crate::error::Result;
use crate::registry::{AllocatorRegistry, TopicRegistry};

/// Configuration for a single `register_publisher`/`register_subscriber`
/// call.
#[derive(Debug, Clone, Copy)]
pub struct TopicConfig {
    /// Maximum number of backlogged messages this endpoint cares about.
    pub initial_depth: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self { initial_depth: 16 }
    }
}

/// Owns the allocator registry and the set of topics this process has
/// mapped. Replaces the global `hazcat_init`/`hazcat_fini` pair.
pub struct Context {
    allocators: Arc<AllocatorRegistry>,
    topics: TopicRegistry,
}

impl Context {
    /// Build a fresh context with no allocators or topics registered yet.
    pub fn new() -> Self {
        Self {
            allocators: Arc::new(AllocatorRegistry::new()),
            topics: TopicRegistry::new(),
        }
    }

    /// Register an allocator so `publish`/`take` can resolve it by id.
    /// Returns the id it was assigned.
    pub fn register_allocator(&self, allocator: Arc<dyn Allocator>) -> AllocatorId {
        self.allocators.insert(allocator)
    }

    /// Register a publisher on `topic_name`, using `allocator`'s domain
    /// (defaulting to a host [`crate::allocator::RingAllocator`] if none is
    /// supplied the caller should register one first via
    /// [`Self::register_allocator`]).
    pub fn register_publisher(
        &self,
        topic_name: &str,
        allocator: Arc<dyn Allocator>,
        config: TopicConfig,
    ) -> Result<Publisher> {
        let allocator_id = self.allocators.insert(allocator.clone());
        let topic = self
            .topics
            .get_or_create(topic_name, &self.allocators, allocator.domain(), config.initial_depth)?;
        let (column, _) = topic.register_endpoint(allocator.domain(), config.initial_depth, true)?;
        Ok(Publisher::new(topic, allocator, allocator_id, column))
    }

    /// Register a subscriber on `topic_name`. The subscriber's allocator is
    /// registered too, not just the publisher's: a cross-domain take may
    /// materialize a copy into it, and a later subscriber sharing that same
    /// column needs to resolve the allocator id back to look up the copy.
    pub fn register_subscriber(
        &self,
        topic_name: &str,
        allocator: Arc<dyn Allocator>,
        config: TopicConfig,
    ) -> Result<Subscriber> {
        self.allocators.insert(allocator.clone());
        let topic = self
            .topics
            .get_or_create(topic_name, &self.allocators, allocator.domain(), config.initial_depth)?;
        let (column, next_index) = topic.register_endpoint(allocator.domain(), config.initial_depth, false)?;
        Ok(Subscriber::new(
            topic,
            allocator,
            column,
            next_index,
            config.initial_depth as u32,
        ))
    }

    /// Unregister a publisher, destroying the topic's segment if it was the
    /// last endpoint using it.
    pub fn unregister_publisher(&self, publisher: Publisher) -> Result<()> {
        let name = publisher.topic().name().to_string();
        let should_destroy = publisher.topic().unregister_endpoint(true)?;
        drop(publisher);
        if should_destroy {
            self.topics.remove_if_unreferenced(&name)?;
        }
        Ok(())
    }

    /// Unregister a subscriber, destroying the topic's segment if it was
    /// the last endpoint using it.
    pub fn unregister_subscriber(&self, subscriber: Subscriber) -> Result<()> {
        let name = subscriber.topic().name().to_string();
        let should_destroy = subscriber.topic().unregister_endpoint(false)?;
        drop(subscriber);
        if should_destroy {
            self.topics.remove_if_unreferenced(&name)?;
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
