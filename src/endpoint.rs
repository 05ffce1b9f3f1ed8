//! Publisher and subscriber handles (spec.md §6): the consumer-facing API
//! surface built on top of [`crate::topic::Topic`].

use std::sync::Arc;

use crate::allocator::{Allocator, AllocatorId};
use crate::error::Result;
use crate::topic::{Loan, Topic};

/// A registered publisher on one topic, bound to one memory domain via its
/// allocator.
pub struct Publisher {
    topic: Arc<Topic>,
    allocator: Arc<dyn Allocator>,
    allocator_id: AllocatorId,
    column: usize,
}

impl Publisher {
    pub(crate) fn new(topic: Arc<Topic>, allocator: Arc<dyn Allocator>, allocator_id: AllocatorId, column: usize) -> Self {
        Self {
            topic,
            allocator,
            allocator_id,
            column,
        }
    }

    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Copy `payload` into this publisher's allocator and deposit a
    /// reference to it in the topic's next ring slot.
    pub fn publish(&self, payload: &[u8]) -> Result<()> {
        let offset = self.allocator.allocate(payload.len())?;
        self.allocator.copy_to(offset, payload)?;
        self.topic.publish(self.column, self.allocator_id, offset, payload.len())
    }
}

/// A registered subscriber on one topic, bound to one memory domain via its
/// allocator.
pub struct Subscriber {
    topic: Arc<Topic>,
    allocator: Arc<dyn Allocator>,
    column: usize,
    next_index: u32,
    depth: u32,
}

impl Subscriber {
    pub(crate) fn new(topic: Arc<Topic>, allocator: Arc<dyn Allocator>, column: usize, next_index: u32, depth: u32) -> Self {
        Self {
            topic,
            allocator,
            column,
            next_index,
            depth,
        }
    }

    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Fetch the next message, if any, respecting this subscriber's history
    /// depth (stale backlog beyond `depth` is skipped, not replayed).
    pub fn take(&mut self) -> Result<Option<Loan>> {
        let outcome = self.topic.take(self.column, &self.allocator, self.next_index, self.depth)?;
        self.next_index = outcome.next_index;
        Ok(outcome.loan)
    }
}
