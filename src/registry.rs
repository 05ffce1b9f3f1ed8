//! Process-local lookup tables: allocator ids and topic handles to their
//! live Rust objects. A topic's `Entry` rows only ever store
//! `(allocator_id, offset, length)` triples, so any process touching a
//! payload must resolve `allocator_id` back to a concrete [`Allocator`]
//! through one of these before it can read or write it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::allocator::{Allocator, AllocatorId};
use crate::domain::DomainId;
use crate::error::{DomainMqError, Result};
use crate::topic::Topic;

/// Maps allocator ids to the allocator instances registered in this
/// process. An id is only ever meaningful within the process that
/// registered it — it is not shared cross-process the way a topic segment
/// name is.
#[derive(Default)]
pub struct AllocatorRegistry {
    allocators: RwLock<HashMap<AllocatorId, Arc<dyn Allocator>>>,
}

impl AllocatorRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an allocator, returning the id it was assigned.
    pub fn insert(&self, allocator: Arc<dyn Allocator>) -> AllocatorId {
        let id = allocator.id();
        self.allocators.write().unwrap().insert(id, allocator);
        id
    }

    /// Look up a previously-registered allocator.
    pub fn get(&self, id: AllocatorId) -> Result<Arc<dyn Allocator>> {
        self.allocators
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(DomainMqError::AllocatorNotRegistered(id))
    }

    /// Drop an allocator from the registry. No-op if `id` is unknown.
    pub fn remove(&self, id: AllocatorId) {
        self.allocators.write().unwrap().remove(&id);
    }

    /// Number of allocators currently registered.
    pub fn len(&self) -> usize {
        self.allocators.read().unwrap().len()
    }

    /// Whether the registry holds no allocators.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps topic names to the open [`Topic`] handle backing them, so that
/// registering a second publisher or subscriber for the same name in this
/// process reuses the existing mapped segment instead of reopening it.
#[derive(Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the topic named `name`, opening (and creating, if this is the
    /// first endpoint anywhere) its segment if this process hasn't mapped
    /// it yet.
    pub fn get_or_create(
        &self,
        name: &str,
        allocators: &Arc<AllocatorRegistry>,
        initial_domain: DomainId,
        initial_depth: usize,
    ) -> Result<Arc<Topic>> {
        if let Some(topic) = self.topics.read().unwrap().get(name) {
            return Ok(topic.clone());
        }

        let mut topics = self.topics.write().unwrap();
        // Re-check: another thread may have inserted while we didn't hold
        // the write lock.
        if let Some(topic) = topics.get(name) {
            return Ok(topic.clone());
        }

        let topic = Arc::new(Topic::open_or_create(name, allocators.clone(), initial_domain, initial_depth)?);
        topics.insert(name.to_string(), topic.clone());
        Ok(topic)
    }

    /// Drop this process's handle to `name`'s topic. If the removed handle
    /// was the last reference (no `Publisher`/`Subscriber` still holds an
    /// `Arc` to it), the segment is destroyed.
    pub fn remove_if_unreferenced(&self, name: &str) -> Result<()> {
        let topic = self.topics.write().unwrap().remove(name);
        if let Some(topic) = topic {
            match Arc::try_unwrap(topic) {
                Ok(topic) => topic.destroy(),
                Err(topic) => {
                    // Still referenced elsewhere; put it back.
                    self.topics.write().unwrap().insert(name.to_string(), topic);
                    Ok(())
                }
            }
        } else {
            Ok(())
        }
    }
}
