//! Generational resource arena
//!
//! Work items refer to entities and GPU resources by handle. A handle whose
//! resource was removed never resolves again, so "entity destroyed while work
//! was pending" shows up as a failed lookup instead of a dangling reference.

use crate::error::{EngineError, EngineResult, OptionExt};
use parking_lot::RwLock;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Stable reference to a value in a `ResourceArena<T>`
pub struct ResourceHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceHandle<T> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// Manual impls: derives would require `T: Clone` etc.
impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResourceHandle<T> {}

impl<T> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ResourceHandle<T> {}

impl<T> std::hash::Hash for ResourceHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle({}v{})", self.index, self.generation)
    }
}

impl<T> fmt::Display for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slots with generation counters and a free list
pub struct ResourceArena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> ResourceArena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> ResourceHandle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return ResourceHandle {
                index,
                generation: entry.generation,
                _marker: PhantomData,
            };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        ResourceHandle {
            index,
            generation: 0,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, handle: ResourceHandle<T>) -> Option<&T> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: ResourceHandle<T>) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// Like `get`, but reports a missing resource as an error
    pub fn lookup(&self, handle: ResourceHandle<T>) -> EngineResult<&T> {
        self.get(handle).ok_or_engine(|| not_found::<T>(handle))
    }

    pub fn lookup_mut(&mut self, handle: ResourceHandle<T>) -> EngineResult<&mut T> {
        self.get_mut(handle).ok_or_engine(|| not_found::<T>(handle))
    }

    pub fn contains(&self, handle: ResourceHandle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a value; its handle and all copies of it stop resolving
    pub fn remove(&mut self, handle: ResourceHandle<T>) -> Option<T> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceHandle<T>, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    ResourceHandle {
                        index: i as u32,
                        generation: entry.generation,
                        _marker: PhantomData,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for ResourceArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found<T>(handle: ResourceHandle<T>) -> EngineError {
    EngineError::ResourceNotFound {
        resource_type: std::any::type_name::<T>().to_string(),
        id: handle.to_string(),
    }
}

/// Arena shared between the main thread and work items
pub type SharedArena<T> = Arc<RwLock<ResourceArena<T>>>;

pub fn create_shared_arena<T>() -> SharedArena<T> {
    Arc::new(RwLock::new(ResourceArena::new()))
}
