//! Active stream table
//!
//! Client stream ids are odd and handed out in increasing order, so
//! `(id >> 1) & (slots - 1)` spreads live streams over a fixed array of
//! slots with almost no collisions. When two live ids do land on the same
//! slot (for 4096 slots, ids 1 and 8193), the later one goes to a spillover
//! map and both stay independently reachable.

use super::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of direct slots
pub const DEFAULT_REGISTRY_SLOTS: usize = 4096;

type Slot<E> = Option<(u32, Arc<E>)>;

/// Concurrent map from stream id to its exchange
#[derive(Debug)]
pub struct StreamRegistry<E> {
    slots: Box<[Mutex<Slot<E>>]>,
    mask: u32,
    spillover: Mutex<HashMap<u32, Arc<E>>>,
    len: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E> StreamRegistry<E> {
    /// Create a registry with [`DEFAULT_REGISTRY_SLOTS`] slots
    pub fn new() -> Self {
        Self::build(DEFAULT_REGISTRY_SLOTS)
    }

    /// Create a registry with `slots` direct slots; must be a power of two
    pub fn with_slots(slots: usize) -> Result<Self> {
        if slots == 0 || !slots.is_power_of_two() || slots > (1 << 30) {
            return Err(Error::InvalidArgument(format!(
                "registry slot count {} must be a power of two",
                slots
            )));
        }
        Ok(Self::build(slots))
    }

    fn build(slots: usize) -> Self {
        StreamRegistry {
            slots: (0..slots).map(|_| Mutex::new(None)).collect(),
            mask: (slots - 1) as u32,
            spillover: Mutex::new(HashMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Slot index for a stream id
    pub fn slot_index(&self, stream_id: u32) -> usize {
        ((stream_id >> 1) & self.mask) as usize
    }

    /// Number of registered streams
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether no stream is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `exchange` under `stream_id`, replacing any previous entry
    pub fn put(&self, stream_id: u32, exchange: Arc<E>) {
        let mut slot = lock(&self.slots[self.slot_index(stream_id)]);
        match slot.as_ref().map(|(id, _)| *id) {
            None => {
                *slot = Some((stream_id, exchange));
                self.len.fetch_add(1, Ordering::AcqRel);
            }
            Some(id) if id == stream_id => *slot = Some((stream_id, exchange)),
            Some(_) => {
                drop(slot);
                if lock(&self.spillover).insert(stream_id, exchange).is_none() {
                    self.len.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }

    /// Look up a stream
    pub fn get(&self, stream_id: u32) -> Option<Arc<E>> {
        {
            let slot = lock(&self.slots[self.slot_index(stream_id)]);
            if let Some((id, exchange)) = slot.as_ref() {
                if *id == stream_id {
                    return Some(Arc::clone(exchange));
                }
            }
        }
        lock(&self.spillover).get(&stream_id).cloned()
    }

    /// Unregister a stream; `true` if it was present
    pub fn remove(&self, stream_id: u32) -> bool {
        let removed = {
            let mut slot = lock(&self.slots[self.slot_index(stream_id)]);
            if matches!(slot.as_ref(), Some((id, _)) if *id == stream_id) {
                slot.take().is_some()
            } else {
                false
            }
        } || lock(&self.spillover).remove(&stream_id).is_some();

        if removed {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    fn snapshot(&self, mut keep: impl FnMut(u32) -> bool) -> Vec<Arc<E>> {
        let mut entries = Vec::with_capacity(self.len());
        for slot in self.slots.iter() {
            if let Some((id, exchange)) = lock(slot).as_ref() {
                if keep(*id) {
                    entries.push(Arc::clone(exchange));
                }
            }
        }
        entries.extend(
            lock(&self.spillover)
                .iter()
                .filter(|(id, _)| keep(**id))
                .map(|(_, exchange)| Arc::clone(exchange)),
        );
        entries
    }

    /// Call `f(exchange, context)` for every registered stream
    ///
    /// Iteration runs over a snapshot, so `f` may itself touch the registry.
    pub fn for_each<C: ?Sized>(&self, context: &C, mut f: impl FnMut(&Arc<E>, &C)) {
        for exchange in self.snapshot(|_| true) {
            f(&exchange, context);
        }
    }

    /// Call `consumer` for every stream whose id satisfies `predicate`
    pub fn for_each_matching(
        &self,
        predicate: impl Fn(u32) -> bool,
        mut consumer: impl FnMut(&Arc<E>),
    ) {
        for exchange in self.snapshot(predicate) {
            consumer(&exchange);
        }
    }

    /// Remove every entry and hand each to `consumer` exactly once
    ///
    /// Entries are taken out under their slot lock, so a concurrent `get`
    /// never observes an entry after it has been drained.
    pub fn clear_and_close(&self, mut consumer: impl FnMut(Arc<E>)) {
        let mut drained = Vec::with_capacity(self.len());
        for slot in self.slots.iter() {
            if let Some((_, exchange)) = lock(slot).take() {
                drained.push(exchange);
            }
        }
        drained.extend(lock(&self.spillover).drain().map(|(_, exchange)| exchange));
        self.len.fetch_sub(drained.len(), Ordering::AcqRel);

        for exchange in drained {
            consumer(exchange);
        }
    }
}

impl<E> Default for StreamRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
