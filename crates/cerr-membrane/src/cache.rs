//! Open-addressing table of live allocation addresses.
//!
//! Slots are indexed by the low bits of the address (`addr & (capacity - 1)`),
//! collisions are resolved with linear probing and wraparound. Removal uses
//! backward-shift deletion: after a slot is cleared, every later entry of the
//! same cluster that could sit closer to its home slot is moved into the
//! hole, so no tombstones are ever needed and every remaining entry stays
//! reachable from its home slot.

use std::num::NonZeroUsize;

use thiserror::Error;

use crate::config::{CacheConfig, GrowthPolicy};

/// Cache failures. None of these are recoverable for the tracked allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache full ({capacity} slots), cannot track {addr:#x}")]
    Full { capacity: usize, addr: usize },
    #[error("cache capacity overflow growing past {capacity} slots")]
    CapacityOverflow { capacity: usize },
    #[error("failed to allocate {capacity} cache slots")]
    GrowthFailed { capacity: usize },
    #[error("address {addr:#x} is already tracked")]
    AlreadyTracked { addr: usize },
    #[error("null address cannot be tracked")]
    NullAddress,
}

enum Probe {
    Found(usize),
    Vacant(usize),
    Exhausted,
}

/// Power-of-two open-addressing set of addresses.
pub struct AllocationCache {
    slots: Box<[Option<NonZeroUsize>]>,
    len: usize,
    growth: GrowthPolicy,
    grows: u64,
}

impl std::fmt::Debug for AllocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationCache")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("growth", &self.growth)
            .finish()
    }
}

impl Default for AllocationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl AllocationCache {
    /// Creates an empty cache shaped by `config`.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: vec![None; config.capacity()].into_boxed_slice(),
            len: 0,
            growth: config.growth(),
            grows: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn growth(&self) -> GrowthPolicy {
        self.growth
    }

    /// Number of times the table has doubled.
    #[must_use]
    pub fn grows(&self) -> u64 {
        self.grows
    }

    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.capacity() as f64
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn probe(&self, addr: NonZeroUsize) -> Probe {
        let mask = self.mask();
        let mut idx = addr.get() & mask;
        for _ in 0..self.slots.len() {
            match self.slots[idx] {
                None => return Probe::Vacant(idx),
                Some(stored) if stored == addr => return Probe::Found(idx),
                Some(_) => idx = (idx + 1) & mask,
            }
        }
        Probe::Exhausted
    }

    // Keep the load factor at or below 3/4 after the next insert.
    fn needs_growth(&self) -> bool {
        (self.len + 1).saturating_mul(4) > self.capacity().saturating_mul(3)
    }

    /// Doubles the capacity and rehashes every entry into the new table.
    pub fn grow(&mut self) -> Result<(), CacheError> {
        let capacity = self.capacity();
        let new_capacity = capacity
            .checked_mul(2)
            .ok_or(CacheError::CapacityOverflow { capacity })?;

        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(new_capacity)
            .map_err(|_| CacheError::GrowthFailed {
                capacity: new_capacity,
            })?;
        fresh.resize(new_capacity, None);
        let mut fresh = fresh.into_boxed_slice();

        let mask = new_capacity - 1;
        for addr in self.slots.iter().flatten() {
            let mut idx = addr.get() & mask;
            while fresh[idx].is_some() {
                idx = (idx + 1) & mask;
            }
            fresh[idx] = Some(*addr);
        }
        self.slots = fresh;
        self.grows += 1;
        Ok(())
    }

    /// Inserts a non-null address and returns its slot index.
    ///
    /// A dynamic cache grows before the load factor would pass 3/4; a fixed
    /// cache only fails once every slot is occupied.
    pub fn track(&mut self, addr: usize) -> Result<usize, CacheError> {
        let addr = NonZeroUsize::new(addr).ok_or(CacheError::NullAddress)?;
        if self.growth == GrowthPolicy::Dynamic && self.needs_growth() {
            self.grow()?;
        }
        match self.probe(addr) {
            Probe::Found(_) => Err(CacheError::AlreadyTracked { addr: addr.get() }),
            Probe::Vacant(idx) => {
                self.slots[idx] = Some(addr);
                self.len += 1;
                Ok(idx)
            }
            Probe::Exhausted => Err(CacheError::Full {
                capacity: self.capacity(),
                addr: addr.get(),
            }),
        }
    }

    /// Removes `addr`, returning whether it was present.
    pub fn untrack(&mut self, addr: usize) -> bool {
        let Some(addr) = NonZeroUsize::new(addr) else {
            return false;
        };
        let Probe::Found(mut hole) = self.probe(addr) else {
            return false;
        };
        self.slots[hole] = None;
        self.len -= 1;

        // Backward shift: pull later cluster members into the hole whenever
        // the hole lies on their probe path.
        let mask = self.mask();
        let mut idx = hole;
        loop {
            idx = (idx + 1) & mask;
            let Some(entry) = self.slots[idx] else {
                break;
            };
            let home = entry.get() & mask;
            if idx.wrapping_sub(home) & mask >= idx.wrapping_sub(hole) & mask {
                self.slots[hole] = Some(entry);
                self.slots[idx] = None;
                hole = idx;
            }
        }
        true
    }

    /// Slot index holding `addr`.
    #[must_use]
    pub fn find(&self, addr: usize) -> Option<usize> {
        let addr = NonZeroUsize::new(addr)?;
        match self.probe(addr) {
            Probe::Found(idx) => Some(idx),
            Probe::Vacant(_) | Probe::Exhausted => None,
        }
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.find(addr).is_some()
    }

    /// Address stored at `index`, if the slot is occupied.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<usize> {
        self.slots.get(index).copied().flatten().map(NonZeroUsize::get)
    }

    /// Live addresses in slot order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().flatten().map(|addr| addr.get())
    }

    /// Hands every tracked address to `release`, empties the table and
    /// returns how many entries were released. Capacity is kept.
    pub fn clear<F>(&mut self, mut release: F) -> usize
    where
        F: FnMut(usize),
    {
        let released = self.len;
        for slot in self.slots.iter_mut() {
            if let Some(addr) = slot.take() {
                release(addr.get());
            }
        }
        self.len = 0;
        released
    }
}
