// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity slot tables with generation-checked handles.

use core::fmt;

use nexus_abi::Sysarg;
use thiserror::Error;

/// Errors raised by handle lookups and allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The index is beyond the table capacity.
    #[error("handle out of range")]
    OutOfRange,
    /// The slot is free.
    #[error("slot is free")]
    Vacant,
    /// The slot was freed and reused since the handle was issued.
    #[error("stale handle")]
    Stale,
    /// Every slot is in use.
    #[error("table full")]
    Full,
}

/// Slot index plus the generation it was issued under.
///
/// On the wire a handle is `generation << 16 | index`; a never-reused slot has generation 0,
/// so its word equals its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u16,
    generation: u16,
}

impl Handle {
    /// Slot index.
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when the handle was issued.
    pub const fn generation(self) -> u16 {
        self.generation
    }

    /// Wire encoding.
    pub const fn to_word(self) -> Sysarg {
        ((self.generation as Sysarg) << 16) | self.index as Sysarg
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// A table of at most `capacity` live values.
#[derive(Debug)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Pool<T> {
    /// Creates a table with `capacity` free slots (at most 65536).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(1 << 16);
        Self { slots: (0..capacity).map(|_| Slot { generation: 0, value: None }).collect() }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    /// Returns `true` when no slot is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.value.is_none())
    }

    /// Fails with [`PoolError::Full`] when no slot is free.
    pub fn ensure_vacancy(&self) -> Result<(), PoolError> {
        self.first_free().map(|_| ()).ok_or(PoolError::Full)
    }

    /// Stores `value` in the first free slot.
    pub fn insert(&mut self, value: T) -> Result<Handle, PoolError> {
        let index = self.first_free().ok_or(PoolError::Full)?;
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        Ok(Handle { index: index as u16, generation: slot.generation })
    }

    /// Decodes a wire word and checks that it names a live value.
    pub fn resolve(&self, word: Sysarg) -> Result<Handle, PoolError> {
        let index = word & 0xffff;
        let generation = (word >> 16) as u64;
        if index >= self.slots.len() || generation > u16::MAX as u64 {
            return Err(PoolError::OutOfRange);
        }
        let handle = Handle { index: index as u16, generation: generation as u16 };
        self.check(handle).map(|_| handle)
    }

    fn check(&self, handle: Handle) -> Result<&Slot<T>, PoolError> {
        let slot = self.slots.get(handle.index()).ok_or(PoolError::OutOfRange)?;
        match &slot.value {
            None => Err(PoolError::Vacant),
            Some(_) if slot.generation != handle.generation => Err(PoolError::Stale),
            Some(_) => Ok(slot),
        }
    }

    /// Shared access to a live value.
    pub fn get(&self, handle: Handle) -> Result<&T, PoolError> {
        self.check(handle)?;
        self.slots[handle.index()].value.as_ref().ok_or(PoolError::Vacant)
    }

    /// Exclusive access to a live value.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T, PoolError> {
        self.check(handle)?;
        self.slots[handle.index()].value.as_mut().ok_or(PoolError::Vacant)
    }

    /// Frees the slot and returns its value. The slot's generation advances.
    pub fn remove(&mut self, handle: Handle) -> Result<T, PoolError> {
        self.check(handle)?;
        let slot = &mut self.slots[handle.index()];
        slot.generation = slot.generation.wrapping_add(1);
        slot.value.take().ok_or(PoolError::Vacant)
    }

    /// Frees every live slot for which `keep` returns `false`.
    pub fn retain(&mut self, mut keep: impl FnMut(Handle, &T) -> bool) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(value) = &slot.value else {
                continue;
            };
            if !keep(Handle { index: index as u16, generation: slot.generation }, value) {
                slot.value = None;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    /// Live values with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| (Handle { index: index as u16, generation: slot.generation }, value))
        })
    }

    /// Live values with their handles, in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|value| (Handle { index: index as u16, generation }, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn fresh_slots_encode_as_index() {
        let mut pool = Pool::with_capacity(4);
        let a = pool.insert('a').unwrap();
        let b = pool.insert('b').unwrap();
        assert_eq!(a.to_word(), 0);
        assert_eq!(b.to_word(), 1);
        assert_eq!(pool.resolve(1), Ok(b));
    }

    #[test]
    fn full_pool_and_lookup_errors() {
        let mut pool = Pool::with_capacity(2);
        let a = pool.insert(1).unwrap();
        pool.insert(2).unwrap();
        assert_eq!(pool.insert(3), Err(PoolError::Full));
        assert_eq!(pool.ensure_vacancy(), Err(PoolError::Full));
        assert_eq!(pool.resolve(2), Err(PoolError::OutOfRange));
        assert_eq!(pool.resolve(Sysarg::MAX), Err(PoolError::OutOfRange));
        pool.remove(a).unwrap();
        assert_eq!(pool.resolve(0), Err(PoolError::Vacant));
        let again = pool.insert(4).unwrap();
        assert_eq!(again.index(), 0);
        assert_eq!(again.to_word(), 1 << 16);
        assert_eq!(pool.get(a), Err(PoolError::Stale));
        assert_eq!(pool.resolve(0), Err(PoolError::Stale));
        assert_eq!(pool.get(again), Ok(&4));
    }

    #[test]
    fn retain_frees_and_bumps_generation() {
        let mut pool = Pool::with_capacity(3);
        let keep = pool.insert("keep").unwrap();
        let gone = pool.insert("gone").unwrap();
        pool.retain(|handle, _| handle.index() == 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(keep), Ok(&"keep"));
        assert_eq!(pool.get(gone), Err(PoolError::Vacant));
        assert_eq!(pool.insert("new").unwrap().generation(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert,
        Remove(usize),
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(prop_oneof![Just(Op::Insert), (0usize..16).prop_map(Op::Remove)], 1..64)
    }

    proptest! {
        #[test]
        fn live_handles_map_one_to_one(ops in ops()) {
            let mut pool = Pool::with_capacity(8);
            let mut live: HashMap<usize, (Handle, u32)> = HashMap::new();
            let mut next = 0u32;
            for op in ops {
                match op {
                    Op::Insert => match pool.insert(next) {
                        Ok(handle) => {
                            prop_assert!(!live.contains_key(&handle.index()));
                            live.insert(handle.index(), (handle, next));
                        }
                        Err(err) => {
                            prop_assert_eq!(err, PoolError::Full);
                            prop_assert_eq!(live.len(), 8);
                        }
                    },
                    Op::Remove(nth) => {
                        let victim = live.keys().copied().nth(nth % live.len().max(1));
                        if let Some(index) = victim {
                            let (handle, value) = live.remove(&index).unwrap();
                            prop_assert_eq!(pool.remove(handle), Ok(value));
                            prop_assert!(pool.get(handle).is_err());
                        }
                    }
                }
                next += 1;
                prop_assert_eq!(pool.len(), live.len());
                for (handle, value) in live.values() {
                    prop_assert_eq!(pool.get(*handle), Ok(value));
                    prop_assert_eq!(pool.resolve(handle.to_word()), Ok(*handle));
                }
            }
        }
    }
}
