// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory areas shared between tasks.

use std::sync::Arc;

use nexus_abi::AreaFlags;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A byte area visible to every task holding a mapping.
///
/// Cloning a `SharedArea` maps the same backing memory again; the area is released when the
/// last mapping drops.
#[derive(Clone, Debug)]
pub struct SharedArea {
    bytes: Arc<RwLock<Vec<u8>>>,
    flags: AreaFlags,
}

impl SharedArea {
    /// Allocates a zeroed area of `len` bytes.
    pub fn new(len: usize, flags: AreaFlags) -> Self {
        Self::from_bytes(vec![0; len], flags)
    }

    /// Wraps existing contents.
    pub fn from_bytes(bytes: Vec<u8>, flags: AreaFlags) -> Self {
        Self { bytes: Arc::new(RwLock::new(bytes)), flags }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Returns `true` for a zero-sized area.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access flags the area was offered with.
    pub fn flags(&self) -> AreaFlags {
        self.flags
    }

    /// Returns a mapping of the same memory restricted to `flags`.
    pub fn restricted(&self, flags: AreaFlags) -> Self {
        Self { bytes: Arc::clone(&self.bytes), flags: self.flags & flags }
    }

    /// Shared view of the contents.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read()
    }

    /// Exclusive view of the contents.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes.write()
    }

    /// Returns `true` when both values map the same memory.
    pub fn same_area(&self, other: &SharedArea) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Number of live mappings of the backing memory.
    pub fn mappings(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_share_memory() {
        let area = SharedArea::new(4, AreaFlags::READ | AreaFlags::WRITE);
        let view = area.restricted(AreaFlags::READ);
        area.write()[2] = 9;
        assert_eq!(view.read()[2], 9);
        assert_eq!(view.flags(), AreaFlags::READ);
        assert!(view.same_area(&area));
        assert_eq!(area.mappings(), 2);
        drop(view);
        assert_eq!(area.mappings(), 1);
    }
}
