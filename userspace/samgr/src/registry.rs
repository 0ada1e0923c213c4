// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory service table.

use std::collections::HashMap;

use nexus_abi::ServiceTag;
use nexus_ipc::{ChannelId, Port};
use parking_lot::Mutex;

use crate::{Error, Result};

/// Unique generation identifier assigned to each service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    const fn first() -> Self {
        Self(1)
    }

    /// Returns the next monotonically increasing generation value.
    fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Exposes the raw numeric value primarily for testing.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Handle returned by registration and resolution requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Service identity.
    pub tag: ServiceTag,
    /// Monotonic generation associated with the instance.
    pub generation: Generation,
}

struct ServiceRecord {
    port: Port,
    owner: ChannelId,
    generation: Generation,
}

#[derive(Default)]
struct Tables {
    services: HashMap<ServiceTag, ServiceRecord>,
    last_generation: HashMap<ServiceTag, Generation>,
}

/// Service tag to provider port mapping.
#[derive(Default)]
pub struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `port` as the provider of `tag` on behalf of the channel `owner`.
    ///
    /// A tag registered again after its provider went away gets a newer generation.
    pub fn register(&self, tag: ServiceTag, port: Port, owner: ChannelId) -> Result<ServiceHandle> {
        if tag.raw() == 0 {
            return Err(Error::InvalidTag);
        }
        let mut tables = self.tables.lock();
        if tables.services.contains_key(&tag) {
            return Err(Error::Duplicate);
        }
        let generation = tables.last_generation.get(&tag).map_or(Generation::first(), |last| last.next());
        tables.last_generation.insert(tag, generation);
        tables.services.insert(tag, ServiceRecord { port, owner, generation });
        Ok(ServiceHandle { tag, generation })
    }

    /// Resolves the provider port for `tag`.
    pub fn resolve(&self, tag: ServiceTag) -> Result<(ServiceHandle, Port)> {
        let tables = self.tables.lock();
        let record = tables.services.get(&tag).ok_or(Error::NotFound)?;
        Ok((ServiceHandle { tag, generation: record.generation }, record.port.clone()))
    }

    /// Verifies that `handle` still names the current registration.
    pub fn validate(&self, handle: &ServiceHandle) -> Result<()> {
        let tables = self.tables.lock();
        let record = tables.services.get(&handle.tag).ok_or(Error::NotFound)?;
        if record.generation != handle.generation {
            return Err(Error::StaleHandle);
        }
        Ok(())
    }

    /// Removes the registration of `tag`.
    pub fn unregister(&self, tag: ServiceTag) -> Result<ServiceHandle> {
        let mut tables = self.tables.lock();
        let record = tables.services.remove(&tag).ok_or(Error::NotFound)?;
        Ok(ServiceHandle { tag, generation: record.generation })
    }

    /// Removes every registration made over `owner`, returning the affected tags.
    pub fn unregister_owner(&self, owner: ChannelId) -> Vec<ServiceTag> {
        let mut tables = self.tables.lock();
        let mut removed: Vec<ServiceTag> =
            tables.services.iter().filter(|(_, record)| record.owner == owner).map(|(tag, _)| *tag).collect();
        removed.sort();
        for tag in &removed {
            tables.services.remove(tag);
        }
        removed
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.tables.lock().services.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
