// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pixmap sequences replayed into a viewport on the periodic tick.

use nexus_abi::Errno;

use crate::pool::{Handle, Pool, PoolError};

/// Frames per animation.
pub const MAX_ANIM_LEN: usize = 8;

/// One animation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Animation {
    viewport: Handle,
    frames: Vec<Handle>,
    pos: usize,
    enabled: bool,
}

impl Animation {
    /// Target viewport.
    pub fn viewport(&self) -> Handle {
        self.viewport
    }

    /// Frame pixmaps in playback order.
    pub fn frames(&self) -> &[Handle] {
        &self.frames
    }

    /// Returns `true` while the animation is playing.
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// The animation table plus the enabled counter and tick divider.
#[derive(Debug)]
pub struct Animations {
    pool: Pool<Animation>,
    enabled: usize,
    ticks: u32,
    divisor: u32,
}

fn invalid(_: PoolError) -> Errno {
    Errno::InvalidArgument
}

impl Animations {
    /// Creates an empty table; frames advance on every `divisor`-th tick.
    pub fn new(capacity: usize, divisor: u32) -> Self {
        Self { pool: Pool::with_capacity(capacity), enabled: 0, ticks: 0, divisor: divisor.max(1) }
    }

    /// Resolves a wire handle, rejecting anything that is not live.
    pub fn resolve(&self, word: nexus_abi::Sysarg) -> Result<Handle, Errno> {
        self.pool.resolve(word).map_err(invalid)
    }

    /// Looks up a live animation.
    pub fn get(&self, id: Handle) -> Result<&Animation, Errno> {
        self.pool.get(id).map_err(invalid)
    }

    /// Creates a stopped, empty animation targeting `viewport`.
    pub fn create(&mut self, viewport: Handle) -> Result<Handle, Errno> {
        self.pool
            .insert(Animation { viewport, frames: Vec::with_capacity(MAX_ANIM_LEN), pos: 0, enabled: false })
            .map_err(|_| Errno::ResourceLimit)
    }

    /// Drops an animation, stopping it first.
    pub fn remove(&mut self, id: Handle) -> Result<(), Errno> {
        let anim = self.pool.remove(id).map_err(invalid)?;
        if anim.enabled {
            self.enabled -= 1;
        }
        Ok(())
    }

    /// Appends a frame.
    pub fn add_frame(&mut self, id: Handle, pixmap: Handle) -> Result<(), Errno> {
        let anim = self.pool.get_mut(id).map_err(invalid)?;
        if anim.frames.len() == MAX_ANIM_LEN {
            return Err(Errno::ResourceLimit);
        }
        anim.frames.push(pixmap);
        Ok(())
    }

    /// Points the animation at another viewport.
    pub fn retarget(&mut self, id: Handle, viewport: Handle) -> Result<(), Errno> {
        self.pool.get_mut(id).map_err(invalid)?.viewport = viewport;
        Ok(())
    }

    /// Starts playback. Starting a running animation is a no-op.
    pub fn start(&mut self, id: Handle) -> Result<(), Errno> {
        self.set_enabled(id, true)
    }

    /// Stops playback. Stopping a stopped animation is a no-op.
    pub fn stop(&mut self, id: Handle) -> Result<(), Errno> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: Handle, enabled: bool) -> Result<(), Errno> {
        let anim = self.pool.get_mut(id).map_err(invalid)?;
        if anim.enabled != enabled {
            anim.enabled = enabled;
            if enabled {
                self.enabled += 1;
            } else {
                self.enabled -= 1;
            }
        }
        Ok(())
    }

    /// Number of playing animations.
    pub fn enabled_count(&self) -> usize {
        self.enabled
    }

    /// Advances the tick divider. On every `divisor`-th call returns the `(viewport, pixmap)`
    /// frame each playing animation shows next and moves its position on.
    pub fn tick(&mut self) -> Vec<(Handle, Handle)> {
        self.ticks = (self.ticks + 1) % self.divisor;
        if self.ticks != 0 {
            return Vec::new();
        }
        let mut frames = Vec::new();
        for (_, anim) in self.pool.iter_mut() {
            if !anim.enabled || anim.frames.is_empty() {
                continue;
            }
            frames.push((anim.viewport, anim.frames[anim.pos]));
            anim.pos = (anim.pos + 1) % anim.frames.len();
        }
        frames
    }

    /// Drops every animation and resets the counters.
    pub fn clear(&mut self) {
        self.pool.retain(|_, _| false);
        self.enabled = 0;
        self.ticks = 0;
    }
}
