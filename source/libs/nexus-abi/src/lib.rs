// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI definitions exposed to userland crates
//! OWNERS: @runtime
//! PUBLIC API: Sysarg, Call/answer shape constants, Errno, AreaFlags, structural methods,
//!             naming-service methods, framebuffer methods, ServiceTag
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Structural method tags are below FIRST_USER_METHOD; retval 0 is success and
//!             every error code is negative and stable

use core::fmt;

/// Machine word carried in call arguments and answers.
pub type Sysarg = usize;

/// Number of argument words carried by every call (and result words by every answer).
pub const CALL_ARGS: usize = 5;

/// Method tag carried in a call.
pub type Method = Sysarg;

/// Methods below this value are structural and interpreted by the channel layer.
pub const FIRST_USER_METHOD: Method = 1024;

/// Returns `true` when `method` belongs to the kernel-reserved structural range.
pub const fn is_structural(method: Method) -> bool {
    method < FIRST_USER_METHOD
}

/// Structural methods understood by the channel layer.
pub mod ipc {
    use super::Method;

    /// Ask the receiver to accept a new channel (attachment: the channel).
    ///
    /// ARG1 = service tag, ARG2/ARG3 = provider-specific, ARG4 = flags.
    pub const IPC_M_CONNECT_ME_TO: Method = 1;
    /// Offer a callback port to the receiver (attachment: the port).
    ///
    /// ARG1 = service tag, ARG2/ARG3 = provider-specific.
    pub const IPC_M_CONNECT_TO_ME: Method = 2;
    /// Share a memory area with the receiver (attachment: the area).
    ///
    /// ARG1 = sender-chosen identifier, ARG2 = size in bytes, ARG3 = AreaFlags bits.
    pub const IPC_M_SHARE_OUT: Method = 3;
    /// Synthetic call delivered when the initiating side of a channel closes.
    pub const IPC_M_PHONE_HUNGUP: Method = 4;

    /// Connect flag: park the request until a provider registers.
    pub const IPC_FLAG_BLOCKING: usize = 1 << 0;
}

/// Naming-service methods.
pub mod ns {
    use super::{Method, FIRST_USER_METHOD};

    /// Liveness probe.
    pub const NS_PING: Method = FIRST_USER_METHOD;
    /// Announce the caller's task identity (ARG1 = low 32 bits, ARG2 = high 32 bits).
    pub const NS_ID_INTRO: Method = FIRST_USER_METHOD + 1;
}

/// Framebuffer server methods.
pub mod fb {
    use super::{Method, Sysarg, FIRST_USER_METHOD};

    /// Put a glyph: ARG1 = glyph, ARG2 = row, ARG3 = col.
    pub const FB_PUTCHAR: Method = FIRST_USER_METHOD;
    /// Clear the current viewport.
    pub const FB_CLEAR: Method = FIRST_USER_METHOD + 1;
    /// Move the cursor: ARG1 = row, ARG2 = col.
    pub const FB_CURSOR_GOTO: Method = FIRST_USER_METHOD + 2;
    /// Enable or disable the cursor: ARG1 = bool.
    pub const FB_CURSOR_VISIBILITY: Method = FIRST_USER_METHOD + 3;
    /// Query the text grid: answers (rows, cols).
    pub const FB_GET_CSIZE: Method = FIRST_USER_METHOD + 4;
    /// Scroll the current viewport: ARG1 = signed line count.
    pub const FB_SCROLL: Method = FIRST_USER_METHOD + 5;
    /// Make ARG1 the current viewport.
    pub const FB_VIEWPORT_SWITCH: Method = FIRST_USER_METHOD + 6;
    /// Create a viewport: ARG1 = x << 16 | y, ARG2 = width << 16 | height; answers the id.
    pub const FB_VIEWPORT_CREATE: Method = FIRST_USER_METHOD + 7;
    /// Delete viewport ARG1.
    pub const FB_VIEWPORT_DELETE: Method = FIRST_USER_METHOD + 8;
    /// Set the current viewport style: ARG1 = fg, ARG2 = bg (0xRRGGBB).
    pub const FB_SET_STYLE: Method = FIRST_USER_METHOD + 9;
    /// Query the display resolution: answers (xres, yres).
    pub const FB_GET_RESOLUTION: Method = FIRST_USER_METHOD + 10;
    /// Move the mouse pointer: ARG1 = x, ARG2 = y.
    pub const FB_POINTER_MOVE: Method = FIRST_USER_METHOD + 11;
    /// Announce the identifier of the next shared area: ARG1 = id.
    pub const FB_PREPARE_SHM: Method = FIRST_USER_METHOD + 12;
    /// Unmap the shared area and forget the prepared id.
    pub const FB_DROP_SHM: Method = FIRST_USER_METHOD + 13;
    /// Decode the shared bitmap into a new pixmap; answers the id.
    pub const FB_SHM2PIXMAP: Method = FIRST_USER_METHOD + 14;
    /// Draw the shared bitmap into the current viewport at ARG1 = x, ARG2 = y.
    pub const FB_DRAW_PPM: Method = FIRST_USER_METHOD + 15;
    /// Draw the shared text block into the current viewport.
    pub const FB_DRAW_TEXT_DATA: Method = FIRST_USER_METHOD + 16;
    /// Draw pixmap ARG2 into viewport ARG1.
    pub const FB_VP_DRAW_PIXMAP: Method = FIRST_USER_METHOD + 17;
    /// Snapshot viewport ARG1 into a new pixmap; answers the id.
    pub const FB_VP2PIXMAP: Method = FIRST_USER_METHOD + 18;
    /// Free pixmap ARG1.
    pub const FB_DROP_PIXMAP: Method = FIRST_USER_METHOD + 19;
    /// Create an animation bound to viewport ARG1; answers the id.
    pub const FB_ANIM_CREATE: Method = FIRST_USER_METHOD + 20;
    /// Destroy animation ARG1.
    pub const FB_ANIM_DROP: Method = FIRST_USER_METHOD + 21;
    /// Append pixmap ARG2 to animation ARG1.
    pub const FB_ANIM_ADDPIXMAP: Method = FIRST_USER_METHOD + 22;
    /// Retarget animation ARG1 to viewport ARG2.
    pub const FB_ANIM_CHGVP: Method = FIRST_USER_METHOD + 23;
    /// Start animation ARG1.
    pub const FB_ANIM_START: Method = FIRST_USER_METHOD + 24;
    /// Stop animation ARG1.
    pub const FB_ANIM_STOP: Method = FIRST_USER_METHOD + 25;

    /// Viewport argument meaning "the current viewport".
    pub const CURRENT_VIEWPORT: Sysarg = Sysarg::MAX;

    /// Packs a coordinate pair into one word (`a << 16 | b`).
    pub const fn pack_pair(a: u16, b: u16) -> Sysarg {
        ((a as Sysarg) << 16) | b as Sysarg
    }

    /// Splits a word produced by [`pack_pair`].
    pub const fn unpack_pair(word: Sysarg) -> (u16, u16) {
        (((word >> 16) & 0xffff) as u16, (word & 0xffff) as u16)
    }
}

/// Status codes carried in the retval of an answer.
///
/// Success is retval 0; every variant maps to a stable negative code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Errno {
    /// No such method, entry or service.
    NotFound,
    /// Allocation failed.
    OutOfMemory,
    /// A fixed limit was reached.
    ResourceLimit,
    /// The peer hung up before answering.
    Hangup,
    /// The entry already exists.
    AlreadyRegistered,
    /// The caller lacks the right to perform the request.
    PermissionDenied,
    /// The handle is in range but does not refer to a live entry.
    AddressUnavailable,
    /// The wait deadline expired.
    Timeout,
    /// An argument was rejected.
    InvalidArgument,
    /// A conflicting operation is in progress.
    Busy,
    /// Payload data was malformed.
    InvalidData,
    /// No provider is registered for the requested service.
    ServiceUnavailable,
}

impl Errno {
    /// Every status code, in code order.
    pub const ALL: [Errno; 12] = [
        Errno::NotFound,
        Errno::OutOfMemory,
        Errno::ResourceLimit,
        Errno::Hangup,
        Errno::AlreadyRegistered,
        Errno::PermissionDenied,
        Errno::AddressUnavailable,
        Errno::Timeout,
        Errno::InvalidArgument,
        Errno::Busy,
        Errno::InvalidData,
        Errno::ServiceUnavailable,
    ];

    /// Returns the negative wire code.
    pub const fn code(self) -> isize {
        match self {
            Errno::NotFound => -1,
            Errno::OutOfMemory => -2,
            Errno::ResourceLimit => -3,
            Errno::Hangup => -4,
            Errno::AlreadyRegistered => -5,
            Errno::PermissionDenied => -6,
            Errno::AddressUnavailable => -7,
            Errno::Timeout => -8,
            Errno::InvalidArgument => -9,
            Errno::Busy => -10,
            Errno::InvalidData => -11,
            Errno::ServiceUnavailable => -12,
        }
    }

    /// Decodes a retval. `Ok(())` for 0, `Err(errno)` for a known code, `None` otherwise.
    pub fn from_retval(retval: isize) -> Option<core::result::Result<(), Errno>> {
        if retval == 0 {
            return Some(Ok(()));
        }
        Self::ALL.iter().find(|errno| errno.code() == retval).map(|errno| Err(*errno))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Errno::NotFound => "not found",
            Errno::OutOfMemory => "out of memory",
            Errno::ResourceLimit => "resource limit reached",
            Errno::Hangup => "peer hung up",
            Errno::AlreadyRegistered => "already registered",
            Errno::PermissionDenied => "permission denied",
            Errno::AddressUnavailable => "address unavailable",
            Errno::Timeout => "timed out",
            Errno::InvalidArgument => "invalid argument",
            Errno::Busy => "busy",
            Errno::InvalidData => "invalid data",
            Errno::ServiceUnavailable => "service unavailable",
        };
        f.write_str(text)
    }
}

bitflags::bitflags! {
    /// Access flags requested for a shared memory area.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AreaFlags: u32 {
        /// The receiver may read the area.
        const READ = 1 << 0;
        /// The receiver may write the area.
        const WRITE = 1 << 1;
    }
}

/// Service identity advertised through the naming service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceTag(Sysarg);

impl ServiceTag {
    /// Wraps a raw tag word.
    pub const fn new(raw: Sysarg) -> Self {
        Self(raw)
    }

    /// Derives a stable tag from a symbolic service name (32-bit FNV-1a, never zero).
    pub const fn named(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash: u32 = 0x811c_9dc5;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(0x0100_0193);
            i += 1;
        }
        if hash == 0 {
            hash = 1;
        }
        Self(hash as Sysarg)
    }

    /// Raw word carried in calls.
    pub const fn raw(self) -> Sysarg {
        self.0
    }
}

impl fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc#{:08x}", self.0)
    }
}

/// Task identity announced with [`ns::NS_ID_INTRO`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Splits the id into the (low, high) 32-bit words used on the wire.
    pub const fn to_words(self) -> (Sysarg, Sysarg) {
        ((self.0 & 0xffff_ffff) as Sysarg, (self.0 >> 32) as Sysarg)
    }

    /// Reassembles an id from its (low, high) words.
    pub const fn from_words(low: Sysarg, high: Sysarg) -> Self {
        Self(((high as u64 & 0xffff_ffff) << 32) | (low as u64 & 0xffff_ffff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_codes_are_unique_and_decode() {
        for errno in Errno::ALL {
            assert!(errno.code() < 0);
            assert_eq!(Errno::from_retval(errno.code()), Some(Err(errno)));
        }
        assert_eq!(Errno::from_retval(0), Some(Ok(())));
        assert_eq!(Errno::from_retval(-999), None);
    }

    #[test]
    fn structural_range() {
        assert!(is_structural(ipc::IPC_M_PHONE_HUNGUP));
        assert!(!is_structural(ns::NS_PING));
        assert!(!is_structural(fb::FB_ANIM_STOP));
    }

    #[test]
    fn named_tags_are_stable_and_nonzero() {
        let a = ServiceTag::named("disp1");
        assert_eq!(a, ServiceTag::named("disp1"));
        assert_ne!(a, ServiceTag::named("disp2"));
        assert_ne!(a.raw(), 0);
    }

    #[test]
    fn pair_packing() {
        let word = fb::pack_pair(640, 400);
        assert_eq!(fb::unpack_pair(word), (640, 400));
    }

    #[test]
    fn task_id_words() {
        let id = TaskId(0x1234_5678_9abc_def0);
        let (lo, hi) = id.to_words();
        assert_eq!(TaskId::from_words(lo, hi), id);
    }
}
