// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: IPC runtime abstractions for cross-task communication
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module (host)
//!
//! PUBLIC API:
//!   - Call / Answer / CallId: fixed-shape request and answer records
//!   - Port / Answerbox: a task's receive queue and the handle used to reach it
//!   - IncomingCall: one delivered call with its reply route
//!   - Phone / PendingCall: the initiating end of a channel
//!   - Session / Exchange: channel bundles and scoped channel leases
//!   - SharedArea: memory shared alongside a share-out call
//!   - Wait enum: Wait behavior for operations
//!   - IpcError: IPC error types
//!
//! DEPENDENCIES:
//!   - parking_lot: queues, call tables and session pools
//!   - nexus-abi: method tags, status codes, area flags
//!
//! The kernel side of the channel layer (delivery, forwarding, implicit answers on teardown)
//! is emulated in-process so that services run as ordinary threads.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::time::Duration;

use nexus_abi::Errno;
use thiserror::Error;

mod area;
mod call;
mod phone;
mod port;
mod session;

pub use area::SharedArea;
pub use call::{Answer, Call, CallId, CallIdGen};
pub use phone::{connect_me_to, ChannelId, Phone, PendingCall};
pub use port::{answerbox, Answerbox, CallKind, IncomingCall, Port, PortId};
pub use session::{Connector, DirectConnector, Exchange, ExchangeMgmt, Session};

/// Result type returned by IPC operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Errors produced by the IPC runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IpcError {
    /// Operation could not progress without blocking.
    #[error("operation would block")]
    WouldBlock,
    /// The caller exceeded the requested timeout.
    #[error("operation timed out")]
    Timeout,
    /// The opposite endpoint disconnected before the operation completed.
    #[error("peer hung up")]
    Hangup,
    /// An answer referenced a call that is not outstanding on the channel.
    #[error("unknown or stale call id {0}")]
    UnknownCall(CallId),
    /// The peer answered with an error status.
    #[error("peer answered: {0}")]
    Status(Errno),
}

impl IpcError {
    /// Collapses the error into the status code a server would report for it.
    pub const fn errno(self) -> Errno {
        match self {
            Self::WouldBlock => Errno::Busy,
            Self::Timeout => Errno::Timeout,
            Self::Hangup => Errno::Hangup,
            Self::UnknownCall(_) => Errno::InvalidArgument,
            Self::Status(errno) => errno,
        }
    }
}

impl From<Errno> for IpcError {
    fn from(errno: Errno) -> Self {
        Self::Status(errno)
    }
}
