// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Naming service (service manager) and its client helpers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests (registry) + integration tests (tests/naming.rs)
//!
//! PUBLIC API:
//!   - Registry: service tag -> provider port, with generations
//!   - NameServer / spawn(): the naming service loop
//!   - service_register / service_connect / service_connect_blocking: client side
//!   - ns_ping / ns_intro: liveness and task identity
//!
//! Providers register by offering their port (connect-to-me). Clients ask the naming service
//! for a channel (connect-me-to); the request is forwarded to the provider, which answers it
//! directly. Blocking requests for services that are not registered yet are parked and
//! forwarded in arrival order once a provider appears.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod client;
mod registry;
mod server;

pub use client::{ns_intro, ns_ping, service_connect, service_connect_blocking, service_register, NsConnector};
pub use registry::{Generation, Registry, ServiceHandle};
pub use server::{spawn, NameServer, NameServerHandle};

use nexus_abi::Errno;
use nexus_ipc::IpcError;

/// Result alias for service manager operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the service manager.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A service with the provided tag already exists.
    #[error("service already registered")]
    Duplicate,
    /// The requested service does not exist.
    #[error("service not found")]
    NotFound,
    /// A handle refers to an outdated generation after re-registration.
    #[error("stale service handle")]
    StaleHandle,
    /// The caller registered before introducing its task identity.
    #[error("caller has not introduced itself")]
    NotIntroduced,
    /// Tag zero names no service.
    #[error("invalid service tag")]
    InvalidTag,
    /// Transport failure or an unexpected status.
    #[error("ipc: {0}")]
    Ipc(IpcError),
}

impl Error {
    /// Status code used when answering a request that failed with this error.
    pub const fn errno(self) -> Errno {
        match self {
            Self::Duplicate => Errno::AlreadyRegistered,
            Self::NotFound => Errno::ServiceUnavailable,
            Self::StaleHandle => Errno::AddressUnavailable,
            Self::NotIntroduced => Errno::PermissionDenied,
            Self::InvalidTag => Errno::InvalidArgument,
            Self::Ipc(err) => err.errno(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Status(Errno::AlreadyRegistered) => Self::Duplicate,
            IpcError::Status(Errno::ServiceUnavailable) => Self::NotFound,
            IpcError::Status(Errno::PermissionDenied) => Self::NotIntroduced,
            IpcError::Status(Errno::InvalidArgument) => Self::InvalidTag,
            other => Self::Ipc(other),
        }
    }
}
