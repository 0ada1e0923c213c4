// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Framebuffer daemon serving text viewports, pixmaps and animations to one client
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + integration tests (tests/fb_server.rs)
//!
//! PUBLIC API:
//!   - FbServer: screen state and the service loop
//!   - FbClient: typed calls over a session
//!   - FbConfig: TOML configuration
//!   - service_main_loop(): start, register with the naming service, serve
//!
//! The server admits a single client. Calls are answered in arrival order; between calls the
//! loop blinks the cursor and advances animations on a fixed tick.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod animation;
mod client;
pub mod config;
pub mod font;
pub mod pixmap;
pub mod pointer;
pub mod pool;
pub mod ppm;
pub mod screen;
mod server;
pub mod shm;
pub mod viewport;

pub use client::FbClient;
pub use config::{ConfigError, FbConfig};
pub use font::{BuiltinFont, Font};
pub use pool::Handle;
pub use screen::{Rect, Screen, Visual};
pub use server::{service_main_loop, FbHandle, FbServer, ReadyNotifier, ServerError};
