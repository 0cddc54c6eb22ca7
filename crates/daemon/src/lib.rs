// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! depot-daemon: the `depotd` process
//!
//! Owns the journal, the dispatcher and the schedule runner, and answers
//! control requests on a Unix socket.

pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use config::{ConfigError, DaemonConfig, Paths, CONFIG_ENV};
pub use lifecycle::{startup, Daemon, DaemonService, LifecycleError};
pub use protocol::{ProtocolError, Request, Response, PROTOCOL_VERSION};
pub use server::{handle_connection, handle_request, ServerContext, ServerError};
