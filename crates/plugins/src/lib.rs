// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Importer and distributor plugin boundary

pub mod distributor;
pub mod importer;
pub mod registry;
pub mod traced;
mod types;

pub use distributor::{Distributor, NoOpDistributor};
pub use importer::{Importer, NoOpImporter};
pub use registry::PluginRegistry;
pub use traced::{TracedDistributor, TracedImporter};
pub use types::{PluginContext, PluginError, UploadRequest};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{
    DistributorCall, FakeDistributor, FakeImporter, FakeScript, ImporterCall, RunWindow,
};
