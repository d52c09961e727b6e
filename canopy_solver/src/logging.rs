// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscriber setup for binaries, demos and tests.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, SolverError};

/// Filter from `RUST_LOG`, falling back to `default_directive`.
pub fn build_filter(default_directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|err| SolverError::Logging(format!("bad filter {default_directive:?}: {err}")))
}

/// Install a global fmt subscriber.
///
/// Fails if the directive does not parse or a global subscriber is
/// already installed.
pub fn init(default_directive: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_directive)?)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| SolverError::Logging(err.to_string()))
}
