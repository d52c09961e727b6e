// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Solver errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by runners, loaders and the distributed layer.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Tree, traversal or k-NN failure.
    #[error(transparent)]
    Index(#[from] canopy_index::Error),
    /// Paged storage failure.
    #[error(transparent)]
    Paged(#[from] canopy_paged::PagedError),
    /// Settings could not be loaded.
    #[error("settings: {0}")]
    Config(#[from] config::ConfigError),
    /// Settings loaded but are unusable.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    /// Message encoding or decoding failed.
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
    /// Filesystem failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// A data file could not be parsed.
    #[error("{}:{line}: {reason}", path.display())]
    Load {
        /// File being read.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
    /// A peer answered with something unexpected or is unreachable.
    #[error("transport: {0}")]
    Transport(String),
    /// A worker thread panicked.
    #[error("worker thread {0} panicked")]
    WorkerPanicked(usize),
    /// The tracing subscriber could not be installed.
    #[error("logging: {0}")]
    Logging(String),
}

/// Result alias for this crate.
pub type Result<T, E = SolverError> = core::result::Result<T, E>;
