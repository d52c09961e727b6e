// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by the index crate.

use thiserror::Error;

/// Errors reported by tree construction, traversal, and point access.
///
/// Structural corruption caught while mutating a tree is a bug and panics;
/// [`Error::Invariant`] is only produced by explicit checks such as
/// [`SpatialTree::validate`](crate::SpatialTree::validate).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The dataset holds zero points.
    #[error("dataset has no points")]
    EmptyDataset,
    /// Two inputs disagree on dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the caller required.
        expected: usize,
        /// Dimension that was supplied.
        actual: usize,
    },
    /// A coordinate is NaN or infinite.
    #[error("point {point} has a non-finite coordinate")]
    NonFinite {
        /// Index of the offending point.
        point: usize,
    },
    /// A run or tree parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A point could not be read from its backing store.
    #[error("point {index} unavailable: {reason}")]
    PointAccess {
        /// Index of the requested point.
        index: usize,
        /// Backend-specific cause.
        reason: String,
    },
    /// The tree changed since statistics were last recomputed.
    #[error("tree statistics are stale; call fix_statistics before traversal")]
    StaleStatistics,
    /// A structural check failed.
    #[error("tree invariant violated: {0}")]
    Invariant(String),
}

/// Result alias for this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
