// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors for paged storage.

use thiserror::Error;

/// Errors reported by paged arrays and block stores.
#[derive(Debug, Error)]
pub enum PagedError {
    /// A write was requested on an array opened in [`AccessMode::Read`](crate::AccessMode::Read).
    #[error("block {block} belongs to a read-only array")]
    ReadOnly {
        /// Block that was requested for writing.
        block: usize,
    },
    /// Element or block index past the end.
    #[error("index {index} out of range for length {len}")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Valid length.
        len: usize,
    },
    /// A stored or supplied block has the wrong number of elements.
    #[error("block {block} holds {actual} elements, expected {expected}")]
    BlockSize {
        /// Block index.
        block: usize,
        /// Elements the array expects in that block.
        expected: usize,
        /// Elements found.
        actual: usize,
    },
    /// An array was configured with unusable geometry.
    #[error("invalid layout: {0}")]
    Layout(String),
    /// Filesystem failure in a file-backed store.
    #[error("block store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Block encoding or decoding failed.
    #[error("block codec failed: {0}")]
    Codec(#[from] bincode::Error),
    /// A store backend (for example a remote peer) failed.
    #[error("block store failed: {0}")]
    Store(String),
}

/// Result alias for this crate.
pub type Result<T, E = PagedError> = core::result::Result<T, E>;
