// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Canopy Paged: fixed-length arrays split into blocks that are loaded on
//! first touch, written back on flush, and evicted on demand.
//!
//! - [`PagedArray`] owns per-block state ([`BlockFlags`]) behind
//!   `parking_lot` locks; [`Reader`] caches one block, [`BlockWriter`]
//!   holds one block exclusively.
//! - [`AccessMode`] decides whether writers are allowed, whether the first
//!   touch loads stored contents, and whether flushes write back.
//! - [`BlockStore`] is the eviction target: [`MemoryStore`], [`FileStore`],
//!   or a remote peer (see `canopy_solver`).
//! - [`PagedPoints`] adapts a paged `f64` array to
//!   [`canopy_index::PointSource`].
//!
//! # Example
//!
//! ```rust
//! use canopy_paged::{AccessMode, PagedArray};
//!
//! let results = PagedArray::in_memory(10, 4, 0_u32, AccessMode::Create).unwrap();
//! results.set(5, 7).unwrap();
//! results.flush_clear().unwrap();
//! assert_eq!(results.get(5).unwrap(), 7);
//! assert_eq!(results.get(6).unwrap(), 0);
//! ```

pub mod array;
pub mod error;
pub mod mode;
pub mod points;
pub mod store;

pub use array::{BlockWriter, PagedArray, Reader};
pub use error::{PagedError, Result};
pub use mode::{AccessMode, BlockFlags};
pub use points::{PagedPointCursor, PagedPoints};
pub use store::{BlockStore, FileStore, MemoryStore};
