// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Access modes and per-block state flags.

use serde::{Deserialize, Serialize};

/// How an array's blocks may be used.
///
/// | mode     | writers | first touch of a block | flush writes back |
/// |----------|---------|------------------------|-------------------|
/// | `Read`   | refused | loaded from the store  | never             |
/// | `Modify` | allowed | loaded from the store  | dirty blocks      |
/// | `Create` | allowed | filled with the default| dirty blocks      |
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Shared, read-only.
    #[default]
    Read,
    /// Read-modify-write of existing contents.
    Modify,
    /// Fresh contents; existing stored data is ignored.
    Create,
}

impl AccessMode {
    /// Returns `true` if writers are allowed and flushes write back.
    pub fn writes_back(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Returns `true` if a block's first touch loads stored contents.
    pub fn loads_existing(self) -> bool {
        !matches!(self, Self::Create)
    }
}

bitflags::bitflags! {
    /// State of one cached block.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u8 {
        /// Contents are held in memory.
        const RESIDENT = 0b0000_0001;
        /// Contents changed since the last flush.
        const DIRTY    = 0b0000_0010;
        /// This array has written the block to its store at least once.
        const STORED   = 0b0000_0100;
    }
}
