// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Block stores: where evicted blocks live.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use crate::error::Result;

/// Backing storage for the blocks of a [`PagedArray`](crate::PagedArray).
///
/// A store only sees whole blocks. `load` returns `None` for a block that
/// has never been stored; the array then fills it with its default value.
pub trait BlockStore<T>: Send + Sync {
    /// Fetch the stored contents of `block`, if any.
    fn load(&self, block: usize) -> Result<Option<Vec<T>>>;

    /// Persist the contents of `block`, replacing what was there.
    fn store(&self, block: usize, data: &[T]) -> Result<()>;
}

/// In-memory store.
#[derive(Debug)]
pub struct MemoryStore<T> {
    blocks: Mutex<HashMap<usize, Vec<T>>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> MemoryStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks that have been stored.
    pub fn stored_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl<T: Clone + Send> BlockStore<T> for MemoryStore<T> {
    fn load(&self, block: usize) -> Result<Option<Vec<T>>> {
        Ok(self.blocks.lock().get(&block).cloned())
    }

    fn store(&self, block: usize, data: &[T]) -> Result<()> {
        self.blocks.lock().insert(block, data.to_vec());
        Ok(())
    }
}

/// File-backed store: one bincode file per block.
#[derive(Debug)]
pub struct FileStore<T> {
    dir: PathBuf,
    // Held so a temporary directory lives as long as the store.
    _temp: Option<TempDir>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileStore<T> {
    /// Store blocks under `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _temp: None,
            _marker: PhantomData,
        })
    }

    /// Store blocks in a fresh temporary directory removed on drop.
    pub fn temporary() -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("canopy-blocks-").tempdir()?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
            _marker: PhantomData,
        })
    }

    /// Directory holding the block files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn block_path(&self, block: usize) -> PathBuf {
        self.dir.join(format!("block-{block:08}.bin"))
    }
}

impl<T> BlockStore<T> for FileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self, block: usize) -> Result<Option<Vec<T>>> {
        let file = match fs::File::open(self.block_path(block)) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let data = bincode::deserialize_from(BufReader::new(file))?;
        Ok(Some(data))
    }

    fn store(&self, block: usize, data: &[T]) -> Result<()> {
        let file = fs::File::create(self.block_path(block))?;
        bincode::serialize_into(BufWriter::new(file), data)?;
        Ok(())
    }
}
