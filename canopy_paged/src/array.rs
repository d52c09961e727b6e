// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Block-paged arrays.

use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::error::{PagedError, Result};
use crate::mode::{AccessMode, BlockFlags};
use crate::store::{BlockStore, MemoryStore};

struct Block<T> {
    data: Option<Arc<Vec<T>>>,
    flags: BlockFlags,
}

/// A fixed-length array stored as equal-sized blocks that are loaded on
/// first touch and evicted by [`flush_clear`](Self::flush_clear).
///
/// Readers share resident blocks through reference-counted buffers, so a
/// block can be evicted while a [`Reader`] still holds it. A
/// [`BlockWriter`] holds its block exclusively; do not read the same block
/// from the same thread while a writer for it is alive.
pub struct PagedArray<T> {
    len: usize,
    block_elems: usize,
    mode: AccessMode,
    default: T,
    blocks: Box<[RwLock<Block<T>>]>,
    store: Arc<dyn BlockStore<T>>,
}

impl<T> fmt::Debug for PagedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedArray")
            .field("len", &self.len)
            .field("block_elems", &self.block_elems)
            .field("mode", &self.mode)
            .field("n_blocks", &self.blocks.len())
            .finish_non_exhaustive()
    }
}

impl<T> PagedArray<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an array of `len` elements in blocks of `block_elems`.
    ///
    /// Nothing is loaded until a block is first touched.
    pub fn new(
        len: usize,
        block_elems: usize,
        default: T,
        mode: AccessMode,
        store: Arc<dyn BlockStore<T>>,
    ) -> Result<Self> {
        if block_elems == 0 {
            return Err(PagedError::Layout("blocks must hold at least one element".into()));
        }
        let n_blocks = len.div_ceil(block_elems);
        let blocks = (0..n_blocks)
            .map(|_| {
                RwLock::new(Block {
                    data: None,
                    flags: BlockFlags::empty(),
                })
            })
            .collect();
        Ok(Self {
            len,
            block_elems,
            mode,
            default,
            blocks,
            store,
        })
    }

    /// Create an array backed by a fresh [`MemoryStore`].
    pub fn in_memory(len: usize, block_elems: usize, default: T, mode: AccessMode) -> Result<Self> {
        Self::new(len, block_elems, default, mode, Arc::new(MemoryStore::<T>::new()))
    }

    /// Write `values` block by block into `store` and open an array over them.
    pub fn from_values(
        values: &[T],
        block_elems: usize,
        default: T,
        mode: AccessMode,
        store: Arc<dyn BlockStore<T>>,
    ) -> Result<Self> {
        let array = Self::new(values.len(), block_elems, default, mode, store)?;
        for (block, chunk) in values.chunks(block_elems).enumerate() {
            array.store.store(block, chunk)?;
            array.blocks[block].write().flags.insert(BlockFlags::STORED);
        }
        Ok(array)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements per full block.
    pub fn block_elems(&self) -> usize {
        self.block_elems
    }

    /// Number of blocks.
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Access mode fixed at construction.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Value used for elements never written.
    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Number of elements in `block`; the last block may be short.
    pub fn block_len(&self, block: usize) -> usize {
        let start = block * self.block_elems;
        self.block_elems.min(self.len.saturating_sub(start))
    }

    /// Number of blocks whose flags contain `flags`.
    pub fn blocks_with(&self, flags: BlockFlags) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.read().flags.contains(flags))
            .count()
    }

    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.len {
            return Err(PagedError::OutOfRange {
                index,
                len: self.len,
            });
        }
        Ok((index / self.block_elems, index % self.block_elems))
    }

    fn check_block(&self, block: usize) -> Result<()> {
        if block >= self.blocks.len() {
            return Err(PagedError::OutOfRange {
                index: block,
                len: self.blocks.len(),
            });
        }
        Ok(())
    }

    fn fetch(&self, block: usize, flags: BlockFlags) -> Result<Vec<T>> {
        let expected = self.block_len(block);
        let stored = if self.mode.loads_existing() || flags.contains(BlockFlags::STORED) {
            self.store.load(block)?
        } else {
            None
        };
        match stored {
            Some(data) if data.len() != expected => Err(PagedError::BlockSize {
                block,
                expected,
                actual: data.len(),
            }),
            Some(data) => {
                tracing::trace!(block, "block loaded from store");
                Ok(data)
            }
            None => Ok(vec![self.default.clone(); expected]),
        }
    }

    fn ensure<'g>(&self, block: usize, slot: &'g mut Block<T>) -> Result<&'g mut Arc<Vec<T>>> {
        let data = match slot.data.take() {
            Some(data) => data,
            None => Arc::new(self.fetch(block, slot.flags)?),
        };
        slot.flags.insert(BlockFlags::RESIDENT);
        Ok(slot.data.insert(data))
    }

    /// Shared handle to the contents of `block`, loading it if needed.
    pub fn load_block(&self, block: usize) -> Result<Arc<Vec<T>>> {
        self.check_block(block)?;
        if let Some(data) = &self.blocks[block].read().data {
            return Ok(Arc::clone(data));
        }
        let mut slot = self.blocks[block].write();
        self.ensure(block, &mut slot).map(|d| Arc::clone(d))
    }

    /// A cursor that caches the most recently touched block.
    pub fn reader(&self) -> Reader<'_, T> {
        Reader {
            array: self,
            cached: None,
        }
    }

    /// Exclusive writer for `block`.
    ///
    /// Fails with [`PagedError::ReadOnly`] in [`AccessMode::Read`].
    pub fn writer(&self, block: usize) -> Result<BlockWriter<'_, T>> {
        if !self.mode.writes_back() {
            return Err(PagedError::ReadOnly { block });
        }
        self.check_block(block)?;
        let mut guard = self.blocks[block].write();
        self.ensure(block, &mut guard)?;
        Ok(BlockWriter {
            guard,
            start: block * self.block_elems,
        })
    }

    /// Clone of the element at `index`.
    pub fn get(&self, index: usize) -> Result<T> {
        self.reader().get(index).cloned()
    }

    /// Overwrite the element at `index`.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let (block, offset) = self.locate(index)?;
        self.writer(block)?[offset] = value;
        Ok(())
    }

    /// Overlay `data` onto `block`, skipping elements equal to the default.
    ///
    /// Returns the number of elements taken from `data`.
    pub fn merge_block(&self, block: usize, data: &[T]) -> Result<usize>
    where
        T: PartialEq,
    {
        let mut writer = self.writer(block)?;
        if data.len() != writer.len() {
            return Err(PagedError::BlockSize {
                block,
                expected: writer.len(),
                actual: data.len(),
            });
        }
        let mut merged = 0;
        for (slot, value) in writer.iter_mut().zip(data) {
            if *value != self.default {
                *slot = value.clone();
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Write dirty blocks back to the store. Does nothing in
    /// [`AccessMode::Read`].
    pub fn flush(&self) -> Result<()> {
        self.flush_inner(false)
    }

    /// Flush, then evict every resident block.
    pub fn flush_clear(&self) -> Result<()> {
        self.flush_inner(true)
    }

    fn flush_inner(&self, clear: bool) -> Result<()> {
        let mut written = 0_usize;
        for (block, lock) in self.blocks.iter().enumerate() {
            let mut slot = lock.write();
            if self.mode.writes_back() && slot.flags.contains(BlockFlags::DIRTY) {
                if let Some(data) = &slot.data {
                    self.store.store(block, data)?;
                    written += 1;
                }
                slot.flags.remove(BlockFlags::DIRTY);
                slot.flags.insert(BlockFlags::STORED);
            }
            if clear {
                slot.data = None;
                slot.flags.remove(BlockFlags::RESIDENT);
            }
        }
        tracing::debug!(written, clear, blocks = self.blocks.len(), "paged array flushed");
        Ok(())
    }

    /// Copy every element out, loading blocks as needed.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(self.len);
        for block in 0..self.blocks.len() {
            out.extend_from_slice(&self.load_block(block)?);
        }
        Ok(out)
    }
}

/// Read cursor over a [`PagedArray`].
///
/// Holds one block at a time; touching another block swaps it in.
pub struct Reader<'a, T> {
    array: &'a PagedArray<T>,
    cached: Option<(usize, Arc<Vec<T>>)>,
}

impl<T> fmt::Debug for Reader<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("cached_block", &self.cached.as_ref().map(|(b, _)| *b))
            .finish_non_exhaustive()
    }
}

impl<T> Reader<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn block(&mut self, block: usize) -> Result<&[T]> {
        let data = match self.cached.take() {
            Some((cached, data)) if cached == block => data,
            _ => self.array.load_block(block)?,
        };
        Ok(&self.cached.insert((block, data)).1)
    }

    /// Element at `index`.
    pub fn get(&mut self, index: usize) -> Result<&T> {
        let (block, offset) = self.array.locate(index)?;
        Ok(&self.block(block)?[offset])
    }

    /// `len` contiguous elements starting at `start`; the range must not
    /// cross a block boundary.
    pub fn slice(&mut self, start: usize, len: usize) -> Result<&[T]> {
        let (block, offset) = self.array.locate(start)?;
        let data = self.block(block)?;
        if offset + len > data.len() {
            return Err(PagedError::Layout(format!(
                "range {start}..{} crosses a block boundary",
                start + len
            )));
        }
        Ok(&data[offset..offset + len])
    }
}

/// Exclusive, mutable view of one block.
///
/// Any mutable access marks the block dirty.
pub struct BlockWriter<'a, T> {
    guard: RwLockWriteGuard<'a, Block<T>>,
    start: usize,
}

impl<T> fmt::Debug for BlockWriter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockWriter")
            .field("start", &self.start)
            .field("flags", &self.guard.flags)
            .finish_non_exhaustive()
    }
}

impl<T> BlockWriter<'_, T> {
    /// Array index of this block's first element.
    pub fn start(&self) -> usize {
        self.start
    }
}

impl<T> Deref for BlockWriter<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self.guard.data.as_deref() {
            Some(data) => data,
            None => &[],
        }
    }
}

impl<T: Clone> DerefMut for BlockWriter<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.guard.flags.insert(BlockFlags::DIRTY);
        match self.guard.data.as_mut() {
            Some(data) => Arc::make_mut(data).as_mut_slice(),
            None => &mut [],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    fn stored(
        values: &[u32],
        block_elems: usize,
        mode: AccessMode,
    ) -> (PagedArray<u32>, Arc<MemoryStore<u32>>) {
        let store = Arc::new(MemoryStore::<u32>::new());
        let array = PagedArray::from_values(values, block_elems, 0, mode, store.clone()).unwrap();
        (array, store)
    }

    #[test]
    fn geometry() {
        let array = PagedArray::<u8>::in_memory(10, 4, 0, AccessMode::Create).unwrap();
        assert_eq!(array.n_blocks(), 3);
        assert_eq!(array.block_len(0), 4);
        assert_eq!(array.block_len(2), 2);
        assert!(PagedArray::<u8>::in_memory(10, 0, 0, AccessMode::Create).is_err());
        let empty = PagedArray::<u8>::in_memory(0, 4, 0, AccessMode::Read).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.to_vec().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn reader_loads_lazily_and_caches() {
        let values: Vec<u32> = (0..10).collect();
        let (array, _) = stored(&values, 3, AccessMode::Read);
        assert_eq!(array.blocks_with(BlockFlags::RESIDENT), 0);
        let mut reader = array.reader();
        assert_eq!(*reader.get(4).unwrap(), 4);
        assert_eq!(reader.slice(3, 3).unwrap(), &[3, 4, 5]);
        assert_eq!(array.blocks_with(BlockFlags::RESIDENT), 1);
        assert!(reader.slice(4, 3).is_err());
        assert!(matches!(
            reader.get(10),
            Err(PagedError::OutOfRange { index: 10, len: 10 })
        ));
        assert_eq!(array.to_vec().unwrap(), values);
    }

    #[test]
    fn read_mode_refuses_writers() {
        let (array, _) = stored(&[1, 2, 3], 2, AccessMode::Read);
        assert!(matches!(array.writer(1), Err(PagedError::ReadOnly { block: 1 })));
        assert!(array.set(0, 9).is_err());
    }

    #[test]
    fn create_mode_ignores_stored_contents() {
        let (array, _) = stored(&[5, 6, 7], 2, AccessMode::Create);
        // Values written by `from_values` count as stored by this array.
        assert_eq!(array.get(0).unwrap(), 5);

        let store = Arc::new(MemoryStore::<u32>::new());
        store.store(0, &[5_u32, 6]).unwrap();
        let fresh = PagedArray::new(2, 2, 0_u32, AccessMode::Create, store).unwrap();
        assert_eq!(fresh.to_vec().unwrap(), vec![0, 0]);
        assert_eq!(fresh.writer(0).unwrap().to_vec(), vec![0, 0]);
    }

    #[test]
    fn modify_writes_back_only_on_flush() {
        let (array, store) = stored(&[1, 2, 3, 4, 5], 2, AccessMode::Modify);
        array.set(3, 40).unwrap();
        assert_eq!(store.load(1).unwrap(), Some(vec![3, 4]));
        assert_eq!(array.blocks_with(BlockFlags::DIRTY), 1);
        array.flush().unwrap();
        assert_eq!(store.load(1).unwrap(), Some(vec![3, 40]));
        assert_eq!(array.blocks_with(BlockFlags::DIRTY), 0);
        assert_eq!(array.blocks_with(BlockFlags::RESIDENT), 1);
    }

    #[test]
    fn flush_clear_evicts_and_reloads() {
        let store = Arc::new(FileStore::temporary().unwrap());
        let array = PagedArray::new(7, 3, -1_i64, AccessMode::Create, store).unwrap();
        for i in 0..7 {
            array.set(i, i64::try_from(i * 10).unwrap()).unwrap();
        }
        array.flush_clear().unwrap();
        assert_eq!(array.blocks_with(BlockFlags::RESIDENT), 0);
        assert_eq!(array.to_vec().unwrap(), vec![0, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn reader_survives_eviction() {
        let (array, _) = stored(&[1, 2, 3], 3, AccessMode::Modify);
        let mut reader = array.reader();
        assert_eq!(*reader.get(0).unwrap(), 1);
        array.set(0, 100).unwrap();
        array.flush_clear().unwrap();
        // The cached block is the pre-write snapshot.
        assert_eq!(*reader.get(0).unwrap(), 1);
        assert_eq!(array.get(0).unwrap(), 100);
    }

    #[test]
    fn merge_skips_default_elements() {
        let (array, _) = stored(&[1, 2, 3, 4], 4, AccessMode::Modify);
        let merged = array.merge_block(0, &[0, 20, 0, 40]).unwrap();
        assert_eq!(merged, 2);
        assert_eq!(array.to_vec().unwrap(), vec![1, 20, 3, 40]);
        assert!(matches!(
            array.merge_block(0, &[1, 2]),
            Err(PagedError::BlockSize { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn wrong_sized_stored_block_is_reported() {
        let store = Arc::new(MemoryStore::<u32>::new());
        store.store(0, &[1_u32]).unwrap();
        let array = PagedArray::new(2, 2, 0_u32, AccessMode::Read, store).unwrap();
        assert!(matches!(
            array.get(0),
            Err(PagedError::BlockSize { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn concurrent_writers_on_distinct_blocks() {
        let array = PagedArray::<usize>::in_memory(64, 8, 0, AccessMode::Create).unwrap();
        std::thread::scope(|s| {
            for block in 0..array.n_blocks() {
                let array = &array;
                s.spawn(move || {
                    let mut writer = array.writer(block).unwrap();
                    let start = writer.start();
                    for (i, v) in writer.iter_mut().enumerate() {
                        *v = start + i;
                    }
                });
            }
        });
        assert_eq!(array.to_vec().unwrap(), (0..64).collect::<Vec<_>>());
    }
}
