// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Point matrices stored in a paged array.

use std::sync::Arc;

use canopy_index::{Error as IndexError, PointCursor, PointSet, PointSource};

use crate::array::{PagedArray, Reader};
use crate::error::{PagedError, Result};
use crate::mode::AccessMode;
use crate::store::BlockStore;

/// Column-major points stored `n_block_points` per block, so a point never
/// straddles two blocks.
#[derive(Debug)]
pub struct PagedPoints {
    dim: usize,
    array: Arc<PagedArray<f64>>,
}

impl PagedPoints {
    /// Page `points` into `store`, `n_block_points` points per block.
    pub fn from_point_set(
        points: &PointSet,
        n_block_points: usize,
        store: Arc<dyn BlockStore<f64>>,
    ) -> Result<Self> {
        let dim = points.dim();
        let array = PagedArray::from_values(
            points.as_slice(),
            block_elems(dim, n_block_points)?,
            0.0,
            AccessMode::Read,
            store,
        )?;
        Ok(Self {
            dim,
            array: Arc::new(array),
        })
    }

    /// Open `n_points` points of dimension `dim` already held by `store`.
    pub fn open(
        dim: usize,
        n_points: usize,
        n_block_points: usize,
        store: Arc<dyn BlockStore<f64>>,
    ) -> Result<Self> {
        let array = PagedArray::new(
            n_points * dim,
            block_elems(dim, n_block_points)?,
            0.0,
            AccessMode::Read,
            store,
        )?;
        Ok(Self {
            dim,
            array: Arc::new(array),
        })
    }

    /// The underlying coordinate array, shareable with a block server.
    pub fn array(&self) -> &Arc<PagedArray<f64>> {
        &self.array
    }

    /// Points per block.
    pub fn n_block_points(&self) -> usize {
        self.array.block_elems() / self.dim
    }
}

fn block_elems(dim: usize, n_block_points: usize) -> Result<usize> {
    if dim == 0 || n_block_points == 0 {
        return Err(PagedError::Layout(format!(
            "dimension {dim} and points per block {n_block_points} must be positive"
        )));
    }
    Ok(dim * n_block_points)
}

impl PointSource for PagedPoints {
    type Cursor<'a> = PagedPointCursor<'a>;

    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.array.len() / self.dim
    }

    fn cursor(&self) -> Self::Cursor<'_> {
        PagedPointCursor {
            dim: self.dim,
            reader: self.array.reader(),
        }
    }
}

/// Point cursor that keeps the most recent block resident.
#[derive(Debug)]
pub struct PagedPointCursor<'a> {
    dim: usize,
    reader: Reader<'a, f64>,
}

impl PointCursor for PagedPointCursor<'_> {
    fn point(&mut self, index: usize) -> canopy_index::Result<&[f64]> {
        self.reader
            .slice(index * self.dim, self.dim)
            .map_err(|err| IndexError::PointAccess {
                index,
                reason: err.to_string(),
            })
    }
}
