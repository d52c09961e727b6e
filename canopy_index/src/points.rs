// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Point storage and the access traits the trees and traversal read through.
//!
//! Points are addressed by a dense index. A [`PointSource`] hands out
//! [`PointCursor`]s, one per reader, so that backends with block caches (see
//! the `canopy_paged` crate) can keep per-reader state without locking on
//! every access.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A reader over a point source.
pub trait PointCursor {
    /// Coordinates of point `index`.
    fn point(&mut self, index: usize) -> Result<&[f64]>;
}

/// Anything that can serve points by dense index.
pub trait PointSource: Sync {
    /// Cursor type handed to each reader.
    type Cursor<'a>: PointCursor
    where
        Self: 'a;

    /// Number of coordinates per point.
    fn dim(&self) -> usize;

    /// Number of points.
    fn len(&self) -> usize;

    /// Returns `true` if there are no points.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a new reader.
    fn cursor(&self) -> Self::Cursor<'_>;
}

/// An in-memory point set.
///
/// Coordinates are stored column-major: rows are dimensions and columns are
/// points, so point `i` occupies `data[i * dim..(i + 1) * dim]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    dim: usize,
    data: Vec<f64>,
}

impl PointSet {
    /// Wrap column-major coordinates.
    ///
    /// Fails on a zero dimension, a length that is not a multiple of `dim`,
    /// or a non-finite coordinate.
    pub fn from_columns(dim: usize, data: Vec<f64>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidParameter("dimension must be positive".into()));
        }
        if data.len() % dim != 0 {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: data.len() % dim,
            });
        }
        if let Some(pos) = data.iter().position(|c| !c.is_finite()) {
            return Err(Error::NonFinite { point: pos / dim });
        }
        Ok(Self { dim, data })
    }

    /// Build from an iterator of points, all of which must share a dimension.
    pub fn from_points<I, P>(points: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[f64]>,
    {
        let mut dim = None;
        let mut data = Vec::new();
        for p in points {
            let p = p.as_ref();
            match dim {
                None => dim = Some(p.len()),
                Some(d) if d != p.len() => {
                    return Err(Error::DimensionMismatch {
                        expected: d,
                        actual: p.len(),
                    });
                }
                Some(_) => {}
            }
            data.extend_from_slice(p);
        }
        let Some(dim) = dim else {
            return Err(Error::EmptyDataset);
        };
        Self::from_columns(dim, data)
    }

    /// Number of coordinates per point.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    /// Returns `true` if the set holds no points.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Coordinates of point `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn point(&self, index: usize) -> &[f64] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// Iterate over points in index order.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.data.chunks_exact(self.dim)
    }

    /// The raw column-major coordinates.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Cursor over an in-memory [`PointSet`].
#[derive(Clone, Copy, Debug)]
pub struct SliceCursor<'a> {
    set: &'a PointSet,
}

impl PointCursor for SliceCursor<'_> {
    fn point(&mut self, index: usize) -> Result<&[f64]> {
        if index >= self.set.len() {
            return Err(Error::PointAccess {
                index,
                reason: format!("only {} points", self.set.len()),
            });
        }
        Ok(self.set.point(index))
    }
}

impl PointSource for PointSet {
    type Cursor<'a> = SliceCursor<'a>;

    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn cursor(&self) -> Self::Cursor<'_> {
        SliceCursor { set: self }
    }
}
