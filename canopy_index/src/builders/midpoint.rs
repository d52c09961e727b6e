// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Midpoint bulk builder.
//!
//! Recursively splits the point indices at the midpoint of the widest
//! dimension of their bounding box until a range fits in a leaf. The dataset
//! is not permuted: leaves own the original indices.

use crate::bound::Bound;
use crate::error::{Error, Result};
use crate::points::{PointCursor, PointSource};
use crate::statistic::Statistic;
use crate::tree::{NodeId, NodeKind, SpatialTree};

use super::TreeParams;

/// Build a binary tree over all points of `points`.
///
/// Only `max_leaf_size` is consulted from `params`. Statistics are fixed
/// before returning.
pub fn build<B, S, P>(points: &P, params: &TreeParams) -> Result<SpatialTree<B, S>>
where
    B: Bound,
    S: Statistic<B>,
    P: PointSource,
{
    if points.is_empty() {
        return Err(Error::EmptyDataset);
    }
    if params.max_leaf_size == 0 {
        return Err(Error::InvalidParameter("max_leaf_size must be positive".into()));
    }
    let mut cursor = points.cursor();
    let mut builder = Builder {
        tree: SpatialTree::unrooted(points.dim()),
        cursor: &mut cursor,
        dim: points.dim(),
        max_leaf: params.max_leaf_size,
    };
    let root = builder.build_node((0..points.len()).collect())?;
    builder.tree.set_root(root);
    let mut tree = builder.tree;
    tree.fix_statistics(&mut cursor)?;
    tracing::debug!(
        points = points.len(),
        nodes = tree.len(),
        depth = tree.depth(),
        "midpoint tree built"
    );
    Ok(tree)
}

struct Builder<'c, B, S, C> {
    tree: SpatialTree<B, S>,
    cursor: &'c mut C,
    dim: usize,
    max_leaf: usize,
}

impl<B: Bound, S: Statistic<B>, C: PointCursor> Builder<'_, B, S, C> {
    fn build_node(&mut self, indices: Vec<usize>) -> Result<NodeId> {
        let mut lo = vec![f64::INFINITY; self.dim];
        let mut hi = vec![f64::NEG_INFINITY; self.dim];
        let mut bound = B::empty(self.dim);
        for &i in &indices {
            let p = self.cursor.point(i)?;
            if p.len() != self.dim {
                return Err(Error::DimensionMismatch {
                    expected: self.dim,
                    actual: p.len(),
                });
            }
            bound.union_point(p);
            for (d, &c) in p.iter().enumerate() {
                lo[d] = lo[d].min(c);
                hi[d] = hi[d].max(c);
            }
        }
        let count = indices.len();
        if count <= self.max_leaf {
            return Ok(self.tree.alloc(bound, NodeKind::Leaf(indices), count));
        }

        let (axis, width) = (0..self.dim)
            .map(|d| (d, hi[d] - lo[d]))
            .fold((0, f64::NEG_INFINITY), |best, cand| {
                if cand.1 > best.1 { cand } else { best }
            });
        let (left, right) = self.partition(indices, axis, lo[axis] + width * 0.5)?;

        let l = self.build_node(left)?;
        let r = self.build_node(right)?;
        let id = self.tree.alloc(bound, NodeKind::Internal(Vec::new()), count);
        self.tree.attach_child(id, l);
        self.tree.attach_child(id, r);
        Ok(id)
    }

    /// Split at `mid` along `axis`; falls back to an even split when one side
    /// would be empty (duplicate or nearly coincident coordinates).
    fn partition(
        &mut self,
        indices: Vec<usize>,
        axis: usize,
        mid: f64,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        let mut keyed = Vec::with_capacity(indices.len());
        for i in indices {
            keyed.push((self.cursor.point(i)?[axis], i));
        }
        let (left, right): (Vec<_>, Vec<_>) = keyed.iter().partition(|(c, _)| *c <= mid);
        if !left.is_empty() && !right.is_empty() {
            return Ok((
                left.into_iter().map(|&(_, i)| i).collect(),
                right.into_iter().map(|&(_, i)| i).collect(),
            ));
        }
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let half = keyed.len() / 2;
        let right = keyed.split_off(half);
        Ok((
            keyed.into_iter().map(|(_, i)| i).collect(),
            right.into_iter().map(|(_, i)| i).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::{BallBound, HRectBound};
    use crate::points::PointSet;
    use crate::statistic::{FurthestDescendant, NoStatistic};

    fn params(max_leaf_size: usize) -> TreeParams {
        TreeParams {
            max_leaf_size,
            min_leaf_size: 1,
            ..TreeParams::default()
        }
    }

    #[test]
    fn small_set_is_one_leaf() {
        let set = PointSet::from_columns(1, vec![3.0, 1.0, 2.0]).unwrap();
        let tree: SpatialTree<HRectBound> = build(&set, &params(20)).unwrap();
        let root = tree.node(tree.root());
        assert!(root.is_leaf());
        assert_eq!(root.points(), &[0, 1, 2]);
        assert_eq!(tree.len(), 1);
        assert_eq!(root.bound().lo(), &[1.0]);
    }

    #[test]
    fn splits_at_widest_midpoint() {
        // Wide in x, narrow in y.
        let set = PointSet::from_points([[0.0, 0.0], [1.0, 0.1], [9.0, 0.2], [10.0, 0.0]]).unwrap();
        let tree: SpatialTree<HRectBound, FurthestDescendant> = build(&set, &params(2)).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 2);
        let left = tree.node(root.children()[0]);
        let right = tree.node(root.children()[1]);
        assert_eq!(left.points(), &[0, 1]);
        assert_eq!(right.points(), &[2, 3]);
        tree.validate(&mut set.cursor(), 4).unwrap();
    }

    #[test]
    fn duplicates_still_respect_leaf_size() {
        let set = PointSet::from_columns(2, vec![1.0; 2 * 50]).unwrap();
        let tree: SpatialTree<BallBound, NoStatistic> = build(&set, &params(4)).unwrap();
        tree.validate(&mut set.cursor(), 50).unwrap();
        for (_, node) in tree.nodes() {
            assert!(node.points().len() <= 4, "leaf overflow");
        }
    }

    #[test]
    fn outlier_may_sit_in_a_leaf_below_min_leaf_size() {
        let mut coords: Vec<f64> = (0..20).map(|i| f64::from(i) * 0.01).collect();
        coords.push(100.0);
        let set = PointSet::from_columns(1, coords).unwrap();
        let params = TreeParams {
            max_leaf_size: 20,
            ..TreeParams::default()
        };
        assert_eq!(params.min_leaf_size, 6);
        let tree: SpatialTree<HRectBound> = build(&set, &params).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 2);
        let right = tree.node(root.children()[1]);
        assert!(right.is_leaf());
        assert_eq!(right.points(), &[20]);
        tree.validate(&mut set.cursor(), 21).unwrap();
        tree.validate_fanout(&params).unwrap();
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let set = PointSet::from_columns(3, Vec::new()).unwrap();
        let err = build::<HRectBound, NoStatistic, _>(&set, &params(4)).unwrap_err();
        assert_eq!(err, Error::EmptyDataset);
    }
}
