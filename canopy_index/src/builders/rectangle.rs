// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental R-tree style builder.
//!
//! [`RectangleTreeBuilder::insert_point`] descends from the root, picking at
//! each internal node the child with the lowest [`DescentHeuristic`] score,
//! and appends the point to the leaf it reaches. A leaf that reaches
//! `max_leaf_size` is split by [`RectangleTreeBuilder::split_node`]; the new
//! sibling is attached to the parent, and a parent pushed past
//! `max_num_children` is split in turn, up to a fresh root.
//!
//! ## SAH-like split
//!
//! [`SahSplit`] sorts the entries by centroid along each axis, precomputes
//! prefix and suffix unions, and picks the cut `k` minimizing
//! `volume(L_k) * k + volume(R_k) * (n - k)`, with the same sum over margins
//! breaking ties between degenerate (zero-volume) candidates.

use core::cmp::Ordering;
use core::fmt::Debug;

use crate::bound::Bound;
use crate::error::{Error, Result};
use crate::points::{PointCursor, PointSource};
use crate::statistic::Statistic;
use crate::tree::{NodeId, NodeKind, SpatialTree};

use super::TreeParams;

/// Scores candidate children during insertion; lower is better.
pub trait DescentHeuristic<B: Bound>: Debug {
    /// Cost of routing `point` into a child bounded by `child`.
    fn score(&self, child: &B, point: &[f64]) -> f64;
}

/// Pick the child whose volume grows least.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinEnlargement;

impl<B: Bound> DescentHeuristic<B> for MinEnlargement {
    fn score(&self, child: &B, point: &[f64]) -> f64 {
        child.enlargement(point)
    }
}

/// Pick the child whose centroid is nearest.
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestCentroid;

impl<B: Bound> DescentHeuristic<B> for NearestCentroid {
    fn score(&self, child: &B, point: &[f64]) -> f64 {
        child.center_distance_point(point)
    }
}

/// Partitions overflowing entries into two groups.
pub trait SplitStrategy<B: Bound>: Debug {
    /// Split entry positions `0..bounds.len()` into two groups, each holding
    /// at least `min_fill` entries.
    ///
    /// Callers guarantee `bounds.len() >= 2 * min_fill`.
    fn split(&self, bounds: &[B], min_fill: usize) -> (Vec<usize>, Vec<usize>);
}

/// Surface-area-heuristic style split over every axis.
#[derive(Clone, Copy, Debug, Default)]
pub struct SahSplit;

/// Median split along the axis where entry centroids spread widest.
#[derive(Clone, Copy, Debug, Default)]
pub struct MedianSplit;

fn by_axis(centroids: &[Vec<f64>], axis: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_by(|&a, &b| {
        centroids[a][axis]
            .partial_cmp(&centroids[b][axis])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}

impl<B: Bound> SplitStrategy<B> for SahSplit {
    fn split(&self, bounds: &[B], min_fill: usize) -> (Vec<usize>, Vec<usize>) {
        let n = bounds.len();
        let dim = bounds[0].dim();
        let centroids: Vec<Vec<f64>> = bounds.iter().map(Bound::centroid).collect();
        let mut best: Option<((f64, f64), Vec<usize>, usize)> = None;
        for axis in 0..dim {
            let order = by_axis(&centroids, axis);

            // Prefix and suffix unions make each candidate cut O(1).
            let mut prefix: Vec<B> = Vec::with_capacity(n);
            for &e in &order {
                let mut b = prefix.last().cloned().unwrap_or_else(|| B::empty(dim));
                b.union_bound(&bounds[e]);
                prefix.push(b);
            }
            let mut suffix: Vec<B> = Vec::with_capacity(n);
            for &e in order.iter().rev() {
                let mut b = suffix.last().cloned().unwrap_or_else(|| B::empty(dim));
                b.union_bound(&bounds[e]);
                suffix.push(b);
            }
            suffix.reverse();

            for k in min_fill.max(1)..=(n - min_fill.max(1)) {
                let (l, r) = (&prefix[k - 1], &suffix[k]);
                let (kl, kr) = (k as f64, (n - k) as f64);
                let cost = (
                    l.volume() * kl + r.volume() * kr,
                    l.margin() * kl + r.margin() * kr,
                );
                let better = best.as_ref().is_none_or(|(bc, _, _)| {
                    cost.partial_cmp(bc).is_some_and(|o| o == Ordering::Less)
                });
                if better {
                    best = Some((cost, order.clone(), k));
                }
            }
        }
        let (_, mut order, k) = best.expect("split requires at least two entries");
        let right = order.split_off(k);
        (order, right)
    }
}

impl<B: Bound> SplitStrategy<B> for MedianSplit {
    fn split(&self, bounds: &[B], min_fill: usize) -> (Vec<usize>, Vec<usize>) {
        let n = bounds.len();
        let dim = bounds[0].dim();
        let centroids: Vec<Vec<f64>> = bounds.iter().map(Bound::centroid).collect();
        let spread = |axis: usize| {
            let (lo, hi) = centroids.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), c| (lo.min(c[axis]), hi.max(c[axis])),
            );
            hi - lo
        };
        let axis = (0..dim)
            .max_by(|&a, &b| spread(a).partial_cmp(&spread(b)).unwrap_or(Ordering::Equal))
            .unwrap_or(0);
        let mut order = by_axis(&centroids, axis);
        let k = (n / 2).clamp(min_fill.max(1), n - min_fill.max(1));
        let right = order.split_off(k);
        (order, right)
    }
}

/// Single-writer incremental tree builder.
///
/// The tree's statistics are stale while inserting; [`finish`](Self::finish)
/// fixes them.
pub struct RectangleTreeBuilder<B, S, C, D = MinEnlargement, X = SahSplit> {
    tree: SpatialTree<B, S>,
    cursor: C,
    params: TreeParams,
    descent: D,
    split: X,
}

impl<B: Bound, S: Statistic<B>, C, D: Debug, X: Debug> Debug for RectangleTreeBuilder<B, S, C, D, X> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RectangleTreeBuilder")
            .field("tree", &self.tree)
            .field("params", &self.params)
            .field("descent", &self.descent)
            .field("split", &self.split)
            .finish_non_exhaustive()
    }
}

impl<B, S, C> RectangleTreeBuilder<B, S, C>
where
    B: Bound,
    S: Statistic<B>,
    C: PointCursor,
{
    /// Builder with [`MinEnlargement`] descent and [`SahSplit`] splits.
    pub fn new(dim: usize, cursor: C, params: TreeParams) -> Result<Self> {
        Self::with_policies(dim, cursor, params, MinEnlargement, SahSplit)
    }
}

impl<B, S, C, D, X> RectangleTreeBuilder<B, S, C, D, X>
where
    B: Bound,
    S: Statistic<B>,
    C: PointCursor,
    D: DescentHeuristic<B>,
    X: SplitStrategy<B>,
{
    /// Builder with explicit policies.
    pub fn with_policies(
        dim: usize,
        cursor: C,
        params: TreeParams,
        descent: D,
        split: X,
    ) -> Result<Self> {
        params.validate()?;
        if dim == 0 {
            return Err(Error::InvalidParameter("dimension must be positive".into()));
        }
        Ok(Self {
            tree: SpatialTree::with_empty_root(dim),
            cursor,
            params,
            descent,
            split,
        })
    }

    /// The tree as built so far.
    pub fn tree(&self) -> &SpatialTree<B, S> {
        &self.tree
    }

    /// Insert point `index`, splitting as needed.
    pub fn insert_point(&mut self, index: usize) -> Result<()> {
        let point = self.cursor.point(index)?.to_vec();
        if point.len() != self.tree.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.tree.dim(),
                actual: point.len(),
            });
        }
        let mut id = self.tree.root();
        loop {
            let node = self.tree.node_mut(id);
            node.bound.union_point(&point);
            node.count += 1;
            let children = match &mut node.kind {
                NodeKind::Leaf(points) => {
                    points.push(index);
                    break;
                }
                NodeKind::Internal(children) => children.clone(),
            };
            id = self.choose_child(&children, &point);
        }
        self.split_node(id)
    }

    /// Remove the subtree rooted at `id`, reinserting the points of any
    /// node that drops below `min_num_children` on the way up.
    ///
    /// Returns the points of the removed subtree; every other point stays
    /// indexed.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<usize>> {
        let removal = self.tree.remove_subtree(id, &self.params)?;
        for &i in &removal.orphaned {
            self.insert_point(i)?;
        }
        Ok(removal.removed)
    }

    fn choose_child(&self, children: &[NodeId], point: &[f64]) -> NodeId {
        let mut best = children[0];
        let mut best_cost = (f64::INFINITY, f64::INFINITY);
        for &c in children {
            let bound = self.tree.node(c).bound();
            let cost = (self.descent.score(bound, point), bound.volume());
            if cost.partial_cmp(&best_cost) == Some(Ordering::Less) {
                best_cost = cost;
                best = c;
            }
        }
        best
    }

    /// Split leaf `id` if it holds `max_leaf_size` points; otherwise do nothing.
    ///
    /// # Panics
    ///
    /// Panics if `id` is an internal node.
    pub fn split_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.tree.node(id);
        assert!(node.is_leaf(), "split_node called on internal node {id:?}");
        if node.points().len() < self.params.max_leaf_size {
            return Ok(());
        }
        let points = node.points().to_vec();
        let mut bounds = Vec::with_capacity(points.len());
        for &i in &points {
            bounds.push(B::from_point(self.cursor.point(i)?));
        }
        let (left, right) = self.split.split(&bounds, self.params.min_leaf_size);

        let dim = self.tree.dim();
        let gather = |group: &[usize]| {
            let mut bound = B::empty(dim);
            for &e in group {
                bound.union_bound(&bounds[e]);
            }
            (bound, group.iter().map(|&e| points[e]).collect::<Vec<_>>())
        };
        let (left_bound, left_points) = gather(&left);
        let (right_bound, right_points) = gather(&right);

        let node = self.tree.node_mut(id);
        node.bound = left_bound;
        node.count = left_points.len();
        node.kind = NodeKind::Leaf(left_points);
        let n_right = right_points.len();
        let sibling = self
            .tree
            .alloc(right_bound, NodeKind::Leaf(right_points), n_right);
        self.attach_sibling(id, sibling);
        Ok(())
    }

    /// Hang `sibling` next to `id`, splitting overfull ancestors.
    fn attach_sibling(&mut self, id: NodeId, sibling: NodeId) {
        let Some(parent) = self.tree.node(id).parent() else {
            let root = self
                .tree
                .alloc(B::empty(self.tree.dim()), NodeKind::Internal(Vec::new()), 0);
            self.tree.attach_child(root, id);
            self.tree.attach_child(root, sibling);
            self.tree.refit(root);
            self.tree.set_root(root);
            return;
        };
        // The parent's bound and count already include everything below.
        self.tree.attach_child(parent, sibling);
        if self.tree.node(parent).children().len() > self.params.max_num_children {
            self.split_internal(parent);
        }
    }

    fn split_internal(&mut self, id: NodeId) {
        let children = self.tree.detach_children(id);
        let bounds: Vec<B> = children
            .iter()
            .map(|&c| self.tree.node(c).bound().clone())
            .collect();
        let (left, right) = self.split.split(&bounds, self.params.min_num_children);
        for &e in &left {
            self.tree.attach_child(id, children[e]);
        }
        self.tree.refit(id);
        let sibling = self
            .tree
            .alloc(B::empty(self.tree.dim()), NodeKind::Internal(Vec::new()), 0);
        for &e in &right {
            self.tree.attach_child(sibling, children[e]);
        }
        self.tree.refit(sibling);
        self.attach_sibling(id, sibling);
    }

    /// Fix statistics and hand back the tree.
    pub fn finish(mut self) -> Result<SpatialTree<B, S>> {
        self.tree.fix_statistics(&mut self.cursor)?;
        Ok(self.tree)
    }
}

/// Insert every point of `points` in index order with the default policies.
pub fn build<B, S, P>(points: &P, params: &TreeParams) -> Result<SpatialTree<B, S>>
where
    B: Bound,
    S: Statistic<B>,
    P: PointSource,
{
    if points.is_empty() {
        return Err(Error::EmptyDataset);
    }
    let mut builder = RectangleTreeBuilder::new(points.dim(), points.cursor(), *params)?;
    for i in 0..points.len() {
        builder.insert_point(i)?;
    }
    let tree = builder.finish()?;
    tracing::debug!(
        points = points.len(),
        nodes = tree.len(),
        depth = tree.depth(),
        "rectangle tree built"
    );
    Ok(tree)
}
