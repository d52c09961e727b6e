// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generic dual-tree traversal.
//!
//! ## Overview
//!
//! [`DualTreeTraversal`] walks a query subtree against a reference tree and
//! delegates every decision that depends on the problem to a
//! [`TraversalRules`] implementation:
//!
//! - `score_nodes` / `score_point` return a lower bound for a pair, or `None`
//!   to prune it.
//! - `base_case` sees one query point and one reference point.
//! - `update_leaf` / `update_internal` refresh per-query-node state once a
//!   query node's work is done.
//!
//! ## Modes
//!
//! - [`Mode::Naive`]: every query point under the visited node meets every
//!   reference point. Nothing is pruned.
//! - [`Mode::SingleTree`]: each query point descends the reference tree on
//!   its own.
//! - [`Mode::DualTree`]: node pairs recurse together. The node with the larger
//!   diameter (or the internal one) is expanded; reference children are
//!   visited closest-first.
//!
//! All three give identical results when the rules' pruning is sound.

use core::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::bound::Bound;
use crate::error::{Error, Result};
use crate::points::PointCursor;
use crate::statistic::Statistic;
use crate::tree::{Node, NodeId, SpatialTree};

/// How a traversal walks the trees.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Exhaustive evaluation.
    Naive,
    /// One query point at a time against the reference tree.
    SingleTree,
    /// Query and reference trees together.
    #[default]
    DualTree,
}

/// A run-wide aggregate merged across grains, threads, and peers.
///
/// `accumulate` must be associative and commutative.
pub trait GlobalResult: Clone + Debug + Default + Send {
    /// Fold `other` into `self`.
    fn accumulate(&mut self, other: &Self);
}

/// Work counters for one or more traversals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalStats {
    /// Node pairs (or point/node pairs in single-tree mode) scored.
    pub node_pairs: u64,
    /// Pairs discarded by the rules.
    pub pruned: u64,
    /// Leaf/leaf evaluations.
    pub base_cases: u64,
    /// Point/point evaluations.
    pub distance_evaluations: u64,
}

impl GlobalResult for TraversalStats {
    fn accumulate(&mut self, other: &Self) {
        self.node_pairs += other.node_pairs;
        self.pruned += other.pruned;
        self.base_cases += other.base_cases;
        self.distance_evaluations += other.distance_evaluations;
    }
}

/// Problem-specific decisions for a traversal.
pub trait TraversalRules<B, S> {
    /// Lower bound for the node pair, or `None` if it cannot improve any
    /// result under `query`.
    fn score_nodes(&mut self, query: NodeId, q: &Node<B, S>, r: &Node<B, S>) -> Option<f64>;

    /// Lower bound for a single query point against a reference node, or
    /// `None` to prune.
    fn score_point(&mut self, query: usize, point: &[f64], r: &Node<B, S>) -> Option<f64>;

    /// Evaluate one point pair.
    fn base_case(&mut self, query: usize, q: &[f64], reference: usize, r: &[f64]);

    /// Refresh state of leaf `query` after base cases touched it.
    fn update_leaf(&mut self, query: NodeId, node: &Node<B, S>);

    /// Refresh state of internal `query` from its children.
    fn update_internal(&mut self, query: NodeId, node: &Node<B, S>);
}

/// One traversal instance over a query tree and a reference tree.
///
/// The trees may be the same tree. Point coordinates are read through
/// cursors, so query and reference points may live in paged storage.
pub struct DualTreeTraversal<'t, B, S, QC, RC, R> {
    query: &'t SpatialTree<B, S>,
    reference: &'t SpatialTree<B, S>,
    query_points: QC,
    reference_points: RC,
    rules: R,
    mode: Mode,
    stats: TraversalStats,
    reference_all: Option<Vec<usize>>,
}

impl<B: Bound, S: Statistic<B>, QC, RC, R> Debug for DualTreeTraversal<'_, B, S, QC, RC, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DualTreeTraversal")
            .field("mode", &self.mode)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<'t, B, S, QC, RC, R> DualTreeTraversal<'t, B, S, QC, RC, R>
where
    B: Bound,
    S: Statistic<B>,
    QC: PointCursor,
    RC: PointCursor,
    R: TraversalRules<B, S>,
{
    /// Set up a traversal.
    ///
    /// Fails if either tree has stale statistics or the dimensions differ.
    pub fn new(
        query: &'t SpatialTree<B, S>,
        query_points: QC,
        reference: &'t SpatialTree<B, S>,
        reference_points: RC,
        rules: R,
        mode: Mode,
    ) -> Result<Self> {
        if query.stats_stale() || reference.stats_stale() {
            return Err(Error::StaleStatistics);
        }
        if query.dim() != reference.dim() {
            return Err(Error::DimensionMismatch {
                expected: reference.dim(),
                actual: query.dim(),
            });
        }
        Ok(Self {
            query,
            reference,
            query_points,
            reference_points,
            rules,
            mode,
            stats: TraversalStats::default(),
            reference_all: None,
        })
    }

    /// Counters so far.
    pub fn stats(&self) -> &TraversalStats {
        &self.stats
    }

    /// The rules, for inspecting intermediate state.
    pub fn rules(&self) -> &R {
        &self.rules
    }

    /// Give back the rules and the counters.
    pub fn into_parts(self) -> (R, TraversalStats) {
        (self.rules, self.stats)
    }

    /// Process every query point under `query_node` against the whole reference tree.
    pub fn traverse(&mut self, query_node: NodeId) -> Result<()> {
        match self.mode {
            Mode::Naive => self.naive(query_node),
            Mode::SingleTree => {
                let root = self.reference.root();
                for qi in self.query.descendant_points(query_node) {
                    let q = self.query_points.point(qi)?.to_vec();
                    self.single(qi, &q, root)?;
                }
                Ok(())
            }
            Mode::DualTree => self.dual(query_node, self.reference.root()),
        }
    }

    fn naive(&mut self, query_node: NodeId) -> Result<()> {
        let reference_all = match self.reference_all.take() {
            Some(all) => all,
            None => self.reference.descendant_points(self.reference.root()),
        };
        let queries = self.query.descendant_points(query_node);
        self.stats.node_pairs += 1;
        self.stats.base_cases += 1;
        for &qi in &queries {
            let q = self.query_points.point(qi)?;
            for &ri in &reference_all {
                let r = self.reference_points.point(ri)?;
                self.rules.base_case(qi, q, ri, r);
            }
        }
        self.stats.distance_evaluations += (queries.len() * reference_all.len()) as u64;
        self.reference_all = Some(reference_all);
        Ok(())
    }

    fn single(&mut self, qi: usize, q: &[f64], r: NodeId) -> Result<()> {
        let tree = self.reference;
        let node = tree.node(r);
        self.stats.node_pairs += 1;
        if self.rules.score_point(qi, q, node).is_none() {
            self.stats.pruned += 1;
            return Ok(());
        }
        if node.is_leaf() {
            self.stats.base_cases += 1;
            for &ri in node.points() {
                let p = self.reference_points.point(ri)?;
                self.rules.base_case(qi, q, ri, p);
            }
            self.stats.distance_evaluations += node.points().len() as u64;
            return Ok(());
        }
        let mut order: Vec<(f64, NodeId)> = node
            .children()
            .iter()
            .map(|&c| (tree.node(c).bound().min_distance_point(q), c))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, c) in order {
            self.single(qi, q, c)?;
        }
        Ok(())
    }

    fn dual(&mut self, q: NodeId, r: NodeId) -> Result<()> {
        let (qtree, rtree) = (self.query, self.reference);
        let (qnode, rnode) = (qtree.node(q), rtree.node(r));
        self.stats.node_pairs += 1;
        if self.rules.score_nodes(q, qnode, rnode).is_none() {
            self.stats.pruned += 1;
            return Ok(());
        }
        match (qnode.is_leaf(), rnode.is_leaf()) {
            (true, true) => {
                self.stats.base_cases += 1;
                for &qi in qnode.points() {
                    let qp = self.query_points.point(qi)?;
                    for &ri in rnode.points() {
                        let rp = self.reference_points.point(ri)?;
                        self.rules.base_case(qi, qp, ri, rp);
                    }
                }
                self.stats.distance_evaluations +=
                    (qnode.points().len() * rnode.points().len()) as u64;
                self.rules.update_leaf(q, qnode);
            }
            (true, false) => self.expand_reference(q, qnode, rnode)?,
            (false, true) => self.expand_query(q, qnode, r)?,
            (false, false) => {
                if qnode.bound().diameter() >= rnode.bound().diameter() {
                    self.expand_query(q, qnode, r)?;
                } else {
                    self.expand_reference(q, qnode, rnode)?;
                }
            }
        }
        Ok(())
    }

    fn expand_query(&mut self, q: NodeId, qnode: &Node<B, S>, r: NodeId) -> Result<()> {
        for &qc in qnode.children() {
            self.dual(qc, r)?;
        }
        self.rules.update_internal(q, qnode);
        Ok(())
    }

    fn expand_reference(
        &mut self,
        q: NodeId,
        qnode: &Node<B, S>,
        rnode: &Node<B, S>,
    ) -> Result<()> {
        let rtree = self.reference;
        let mut order: Vec<(f64, NodeId)> = rnode
            .children()
            .iter()
            .map(|&c| (qnode.bound().min_distance(rtree.node(c).bound()), c))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, rc) in order {
            self.dual(q, rc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::bound::HRectBound;
    use crate::builders::{TreeParams, midpoint};
    use crate::points::{PointSet, PointSource};
    use crate::statistic::NoStatistic;

    /// Counts how often each query point met each reference point.
    #[derive(Default)]
    struct PairCounter {
        seen: Vec<Vec<u32>>,
    }

    type TestNode = Node<HRectBound, NoStatistic>;

    impl TraversalRules<HRectBound, NoStatistic> for PairCounter {
        fn score_nodes(&mut self, _: NodeId, q: &TestNode, r: &TestNode) -> Option<f64> {
            Some(q.bound().min_distance(r.bound()))
        }
        fn score_point(&mut self, _: usize, p: &[f64], r: &TestNode) -> Option<f64> {
            Some(r.bound().min_distance_point(p))
        }
        fn base_case(&mut self, q: usize, _: &[f64], r: usize, _: &[f64]) {
            self.seen[q][r] += 1;
        }
        fn update_leaf(&mut self, _: NodeId, _: &TestNode) {}
        fn update_internal(&mut self, _: NodeId, _: &TestNode) {}
    }

    fn grid(n: usize) -> PointSet {
        PointSet::from_points((0..n).map(|i| [(i % 7) as f64, (i / 7) as f64])).unwrap()
    }

    #[test]
    fn every_pair_visited_exactly_once_without_pruning() {
        let set = grid(40);
        let params = TreeParams {
            max_leaf_size: 3,
            min_leaf_size: 1,
            ..TreeParams::default()
        };
        let tree: SpatialTree<HRectBound> = midpoint::build(&set, &params).unwrap();
        for mode in [Mode::Naive, Mode::SingleTree, Mode::DualTree] {
            let rules = PairCounter {
                seen: vec![vec![0; 40]; 40],
            };
            let mut t =
                DualTreeTraversal::new(&tree, set.cursor(), &tree, set.cursor(), rules, mode)
                    .unwrap();
            t.traverse(tree.root()).unwrap();
            let (rules, stats) = t.into_parts();
            assert!(
                rules.seen.iter().flatten().all(|&c| c == 1),
                "{mode:?} missed or repeated a pair"
            );
            assert_eq!(stats.distance_evaluations, 1600);
            assert_eq!(stats.pruned, 0);
        }
    }

    #[test]
    fn stale_trees_are_refused() {
        let set = grid(10);
        let mut builder = crate::builders::rectangle::RectangleTreeBuilder::<
            HRectBound,
            NoStatistic,
            _,
        >::new(2, set.cursor(), TreeParams::default())
        .unwrap();
        builder.insert_point(0).unwrap();
        let stale = builder.tree();
        let err = DualTreeTraversal::new(
            stale,
            set.cursor(),
            stale,
            set.cursor(),
            PairCounter::default(),
            Mode::DualTree,
        )
        .unwrap_err();
        assert_eq!(err, Error::StaleStatistics);
    }

    #[test]
    fn stats_accumulate_is_associative() {
        let stats = |node_pairs, pruned, base_cases, distance_evaluations| TraversalStats {
            node_pairs,
            pruned,
            base_cases,
            distance_evaluations,
        };
        let parts = [stats(3, 1, 2, 9), stats(5, 0, 4, 1), stats(7, 6, 0, 2)];
        let mut left = parts[0];
        left.accumulate(&parts[1]);
        left.accumulate(&parts[2]);
        let mut right = parts[1];
        right.accumulate(&parts[2]);
        let mut grouped = parts[0];
        grouped.accumulate(&right);
        assert_eq!(left, grouped);
        assert_eq!(left.node_pairs, 15);
    }

    fn fold(parts: &[TraversalStats]) -> TraversalStats {
        let mut acc = TraversalStats::default();
        for p in parts {
            acc.accumulate(p);
        }
        acc
    }

    proptest! {
        #[test]
        fn stats_grouping_matches_serial_fold(
            parts in prop::collection::vec(prop::array::uniform4(0..1_000_000_u64), 0..16),
            cut in any::<prop::sample::Index>(),
        ) {
            let parts: Vec<_> = parts
                .into_iter()
                .map(|[node_pairs, pruned, base_cases, distance_evaluations]| TraversalStats {
                    node_pairs,
                    pruned,
                    base_cases,
                    distance_evaluations,
                })
                .collect();
            let serial = fold(&parts);
            let at = cut.index(parts.len() + 1);
            let mut grouped = fold(&parts[..at]);
            grouped.accumulate(&fold(&parts[at..]));
            prop_assert_eq!(grouped, serial);
            let mut reversed = parts.clone();
            reversed.reverse();
            prop_assert_eq!(fold(&reversed), serial);
            prop_assert_eq!(
                serial.pruned,
                parts.iter().map(|p| p.pruned).sum::<u64>()
            );
        }
    }
}
