// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! All-k-nearest-neighbors on top of the generic traversal.
//!
//! Distances are squared Euclidean. Each query point keeps an insertion
//! sorted [`NeighborList`] ordered by `(distance, index)`, so ties resolve
//! the same way no matter which grain or thread saw a candidate first. When
//! queries and references are the same set, a point is never its own
//! neighbor.
//!
//! ## Pruning bound
//!
//! For query node `Q` the rules track the largest and smallest current k-th
//! distance over its points (`max_kth`, `min_kth`). With `R` the node's
//! furthest-descendant distance, every point of `Q` has k candidates within
//! `sqrt(min_kth) + 2R`, so a reference node is pruned when its lower bound
//! strictly exceeds `min(max_kth, (sqrt(min_kth) + 2R)^2)`.

use serde::{Deserialize, Serialize};

use crate::bound::{Bound, HRectBound, squared_distance};
use crate::builders::{TreeParams, build_tree};
use crate::error::{Error, Result};
use crate::points::{PointSet, PointSource};
use crate::statistic::{DescendantRadius, FurthestDescendant, Statistic};
use crate::traversal::{DualTreeTraversal, GlobalResult, Mode, TraversalRules, TraversalStats};
use crate::tree::{Node, NodeId, SpatialTree};

/// Slack applied to the radius bound so rounding never prunes a true neighbor.
const BOUND_SLACK: f64 = 1e-9;

/// One candidate neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Reference point index.
    pub index: usize,
    /// Squared distance to the query point.
    pub distance: f64,
}

impl Neighbor {
    fn precedes(&self, other: &Self) -> bool {
        self.distance < other.distance
            || (self.distance == other.distance && self.index < other.index)
    }
}

/// The best candidates seen so far for one query point, closest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborList {
    entries: Vec<Neighbor>,
}

impl NeighborList {
    /// Offer `candidate`, keeping at most `k` entries. Returns `true` if it was kept.
    pub fn insert(&mut self, k: usize, candidate: Neighbor) -> bool {
        if self.entries.len() == k
            && !self
                .entries
                .last()
                .is_some_and(|last| candidate.precedes(last))
        {
            return false;
        }
        let at = self.entries.partition_point(|e| e.precedes(&candidate));
        self.entries.insert(at, candidate);
        self.entries.truncate(k);
        true
    }

    /// Distance of the k-th candidate, or infinity while fewer than `k` are known.
    ///
    /// # Panics
    ///
    /// Panics if `k` is zero.
    pub fn kth(&self, k: usize) -> f64 {
        if self.entries.len() < k {
            f64::INFINITY
        } else {
            self.entries[k - 1].distance
        }
    }

    /// Fold in another list for the same query point.
    pub fn merge(&mut self, k: usize, other: &Self) {
        for &n in &other.entries {
            if self.entries.iter().all(|e| e.index != n.index) {
                self.insert(k, n);
            }
        }
    }

    /// Candidates, closest first.
    pub fn as_slice(&self) -> &[Neighbor] {
        &self.entries
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no candidate is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Neighbor indices and distances shaped `k × n_queries`, column-major.
///
/// Column `j` holds query `j`'s neighbors sorted by ascending distance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeighborTable {
    k: usize,
    indices: Vec<usize>,
    distances: Vec<f64>,
}

impl NeighborTable {
    /// Assemble from one full list per query point.
    pub fn from_lists<'a, I>(k: usize, lists: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a NeighborList>,
    {
        let mut indices = Vec::new();
        let mut distances = Vec::new();
        for (j, list) in lists.into_iter().enumerate() {
            if list.len() != k {
                return Err(Error::Invariant(format!(
                    "query {j} has {} neighbors, expected {k}",
                    list.len()
                )));
            }
            indices.extend(list.as_slice().iter().map(|n| n.index));
            distances.extend(list.as_slice().iter().map(|n| n.distance));
        }
        Ok(Self {
            k,
            indices,
            distances,
        })
    }

    /// Neighbors per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of query points.
    pub fn n_queries(&self) -> usize {
        self.indices.len().checked_div(self.k).unwrap_or(0)
    }

    /// Neighbor indices of query `j`.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.n_queries()`.
    pub fn indices(&self, j: usize) -> &[usize] {
        &self.indices[j * self.k..(j + 1) * self.k]
    }

    /// Neighbor distances of query `j`.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.n_queries()`.
    pub fn distances(&self, j: usize) -> &[f64] {
        &self.distances[j * self.k..(j + 1) * self.k]
    }

    /// The whole index table, column-major.
    pub fn index_table(&self) -> &[usize] {
        &self.indices
    }

    /// The whole distance table, column-major.
    pub fn distance_table(&self) -> &[f64] {
        &self.distances
    }

    /// Largest relative distance difference against `other`, or `None` if
    /// the neighbor indices differ anywhere.
    pub fn max_relative_difference(&self, other: &Self) -> Option<f64> {
        if self.k != other.k || self.indices != other.indices {
            return None;
        }
        Some(
            self.distances
                .iter()
                .zip(&other.distances)
                .map(|(a, b)| (a - b).abs() / a.abs().max(b.abs()).max(f64::MIN_POSITIVE))
                .fold(0.0, f64::max),
        )
    }
}

/// Immutable parameters of one k-NN run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnnParam {
    /// Neighbors per query point.
    pub k: usize,
    /// Traversal mode.
    pub mode: Mode,
    /// Tree construction limits.
    pub tree: TreeParams,
}

impl Default for KnnParam {
    fn default() -> Self {
        Self {
            k: 1,
            mode: Mode::DualTree,
            tree: TreeParams::default(),
        }
    }
}

impl KnnParam {
    /// Parameters from mode flags; `naive` wins over `single`.
    pub fn from_flags(k: usize, naive: bool, single: bool, tree: TreeParams) -> Self {
        let mode = if naive {
            Mode::Naive
        } else if single {
            Mode::SingleTree
        } else {
            Mode::DualTree
        };
        Self { k, mode, tree }
    }

    /// Check `k` against the reference set size and the tree limits.
    pub fn validate(&self, n_references: usize, monochromatic: bool) -> Result<()> {
        self.tree.validate()?;
        let available = n_references.saturating_sub(usize::from(monochromatic));
        if self.k == 0 || self.k > available {
            return Err(Error::InvalidParameter(format!(
                "k = {} but only {available} candidate neighbors per query",
                self.k
            )));
        }
        Ok(())
    }
}

/// Run-wide k-NN aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnnSummary {
    /// Traversal work counters.
    pub traversal: TraversalStats,
    /// Query points finished.
    pub queries: u64,
    /// Sum of all reported neighbor distances.
    pub distance_sum: f64,
}

impl KnnSummary {
    /// Record a finished query list.
    pub fn record(&mut self, list: &NeighborList) {
        self.queries += 1;
        self.distance_sum += list.as_slice().iter().map(|n| n.distance).sum::<f64>();
    }
}

impl GlobalResult for KnnSummary {
    fn accumulate(&mut self, other: &Self) {
        self.traversal.accumulate(&other.traversal);
        self.queries += other.queries;
        self.distance_sum += other.distance_sum;
    }
}

/// k-NN traversal rules.
///
/// Lists are indexed by global query index and node scratch by query-tree
/// slot, so one instance can serve several disjoint grains in turn.
#[derive(Clone, Debug)]
pub struct KnnRules {
    k: usize,
    exclude_self: bool,
    lists: Vec<NeighborList>,
    // (max_kth, min_kth) per query node.
    scratch: Vec<(f64, f64)>,
}

impl KnnRules {
    /// Rules for `n_queries` points over a query tree with `n_query_slots` arena slots.
    pub fn new(k: usize, n_queries: usize, n_query_slots: usize, monochromatic: bool) -> Self {
        Self {
            k,
            exclude_self: monochromatic,
            lists: vec![NeighborList::default(); n_queries],
            scratch: vec![(f64::INFINITY, f64::INFINITY); n_query_slots],
        }
    }

    /// Current list of query `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the `n_queries` given to [`KnnRules::new`].
    pub fn list(&self, index: usize) -> &NeighborList {
        &self.lists[index]
    }

    /// Move out the list of query `index`, leaving it empty.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the `n_queries` given to [`KnnRules::new`].
    pub fn take_list(&mut self, index: usize) -> NeighborList {
        core::mem::take(&mut self.lists[index])
    }

    fn node_bound<B, S: DescendantRadius>(&self, id: NodeId, node: &Node<B, S>) -> f64 {
        let (max_kth, min_kth) = self.scratch[id.index()];
        let radius = node.stat().furthest_descendant();
        let spread = min_kth.sqrt() + 2.0 * radius;
        max_kth.min(spread * spread * (1.0 + BOUND_SLACK))
    }
}

impl<B: Bound, S: Statistic<B> + DescendantRadius> TraversalRules<B, S> for KnnRules {
    fn score_nodes(&mut self, query: NodeId, q: &Node<B, S>, r: &Node<B, S>) -> Option<f64> {
        let d = q.bound().min_distance(r.bound());
        (d <= self.node_bound(query, q)).then_some(d)
    }

    fn score_point(&mut self, query: usize, point: &[f64], r: &Node<B, S>) -> Option<f64> {
        let d = r.bound().min_distance_point(point);
        (d <= self.lists[query].kth(self.k)).then_some(d)
    }

    fn base_case(&mut self, query: usize, q: &[f64], reference: usize, r: &[f64]) {
        if self.exclude_self && query == reference {
            return;
        }
        let distance = squared_distance(q, r);
        self.lists[query].insert(
            self.k,
            Neighbor {
                index: reference,
                distance,
            },
        );
    }

    fn update_leaf(&mut self, query: NodeId, node: &Node<B, S>) {
        let mut max_kth = f64::NEG_INFINITY;
        let mut min_kth = f64::INFINITY;
        for &i in node.points() {
            let kth = self.lists[i].kth(self.k);
            max_kth = max_kth.max(kth);
            min_kth = min_kth.min(kth);
        }
        if node.points().is_empty() {
            max_kth = f64::INFINITY;
        }
        self.scratch[query.index()] = (max_kth, min_kth);
    }

    fn update_internal(&mut self, query: NodeId, node: &Node<B, S>) {
        let mut max_kth = f64::NEG_INFINITY;
        let mut min_kth = f64::INFINITY;
        for &c in node.children() {
            let (hi, lo) = self.scratch[c.index()];
            max_kth = max_kth.max(hi);
            min_kth = min_kth.min(lo);
        }
        if node.children().is_empty() {
            max_kth = f64::INFINITY;
        }
        self.scratch[query.index()] = (max_kth, min_kth);
    }
}

/// Serial all-k-nearest-neighbors over any [`PointSource`].
///
/// ```rust
/// use canopy_index::{AllKnn, KnnParam, PointSet};
///
/// let points = PointSet::from_columns(1, vec![0.0, 1.0, 3.0, 7.0]).unwrap();
/// let param = KnnParam { k: 2, ..KnnParam::default() };
/// let mut knn: AllKnn<'_> = AllKnn::new(&points, param).unwrap();
/// let table = knn.compute_neighbors().unwrap();
/// assert_eq!(table.indices(0), &[1, 2]);
/// assert_eq!(table.distances(0), &[1.0, 9.0]);
/// ```
pub struct AllKnn<'a, B = HRectBound, S = FurthestDescendant, P = PointSet> {
    references: &'a P,
    queries: Option<&'a P>,
    reference_tree: SpatialTree<B, S>,
    query_tree: Option<SpatialTree<B, S>>,
    param: KnnParam,
    summary: KnnSummary,
}

impl<B: Bound, S: Statistic<B>, P> core::fmt::Debug for AllKnn<'_, B, S, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AllKnn")
            .field("param", &self.param)
            .field("reference_tree", &self.reference_tree)
            .field("bichromatic", &self.queries.is_some())
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl<'a, B, S, P> AllKnn<'a, B, S, P>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
    P: PointSource,
{
    /// Neighbors of every point among the other points of the same set.
    pub fn new(points: &'a P, param: KnnParam) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::EmptyDataset);
        }
        param.validate(points.len(), true)?;
        Ok(Self {
            references: points,
            queries: None,
            reference_tree: build_tree(points, &param.tree)?,
            query_tree: None,
            param,
            summary: KnnSummary::default(),
        })
    }

    /// Neighbors of every point of `queries` among `references`.
    pub fn bichromatic(
        queries: &'a P,
        references: &'a P,
        param: KnnParam,
    ) -> Result<Self> {
        if queries.is_empty() || references.is_empty() {
            return Err(Error::EmptyDataset);
        }
        if queries.dim() != references.dim() {
            return Err(Error::DimensionMismatch {
                expected: references.dim(),
                actual: queries.dim(),
            });
        }
        param.validate(references.len(), false)?;
        Ok(Self {
            references,
            queries: Some(queries),
            reference_tree: build_tree(references, &param.tree)?,
            query_tree: Some(build_tree(queries, &param.tree)?),
            param,
            summary: KnnSummary::default(),
        })
    }

    /// The reference tree.
    pub fn reference_tree(&self) -> &SpatialTree<B, S> {
        &self.reference_tree
    }

    /// Aggregate of the last [`compute_neighbors`](Self::compute_neighbors) call.
    pub fn summary(&self) -> &KnnSummary {
        &self.summary
    }

    /// Run the search.
    pub fn compute_neighbors(&mut self) -> Result<NeighborTable> {
        let queries = self.queries.unwrap_or(self.references);
        let query_tree = self.query_tree.as_ref().unwrap_or(&self.reference_tree);
        let rules = KnnRules::new(
            self.param.k,
            queries.len(),
            query_tree.slot_count(),
            self.queries.is_none(),
        );
        let mut traversal = DualTreeTraversal::new(
            query_tree,
            queries.cursor(),
            &self.reference_tree,
            self.references.cursor(),
            rules,
            self.param.mode,
        )?;
        traversal.traverse(query_tree.root())?;
        let (rules, stats) = traversal.into_parts();

        let mut summary = KnnSummary {
            traversal: stats,
            ..KnnSummary::default()
        };
        for i in 0..queries.len() {
            summary.record(rules.list(i));
        }
        self.summary = summary;
        tracing::debug!(
            queries = queries.len(),
            k = self.param.k,
            mode = ?self.param.mode,
            pruned = stats.pruned,
            "all-knn finished"
        );
        NeighborTable::from_lists(self.param.k, (0..queries.len()).map(|i| rules.list(i)))
    }
}
