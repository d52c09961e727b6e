// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The threaded solver.

use std::thread;

use canopy_index::{
    Bound, DescendantRadius, DualTreeTraversal, GlobalResult, KnnParam, KnnRules, KnnSummary,
    NeighborList, PointSource, SpatialTree, Statistic,
};
use canopy_paged::PagedArray;

use crate::error::{Result, SolverError};
use crate::work::WorkQueue;

/// A tree and the points it indexes.
pub struct Dataset<'a, B, S, P> {
    /// Tree over `points`, with fresh statistics.
    pub tree: &'a SpatialTree<B, S>,
    /// Coordinates.
    pub points: &'a P,
}

impl<B: Bound, S: Statistic<B>, P: core::fmt::Debug> core::fmt::Debug for Dataset<'_, B, S, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dataset")
            .field("tree", &self.tree)
            .field("points", &self.points)
            .finish()
    }
}

impl<B, S, P> Clone for Dataset<'_, B, S, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, S, P> Copy for Dataset<'_, B, S, P> {}

/// Runs `n_threads` workers that drain a [`WorkQueue`].
///
/// Every worker owns its [`KnnRules`] and traversal. For each grain it
/// traverses the grain's query nodes against the whole reference tree,
/// writes the finished neighbor lists into the shared results array and
/// folds the grain's counters into its own partial [`KnnSummary`]. Partials
/// come back by value when the worker exits and are merged here.
pub struct ThreadedSolver<'a, B, S, P> {
    param: &'a KnnParam,
    n_threads: usize,
    queries: Dataset<'a, B, S, P>,
    references: Dataset<'a, B, S, P>,
    monochromatic: bool,
}

impl<B: Bound, S: Statistic<B>, P: core::fmt::Debug> core::fmt::Debug
    for ThreadedSolver<'_, B, S, P>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadedSolver")
            .field("param", &self.param)
            .field("n_threads", &self.n_threads)
            .field("queries", &self.queries)
            .field("references", &self.references)
            .field("monochromatic", &self.monochromatic)
            .finish()
    }
}

impl<'a, B, S, P> ThreadedSolver<'a, B, S, P>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
    P: PointSource,
{
    /// Queries and references are the same dataset; points never match themselves.
    pub fn monochromatic(param: &'a KnnParam, n_threads: usize, data: Dataset<'a, B, S, P>) -> Self {
        Self {
            param,
            n_threads: n_threads.max(1),
            queries: data,
            references: data,
            monochromatic: true,
        }
    }

    /// Distinct query and reference datasets.
    pub fn bichromatic(
        param: &'a KnnParam,
        n_threads: usize,
        queries: Dataset<'a, B, S, P>,
        references: Dataset<'a, B, S, P>,
    ) -> Self {
        Self {
            param,
            n_threads: n_threads.max(1),
            queries,
            references,
            monochromatic: false,
        }
    }

    /// Drain `queue`, writing each query's list to `results[query]`.
    ///
    /// Returns the merged summary of every grain this call processed.
    pub fn solve(
        &self,
        queue: &dyn WorkQueue,
        results: &PagedArray<NeighborList>,
    ) -> Result<KnnSummary> {
        tracing::info!(
            n_threads = self.n_threads,
            mode = ?self.param.mode,
            k = self.param.k,
            "solver started"
        );
        let outcomes: Vec<Result<KnnSummary>> = thread::scope(|s| {
            let handles: Vec<_> = (0..self.n_threads)
                .map(|worker| {
                    thread::Builder::new()
                        .name(format!("canopy-worker-{worker}"))
                        .spawn_scoped(s, move || self.worker(worker, queue, results))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or(Err(SolverError::WorkerPanicked(worker))),
                    Err(err) => Err(err.into()),
                })
                .collect()
        });
        let mut summary = KnnSummary::default();
        for outcome in outcomes {
            summary.accumulate(&outcome?);
        }
        tracing::info!(
            queries = summary.queries,
            pruned = summary.traversal.pruned,
            base_cases = summary.traversal.base_cases,
            "solver finished"
        );
        Ok(summary)
    }

    fn worker(
        &self,
        worker: usize,
        queue: &dyn WorkQueue,
        results: &PagedArray<NeighborList>,
    ) -> Result<KnnSummary> {
        let (qtree, rtree) = (self.queries.tree, self.references.tree);
        let mut rules = KnnRules::new(
            self.param.k,
            self.queries.points.len(),
            qtree.slot_count(),
            self.monochromatic,
        );
        let mut partial = KnnSummary::default();
        while let Some(grain) = queue.get_work()? {
            let mut traversal = DualTreeTraversal::new(
                qtree,
                self.queries.points.cursor(),
                rtree,
                self.references.points.cursor(),
                rules,
                self.param.mode,
            )?;
            for &node in &grain.nodes {
                traversal.traverse(node)?;
            }
            let (finished, stats) = traversal.into_parts();
            rules = finished;
            partial.traversal.accumulate(&stats);
            let mut written = 0_usize;
            for &node in &grain.nodes {
                for query in qtree.descendant_points(node) {
                    let list = rules.take_list(query);
                    partial.record(&list);
                    results.set(query, list)?;
                    written += 1;
                }
            }
            tracing::debug!(worker, grain = grain.id, written, "grain finished");
        }
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    use canopy_index::{
        AllKnn, FurthestDescendant, HRectBound, Mode, NeighborTable, PointSet, build_tree,
    };
    use canopy_paged::AccessMode;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::work::{Grain, SimpleWorkQueue};

    type Tree = SpatialTree<HRectBound, FurthestDescendant>;

    fn points(seed: u64, n: usize) -> PointSet {
        let mut rng = StdRng::seed_from_u64(seed);
        PointSet::from_columns(3, (0..n * 3).map(|_| rng.gen_range(0.0..1.0)).collect()).unwrap()
    }

    fn table(k: usize, results: &PagedArray<NeighborList>) -> NeighborTable {
        NeighborTable::from_lists(k, results.to_vec().unwrap().iter()).unwrap()
    }

    #[test]
    fn threads_and_grains_do_not_change_results() {
        let set = points(1, 300);
        for mode in [Mode::Naive, Mode::SingleTree, Mode::DualTree] {
            let param = KnnParam {
                k: 4,
                mode,
                ..KnnParam::default()
            };
            let tree: Tree = build_tree(&set, &param.tree).unwrap();
            let mut serial: AllKnn<'_> = AllKnn::new(&set, param).unwrap();
            let expected = serial.compute_neighbors().unwrap();
            for (threads, grains) in [(1, 1), (3, 9), (4, 64)] {
                let data = Dataset {
                    tree: &tree,
                    points: &set,
                };
                let solver = ThreadedSolver::monochromatic(&param, threads, data);
                let queue = SimpleWorkQueue::new(&tree, grains);
                let results = PagedArray::in_memory(
                    set.len(),
                    32,
                    NeighborList::default(),
                    AccessMode::Create,
                )
                .unwrap();
                let summary = solver.solve(&queue, &results).unwrap();
                assert_eq!(summary.queries, 300);
                let diff = expected.max_relative_difference(&table(4, &results));
                assert!(diff.is_some_and(|d| d <= 1e-12), "{mode:?} {threads}/{grains}: {diff:?}");
            }
        }
    }

    #[test]
    fn bichromatic_solve() {
        let queries = points(2, 50);
        let references = points(3, 80);
        let param = KnnParam {
            k: 2,
            ..KnnParam::default()
        };
        let qtree: Tree = build_tree(&queries, &param.tree).unwrap();
        let rtree: Tree = build_tree(&references, &param.tree).unwrap();
        let solver = ThreadedSolver::bichromatic(
            &param,
            2,
            Dataset {
                tree: &qtree,
                points: &queries,
            },
            Dataset {
                tree: &rtree,
                points: &references,
            },
        );
        let results =
            PagedArray::in_memory(50, 16, NeighborList::default(), AccessMode::Create).unwrap();
        solver.solve(&SimpleWorkQueue::new(&qtree, 6), &results).unwrap();
        let mut serial: AllKnn<'_> = AllKnn::bichromatic(&queries, &references, param).unwrap();
        assert_eq!(table(2, &results), serial.compute_neighbors().unwrap());
    }

    struct FailingQueue;

    impl WorkQueue for FailingQueue {
        fn get_work(&self) -> Result<Option<Grain>> {
            Err(SolverError::Transport("master went away".into()))
        }
    }

    #[test]
    fn queue_errors_surface() {
        let set = points(4, 20);
        let param = KnnParam::default();
        let tree: Tree = build_tree(&set, &param.tree).unwrap();
        let solver = ThreadedSolver::monochromatic(
            &param,
            2,
            Dataset {
                tree: &tree,
                points: &set,
            },
        );
        let results =
            PagedArray::in_memory(20, 8, NeighborList::default(), AccessMode::Create).unwrap();
        assert!(matches!(
            solver.solve(&FailingQueue, &results),
            Err(SolverError::Transport(_))
        ));
    }
}
