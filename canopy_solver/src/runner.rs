// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One runner for monochromatic and bichromatic searches on this machine.

use core::marker::PhantomData;
use std::sync::Arc;

use canopy_index::{
    Bound, DescendantRadius, FurthestDescendant, HRectBound, KnnParam, KnnSummary, NeighborList,
    NeighborTable, PointSet, PointSource, SpatialTree, Statistic, build_tree,
};
use canopy_paged::{AccessMode, BlockStore, FileStore, MemoryStore, PagedArray, PagedPoints};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::settings::{Settings, SolverConfig, StorageKind};
use crate::solver::{Dataset, ThreadedSolver};
use crate::work::SimpleWorkQueue;

/// What a run produces.
#[derive(Clone, Debug, PartialEq)]
pub struct KnnOutput {
    /// Neighbor indices and distances, `k` per query, column-major.
    pub neighbors: NeighborTable,
    /// Merged counters of every worker.
    pub summary: KnnSummary,
    /// Grains the query tree was cut into.
    pub n_grains: usize,
}

/// Threaded all-k-nearest-neighbors over paged copies of the inputs.
///
/// ```rust
/// use canopy_index::{KnnParam, PointSet};
/// use canopy_solver::{KnnRunner, SolverConfig};
///
/// let points = PointSet::from_columns(1, vec![0.0, 1.0, 3.0, 7.0]).unwrap();
/// let config = SolverConfig { n_threads: 2, ..SolverConfig::default() };
/// let runner: KnnRunner = KnnRunner::new(KnnParam::default(), config).unwrap();
/// let out = runner.monochromatic(&points).unwrap();
/// assert_eq!(out.neighbors.index_table(), &[1, 0, 1, 2]);
/// ```
#[derive(Debug)]
pub struct KnnRunner<B = HRectBound, S = FurthestDescendant> {
    param: KnnParam,
    config: SolverConfig,
    _marker: PhantomData<fn() -> (B, S)>,
}

impl<B, S> KnnRunner<B, S>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
{
    /// Check and keep the run parameters.
    pub fn new(param: KnnParam, config: SolverConfig) -> Result<Self> {
        param.tree.validate()?;
        config.validate()?;
        Ok(Self {
            param,
            config,
            _marker: PhantomData,
        })
    }

    /// Runner configured from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.knn_param(), settings.solver_config())
    }

    /// Search parameters.
    pub fn param(&self) -> &KnnParam {
        &self.param
    }

    /// Neighbors of every point among the other points.
    pub fn monochromatic(&self, points: &PointSet) -> Result<KnnOutput> {
        self.run(points, None)
    }

    /// Neighbors of every query among the references.
    pub fn bichromatic(&self, queries: &PointSet, references: &PointSet) -> Result<KnnOutput> {
        self.run(references, Some(queries))
    }

    /// Monochromatic when `queries` is `None`.
    pub fn run(&self, references: &PointSet, queries: Option<&PointSet>) -> Result<KnnOutput> {
        let prepared = Prepared::<B, S>::new(&self.param, &self.config, references, queries)?;
        let query = prepared.query_side();
        let queue = SimpleWorkQueue::new(&query.tree, self.config.grains(1));
        let results = result_array(query.len(), &self.config)?;
        let summary = prepared
            .solver(&self.param, self.config.n_threads)
            .solve(&queue, &results)?;
        results.flush_clear()?;
        Ok(KnnOutput {
            neighbors: collect_table(self.param.k, &results)?,
            summary,
            n_grains: queue.n_grains(),
        })
    }
}

/// A paged point set and its tree.
pub(crate) struct Side<B, S> {
    pub(crate) points: PagedPoints,
    pub(crate) tree: SpatialTree<B, S>,
}

impl<B, S> Side<B, S> {
    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }

    pub(crate) fn dataset(&self) -> Dataset<'_, B, S, PagedPoints> {
        Dataset {
            tree: &self.tree,
            points: &self.points,
        }
    }
}

/// Validated inputs, paged into block stores, with their trees built.
pub(crate) struct Prepared<B, S> {
    pub(crate) references: Side<B, S>,
    pub(crate) queries: Option<Side<B, S>>,
}

impl<B, S> Prepared<B, S>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
{
    pub(crate) fn new(
        param: &KnnParam,
        config: &SolverConfig,
        references: &PointSet,
        queries: Option<&PointSet>,
    ) -> Result<Self> {
        if references.is_empty() || queries.is_some_and(PointSet::is_empty) {
            return Err(canopy_index::Error::EmptyDataset.into());
        }
        if let Some(q) = queries.filter(|q| q.dim() != references.dim()) {
            return Err(canopy_index::Error::DimensionMismatch {
                expected: references.dim(),
                actual: q.dim(),
            }
            .into());
        }
        param.validate(references.len(), queries.is_none())?;
        let side = |set: &PointSet| -> Result<Side<B, S>> {
            let tree = build_tree(set, &param.tree)?;
            let points =
                PagedPoints::from_point_set(set, config.n_block_points, block_store(config.storage)?)?;
            tracing::debug!(
                points = set.len(),
                nodes = tree.len(),
                depth = tree.depth(),
                "dataset paged and indexed"
            );
            Ok(Side { points, tree })
        };
        Ok(Self {
            references: side(references)?,
            queries: queries.map(side).transpose()?,
        })
    }

    pub(crate) fn query_side(&self) -> &Side<B, S> {
        self.queries.as_ref().unwrap_or(&self.references)
    }

    pub(crate) fn solver<'a>(
        &'a self,
        param: &'a KnnParam,
        n_threads: usize,
    ) -> ThreadedSolver<'a, B, S, PagedPoints> {
        match &self.queries {
            None => ThreadedSolver::monochromatic(param, n_threads, self.references.dataset()),
            Some(q) => {
                ThreadedSolver::bichromatic(param, n_threads, q.dataset(), self.references.dataset())
            }
        }
    }
}

/// A block store of the configured kind.
pub(crate) fn block_store<T>(kind: StorageKind) -> Result<Arc<dyn BlockStore<T>>>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    let store: Arc<dyn BlockStore<T>> = match kind {
        StorageKind::Memory => Arc::new(MemoryStore::<T>::new()),
        StorageKind::File => Arc::new(FileStore::<T>::temporary()?),
    };
    Ok(store)
}

/// Empty per-query results, one list per query point.
pub(crate) fn result_array(
    n_queries: usize,
    config: &SolverConfig,
) -> Result<PagedArray<NeighborList>> {
    Ok(PagedArray::new(
        n_queries,
        config.n_block_points,
        NeighborList::default(),
        AccessMode::Create,
        block_store(config.storage)?,
    )?)
}

pub(crate) fn collect_table(k: usize, results: &PagedArray<NeighborList>) -> Result<NeighborTable> {
    Ok(NeighborTable::from_lists(k, results.to_vec()?.iter())?)
}
