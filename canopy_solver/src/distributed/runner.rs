// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Master and worker roles of a distributed run.
//!
//! Both roles step through [`Phase::ALL`] and meet at a barrier after each
//! phase:
//!
//! | phase          | master                                       | worker                                  |
//! |----------------|----------------------------------------------|-----------------------------------------|
//! | `Configure`    | serve manifest, param, work, arrays, reports | fetch manifest and param, open arrays   |
//! | `FlushData`    | write back and evict points, nodes, results  | evict its mirrors                       |
//! | `Compute`      | run the threaded solver on shared grains     | same, then report its summary           |
//! | `FlushResults` | evict results                                | flush results, merged at the master     |

use core::marker::PhantomData;
use std::sync::Arc;

use canopy_index::{
    Bound, DescendantRadius, FurthestDescendant, GlobalResult, HRectBound, KnnParam, KnnSummary,
    NeighborList, Node, NodeId, PointSet, SpatialTree, Statistic,
};
use canopy_paged::{AccessMode, PagedArray, PagedPoints};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::remote::{RemoteStore, RemoteWorkQueue, serve_array, serve_value, serve_work_queue};
use super::transport::{Channel, MASTER, Phase, Rank, Transport, call, decode, encode};
use crate::error::{Result, SolverError};
use crate::runner::{KnnOutput, Prepared, Side, block_store, collect_table, result_array};
use crate::settings::SolverConfig;
use crate::solver::{Dataset, ThreadedSolver};
use crate::work::{SimpleWorkQueue, WorkQueue};

type NodeArray<B, S> = PagedArray<Option<Node<B, S>>>;

/// Where one tree and its points can be fetched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeManifest {
    /// Points indexed by the tree.
    pub n_points: usize,
    /// Root slot.
    pub root: NodeId,
    /// Arena slots, freed ones included.
    pub n_slots: usize,
}

/// Everything a worker needs besides the search parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Execution settings shared by every peer.
    pub solver: SolverConfig,
    /// Point dimension.
    pub dim: usize,
    /// Reference side.
    pub references: TreeManifest,
    /// Query side, for bichromatic runs.
    pub queries: Option<TreeManifest>,
    /// Grains in the shared queue.
    pub n_grains: usize,
}

impl RunManifest {
    /// Number of query points.
    pub fn n_queries(&self) -> usize {
        self.queries.unwrap_or(self.references).n_points
    }
}

/// One peer of a distributed all-k-nearest-neighbors run.
///
/// Rank [`MASTER`] calls [`run_master`](Self::run_master) with the data;
/// every other rank calls [`run_worker`](Self::run_worker).
pub struct DistributedRunner<B = HRectBound, S = FurthestDescendant> {
    transport: Arc<dyn Transport>,
    _marker: PhantomData<fn() -> (B, S)>,
}

impl<B, S> core::fmt::Debug for DistributedRunner<B, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistributedRunner")
            .field("rank", &self.transport.rank())
            .field("n_peers", &self.transport.n_peers())
            .finish_non_exhaustive()
    }
}

impl<B, S> DistributedRunner<B, S>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
{
    /// Runner for the peer behind `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            _marker: PhantomData,
        }
    }

    /// This peer's rank.
    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    /// Load, index and serve the data, compute a share of the grains, and
    /// collect every peer's results. Monochromatic when `queries` is `None`.
    pub fn run_master(
        &self,
        param: &KnnParam,
        config: &SolverConfig,
        references: &PointSet,
        queries: Option<&PointSet>,
    ) -> Result<KnnOutput> {
        if self.rank() != MASTER {
            return Err(SolverError::Transport(format!(
                "rank {} cannot lead a run",
                self.rank()
            )));
        }
        let span = tracing::info_span!("master", rank = self.rank());
        let _guard = span.enter();
        let mut master = Master::<B, S>::new(&*self.transport, param, config, references, queries)?;
        for phase in Phase::ALL {
            master.step(phase)?;
            self.transport.barrier(phase)?;
            tracing::info!(?phase, "phase complete");
        }
        master.finish()
    }

    /// Fetch the run from the master, compute grains until none are left,
    /// and send the results back. Returns this peer's summary.
    pub fn run_worker(&self) -> Result<KnnSummary> {
        let span = tracing::info_span!("worker", rank = self.rank());
        let _guard = span.enter();
        let mut worker = Worker::<B, S>::connect(Arc::clone(&self.transport))?;
        for phase in Phase::ALL {
            worker.step(phase)?;
            self.transport.barrier(phase)?;
            tracing::debug!(?phase, "phase complete");
        }
        Ok(worker.summary)
    }
}

const MASTER_CHANNELS: [Channel; 9] = [
    Channel::Config,
    Channel::Param,
    Channel::Work,
    Channel::Report,
    Channel::QueryResults,
    Channel::ReferencePoints,
    Channel::ReferenceNodes,
    Channel::QueryPoints,
    Channel::QueryNodes,
];

struct Master<'a, B, S> {
    transport: &'a dyn Transport,
    param: &'a KnnParam,
    config: &'a SolverConfig,
    prepared: Prepared<B, S>,
    node_arrays: Vec<Arc<NodeArray<B, S>>>,
    queue: Arc<SimpleWorkQueue>,
    results: Arc<PagedArray<NeighborList>>,
    reports: Arc<Mutex<KnnSummary>>,
    summary: KnnSummary,
}

impl<'a, B, S> Master<'a, B, S>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
{
    fn new(
        transport: &'a dyn Transport,
        param: &'a KnnParam,
        config: &'a SolverConfig,
        references: &PointSet,
        queries: Option<&PointSet>,
    ) -> Result<Self> {
        let prepared = Prepared::new(param, config, references, queries)?;
        let query = prepared.query_side();
        let queue = Arc::new(SimpleWorkQueue::new(
            &query.tree,
            config.grains(transport.n_peers()),
        ));
        let results = Arc::new(result_array(query.len(), config)?);
        Ok(Self {
            transport,
            param,
            config,
            prepared,
            node_arrays: Vec::new(),
            queue,
            results,
            reports: Arc::default(),
            summary: KnnSummary::default(),
        })
    }

    fn step(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Configure => self.configure(),
            Phase::FlushData => {
                for side in [Some(&self.prepared.references), self.prepared.queries.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    side.points.array().flush_clear()?;
                }
                for nodes in &self.node_arrays {
                    nodes.flush_clear()?;
                }
                Ok(self.results.flush_clear()?)
            }
            Phase::Compute => {
                self.summary = self
                    .prepared
                    .solver(self.param, self.config.n_threads)
                    .solve(&*self.queue, &self.results)?;
                Ok(())
            }
            Phase::FlushResults => Ok(self.results.flush_clear()?),
        }
    }

    fn configure(&mut self) -> Result<()> {
        let t = self.transport;
        let references = self.share(
            &self.prepared.references,
            Channel::ReferencePoints,
            Channel::ReferenceNodes,
        )?;
        let queries = match &self.prepared.queries {
            Some(side) => Some(self.share(side, Channel::QueryPoints, Channel::QueryNodes)?),
            None => None,
        };
        let manifest = RunManifest {
            solver: *self.config,
            dim: self.prepared.references.tree.dim(),
            references: references.0,
            queries: queries.as_ref().map(|q| q.0),
            n_grains: self.queue.n_grains(),
        };
        self.node_arrays.push(references.1);
        self.node_arrays.extend(queries.map(|q| q.1));

        serve_value(t, Channel::Config, &manifest)?;
        serve_value(t, Channel::Param, self.param)?;
        serve_work_queue(t, Arc::clone(&self.queue) as Arc<dyn WorkQueue>);
        serve_array(t, Channel::QueryResults, Arc::clone(&self.results));
        let reports = Arc::clone(&self.reports);
        t.register(
            Channel::Report,
            Arc::new(move |from: Rank, bytes: &[u8]| -> Result<Vec<u8>> {
                let partial: KnnSummary = decode(bytes)?;
                tracing::debug!(from, queries = partial.queries, "worker reported");
                reports.lock().accumulate(&partial);
                encode(&())
            }),
        );
        tracing::info!(
            n_peers = t.n_peers(),
            n_grains = manifest.n_grains,
            n_queries = manifest.n_queries(),
            "run configured"
        );
        Ok(())
    }

    fn share(
        &self,
        side: &Side<B, S>,
        points: Channel,
        nodes: Channel,
    ) -> Result<(TreeManifest, Arc<NodeArray<B, S>>)> {
        serve_array(self.transport, points, Arc::clone(side.points.array()));
        let (root, slots) = side.tree.to_slots();
        let array = Arc::new(PagedArray::from_values(
            &slots,
            self.config.n_block_nodes,
            None,
            AccessMode::Read,
            block_store(self.config.storage)?,
        )?);
        serve_array(self.transport, nodes, Arc::clone(&array));
        let manifest = TreeManifest {
            n_points: side.len(),
            root,
            n_slots: slots.len(),
        };
        Ok((manifest, array))
    }

    fn finish(self) -> Result<KnnOutput> {
        let neighbors = collect_table(self.param.k, &self.results)?;
        for channel in MASTER_CHANNELS {
            self.transport.unregister(channel);
        }
        let mut summary = self.summary;
        summary.accumulate(&self.reports.lock());
        tracing::info!(
            queries = summary.queries,
            pruned = summary.traversal.pruned,
            "distributed run finished"
        );
        Ok(KnnOutput {
            neighbors,
            summary,
            n_grains: self.queue.n_grains(),
        })
    }
}

struct RemoteSide<B, S> {
    points: PagedPoints,
    nodes: NodeArray<B, S>,
    manifest: TreeManifest,
}

impl<B, S> RemoteSide<B, S>
where
    B: Bound,
    S: Statistic<B>,
{
    fn open(
        transport: &Arc<dyn Transport>,
        run: &RunManifest,
        manifest: TreeManifest,
        points: Channel,
        nodes: Channel,
    ) -> Result<Self> {
        let points = PagedPoints::open(
            run.dim,
            manifest.n_points,
            run.solver.n_block_points,
            Arc::new(RemoteStore::<f64>::new(Arc::clone(transport), MASTER, points)),
        )?;
        let nodes = PagedArray::new(
            manifest.n_slots,
            run.solver.n_block_nodes,
            None,
            AccessMode::Read,
            Arc::new(RemoteStore::<Option<Node<B, S>>>::new(
                Arc::clone(transport),
                MASTER,
                nodes,
            )),
        )?;
        Ok(Self {
            points,
            nodes,
            manifest,
        })
    }

    fn flush_clear(&self) -> Result<()> {
        self.points.array().flush_clear()?;
        Ok(self.nodes.flush_clear()?)
    }

    fn load_tree(&self, dim: usize) -> Result<SpatialTree<B, S>> {
        let slots = self.nodes.to_vec()?;
        Ok(SpatialTree::from_slots(dim, self.manifest.root, slots)?)
    }
}

struct Worker<B, S> {
    transport: Arc<dyn Transport>,
    param: KnnParam,
    run: RunManifest,
    references: RemoteSide<B, S>,
    queries: Option<RemoteSide<B, S>>,
    results: PagedArray<NeighborList>,
    summary: KnnSummary,
}

impl<B, S> Worker<B, S>
where
    B: Bound,
    S: Statistic<B> + DescendantRadius,
{
    fn connect(transport: Arc<dyn Transport>) -> Result<Self> {
        let run: RunManifest = call(&*transport, MASTER, Channel::Config, &())?;
        let param: KnnParam = call(&*transport, MASTER, Channel::Param, &())?;
        let references = RemoteSide::open(
            &transport,
            &run,
            run.references,
            Channel::ReferencePoints,
            Channel::ReferenceNodes,
        )?;
        let queries = match run.queries {
            Some(m) => Some(RemoteSide::open(
                &transport,
                &run,
                m,
                Channel::QueryPoints,
                Channel::QueryNodes,
            )?),
            None => None,
        };
        let results = PagedArray::new(
            run.n_queries(),
            run.solver.n_block_points,
            NeighborList::default(),
            AccessMode::Create,
            Arc::new(RemoteStore::<NeighborList>::new(
                Arc::clone(&transport),
                MASTER,
                Channel::QueryResults,
            )),
        )?;
        tracing::debug!(k = param.k, n_grains = run.n_grains, "worker configured");
        Ok(Self {
            transport,
            param,
            run,
            references,
            queries,
            results,
            summary: KnnSummary::default(),
        })
    }

    fn step(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Configure => Ok(()),
            Phase::FlushData => {
                self.references.flush_clear()?;
                if let Some(q) = &self.queries {
                    q.flush_clear()?;
                }
                Ok(self.results.flush_clear()?)
            }
            Phase::Compute => {
                self.summary = self.compute()?;
                call::<_, ()>(&*self.transport, MASTER, Channel::Report, &self.summary)
            }
            Phase::FlushResults => Ok(self.results.flush_clear()?),
        }
    }

    fn compute(&self) -> Result<KnnSummary> {
        let dim = self.run.dim;
        let rtree = self.references.load_tree(dim)?;
        let rdata = Dataset {
            tree: &rtree,
            points: &self.references.points,
        };
        let queue = RemoteWorkQueue::new(Arc::clone(&self.transport), MASTER);
        let n_threads = self.run.solver.n_threads;
        match &self.queries {
            None => ThreadedSolver::monochromatic(&self.param, n_threads, rdata)
                .solve(&queue, &self.results),
            Some(q) => {
                let qtree = q.load_tree(dim)?;
                let qdata = Dataset {
                    tree: &qtree,
                    points: &q.points,
                };
                ThreadedSolver::bichromatic(&self.param, n_threads, qdata, rdata)
                    .solve(&queue, &self.results)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use canopy_index::Mode;

    use super::*;
    use crate::distributed::transport::LocalCluster;

    fn line(n: usize) -> PointSet {
        PointSet::from_columns(1, (0..n).map(|i| f64::from(u32::try_from(i * i).unwrap())).collect())
            .unwrap()
    }

    #[test]
    fn manifest_counts_queries_of_the_right_side() {
        let tree: SpatialTree<HRectBound, FurthestDescendant> =
            canopy_index::build_tree(&line(3), &canopy_index::TreeParams::default()).unwrap();
        let side = |n_points| TreeManifest {
            n_points,
            root: tree.root(),
            n_slots: tree.slot_count(),
        };
        let mut manifest = RunManifest {
            solver: SolverConfig::default(),
            dim: 2,
            references: side(10),
            queries: None,
            n_grains: 1,
        };
        assert_eq!(manifest.n_queries(), 10);
        manifest.queries = Some(side(4));
        assert_eq!(manifest.n_queries(), 4);
    }

    #[test]
    fn only_rank_zero_leads() {
        let cluster = LocalCluster::new(2);
        let runner: DistributedRunner = DistributedRunner::new(Arc::new(cluster.endpoint(1)));
        assert!(matches!(
            runner.run_master(&KnnParam::default(), &SolverConfig::default(), &line(8), None),
            Err(SolverError::Transport(_))
        ));
    }

    #[test]
    fn two_peers_single_tree() {
        let cluster = LocalCluster::new(2);
        let points = line(40);
        let param = KnnParam {
            k: 2,
            mode: Mode::SingleTree,
            tree: canopy_index::TreeParams {
                max_leaf_size: 4,
                min_leaf_size: 1,
                ..canopy_index::TreeParams::default()
            },
        };
        let config = SolverConfig {
            n_grains: Some(5),
            n_block_points: 8,
            n_block_nodes: 4,
            ..SolverConfig::default()
        };
        let (out, worker) = std::thread::scope(|s| {
            let worker = s.spawn(|| {
                DistributedRunner::<HRectBound, FurthestDescendant>::new(Arc::new(
                    cluster.endpoint(1),
                ))
                .run_worker()
            });
            let master: DistributedRunner = DistributedRunner::new(Arc::new(cluster.endpoint(MASTER)));
            let out = master.run_master(&param, &config, &points, None).unwrap();
            (out, worker.join().unwrap().unwrap())
        });
        assert_eq!(out.n_grains, 5);
        assert_eq!(out.summary.queries, 40);
        assert!(worker.queries <= 40);
        // Squares: the nearest two of i are i-1 and i+1 except at the ends.
        let indices = out.neighbors.index_table();
        assert_eq!(&indices[..2], &[1, 2]);
        assert_eq!(&indices[20..22], &[9, 11]);
    }
}
