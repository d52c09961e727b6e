// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Grains and the queues that hand them out.

use std::collections::VecDeque;

use canopy_index::{Bound, NodeId, SpatialTree, Statistic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A unit of work: some top-level query-tree nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grain {
    /// Position in the partition.
    pub id: usize,
    /// Query nodes to traverse; their subtrees are disjoint from every other grain's.
    pub nodes: Vec<NodeId>,
}

/// Source of grains shared by all workers.
///
/// `get_work` claims a grain at most once across every caller and returns
/// `Ok(None)` from then on once the queue is drained.
pub trait WorkQueue: Send + Sync {
    /// Claim the next grain.
    fn get_work(&self) -> Result<Option<Grain>>;
}

/// In-memory queue over a partition of a query tree.
///
/// The partition starts at the root and repeatedly replaces the largest
/// internal node by its children until there are at least `n_grains`
/// top-level nodes or only leaves remain. Those nodes, in tree order, are
/// then cut into contiguous grains of near-equal size.
#[derive(Debug)]
pub struct SimpleWorkQueue {
    top_level: Vec<NodeId>,
    n_grains: usize,
    pending: Mutex<VecDeque<Grain>>,
}

impl SimpleWorkQueue {
    /// Partition `tree` into `n_grains` grains (fewer if the tree is small).
    pub fn new<B: Bound, S: Statistic<B>>(tree: &SpatialTree<B, S>, n_grains: usize) -> Self {
        let n_grains = n_grains.max(1);
        let top_level = frontier(tree, n_grains);
        let grains = split_even(&top_level, n_grains);
        tracing::debug!(
            n_grains = grains.len(),
            top_level = top_level.len(),
            "query tree partitioned"
        );
        Self {
            top_level,
            n_grains: grains.len(),
            pending: Mutex::new(grains.into()),
        }
    }

    /// Every top-level node, in grain order.
    pub fn top_level_nodes(&self) -> &[NodeId] {
        &self.top_level
    }

    /// Number of grains in the partition.
    pub fn n_grains(&self) -> usize {
        self.n_grains
    }

    /// Grains not yet claimed.
    pub fn remaining(&self) -> usize {
        self.pending.lock().len()
    }
}

impl WorkQueue for SimpleWorkQueue {
    fn get_work(&self) -> Result<Option<Grain>> {
        Ok(self.pending.lock().pop_front())
    }
}

fn frontier<B: Bound, S: Statistic<B>>(tree: &SpatialTree<B, S>, want: usize) -> Vec<NodeId> {
    let mut nodes = vec![tree.root()];
    while nodes.len() < want {
        let widest = nodes
            .iter()
            .enumerate()
            .filter(|&(_, &id)| !tree.node(id).is_leaf())
            .max_by_key(|&(pos, &id)| (tree.node(id).count(), core::cmp::Reverse(pos)));
        let Some((pos, &id)) = widest else {
            break;
        };
        nodes.splice(pos..=pos, tree.node(id).children().iter().copied());
    }
    nodes
}

fn split_even(nodes: &[NodeId], n_grains: usize) -> Vec<Grain> {
    let n = n_grains.min(nodes.len());
    let mut grains = Vec::with_capacity(n);
    let mut start = 0;
    for id in 0..n {
        let end = (id + 1) * nodes.len() / n;
        grains.push(Grain {
            id,
            nodes: nodes[start..end].to_vec(),
        });
        start = end;
    }
    grains
}
