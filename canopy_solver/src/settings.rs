// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Run settings.
//!
//! [`Settings`] is read once, from built-in defaults, then an optional file,
//! then `CANOPY_*` environment variables, and turned into the immutable
//! [`KnnParam`] and [`SolverConfig`] values the rest of the crate takes by
//! reference.

use std::path::Path;

use canopy_index::{BuilderKind, KnnParam, TreeParams};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Prefix of environment overrides, e.g. `CANOPY_N_THREADS=8`.
pub const ENV_PREFIX: &str = "CANOPY";

/// Where paged arrays evict their blocks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Keep evicted blocks in memory.
    #[default]
    Memory,
    /// Write evicted blocks to a temporary directory.
    File,
}

/// Every tunable of a run, flat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Neighbors per query point.
    pub k: usize,
    /// Brute force every pair.
    pub naive_mode: bool,
    /// One query point at a time against the reference tree.
    pub single_mode: bool,
    /// Worker threads per process.
    pub n_threads: usize,
    /// Grains to cut the query tree into; derived when unset.
    pub n_grains: Option<usize>,
    /// Points per block of a point or result array.
    pub n_block_points: usize,
    /// Nodes per block of a node array.
    pub n_block_nodes: usize,
    /// Largest leaf.
    pub max_leaf_size: usize,
    /// Smallest leaf a split may produce.
    pub min_leaf_size: usize,
    /// Largest fanout.
    pub max_num_children: usize,
    /// Smallest fanout a split may produce.
    pub min_num_children: usize,
    /// Tree construction strategy.
    pub builder: BuilderKind,
    /// Block store backend.
    pub storage: StorageKind,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let tree = TreeParams::default();
        let solver = SolverConfig::default();
        Self {
            k: 1,
            naive_mode: false,
            single_mode: false,
            n_threads: solver.n_threads,
            n_grains: solver.n_grains,
            n_block_points: solver.n_block_points,
            n_block_nodes: solver.n_block_nodes,
            max_leaf_size: tree.max_leaf_size,
            min_leaf_size: tree.min_leaf_size,
            max_num_children: tree.max_num_children,
            min_num_children: tree.min_num_children,
            builder: tree.builder,
            storage: solver.storage,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    /// Load defaults, then `file` if given, then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with(file, environment())
    }

    fn load_with(file: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Self = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        tracing::debug!(?settings, "settings loaded");
        Ok(settings)
    }

    /// Tree limits.
    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_leaf_size: self.max_leaf_size,
            min_leaf_size: self.min_leaf_size,
            max_num_children: self.max_num_children,
            min_num_children: self.min_num_children,
            builder: self.builder,
        }
    }

    /// The read-only search parameters.
    pub fn knn_param(&self) -> KnnParam {
        KnnParam::from_flags(self.k, self.naive_mode, self.single_mode, self.tree_params())
    }

    /// The execution parameters.
    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            n_threads: self.n_threads,
            n_grains: self.n_grains,
            n_block_points: self.n_block_points,
            n_block_nodes: self.n_block_nodes,
            storage: self.storage,
        }
    }

    /// Reject settings no run could use.
    ///
    /// `k` is checked against the data later, when its size is known.
    pub fn validate(&self) -> Result<()> {
        self.tree_params().validate()?;
        self.solver_config().validate()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).try_parsing(true)
}

/// How a run is executed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Worker threads per process.
    pub n_threads: usize,
    /// Grain count override.
    pub n_grains: Option<usize>,
    /// Points per block.
    pub n_block_points: usize,
    /// Nodes per block.
    pub n_block_nodes: usize,
    /// Block store backend.
    pub storage: StorageKind,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            n_threads: 1,
            n_grains: None,
            n_block_points: 1024,
            n_block_nodes: 128,
            storage: StorageKind::Memory,
        }
    }
}

impl SolverConfig {
    /// Grains for a run over `n_peers` processes.
    ///
    /// Without an override this is three grains per worker thread across
    /// all peers, or a single grain when there is only one thread in total.
    pub fn grains(&self, n_peers: usize) -> usize {
        let workers = self.n_threads * n_peers.max(1);
        self.n_grains
            .unwrap_or(if workers == 1 { 1 } else { workers * 3 })
    }

    /// Reject zero threads, grains or block sizes.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("n_threads", self.n_threads),
            ("n_grains", self.n_grains.unwrap_or(1)),
            ("n_block_points", self.n_block_points),
            ("n_block_nodes", self.n_block_nodes),
        ]
        .into_iter()
        .find(|&(_, v)| v == 0);
        match zero {
            Some((name, _)) => Err(SolverError::InvalidSettings(format!("{name} must be positive"))),
            None => Ok(()),
        }
    }
}
