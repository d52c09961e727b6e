// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Master/worker execution across peers.
//!
//! The master owns the data and serves it as paged arrays; workers mirror
//! those arrays through [`RemoteStore`]s, claim grains from the master's
//! queue, and merge their results back. [`LocalCluster`] runs every peer
//! inside one process.

mod remote;
mod runner;
mod transport;

pub use remote::{RemoteStore, RemoteWorkQueue, serve_array, serve_value, serve_work_queue};
pub use runner::{DistributedRunner, RunManifest, TreeManifest};
pub use transport::{
    Channel, Handler, LocalCluster, LocalEndpoint, MASTER, Phase, Rank, Transport, call, decode,
    encode,
};
