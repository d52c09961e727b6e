// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request/response channels and phase barriers between peers.
//!
//! A peer registers a handler per [`Channel`]; any peer can then send a
//! request to it and block on the reply. [`LocalCluster`] connects peers
//! that live in one process, running the handler on the requesting thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Index of a peer; the master is [`MASTER`].
pub type Rank = usize;

/// Rank of the master peer.
pub const MASTER: Rank = 0;

/// Named request channels, each with a stable numeric id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Reference point blocks.
    ReferencePoints,
    /// Reference node blocks.
    ReferenceNodes,
    /// Query result blocks.
    QueryResults,
    /// Query point blocks, bichromatic runs only.
    QueryPoints,
    /// Query node blocks, bichromatic runs only.
    QueryNodes,
    /// The search parameters.
    Param,
    /// The run manifest.
    Config,
    /// Grain claims.
    Work,
    /// Worker summaries.
    Report,
}

impl Channel {
    /// Wire identifier.
    pub const fn id(self) -> u16 {
        match self {
            Self::ReferencePoints => 110,
            Self::ReferenceNodes => 111,
            Self::QueryResults => 112,
            Self::QueryPoints => 113,
            Self::QueryNodes => 114,
            Self::Param => 120,
            Self::Config => 121,
            Self::Work => 122,
            Self::Report => 123,
        }
    }
}

/// Barrier-separated phases of a distributed run, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Everyone has its configuration and handles.
    Configure,
    /// Shared data is flushed to its backing stores.
    FlushData,
    /// Every grain is processed.
    Compute,
    /// Every result block is merged at the master.
    FlushResults,
}

impl Phase {
    /// All phases in run order.
    pub const ALL: [Self; 4] = [
        Self::Configure,
        Self::FlushData,
        Self::Compute,
        Self::FlushResults,
    ];

    /// Barrier identifier.
    pub const fn id(self) -> u16 {
        match self {
            Self::Configure => 100,
            Self::FlushData => 101,
            Self::Compute => 102,
            Self::FlushResults => 103,
        }
    }
}

/// Serves requests on one channel: `(sender, payload) -> reply`.
pub type Handler = dyn Fn(Rank, &[u8]) -> Result<Vec<u8>> + Send + Sync;

/// Message passing between the peers of one run.
pub trait Transport: Send + Sync {
    /// This peer's rank.
    fn rank(&self) -> Rank;

    /// Number of peers, master included.
    fn n_peers(&self) -> usize;

    /// Serve `channel` on this peer, replacing any earlier handler.
    fn register(&self, channel: Channel, handler: Arc<Handler>);

    /// Stop serving `channel`.
    fn unregister(&self, channel: Channel);

    /// Send `payload` to `peer` on `channel` and wait for the reply.
    ///
    /// Blocks until `peer` serves the channel.
    fn request(&self, peer: Rank, channel: Channel, payload: &[u8]) -> Result<Vec<u8>>;

    /// Wait until every peer has reached `phase`.
    fn barrier(&self, phase: Phase) -> Result<()>;
}

/// Encode a message.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Typed request: encode `request`, send it, decode the reply.
pub fn call<Req, Resp>(
    transport: &dyn Transport,
    peer: Rank,
    channel: Channel,
    request: &Req,
) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    decode(&transport.request(peer, channel, &encode(request)?)?)
}

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

#[derive(Default)]
struct Hub {
    handlers: Mutex<HashMap<(Rank, Channel), Arc<Handler>>>,
    registered: Condvar,
    barriers: Mutex<HashMap<u16, BarrierState>>,
    released: Condvar,
}

/// Peers connected inside one process.
///
/// ```rust
/// use std::sync::Arc;
/// use canopy_solver::distributed::{Channel, LocalCluster, MASTER, Rank, Transport};
///
/// let cluster = LocalCluster::new(2);
/// let master = cluster.endpoint(MASTER);
/// master.register(
///     Channel::Param,
///     Arc::new(|from: Rank, bytes: &[u8]| -> canopy_solver::Result<Vec<u8>> {
///         Ok([bytes, &[u8::try_from(from).unwrap()]].concat())
///     }),
/// );
/// let worker = cluster.endpoint(1);
/// assert_eq!(worker.request(MASTER, Channel::Param, &[7]).unwrap(), vec![7, 1]);
/// ```
#[derive(Clone)]
pub struct LocalCluster {
    n_peers: usize,
    hub: Arc<Hub>,
}

impl core::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("n_peers", &self.n_peers)
            .finish_non_exhaustive()
    }
}

impl LocalCluster {
    /// A cluster of `n_peers` peers (at least one).
    pub fn new(n_peers: usize) -> Self {
        Self {
            n_peers: n_peers.max(1),
            hub: Arc::default(),
        }
    }

    /// Number of peers.
    pub fn n_peers(&self) -> usize {
        self.n_peers
    }

    /// Handle for peer `rank`.
    ///
    /// # Panics
    ///
    /// If `rank` is not below [`n_peers`](Self::n_peers).
    pub fn endpoint(&self, rank: Rank) -> LocalEndpoint {
        assert!(rank < self.n_peers, "rank {rank} outside a {}-peer cluster", self.n_peers);
        LocalEndpoint {
            rank,
            n_peers: self.n_peers,
            hub: Arc::clone(&self.hub),
        }
    }
}

/// One peer of a [`LocalCluster`].
#[derive(Clone)]
pub struct LocalEndpoint {
    rank: Rank,
    n_peers: usize,
    hub: Arc<Hub>,
}

impl core::fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalEndpoint")
            .field("rank", &self.rank)
            .field("n_peers", &self.n_peers)
            .finish_non_exhaustive()
    }
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn n_peers(&self) -> usize {
        self.n_peers
    }

    fn register(&self, channel: Channel, handler: Arc<Handler>) {
        self.hub
            .handlers
            .lock()
            .insert((self.rank, channel), handler);
        self.hub.registered.notify_all();
    }

    fn unregister(&self, channel: Channel) {
        self.hub.handlers.lock().remove(&(self.rank, channel));
    }

    fn request(&self, peer: Rank, channel: Channel, payload: &[u8]) -> Result<Vec<u8>> {
        if peer >= self.n_peers {
            return Err(SolverError::Transport(format!(
                "no peer {peer} in a {}-peer cluster",
                self.n_peers
            )));
        }
        let handler = {
            let mut handlers = self.hub.handlers.lock();
            loop {
                if let Some(h) = handlers.get(&(peer, channel)) {
                    break Arc::clone(h);
                }
                self.hub.registered.wait(&mut handlers);
            }
        };
        handler(self.rank, payload)
    }

    fn barrier(&self, phase: Phase) -> Result<()> {
        let id = phase.id();
        let mut barriers = self.hub.barriers.lock();
        let state = barriers.entry(id).or_default();
        state.arrived += 1;
        if state.arrived == self.n_peers {
            state.arrived = 0;
            state.generation += 1;
            self.hub.released.notify_all();
        } else {
            let generation = state.generation;
            while barriers.get(&id).is_some_and(|s| s.generation == generation) {
                self.hub.released.wait(&mut barriers);
            }
        }
        tracing::trace!(rank = self.rank, barrier = id, "barrier passed");
        Ok(())
    }
}
