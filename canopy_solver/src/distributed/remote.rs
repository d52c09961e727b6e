// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Paged arrays and work queues served across a [`Transport`].

use core::marker::PhantomData;
use std::sync::Arc;

use canopy_paged::{BlockStore, PagedArray, PagedError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::transport::{Channel, Handler, Rank, Transport, call, decode, encode};
use crate::error::{Result, SolverError};
use crate::work::{Grain, WorkQueue};

#[derive(Serialize, Deserialize)]
enum BlockRequest<T> {
    Load { block: usize },
    Merge { block: usize, data: Vec<T> },
}

#[derive(Serialize, Deserialize)]
enum BlockReply<T> {
    Loaded(Vec<T>),
    Merged(usize),
}

/// Serve `array`'s blocks on `channel`.
///
/// Loads return the block as the owner currently sees it. Stores are merged
/// element-wise, skipping elements equal to the array's default, so several
/// peers can each fill disjoint parts of one block.
pub fn serve_array<T>(transport: &dyn Transport, channel: Channel, array: Arc<PagedArray<T>>)
where
    T: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    let handler: Arc<Handler> = Arc::new(move |from: Rank, bytes: &[u8]| -> Result<Vec<u8>> {
        match decode::<BlockRequest<T>>(bytes)? {
            BlockRequest::Load { block } => {
                let data = array.load_block(block)?;
                encode(&BlockReply::Loaded(data.to_vec()))
            }
            BlockRequest::Merge { block, data } => {
                let merged = array.merge_block(block, &data)?;
                tracing::trace!(from, ?channel, block, merged, "remote block merged");
                encode(&BlockReply::<T>::Merged(merged))
            }
        }
    });
    transport.register(channel, handler);
}

/// A [`BlockStore`] whose blocks live in another peer's array.
pub struct RemoteStore<T> {
    transport: Arc<dyn Transport>,
    peer: Rank,
    channel: Channel,
    _marker: PhantomData<fn() -> T>,
}

impl<T> core::fmt::Debug for RemoteStore<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("peer", &self.peer)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<T> RemoteStore<T> {
    /// Blocks of the array `peer` serves on `channel`.
    pub fn new(transport: Arc<dyn Transport>, peer: Rank, channel: Channel) -> Self {
        Self {
            transport,
            peer,
            channel,
            _marker: PhantomData,
        }
    }

    fn call(&self, request: &BlockRequest<T>) -> core::result::Result<BlockReply<T>, PagedError>
    where
        T: Serialize + DeserializeOwned,
    {
        call(&*self.transport, self.peer, self.channel, request).map_err(|err| {
            PagedError::Store(format!("{:?} on peer {}: {err}", self.channel, self.peer))
        })
    }
}

impl<T> BlockStore<T> for RemoteStore<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn load(&self, block: usize) -> canopy_paged::Result<Option<Vec<T>>> {
        match self.call(&BlockRequest::Load { block })? {
            BlockReply::Loaded(data) => Ok(Some(data)),
            BlockReply::Merged(_) => Err(PagedError::Store("merge reply to a load".into())),
        }
    }

    fn store(&self, block: usize, data: &[T]) -> canopy_paged::Result<()> {
        let request = BlockRequest::Merge {
            block,
            data: data.to_vec(),
        };
        match self.call(&request)? {
            BlockReply::Merged(_) => Ok(()),
            BlockReply::Loaded(_) => Err(PagedError::Store("load reply to a merge".into())),
        }
    }
}

/// Serve `queue` on [`Channel::Work`].
pub fn serve_work_queue(transport: &dyn Transport, queue: Arc<dyn WorkQueue>) {
    transport.register(
        Channel::Work,
        Arc::new(move |from: Rank, _: &[u8]| -> Result<Vec<u8>> {
            let grain = queue.get_work()?;
            tracing::trace!(from, grain = ?grain.as_ref().map(|g| g.id), "grain handed out");
            encode(&grain)
        }),
    );
}

/// Serve a fixed value on `channel`.
pub fn serve_value<T: Serialize + ?Sized>(
    transport: &dyn Transport,
    channel: Channel,
    value: &T,
) -> Result<()> {
    let bytes = encode(value)?;
    transport.register(
        channel,
        Arc::new(move |_: Rank, _: &[u8]| -> Result<Vec<u8>> { Ok(bytes.clone()) }),
    );
    Ok(())
}

/// A [`WorkQueue`] that claims grains from another peer.
pub struct RemoteWorkQueue {
    transport: Arc<dyn Transport>,
    peer: Rank,
}

impl core::fmt::Debug for RemoteWorkQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemoteWorkQueue")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl RemoteWorkQueue {
    /// Claim from the queue `peer` serves.
    pub fn new(transport: Arc<dyn Transport>, peer: Rank) -> Self {
        Self { transport, peer }
    }
}

impl WorkQueue for RemoteWorkQueue {
    fn get_work(&self) -> Result<Option<Grain>> {
        call(&*self.transport, self.peer, Channel::Work, &())
    }
}

#[cfg(test)]
mod tests {
    use canopy_index::{HRectBound, NoStatistic, PointSet, TreeParams, build_tree};
    use canopy_paged::{AccessMode, MemoryStore};

    use super::*;
    use crate::distributed::transport::{LocalCluster, MASTER};
    use crate::work::SimpleWorkQueue;

    fn pair() -> (Arc<dyn Transport>, Arc<dyn Transport>) {
        let cluster = LocalCluster::new(2);
        (Arc::new(cluster.endpoint(MASTER)), Arc::new(cluster.endpoint(1)))
    }

    #[test]
    fn remote_reads_see_the_owner_array() {
        let (master, worker) = pair();
        let values: Vec<u32> = (1..=10).collect();
        let owned = Arc::new(
            PagedArray::from_values(
                &values,
                4,
                0,
                AccessMode::Read,
                Arc::new(MemoryStore::<u32>::new()),
            )
            .unwrap(),
        );
        serve_array(&*master, Channel::ReferencePoints, owned);
        let store = RemoteStore::<u32>::new(worker, MASTER, Channel::ReferencePoints);
        let mirror = PagedArray::new(10, 4, 0, AccessMode::Read, Arc::new(store)).unwrap();
        assert_eq!(mirror.to_vec().unwrap(), values);
    }

    #[test]
    fn workers_fill_disjoint_parts_of_one_block() {
        let cluster = LocalCluster::new(3);
        let master: Arc<dyn Transport> = Arc::new(cluster.endpoint(MASTER));
        let results = Arc::new(PagedArray::in_memory(6, 6, 0_i64, AccessMode::Create).unwrap());
        serve_array(&*master, Channel::QueryResults, Arc::clone(&results));
        for rank in 1..3 {
            let endpoint: Arc<dyn Transport> = Arc::new(cluster.endpoint(rank));
            let store = RemoteStore::<i64>::new(endpoint, MASTER, Channel::QueryResults);
            let local =
                PagedArray::<i64>::new(6, 6, 0, AccessMode::Create, Arc::new(store)).unwrap();
            for i in (rank - 1..6).step_by(2) {
                local.set(i, i64::try_from(i * 10 + rank).unwrap()).unwrap();
            }
            local.flush_clear().unwrap();
        }
        assert_eq!(results.to_vec().unwrap(), vec![1, 12, 21, 32, 41, 52]);
    }

    #[test]
    fn remote_queue_drains_the_master_queue() {
        let (master, worker) = pair();
        let points = PointSet::from_columns(1, (0..64_i32).map(f64::from).collect()).unwrap();
        let tree =
            build_tree::<HRectBound, NoStatistic, _>(&points, &TreeParams::default()).unwrap();
        let queue = Arc::new(SimpleWorkQueue::new(&tree, 3));
        serve_work_queue(&*master, queue.clone());
        let remote = RemoteWorkQueue::new(worker, MASTER);
        let mut ids = Vec::new();
        while let Some(g) = remote.get_work().unwrap() {
            ids.push(g.id);
        }
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(queue.remaining(), 0);
        assert_eq!(remote.get_work().unwrap(), None);
    }

    #[test]
    fn remote_failures_become_store_errors() {
        let (master, worker) = pair();
        master.register(
            Channel::ReferenceNodes,
            Arc::new(|_: Rank, _: &[u8]| -> Result<Vec<u8>> {
                Err(SolverError::Transport("gone".into()))
            }),
        );
        let store = RemoteStore::<u8>::new(worker, MASTER, Channel::ReferenceNodes);
        assert!(matches!(store.load(0), Err(PagedError::Store(_))));
    }
}
