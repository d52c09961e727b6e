// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-node cached aggregates.
//!
//! A statistic is rebuilt bottom-up by
//! [`SpatialTree::fix_statistics`](crate::SpatialTree::fix_statistics):
//! leaves see `reset`, one `accumulate_point` per owned point, then
//! `postprocess`; internal nodes see `reset`, one `accumulate_child` per
//! child (after that child is final), then `postprocess`.

use core::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bound::Bound;

/// A cached aggregate attached to every node.
pub trait Statistic<B: Bound>:
    Clone + Debug + Default + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Forget everything accumulated so far.
    fn reset(&mut self);

    /// Fold in one point owned by a leaf whose bound is `bound`.
    fn accumulate_point(&mut self, bound: &B, point: &[f64]);

    /// Fold in a finished child.
    fn accumulate_child(&mut self, bound: &B, child: &Self, child_bound: &B, child_count: usize);

    /// Finish after all points or children were seen.
    fn postprocess(&mut self, bound: &B, count: usize);
}

/// Upper bound on the distance from a node's bound centroid to any descendant point.
///
/// Traversal rules use it to widen a single query point's result to the
/// whole node.
pub trait DescendantRadius {
    /// Distance (not squared); `f64::INFINITY` when unknown.
    fn furthest_descendant(&self) -> f64;
}

/// The empty statistic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoStatistic;

impl<B: Bound> Statistic<B> for NoStatistic {
    fn reset(&mut self) {}
    fn accumulate_point(&mut self, _bound: &B, _point: &[f64]) {}
    fn accumulate_child(&mut self, _: &B, _: &Self, _: &B, _: usize) {}
    fn postprocess(&mut self, _bound: &B, _count: usize) {}
}

impl DescendantRadius for NoStatistic {
    fn furthest_descendant(&self) -> f64 {
        f64::INFINITY
    }
}

/// Furthest-descendant distance from the centroid of the node's bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FurthestDescendant {
    distance: f64,
}

impl<B: Bound> Statistic<B> for FurthestDescendant {
    fn reset(&mut self) {
        self.distance = 0.0;
    }

    fn accumulate_point(&mut self, bound: &B, point: &[f64]) {
        self.distance = self.distance.max(bound.center_distance_point(point));
    }

    fn accumulate_child(&mut self, bound: &B, child: &Self, child_bound: &B, child_count: usize) {
        if child_count == 0 {
            return;
        }
        let reach = bound.center_distance(child_bound) + child.distance;
        self.distance = self.distance.max(reach);
    }

    fn postprocess(&mut self, bound: &B, count: usize) {
        // Every descendant lies within half a diameter of the centroid.
        if count > 0 {
            self.distance = self.distance.min(bound.diameter() * 0.5);
        }
    }
}

impl DescendantRadius for FurthestDescendant {
    fn furthest_descendant(&self) -> f64 {
        self.distance
    }
}
