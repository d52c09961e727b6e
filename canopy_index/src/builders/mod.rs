// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree construction.
//!
//! - [`midpoint`]: bulk, binary, splits at the midpoint of the widest dimension.
//! - [`rectangle`]: incremental R-tree style insertion with pluggable
//!   [`SplitStrategy`](rectangle::SplitStrategy) and
//!   [`DescentHeuristic`](rectangle::DescentHeuristic).
//!
//! Both produce the same [`SpatialTree`] shape and leave its statistics fixed.

pub mod midpoint;
pub mod rectangle;

use serde::{Deserialize, Serialize};

use crate::bound::Bound;
use crate::error::{Error, Result};
use crate::points::PointSource;
use crate::statistic::Statistic;
use crate::tree::SpatialTree;

/// Which builder [`build_tree`] runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    /// [`midpoint::build`].
    #[default]
    Midpoint,
    /// [`rectangle::build`] with the default policies.
    Rectangle,
}

/// Leaf and fanout limits shared by the builders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Leaves never hold more points than this.
    pub max_leaf_size: usize,
    /// Each half of a leaf split receives at least this many points.
    pub min_leaf_size: usize,
    /// Internal nodes never have more children than this.
    pub max_num_children: usize,
    /// Non-root internal nodes have at least this many children.
    pub min_num_children: usize,
    /// Construction strategy.
    pub builder: BuilderKind,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_leaf_size: 20,
            min_leaf_size: 6,
            max_num_children: 4,
            min_num_children: 2,
            builder: BuilderKind::Midpoint,
        }
    }
}

impl TreeParams {
    /// Fewest children of a non-root internal node built with these params.
    ///
    /// The midpoint builder is binary.
    pub fn min_fanout(&self) -> usize {
        match self.builder {
            BuilderKind::Midpoint => 2,
            BuilderKind::Rectangle => self.min_num_children,
        }
    }

    /// Most children of any internal node built with these params.
    pub fn max_fanout(&self) -> usize {
        match self.builder {
            BuilderKind::Midpoint => 2,
            BuilderKind::Rectangle => self.max_num_children,
        }
    }

    /// Check that a leaf and an internal node can always be split legally.
    pub fn validate(&self) -> Result<()> {
        if self.min_leaf_size == 0 || self.max_leaf_size < 2 * self.min_leaf_size {
            return Err(Error::InvalidParameter(format!(
                "leaf sizes need 1 <= min_leaf_size and 2 * min_leaf_size <= max_leaf_size, got {} and {}",
                self.min_leaf_size, self.max_leaf_size
            )));
        }
        if self.min_num_children == 0
            || self.max_num_children < 2
            || self.max_num_children + 1 < 2 * self.min_num_children
        {
            return Err(Error::InvalidParameter(format!(
                "fanout needs 1 <= min_num_children, 2 <= max_num_children and 2 * min <= max + 1, got {} and {}",
                self.min_num_children, self.max_num_children
            )));
        }
        Ok(())
    }
}

/// Build a tree over every point of `points` with the builder `params` names.
pub fn build_tree<B, S, P>(points: &P, params: &TreeParams) -> Result<SpatialTree<B, S>>
where
    B: Bound,
    S: Statistic<B>,
    P: PointSource,
{
    match params.builder {
        BuilderKind::Midpoint => midpoint::build(points, params),
        BuilderKind::Rectangle => rectangle::build(points, params),
    }
}
