// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Canopy Index: arena spatial trees and dual-tree all-k-nearest-neighbors.
//!
//! - Build a [`SpatialTree`] over a [`PointSource`] with the midpoint bulk
//!   builder or the incremental rectangle (R-tree style) builder.
//! - Bounds ([`HRectBound`], [`BallBound`]) answer sound distance bounds;
//!   statistics ([`FurthestDescendant`]) are recomputed bottom-up by
//!   [`SpatialTree::fix_statistics`].
//! - [`DualTreeTraversal`] walks query and reference trees in naive,
//!   single-tree, or dual-tree [`Mode`], delegating decisions to
//!   [`TraversalRules`]. [`KnnRules`] implements all-k-nearest-neighbors.
//!
//! Distances are squared Euclidean throughout.
//!
//! # Example
//!
//! ```rust
//! use canopy_index::{AllKnn, KnnParam, Mode, PointSet};
//!
//! let points = PointSet::from_points([[0.0, 0.0], [1.0, 0.0], [0.0, 2.0], [5.0, 5.0]]).unwrap();
//! let param = KnnParam { k: 1, mode: Mode::DualTree, ..KnnParam::default() };
//! let mut knn: AllKnn<'_> = AllKnn::new(&points, param).unwrap();
//! let table = knn.compute_neighbors().unwrap();
//!
//! assert_eq!(table.indices(0), &[1]);
//! assert_eq!(table.indices(3), &[2]);
//! assert_eq!(table.distances(3), &[34.0]);
//! ```
//!
//! Thread pools, paged storage, and distributed execution live in the
//! `canopy_paged` and `canopy_solver` crates and reuse these types.

pub mod bound;
pub mod builders;
pub mod error;
pub mod knn;
pub mod points;
pub mod statistic;
pub mod traversal;
pub mod tree;

pub use bound::{BallBound, Bound, HRectBound, squared_distance};
pub use builders::rectangle::{
    DescentHeuristic, MedianSplit, MinEnlargement, NearestCentroid, RectangleTreeBuilder,
    SahSplit, SplitStrategy,
};
pub use builders::{BuilderKind, TreeParams, build_tree};
pub use error::{Error, Result};
pub use knn::{AllKnn, KnnParam, KnnRules, KnnSummary, Neighbor, NeighborList, NeighborTable};
pub use points::{PointCursor, PointSet, PointSource, SliceCursor};
pub use statistic::{DescendantRadius, FurthestDescendant, NoStatistic, Statistic};
pub use traversal::{DualTreeTraversal, GlobalResult, Mode, TraversalRules, TraversalStats};
pub use tree::{Node, NodeId, NodeKind, Removal, SpatialTree};
