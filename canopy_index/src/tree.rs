// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arena spatial tree: structure, statistics, checks.

use core::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::bound::Bound;
use crate::builders::TreeParams;
use crate::error::{Error, Result};
use crate::points::PointCursor;
use crate::statistic::{NoStatistic, Statistic};

/// Stable handle of a node in a [`SpatialTree`] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Handle for arena slot `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` does not fit in a `u32`.
    pub(crate) fn new(i: usize) -> Self {
        Self(u32::try_from(i).expect("node arena exceeds u32::MAX slots"))
    }

    /// Arena slot of this node.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a node holds directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Owned buffer of point indices.
    Leaf(Vec<usize>),
    /// Child nodes.
    Internal(Vec<NodeId>),
}

/// A tree node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node<B, S> {
    pub(crate) bound: B,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) count: usize,
    pub(crate) stat: S,
}

impl<B, S> Node<B, S> {
    /// Bound containing every descendant point.
    pub fn bound(&self) -> &B {
        &self.bound
    }

    /// Direct contents.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns `true` for leaves.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    /// Child handles; empty for leaves.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Internal(c) => c,
            NodeKind::Leaf(_) => &[],
        }
    }

    /// Owned point indices; empty for internal nodes.
    pub fn points(&self) -> &[usize] {
        match &self.kind {
            NodeKind::Leaf(p) => p,
            NodeKind::Internal(_) => &[],
        }
    }

    /// Parent handle, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Number of points in the subtree.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Cached statistic.
    pub fn stat(&self) -> &S {
        &self.stat
    }
}

/// Points taken out of a tree by [`SpatialTree::remove_subtree`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// Points of the removed subtree.
    pub removed: Vec<usize>,
    /// Points of underfull nodes dissolved on the way up; no longer indexed.
    pub orphaned: Vec<usize>,
}

/// Spatial tree stored as an arena of nodes.
///
/// Nodes reference each other by [`NodeId`]. Freed slots stay `None` and are
/// recycled through a free list, so a live id never dangles. Any structural
/// change marks the statistics stale until [`SpatialTree::fix_statistics`]
/// runs again.
pub struct SpatialTree<B, S = NoStatistic> {
    dim: usize,
    root: NodeId,
    nodes: Vec<Option<Node<B, S>>>,
    free_list: Vec<usize>,
    stale: bool,
}

impl<B: Bound, S: Statistic<B>> Debug for SpatialTree<B, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpatialTree")
            .field("dim", &self.dim)
            .field("points", &self.n_points())
            .field("nodes_alive", &self.len())
            .field("free_list", &self.free_list.len())
            .field("stale", &self.stale)
            .finish_non_exhaustive()
    }
}

impl<B: Bound, S: Statistic<B>> SpatialTree<B, S> {
    /// An arena with no nodes; the caller must [`set_root`](Self::set_root)
    /// before using it.
    pub(crate) fn unrooted(dim: usize) -> Self {
        Self {
            dim,
            root: NodeId(0),
            nodes: Vec::new(),
            free_list: Vec::new(),
            stale: true,
        }
    }

    /// A tree whose root is an empty leaf.
    pub(crate) fn with_empty_root(dim: usize) -> Self {
        let mut tree = Self::unrooted(dim);
        tree.root = tree.alloc(B::empty(dim), NodeKind::Leaf(Vec::new()), 0);
        tree
    }

    /// Dimension of the indexed points.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Root handle.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of points under the root.
    pub fn n_points(&self) -> usize {
        self.node(self.root).count
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Always `false`: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Arena size including freed slots; node ids are below this.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if statistics predate the last structural change.
    pub fn stats_stale(&self) -> bool {
        self.stale
    }

    /// Node `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was freed.
    pub fn node(&self, id: NodeId) -> &Node<B, S> {
        self.nodes[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("node {id:?} was freed"))
    }

    /// Node `id`, or `None` if the slot is free or out of range.
    pub fn get(&self, id: NodeId) -> Option<&Node<B, S>> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Iterate over live nodes in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node<B, S>)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId::new(i), n)))
    }

    /// Number of live leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes().filter(|(_, n)| n.is_leaf()).count()
    }

    /// Levels from the root to the deepest leaf; a lone root leaf has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self.root, 1_usize)];
        while let Some((id, d)) = stack.pop() {
            deepest = deepest.max(d);
            stack.extend(self.node(id).children().iter().map(|&c| (c, d + 1)));
        }
        deepest
    }

    /// Point indices under `id`, leaves visited left to right.
    pub fn descendant_points(&self, id: NodeId) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.node(id).count);
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            match &self.node(n).kind {
                NodeKind::Leaf(p) => out.extend_from_slice(p),
                NodeKind::Internal(c) => stack.extend(c.iter().rev()),
            }
        }
        out
    }

    /// Nodes of the subtree rooted at `id` in post-order.
    pub fn post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            order.push(n);
            stack.extend(self.node(n).children().iter().copied());
        }
        order.reverse();
        order
    }

    pub(crate) fn alloc(&mut self, bound: B, kind: NodeKind, count: usize) -> NodeId {
        let node = Node {
            bound,
            kind,
            parent: None,
            count,
            stat: S::default(),
        };
        self.stale = true;
        if let Some(slot) = self.free_list.pop() {
            self.nodes[slot] = Some(node);
            NodeId::new(slot)
        } else {
            self.nodes.push(Some(node));
            NodeId::new(self.nodes.len() - 1)
        }
    }

    /// Mutable node `id`; marks statistics stale.
    ///
    /// # Panics
    ///
    /// Panics if `id` was freed.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<B, S> {
        self.stale = true;
        self.nodes[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("node {id:?} was freed"))
    }

    pub(crate) fn set_root(&mut self, id: NodeId) {
        assert!(
            self.node(id).parent.is_none(),
            "root {id:?} must not have a parent"
        );
        self.root = id;
        self.stale = true;
    }

    /// Append `child` to `parent`'s children and point it back at `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is a leaf or `child` is already owned.
    pub(crate) fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        assert!(
            self.node(child).parent.is_none(),
            "child {child:?} already has a parent"
        );
        match &mut self.node_mut(parent).kind {
            NodeKind::Internal(c) => c.push(child),
            NodeKind::Leaf(_) => panic!("cannot attach {child:?} under leaf {parent:?}"),
        }
        self.node_mut(child).parent = Some(parent);
    }

    /// Disown every child of `id` without destroying them.
    ///
    /// The children come back parentless and `id` keeps an empty child list.
    pub(crate) fn detach_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = match &mut self.node_mut(id).kind {
            NodeKind::Internal(c) => core::mem::take(c),
            NodeKind::Leaf(_) => panic!("detach_children called on leaf {id:?}"),
        };
        for &c in &children {
            self.node_mut(c).parent = None;
        }
        children
    }

    /// Recompute an internal node's bound and count from its children.
    pub(crate) fn refit(&mut self, id: NodeId) {
        let mut bound = B::empty(self.dim);
        let mut count = 0;
        for &c in self.node(id).children() {
            let child = self.node(c);
            bound.union_bound(&child.bound);
            count += child.count;
        }
        let node = self.node_mut(id);
        node.bound = bound;
        node.count = count;
    }

    /// Tear down the subtree rooted at `id` and restore the fanout limits of
    /// `params` on the way back to the root.
    ///
    /// The node is unlinked from its parent and every node of the subtree is
    /// freed. Walking up from the parent, a non-root node left with a single
    /// child is replaced by that child, and a non-root node left with fewer
    /// than [`TreeParams::min_fanout`] children is dissolved: its points are
    /// returned in [`Removal::orphaned`] and must be inserted again to stay
    /// indexed. A root left with one child hands the root over to it; a root
    /// left with none becomes an empty leaf. Every surviving ancestor is
    /// refit. The root itself cannot be removed.
    ///
    /// Midpoint trees never produce orphans.
    pub fn remove_subtree(&mut self, id: NodeId, params: &TreeParams) -> Result<Removal> {
        if self.get(id).is_none() {
            return Err(Error::InvalidParameter(format!("{id:?} is not a live node")));
        }
        let Some(parent) = self.node(id).parent else {
            return Err(Error::InvalidParameter("cannot remove the root".into()));
        };
        let removed = self.descendant_points(id);
        self.unlink(parent, id);
        self.free_subtree(id);

        let min = params.min_fanout();
        let mut orphaned = Vec::new();
        let mut cursor = parent;
        loop {
            let n_children = self.node(cursor).children().len();
            let Some(up) = self.node(cursor).parent else {
                match n_children {
                    0 => {
                        let dim = self.dim;
                        let node = self.node_mut(cursor);
                        node.kind = NodeKind::Leaf(Vec::new());
                        node.bound = B::empty(dim);
                        node.count = 0;
                    }
                    1 => {
                        let child = self.node(cursor).children()[0];
                        self.node_mut(child).parent = None;
                        self.release(cursor);
                        self.set_root(child);
                    }
                    _ => self.refit(cursor),
                }
                break;
            };
            if n_children == 1 && min > 1 {
                let child = self.node(cursor).children()[0];
                if let NodeKind::Internal(c) = &mut self.node_mut(up).kind {
                    for slot in c.iter_mut().filter(|s| **s == cursor) {
                        *slot = child;
                    }
                }
                self.node_mut(child).parent = Some(up);
                self.release(cursor);
            } else if n_children < min.max(1) {
                orphaned.extend(self.descendant_points(cursor));
                self.unlink(up, cursor);
                self.free_subtree(cursor);
            } else {
                self.refit(cursor);
            }
            cursor = up;
        }
        self.stale = true;
        tracing::trace!(
            removed = removed.len(),
            orphaned = orphaned.len(),
            "subtree removed"
        );
        Ok(Removal { removed, orphaned })
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        if let NodeKind::Internal(c) = &mut self.node_mut(parent).kind {
            c.retain(|&c| c != child);
        }
        self.node_mut(child).parent = None;
    }

    fn free_subtree(&mut self, id: NodeId) {
        for n in self.post_order(id) {
            self.release(n);
        }
    }

    /// Free one slot. Links to and from it must already be gone.
    fn release(&mut self, id: NodeId) {
        self.nodes[id.index()] = None;
        self.free_list.push(id.index());
        self.stale = true;
    }

    /// Recompute every statistic and descendant count, post-order.
    ///
    /// Leaves see each owned point through `points`.
    pub fn fix_statistics<C: PointCursor>(&mut self, points: &mut C) -> Result<()> {
        for id in self.post_order(self.root) {
            let mut stat = core::mem::take(&mut self.node_mut(id).stat);
            stat.reset();
            let node = self.node(id);
            let count = match &node.kind {
                NodeKind::Leaf(p) => {
                    for &i in p {
                        stat.accumulate_point(&node.bound, points.point(i)?);
                    }
                    p.len()
                }
                NodeKind::Internal(children) => {
                    let mut total = 0;
                    for &c in children {
                        let child = self.node(c);
                        stat.accumulate_child(&node.bound, &child.stat, &child.bound, child.count);
                        total += child.count;
                    }
                    total
                }
            };
            stat.postprocess(&node.bound, count);
            let node = self.node_mut(id);
            node.stat = stat;
            node.count = count;
        }
        self.stale = false;
        tracing::trace!(nodes = self.len(), "statistics fixed");
        Ok(())
    }

    /// Check that every internal node respects the fanout limits of `params`.
    ///
    /// Non-root nodes need between [`TreeParams::min_fanout`] and
    /// [`TreeParams::max_fanout`] children; an internal root needs at least
    /// two. Complements [`validate`](Self::validate), which checks structure
    /// that holds for any builder.
    pub fn validate_fanout(&self, params: &TreeParams) -> Result<()> {
        let (min, max) = (params.min_fanout(), params.max_fanout());
        for id in self.post_order(self.root) {
            let NodeKind::Internal(children) = &self.node(id).kind else {
                continue;
            };
            let n = children.len();
            let low = if id == self.root { 2 } else { min };
            if n < low || n > max {
                return Err(Error::Invariant(format!(
                    "{id:?} has {n} children, outside {low}..={max}"
                )));
            }
        }
        Ok(())
    }

    /// Check parent links, counts, bound containment, and point coverage.
    ///
    /// Every index in `0..n_points` must appear in exactly one leaf.
    pub fn validate<C: PointCursor>(&self, points: &mut C, n_points: usize) -> Result<()> {
        let root = self.get(self.root).ok_or_else(|| {
            Error::Invariant(format!("root {:?} is not a live node", self.root))
        })?;
        if root.parent.is_some() {
            return Err(Error::Invariant("root has a parent".into()));
        }
        let mut seen = vec![false; n_points];
        let mut visited = 0_usize;
        for id in self.post_order(self.root) {
            visited += 1;
            let node = self.node(id);
            match &node.kind {
                NodeKind::Leaf(p) => {
                    if node.count != p.len() {
                        return Err(Error::Invariant(format!(
                            "leaf {id:?} counts {} but owns {}",
                            node.count,
                            p.len()
                        )));
                    }
                    for &i in p {
                        if i >= n_points || core::mem::replace(&mut seen[i], true) {
                            return Err(Error::Invariant(format!(
                                "point {i} is out of range or owned twice"
                            )));
                        }
                    }
                }
                NodeKind::Internal(children) => {
                    if children.is_empty() || (id == self.root && children.len() < 2) {
                        return Err(Error::Invariant(format!(
                            "internal {id:?} has {} children",
                            children.len()
                        )));
                    }
                    let mut total = 0;
                    for &c in children {
                        let child = self.get(c).ok_or_else(|| {
                            Error::Invariant(format!("{id:?} owns freed child {c:?}"))
                        })?;
                        if child.parent != Some(id) {
                            return Err(Error::Invariant(format!(
                                "{c:?} does not point back at {id:?}"
                            )));
                        }
                        total += child.count;
                    }
                    if total != node.count {
                        return Err(Error::Invariant(format!(
                            "{id:?} counts {} but children hold {total}",
                            node.count
                        )));
                    }
                }
            }
            for i in self.descendant_points(id) {
                let p = points.point(i)?;
                let tolerance = 1e-9 * (1.0 + p.iter().fold(0.0_f64, |m, c| m.max(c.abs())));
                if !node.bound.contains(p, tolerance) {
                    return Err(Error::Invariant(format!(
                        "{id:?} bound does not contain point {i}"
                    )));
                }
            }
        }
        if visited != self.len() {
            return Err(Error::Invariant(format!(
                "{} live nodes but {visited} reachable",
                self.len()
            )));
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(Error::Invariant(format!("point {missing} is in no leaf")));
        }
        Ok(())
    }

    /// Export the arena as `(root, slots)`; freed slots are `None`.
    pub fn to_slots(&self) -> (NodeId, Vec<Option<Node<B, S>>>) {
        (self.root, self.nodes.clone())
    }

    /// Rebuild a tree from exported slots.
    ///
    /// Statistics are taken as exported and count as fresh. Links are
    /// checked so a truncated or mismatched snapshot is rejected.
    pub fn from_slots(dim: usize, root: NodeId, slots: Vec<Option<Node<B, S>>>) -> Result<Self> {
        let free_list = slots
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_none())
            .map(|(i, _)| i)
            .collect();
        let tree = Self {
            dim,
            root,
            nodes: slots,
            free_list,
            stale: false,
        };
        let Some(root_node) = tree.get(root) else {
            return Err(Error::Invariant(format!("snapshot lacks root {root:?}")));
        };
        if root_node.bound.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: root_node.bound.dim(),
            });
        }
        for (id, node) in tree.nodes() {
            for &c in node.children() {
                match tree.get(c) {
                    Some(child) if child.parent == Some(id) => {}
                    _ => {
                        return Err(Error::Invariant(format!(
                            "snapshot link {id:?} -> {c:?} is broken"
                        )));
                    }
                }
            }
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::HRectBound;
    use crate::points::{PointSet, PointSource};
    use crate::statistic::{DescendantRadius, FurthestDescendant};

    type Tree = SpatialTree<HRectBound, FurthestDescendant>;

    /// Root with two leaves: {0, 1} and {2, 3}.
    fn two_leaf_tree(set: &PointSet) -> Tree {
        let mut tree = Tree::with_empty_root(1);
        let leaf = |tree: &mut Tree, idx: Vec<usize>| {
            let mut b = HRectBound::empty(1);
            for &i in &idx {
                b.union_point(set.point(i));
            }
            let n = idx.len();
            tree.alloc(b, NodeKind::Leaf(idx), n)
        };
        let a = leaf(&mut tree, vec![0, 1]);
        let b = leaf(&mut tree, vec![2, 3]);
        let root = tree.root();
        tree.node_mut(root).kind = NodeKind::Internal(Vec::new());
        tree.attach_child(root, a);
        tree.attach_child(root, b);
        tree.refit(root);
        tree
    }

    fn set() -> PointSet {
        PointSet::from_columns(1, vec![0.0, 1.0, 9.0, 10.0]).unwrap()
    }

    #[test]
    fn fix_statistics_runs_post_order() {
        let set = set();
        let mut tree = two_leaf_tree(&set);
        assert!(tree.stats_stale());
        tree.fix_statistics(&mut set.cursor()).unwrap();
        assert!(!tree.stats_stale());
        let root = tree.node(tree.root());
        assert_eq!(root.count(), 4);
        assert_eq!(root.stat().furthest_descendant(), 5.0);
        for &c in root.children() {
            assert_eq!(tree.node(c).stat().furthest_descendant(), 0.5);
        }
        tree.validate(&mut set.cursor(), 4).unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn detach_clears_links_and_keeps_children_alive() {
        let set = set();
        let mut tree = two_leaf_tree(&set);
        let root = tree.root();
        let children = tree.detach_children(root);
        assert_eq!(children.len(), 2);
        assert!(tree.node(root).children().is_empty());
        for &c in &children {
            assert_eq!(tree.node(c).parent(), None);
            assert_eq!(tree.node(c).count(), 2);
        }
        tree.attach_child(root, children[1]);
        tree.attach_child(root, children[0]);
        tree.refit(root);
        tree.fix_statistics(&mut set.cursor()).unwrap();
        tree.validate(&mut set.cursor(), 4).unwrap();
        assert_eq!(tree.descendant_points(root), vec![2, 3, 0, 1]);
    }

    #[test]
    fn removing_one_of_two_children_hands_the_root_over() {
        let set = set();
        let mut tree = two_leaf_tree(&set);
        tree.fix_statistics(&mut set.cursor()).unwrap();
        let old_root = tree.root();
        let [left, right] = [0, 1].map(|i| tree.node(old_root).children()[i]);
        let params = TreeParams::default();
        let removal = tree.remove_subtree(right, &params).unwrap();
        assert_eq!(removal.removed, vec![2, 3]);
        assert!(removal.orphaned.is_empty());
        assert!(tree.get(right).is_none());
        assert!(tree.get(old_root).is_none());
        assert!(tree.stats_stale());
        assert_eq!(tree.root(), left);
        assert_eq!(tree.len(), 1);
        let root = tree.node(tree.root());
        assert_eq!(root.parent(), None);
        assert_eq!(root.points(), &[0, 1]);
        assert_eq!(root.bound().hi(), &[1.0]);
        tree.fix_statistics(&mut set.cursor()).unwrap();
        tree.validate(&mut set.cursor(), 2).unwrap();
        tree.validate_fanout(&params).unwrap();
        assert!(matches!(
            tree.remove_subtree(tree.root(), &params),
            Err(Error::InvalidParameter(_))
        ));
        // Freed slots are recycled.
        let id = tree.alloc(HRectBound::empty(1), NodeKind::Leaf(Vec::new()), 0);
        assert!(id == old_root || id == right, "{id:?} was not recycled");
    }

    #[test]
    fn single_child_is_spliced_into_its_grandparent() {
        let set =
            PointSet::from_columns(1, vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0]).unwrap();
        let params = TreeParams {
            max_leaf_size: 2,
            min_leaf_size: 1,
            ..TreeParams::default()
        };
        let mut tree: Tree = crate::builders::build_tree(&set, &params).unwrap();
        tree.validate_fanout(&params).unwrap();
        let leaf = tree
            .nodes()
            .find(|(_, n)| n.is_leaf() && n.points().contains(&2))
            .map(|(id, _)| id)
            .unwrap();
        let removal = tree.remove_subtree(leaf, &params).unwrap();
        assert_eq!(removal.removed, vec![2, 3]);
        assert!(removal.orphaned.is_empty());
        tree.validate_fanout(&params).unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.count(), 6);
        let kept = tree.node(root.children()[0]);
        assert!(kept.is_leaf());
        assert_eq!(kept.points(), &[0, 1]);
        assert_eq!(kept.parent(), Some(tree.root()));
        let mut points = tree.descendant_points(tree.root());
        points.sort_unstable();
        assert_eq!(points, vec![0, 1, 4, 5, 6, 7]);
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn fanout_check_rejects_a_lone_child() {
        let set = set();
        let mut tree = two_leaf_tree(&set);
        let root = tree.root();
        let right = tree.node(root).children()[1];
        if let NodeKind::Internal(c) = &mut tree.node_mut(root).kind {
            c.pop();
        }
        tree.node_mut(right).parent = None;
        tree.refit(root);
        assert!(matches!(
            tree.validate_fanout(&TreeParams::default()),
            Err(Error::Invariant(_))
        ));
        tree.fix_statistics(&mut set.cursor()).unwrap();
        assert!(matches!(
            tree.validate(&mut set.cursor(), 2),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    #[should_panic(expected = "exceeds u32::MAX")]
    fn node_id_past_u32_panics() {
        assert_eq!(NodeId::new(7).index(), 7);
        let _ = NodeId::new(u32::MAX as usize + 1);
    }

    #[test]
    fn validate_catches_missing_points() {
        let set = set();
        let mut tree = two_leaf_tree(&set);
        tree.fix_statistics(&mut set.cursor()).unwrap();
        assert!(matches!(
            tree.validate(&mut set.cursor(), 5),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn snapshot_round_trip_preserves_structure() {
        let set = set();
        let mut tree = two_leaf_tree(&set);
        tree.fix_statistics(&mut set.cursor()).unwrap();
        let (root, slots) = tree.to_slots();
        let back = Tree::from_slots(1, root, slots.clone()).unwrap();
        assert!(!back.stats_stale());
        assert_eq!(back.to_slots().1, slots);

        let mut broken = slots;
        broken[1] = None;
        assert!(matches!(
            Tree::from_slots(1, root, broken),
            Err(Error::Invariant(_))
        ));
    }
}
