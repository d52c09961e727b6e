// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Region summaries used as node bounds.
//!
//! Every distance query returns a **squared** Euclidean distance. Lower
//! bounds ([`Bound::min_distance`], [`Bound::min_distance_point`]) never
//! exceed the true minimum over the region; pruning depends on that.
//! [`Bound::diameter`] and the centroid distances are plain (not squared)
//! lengths, which is what radius arithmetic wants.

use core::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Squared Euclidean distance between two points of equal dimension.
#[inline]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "points must share a dimension");
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// A region that grows by union and answers distance bounds.
pub trait Bound:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// A bound containing nothing.
    fn empty(dim: usize) -> Self;

    /// The smallest bound containing `point`.
    fn from_point(point: &[f64]) -> Self {
        let mut b = Self::empty(point.len());
        b.union_point(point);
        b
    }

    /// Number of dimensions.
    fn dim(&self) -> usize;

    /// Returns `true` if no point has been added.
    fn is_empty(&self) -> bool;

    /// Grow to contain `point`.
    fn union_point(&mut self, point: &[f64]);

    /// Grow to contain `other`.
    fn union_bound(&mut self, other: &Self);

    /// Largest distance between two points of the region (not squared).
    fn diameter(&self) -> f64;

    /// Center of the region.
    fn centroid(&self) -> Vec<f64>;

    /// Distance from the center to `point` (not squared).
    fn center_distance_point(&self, point: &[f64]) -> f64;

    /// Distance between the centers of two regions (not squared).
    fn center_distance(&self, other: &Self) -> f64;

    /// Lower bound on the squared distance from `point` to the region.
    fn min_distance_point(&self, point: &[f64]) -> f64;

    /// Upper bound on the squared distance from `point` to the region.
    fn max_distance_point(&self, point: &[f64]) -> f64;

    /// Lower bound on the squared distance between the two regions.
    fn min_distance(&self, other: &Self) -> f64;

    /// Upper bound on the squared distance between the two regions.
    fn max_distance(&self, other: &Self) -> f64;

    /// Whether `point` lies inside, allowing `tolerance` of slack.
    fn contains(&self, point: &[f64], tolerance: f64) -> bool;

    /// Content of the region, up to a constant factor shared by all bounds of one type.
    fn volume(&self) -> f64;

    /// Sum of extents, used to break ties between zero-volume regions.
    fn margin(&self) -> f64;

    /// Volume growth caused by adding `point`.
    fn enlargement(&self, point: &[f64]) -> f64 {
        let mut grown = self.clone();
        grown.union_point(point);
        grown.volume() - self.volume()
    }
}

/// Axis-aligned hyper-rectangle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HRectBound {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl HRectBound {
    /// Lower corner.
    pub fn lo(&self) -> &[f64] {
        &self.lo
    }

    /// Upper corner.
    pub fn hi(&self) -> &[f64] {
        &self.hi
    }

    /// Extent along `axis`, or `0.0` when empty.
    pub fn width(&self, axis: usize) -> f64 {
        (self.hi[axis] - self.lo[axis]).max(0.0)
    }
}

impl Bound for HRectBound {
    fn empty(dim: usize) -> Self {
        Self {
            lo: vec![f64::INFINITY; dim],
            hi: vec![f64::NEG_INFINITY; dim],
        }
    }

    fn dim(&self) -> usize {
        self.lo.len()
    }

    fn is_empty(&self) -> bool {
        self.lo.iter().zip(&self.hi).any(|(l, h)| l > h)
    }

    fn union_point(&mut self, point: &[f64]) {
        for ((l, h), &c) in self.lo.iter_mut().zip(self.hi.iter_mut()).zip(point) {
            *l = l.min(c);
            *h = h.max(c);
        }
    }

    fn union_bound(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        for d in 0..self.lo.len() {
            self.lo[d] = self.lo[d].min(other.lo[d]);
            self.hi[d] = self.hi[d].max(other.hi[d]);
        }
    }

    fn diameter(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        squared_distance(&self.lo, &self.hi).sqrt()
    }

    fn centroid(&self) -> Vec<f64> {
        self.lo
            .iter()
            .zip(&self.hi)
            .map(|(l, h)| l + (h - l) * 0.5)
            .collect()
    }

    fn center_distance_point(&self, point: &[f64]) -> f64 {
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(point)
            .map(|((l, h), p)| {
                let d = l + (h - l) * 0.5 - p;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }

    fn center_distance(&self, other: &Self) -> f64 {
        let mut sum = 0.0;
        for d in 0..self.lo.len() {
            let a = self.lo[d] + (self.hi[d] - self.lo[d]) * 0.5;
            let b = other.lo[d] + (other.hi[d] - other.lo[d]) * 0.5;
            sum += (a - b) * (a - b);
        }
        sum.sqrt()
    }

    fn min_distance_point(&self, point: &[f64]) -> f64 {
        if self.is_empty() {
            return f64::INFINITY;
        }
        let mut sum = 0.0;
        for ((l, h), p) in self.lo.iter().zip(&self.hi).zip(point) {
            let gap = (l - p).max(p - h).max(0.0);
            sum += gap * gap;
        }
        sum
    }

    fn max_distance_point(&self, point: &[f64]) -> f64 {
        if self.is_empty() {
            return f64::NEG_INFINITY;
        }
        let mut sum = 0.0;
        for ((l, h), p) in self.lo.iter().zip(&self.hi).zip(point) {
            let far = (p - l).abs().max((h - p).abs());
            sum += far * far;
        }
        sum
    }

    fn min_distance(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return f64::INFINITY;
        }
        let mut sum = 0.0;
        for d in 0..self.lo.len() {
            let gap = (self.lo[d] - other.hi[d])
                .max(other.lo[d] - self.hi[d])
                .max(0.0);
            sum += gap * gap;
        }
        sum
    }

    fn max_distance(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return f64::NEG_INFINITY;
        }
        let mut sum = 0.0;
        for d in 0..self.lo.len() {
            let far = (self.hi[d] - other.lo[d])
                .abs()
                .max((other.hi[d] - self.lo[d]).abs());
            sum += far * far;
        }
        sum
    }

    fn contains(&self, point: &[f64], tolerance: f64) -> bool {
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(point)
            .all(|((l, h), p)| *p >= l - tolerance && *p <= h + tolerance)
    }

    fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.lo.iter().zip(&self.hi).map(|(l, h)| h - l).product()
    }

    fn margin(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.lo.iter().zip(&self.hi).map(|(l, h)| h - l).sum()
    }
}

/// Ball given by a center and a radius.
///
/// Unions produce an enclosing ball that is not necessarily minimal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallBound {
    center: Vec<f64>,
    // Negative while empty.
    radius: f64,
}

impl BallBound {
    /// Center of the ball.
    pub fn center(&self) -> &[f64] {
        &self.center
    }

    /// Radius of the ball, or a negative value when empty.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn center_gap(&self, point: &[f64]) -> f64 {
        squared_distance(&self.center, point).sqrt()
    }
}

impl Bound for BallBound {
    fn empty(dim: usize) -> Self {
        Self {
            center: vec![0.0; dim],
            radius: -1.0,
        }
    }

    fn dim(&self) -> usize {
        self.center.len()
    }

    fn is_empty(&self) -> bool {
        self.radius < 0.0
    }

    fn union_point(&mut self, point: &[f64]) {
        if self.is_empty() {
            self.center.copy_from_slice(point);
            self.radius = 0.0;
            return;
        }
        let d = self.center_gap(point);
        if d <= self.radius {
            return;
        }
        let new_radius = (self.radius + d) * 0.5;
        let shift = (new_radius - self.radius) / d;
        for (c, p) in self.center.iter_mut().zip(point) {
            *c += (p - *c) * shift;
        }
        // Rounding in the shift may leave `point` a hair outside.
        self.radius = new_radius.max(self.center_gap(point));
    }

    fn union_bound(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        let d = self.center_gap(&other.center);
        if d + other.radius <= self.radius {
            return;
        }
        if d + self.radius <= other.radius {
            *self = other.clone();
            return;
        }
        let old_center = self.center.clone();
        let old_radius = self.radius;
        let new_radius = (d + self.radius + other.radius) * 0.5;
        let shift = (new_radius - self.radius) / d;
        for (c, o) in self.center.iter_mut().zip(&other.center) {
            *c += (o - *c) * shift;
        }
        let keep_self = self.center_gap(&old_center) + old_radius;
        let keep_other = self.center_gap(&other.center) + other.radius;
        self.radius = new_radius.max(keep_self).max(keep_other);
    }

    fn diameter(&self) -> f64 {
        (2.0 * self.radius).max(0.0)
    }

    fn centroid(&self) -> Vec<f64> {
        self.center.clone()
    }

    fn center_distance_point(&self, point: &[f64]) -> f64 {
        self.center_gap(point)
    }

    fn center_distance(&self, other: &Self) -> f64 {
        self.center_gap(&other.center)
    }

    fn min_distance_point(&self, point: &[f64]) -> f64 {
        if self.is_empty() {
            return f64::INFINITY;
        }
        let gap = (self.center_gap(point) - self.radius).max(0.0);
        gap * gap
    }

    fn max_distance_point(&self, point: &[f64]) -> f64 {
        if self.is_empty() {
            return f64::NEG_INFINITY;
        }
        let far = self.center_gap(point) + self.radius;
        far * far
    }

    fn min_distance(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return f64::INFINITY;
        }
        let gap = (self.center_gap(&other.center) - self.radius - other.radius).max(0.0);
        gap * gap
    }

    fn max_distance(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return f64::NEG_INFINITY;
        }
        let far = self.center_gap(&other.center) + self.radius + other.radius;
        far * far
    }

    fn contains(&self, point: &[f64], tolerance: f64) -> bool {
        !self.is_empty() && self.center_gap(point) <= self.radius + tolerance
    }

    fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let dim = i32::try_from(self.center.len()).unwrap_or(i32::MAX);
        self.radius.powi(dim)
    }

    fn margin(&self) -> f64 {
        self.radius.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coords(dim: usize) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(-100.0..100.0_f64, dim)
    }

    fn cloud(dim: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
        prop::collection::vec(coords(dim), 1..12)
    }

    fn bound_of<B: Bound>(points: &[Vec<f64>]) -> B {
        let mut b = B::empty(points[0].len());
        for p in points {
            b.union_point(p);
        }
        b
    }

    fn check_point_soundness<B: Bound>(pts: &[Vec<f64>], probe: &[f64]) -> Result<(), TestCaseError> {
        let b: B = bound_of(pts);
        let lower = b.min_distance_point(probe);
        let upper = b.max_distance_point(probe);
        for p in pts {
            prop_assert!(b.contains(p, 1e-9), "{b:?} lost {p:?}");
            let d = squared_distance(p, probe);
            prop_assert!(lower <= d + 1e-9, "lower {lower} > {d}");
            prop_assert!(upper >= d - 1e-9, "upper {upper} < {d}");
        }
        Ok(())
    }

    fn check_pair_soundness<B: Bound>(
        a: &[Vec<f64>],
        b: &[Vec<f64>],
    ) -> Result<(), TestCaseError> {
        let ba: B = bound_of(a);
        let bb: B = bound_of(b);
        let lower = ba.min_distance(&bb);
        let upper = ba.max_distance(&bb);
        for p in a {
            for q in b {
                let d = squared_distance(p, q);
                prop_assert!(lower <= d + 1e-9, "lower {lower} > {d}");
                prop_assert!(upper >= d - 1e-9, "upper {upper} < {d}");
            }
        }
        let mut merged = ba.clone();
        merged.union_bound(&bb);
        for p in a.iter().chain(b) {
            prop_assert!(merged.contains(p, 1e-7), "{merged:?} lost {p:?}");
        }
        prop_assert!(merged.diameter() + 1e-9 >= ba.diameter());
        Ok(())
    }

    proptest! {
        #[test]
        fn hrect_point_bounds_are_sound(pts in cloud(3), probe in coords(3)) {
            check_point_soundness::<HRectBound>(&pts, &probe)?;
        }

        #[test]
        fn ball_point_bounds_are_sound(pts in cloud(3), probe in coords(3)) {
            check_point_soundness::<BallBound>(&pts, &probe)?;
        }

        #[test]
        fn hrect_pair_bounds_are_sound(a in cloud(2), b in cloud(2)) {
            check_pair_soundness::<HRectBound>(&a, &b)?;
        }

        #[test]
        fn ball_pair_bounds_are_sound(a in cloud(2), b in cloud(2)) {
            check_pair_soundness::<BallBound>(&a, &b)?;
        }
    }

    #[test]
    fn empty_bounds_never_prune_wrongly() {
        let e = HRectBound::empty(2);
        assert!(e.is_empty());
        assert_eq!(e.min_distance_point(&[0.0, 0.0]), f64::INFINITY);
        assert_eq!(e.volume(), 0.0);
        let mut b = HRectBound::from_point(&[1.0, 2.0]);
        b.union_bound(&e);
        assert_eq!(b.lo(), &[1.0, 2.0]);
        assert_eq!(b.hi(), &[1.0, 2.0]);
        assert_eq!(b.diameter(), 0.0);
    }

    #[test]
    fn hrect_distances_match_hand_computation() {
        let mut a = HRectBound::from_point(&[0.0, 0.0]);
        a.union_point(&[1.0, 1.0]);
        let mut b = HRectBound::from_point(&[3.0, 0.5]);
        b.union_point(&[4.0, 5.0]);
        assert_eq!(a.min_distance(&b), 4.0);
        assert_eq!(a.max_distance(&b), 16.0 + 25.0);
        assert_eq!(a.min_distance_point(&[0.5, 3.0]), 4.0);
        assert_eq!(a.centroid(), vec![0.5, 0.5]);
        assert_eq!(a.volume(), 1.0);
        assert_eq!(a.margin(), 2.0);
        assert!((a.diameter() - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn ball_union_encloses_both() {
        let mut a = BallBound::from_point(&[0.0]);
        a.union_point(&[2.0]);
        assert_eq!(a.center(), &[1.0]);
        assert_eq!(a.radius(), 1.0);
        let b = BallBound::from_point(&[10.0]);
        a.union_bound(&b);
        assert!(a.contains(&[0.0], 1e-12));
        assert!(a.contains(&[10.0], 1e-12));
        assert!((a.radius() - 5.0).abs() < 1e-12);
    }
}
