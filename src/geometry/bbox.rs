//! Axis-aligned bounding boxes.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One of the three coordinate axes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    fn succ(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::Z,
            Axis::Z => Axis::X,
        }
    }

    /// Next split axis in the cycle X→Y→Z→X, skipping axes marked `flat`.
    /// When every axis is flat the plain cycle is used.
    pub fn next(self, flat: [bool; 3]) -> Axis {
        let mut a = self;
        for _ in 0..3 {
            a = a.succ();
            if !flat[a.index()] {
                return a;
            }
        }
        self.succ()
    }

    /// First axis, in X, Y, Z order, that is not `flat`.
    pub fn first(flat: [bool; 3]) -> Axis {
        Axis::Z.next(flat)
    }
}

/// Closed axis-aligned box `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// The inverted box; `extend` with any point makes it valid.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a [f64; 3]>,
    {
        let mut b = Self::empty();
        for p in points {
            b.extend(p);
        }
        b
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|a| self.min[a] > self.max[a])
    }

    #[inline]
    pub fn extend(&mut self, p: &[f64; 3]) {
        for a in 0..3 {
            self.min[a] = self.min[a].min(p[a]);
            self.max[a] = self.max[a].max(p[a]);
        }
    }

    pub fn merge(&mut self, other: &BoundingBox) {
        if other.is_empty() {
            return;
        }
        self.extend(&other.min);
        self.extend(&other.max);
    }

    #[inline]
    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    #[inline]
    pub fn extent(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    /// Closed containment.
    #[inline]
    pub fn contains(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] <= self.max[a])
    }

    /// Half-open containment `min <= p < max`, used for region ownership.
    #[inline]
    pub fn owns(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] < self.max[a])
    }

    /// Closed-closed overlap.
    #[inline]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|a| self.min[a] <= other.max[a] && other.min[a] <= self.max[a])
    }

    /// Overlap of this half-open region with the closed box `other`.
    #[inline]
    pub fn owns_part_of(&self, other: &BoundingBox) -> bool {
        (0..3).all(|a| self.min[a] <= other.max[a] && other.min[a] < self.max[a])
    }

    /// Indices of the ascending `coords` that fall in `[min, max)` along `axis`.
    pub fn owned_range(&self, axis: usize, coords: &[f64]) -> Range<usize> {
        let lo = coords.partition_point(|&x| x < self.min[axis]);
        let hi = coords.partition_point(|&x| x < self.max[axis]);
        lo..hi.max(lo)
    }

    /// Longest axis of the box.
    pub fn longest_axis(&self) -> usize {
        let e = [self.extent(0), self.extent(1), self.extent(2)];
        if e[0] >= e[1] && e[0] >= e[2] {
            0
        } else if e[1] >= e[2] {
            1
        } else {
            2
        }
    }

    /// Widen each axis so every point of the original box is strictly inside the
    /// half-open box. Axes with zero extent get unit thickness.
    pub fn padded(&self) -> BoundingBox {
        if self.is_empty() {
            return BoundingBox::new([0.0; 3], [1.0; 3]);
        }
        let mut out = *self;
        for a in 0..3 {
            let e = self.extent(a);
            if e <= 0.0 {
                out.min[a] -= 0.5;
                out.max[a] += 0.5;
            } else {
                let pad = e * 1e-6 + 1e-12 * (1.0 + self.min[a].abs().max(self.max[a].abs()));
                out.min[a] -= pad;
                out.max[a] += pad;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_range_is_half_open() {
        let b = BoundingBox::new([1.0; 3], [3.0; 3]);
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(b.owned_range(0, &xs), 1..3);
        assert!(b.owned_range(0, &[5.0]).is_empty());
    }

    #[test]
    fn half_open_ownership_excludes_max_face() {
        let b = BoundingBox::new([0.0; 3], [1.0; 3]);
        assert!(b.contains(&[1.0, 0.5, 0.5]));
        assert!(!b.owns(&[1.0, 0.5, 0.5]));
        assert!(b.owns(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn padding_gives_flat_axis_thickness() {
        let b = BoundingBox::from_points(&[[0.0, 0.0, 2.0], [1.0, 3.0, 2.0]]);
        let p = b.padded();
        assert!(p.owns(&[1.0, 3.0, 2.0]));
        assert!((p.extent(2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn axis_cycle_skips_flat_axes() {
        let solid = [false; 3];
        assert_eq!(Axis::Y.next(solid), Axis::Z);
        assert_eq!(Axis::Z.next(solid), Axis::X);
        let xy = [false, false, true];
        assert_eq!(Axis::X.next(xy), Axis::Y);
        assert_eq!(Axis::Y.next(xy), Axis::X);
        let xz = [false, true, false];
        assert_eq!(Axis::first(xz), Axis::X);
        assert_eq!(Axis::X.next(xz), Axis::Z);
        assert_eq!(Axis::Z.next(xz), Axis::X);
        let yz = [true, false, false];
        assert_eq!(Axis::first(yz), Axis::Y);
        assert_eq!(Axis::Z.next(yz), Axis::Y);
        let line = [true, true, false];
        assert_eq!(Axis::first(line), Axis::Z);
        assert_eq!(Axis::Z.next(line), Axis::Z);
        assert_eq!(Axis::first([true; 3]), Axis::X);
    }
}
