//! One box of the recursive bisection, with its pivot histogram.
//!
//! A region is responsible for a contiguous rank range
//! `[first_rank, first_rank + n_procs)`. While `n_procs > 1` it proposes
//! evenly spaced pivots along its split axis, collects a histogram of the
//! geometry it owns (bin `i` holds values strictly below pivot `i` and at or
//! above pivot `i - 1`), and once the histogram has been summed over all
//! ranks it either splits in two or narrows its pivots and tries again.

use crate::geometry::bbox::{Axis, BoundingBox};
use crate::partitioning::PartitionConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub bounds: BoundingBox,
    pub first_rank: usize,
    pub n_procs: usize,
    pub axis: Axis,
    /// Classification rounds already spent on the current split.
    pub iteration: usize,
    pub pivots: Vec<f64>,
    pub bins: Vec<u64>,
    pub done: bool,
}

/// Result of [`Region::attempt_split`].
#[derive(Clone, Debug, PartialEq)]
pub enum SplitOutcome {
    /// The region keeps its bounds and reclassifies with new pivots.
    Retry,
    Split(Region, Region),
}

impl Region {
    pub fn new(
        bounds: BoundingBox,
        first_rank: usize,
        n_procs: usize,
        axis: Axis,
        cfg: &PartitionConfig,
    ) -> Self {
        let mut r = Self {
            bounds,
            first_rank,
            n_procs,
            axis,
            iteration: 0,
            pivots: vec![0.0; cfg.num_pivots],
            bins: vec![0; cfg.num_pivots + 1],
            done: n_procs <= 1,
        };
        let a = axis.index();
        r.place_pivots(bounds.min[a], bounds.max[a]);
        r
    }

    /// Evenly space the pivots strictly inside `(lo, hi)`.
    fn place_pivots(&mut self, lo: f64, hi: f64) {
        let n = self.pivots.len();
        for (i, p) in self.pivots.iter_mut().enumerate() {
            *p = lo + (hi - lo) * (i + 1) as f64 / (n + 1) as f64;
        }
    }

    pub fn reset_bins(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
    }

    #[inline]
    fn bin_of(&self, v: f64) -> usize {
        self.pivots.partition_point(|&p| p <= v)
    }

    /// Count one point if this region owns it.
    pub fn add_point(&mut self, p: &[f64; 3]) {
        if self.bounds.owns(p) {
            let b = self.bin_of(p[self.axis.index()]);
            self.bins[b] += 1;
        }
    }

    /// Count the lattice `x × y × z` (ascending axes) without enumerating it:
    /// every owned coordinate on the split axis stands for a slab whose size
    /// is the product of owned coordinates on the other two axes.
    pub fn add_grid(&mut self, axes: &[Vec<f64>; 3]) {
        let a = self.axis.index();
        let slab: u64 = (0..3)
            .filter(|&o| o != a)
            .map(|o| self.bounds.owned_range(o, &axes[o]).len() as u64)
            .product();
        if slab == 0 {
            return;
        }
        let range = self.bounds.owned_range(a, &axes[a]);
        for &v in &axes[a][range] {
            let b = self.bin_of(v);
            self.bins[b] += slab;
        }
    }

    /// Decide on the globally summed histogram.
    ///
    /// Picks the pivot whose cumulative share is closest to
    /// `(n_procs / 2) / n_procs`. The split is accepted when that share is
    /// within `cfg.tolerance`, or unconditionally once `cfg.max_attempts`
    /// rounds have been spent. An empty histogram offers no usable pivot and
    /// falls back to the middle one at the cap.
    pub fn attempt_split(&mut self, cfg: &PartitionConfig, flat: [bool; 3]) -> SplitOutcome {
        self.iteration += 1;
        let at_cap = self.iteration >= cfg.max_attempts;
        let total: u64 = self.bins.iter().sum();
        let n_lower = self.n_procs / 2;
        let target = n_lower as f64 / self.n_procs as f64;

        let best = if total == 0 {
            log::warn!(
                "region {:?} (ranks {}..{}) classified no geometry on round {}",
                self.bounds,
                self.first_rank,
                self.first_rank + self.n_procs,
                self.iteration
            );
            if !at_cap {
                self.reset_bins();
                return SplitOutcome::Retry;
            }
            self.pivots.len() / 2
        } else {
            let mut cum = 0u64;
            let mut best = (0, f64::INFINITY);
            for (i, &b) in self.bins[..self.pivots.len()].iter().enumerate() {
                cum += b;
                let err = (cum as f64 / total as f64 - target).abs();
                if err < best.1 {
                    best = (i, err);
                }
            }
            if best.1 > cfg.tolerance && !at_cap {
                let a = self.axis.index();
                let lo = if best.0 == 0 {
                    self.bounds.min[a]
                } else {
                    self.pivots[best.0 - 1]
                };
                let hi = self
                    .pivots
                    .get(best.0 + 1)
                    .copied()
                    .unwrap_or(self.bounds.max[a]);
                self.place_pivots(lo, hi);
                self.reset_bins();
                return SplitOutcome::Retry;
            }
            best.0
        };

        let (lower, upper) = self.split_at(self.pivots[best], n_lower, cfg, flat);
        log::debug!(
            "split ranks {}..{} on {:?} at {} after {} round(s): {} + {}",
            self.first_rank,
            self.first_rank + self.n_procs,
            self.axis,
            self.pivots[best],
            self.iteration,
            lower.n_procs,
            upper.n_procs
        );
        SplitOutcome::Split(lower, upper)
    }

    fn split_at(
        &self,
        pivot: f64,
        n_lower: usize,
        cfg: &PartitionConfig,
        flat: [bool; 3],
    ) -> (Region, Region) {
        let a = self.axis.index();
        let mut lo_box = self.bounds;
        lo_box.max[a] = pivot;
        let mut hi_box = self.bounds;
        hi_box.min[a] = pivot;
        let next = self.axis.next(flat);
        (
            Region::new(lo_box, self.first_rank, n_lower, next, cfg),
            Region::new(
                hi_box,
                self.first_rank + n_lower,
                self.n_procs - n_lower,
                next,
                cfg,
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(n_procs: usize) -> Region {
        Region::new(
            BoundingBox::new([0.0; 3], [1.0; 3]),
            0,
            n_procs,
            Axis::X,
            &PartitionConfig::default(),
        )
    }

    #[test]
    fn pivots_are_evenly_spaced() {
        let r = unit(2);
        let want = [1.0 / 6.0, 2.0 / 6.0, 3.0 / 6.0, 4.0 / 6.0, 5.0 / 6.0];
        for (p, w) in r.pivots.iter().zip(want) {
            assert!((p - w).abs() < 1e-15);
        }
        assert!(!r.done);
        assert!(unit(1).done);
    }

    #[test]
    fn value_on_a_pivot_goes_to_the_upper_bin() {
        let mut r = unit(2);
        let p = r.pivots[2];
        r.add_point(&[p, 0.5, 0.5]);
        assert_eq!(r.bins[3], 1);
        r.add_point(&[2.0, 0.5, 0.5]);
        assert_eq!(r.bins.iter().sum::<u64>(), 1);
    }

    #[test]
    fn balanced_points_split_at_the_middle_pivot() {
        let cfg = PartitionConfig::default();
        let mut r = unit(2);
        for i in 0..100 {
            r.add_point(&[(i as f64 + 0.5) / 100.0, 0.5, 0.5]);
        }
        match r.attempt_split(&cfg, [false; 3]) {
            SplitOutcome::Split(lo, hi) => {
                assert_eq!(lo.bounds.max[0], 0.5);
                assert_eq!(hi.bounds.min[0], 0.5);
                assert_eq!((lo.first_rank, lo.n_procs), (0, 1));
                assert_eq!((hi.first_rank, hi.n_procs), (1, 1));
                assert_eq!(lo.axis, Axis::Y);
            }
            SplitOutcome::Retry => panic!("expected a split"),
        }
    }

    #[test]
    fn skewed_points_narrow_then_split_at_the_cap() {
        let cfg = PartitionConfig::default();
        let mut r = unit(2);
        let mut rounds = 0;
        loop {
            for i in 0..90 {
                r.add_point(&[0.01 + i as f64 * 1e-4, 0.5, 0.5]);
            }
            for i in 0..10 {
                r.add_point(&[0.9 + i as f64 * 1e-3, 0.5, 0.5]);
            }
            rounds += 1;
            if let SplitOutcome::Split(lo, _) = r.attempt_split(&cfg, [false; 3]) {
                assert!(lo.bounds.max[0] < 0.2);
                break;
            }
        }
        assert!(rounds <= cfg.max_attempts);
    }

    #[test]
    fn empty_region_still_terminates() {
        let cfg = PartitionConfig::default();
        let mut r = unit(3);
        let mut rounds = 0;
        loop {
            rounds += 1;
            if let SplitOutcome::Split(lo, hi) = r.attempt_split(&cfg, [false, false, true]) {
                assert_eq!(lo.bounds.max[0], r.pivots[2]);
                assert_eq!((lo.n_procs, hi.n_procs), (1, 2));
                break;
            }
        }
        assert_eq!(rounds, cfg.max_attempts);
    }

    #[test]
    fn grid_counts_use_slab_multiplier() {
        let mut r = unit(2);
        let axes = [
            vec![0.1, 0.3, 0.9],
            vec![0.0, 0.5, 1.0], // 1.0 is outside the half-open box
            vec![0.2, 0.4],
        ];
        r.add_grid(&axes);
        assert_eq!(r.bins.iter().sum::<u64>(), 3 * 2 * 2);
        assert_eq!(r.bins[0], 4);
        assert_eq!(r.bins[5], 4);
    }
}
