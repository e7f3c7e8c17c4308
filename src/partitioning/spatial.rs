//! SpatialPartition: one half-open box per rank, agreed by every rank.
//!
//! Construction is collective. All ranks reduce their local extents into a
//! global box, pad it, and then bisect it region by region. Each round every
//! unfinished region is classified against local geometry, the histograms
//! are summed with one `all_reduce`, and every rank applies the same
//! deterministic split rule to the same numbers. The leaves therefore come
//! out identical everywhere without any further exchange.
//!
//! Leaves tile the padded root box: a point strictly inside it is owned by
//! exactly one region.

use crate::algs::communicator::{Communicator, ReduceOp};
use crate::cmfe_error::CmfeError;
use crate::geometry::bbox::{Axis, BoundingBox};
use crate::geometry::interval_tree::IntervalTree;
use crate::partitioning::region::{Region, SplitOutcome};
use crate::partitioning::{BoxOwner, PartitionConfig, SpatialContent};

#[derive(Clone, Debug)]
pub struct SpatialPartition {
    /// Leaf boxes indexed by rank.
    regions: Vec<BoundingBox>,
    tree: IntervalTree,
    bounds: BoundingBox,
}

impl SpatialPartition {
    /// Collective: every rank must call this with the same `cfg`.
    pub fn build<C: Communicator + ?Sized>(
        comm: &C,
        cfg: &PartitionConfig,
        contents: &[&dyn SpatialContent],
    ) -> Result<Self, CmfeError> {
        cfg.validate()?;
        let global = global_bounds(comm, contents)?;
        let flat = flat_axes(&global);
        let root = global.padded();
        log::debug!(
            "[rank {}] partition root {:?} (flat axes: {flat:?})",
            comm.rank(),
            root
        );

        let first = Axis::first(flat);
        let mut frontier = vec![Region::new(root, 0, comm.size(), first, cfg)];
        let mut leaves: Vec<Region> = Vec::with_capacity(comm.size());
        let mut round = 0usize;
        loop {
            let (done, active): (Vec<_>, Vec<_>) = frontier.into_iter().partition(|r| r.done);
            leaves.extend(done);
            frontier = active;
            if frontier.is_empty() {
                break;
            }
            round += 1;
            log::debug!(
                "[rank {}] partition round {round}: {} active region(s)",
                comm.rank(),
                frontier.len()
            );

            for region in frontier.iter_mut() {
                region.reset_bins();
                for c in contents {
                    c.classify(region);
                }
            }
            let mut hist: Vec<u64> = frontier
                .iter()
                .flat_map(|r| r.bins.iter().copied())
                .collect();
            comm.all_reduce_u64(&mut hist, ReduceOp::Sum)?;
            let mut offset = 0;
            for region in frontier.iter_mut() {
                let n = region.bins.len();
                region.bins.copy_from_slice(&hist[offset..offset + n]);
                offset += n;
            }

            let mut next = Vec::with_capacity(frontier.len() * 2);
            for mut region in frontier {
                match region.attempt_split(cfg, flat) {
                    SplitOutcome::Retry => next.push(region),
                    SplitOutcome::Split(lo, hi) => {
                        next.push(lo);
                        next.push(hi);
                    }
                }
            }
            frontier = next;
        }

        Ok(Self::from_leaves(root, leaves))
    }

    fn from_leaves(bounds: BoundingBox, mut leaves: Vec<Region>) -> Self {
        leaves.sort_by_key(|r| r.first_rank);
        let regions: Vec<BoundingBox> = leaves.into_iter().map(|r| r.bounds).collect();
        let tree = IntervalTree::build(regions.iter().copied().enumerate().collect());
        Self {
            regions,
            tree,
            bounds,
        }
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// `(rank, box)` for every leaf.
    pub fn regions(&self) -> impl Iterator<Item = (usize, &BoundingBox)> + '_ {
        self.regions.iter().enumerate()
    }

    /// The padded global box the leaves tile.
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Rank owning `p`. A point outside every region is an invariant
    /// violation: the root box covers all geometry that built the partition.
    pub fn get_processor(&self, p: &[f64; 3]) -> Result<usize, CmfeError> {
        let mut hits = Vec::with_capacity(8);
        self.tree.containing(p, &mut hits);
        hits.into_iter()
            .find(|&r| self.regions[r].owns(p))
            .ok_or(CmfeError::PointOutsidePartition(*p))
    }

    /// Single owner of a box, if there is one.
    pub fn get_processor_box(&self, b: &BoundingBox) -> BoxOwner {
        match self.get_processor_list(b).as_slice() {
            [] => BoxOwner::None,
            [r] => BoxOwner::Rank(*r),
            _ => BoxOwner::Ambiguous,
        }
    }

    /// Every rank whose region overlaps `b`, ascending.
    pub fn get_processor_list(&self, b: &BoundingBox) -> Vec<usize> {
        let mut hits = Vec::new();
        self.tree.overlapping(b, &mut hits);
        hits.retain(|&r| self.regions[r].owns_part_of(b));
        hits
    }

    /// Overlapping ranks plus each one's region box.
    pub fn get_processor_boundaries(&self, b: &BoundingBox) -> (Vec<usize>, Vec<BoundingBox>) {
        let ranks = self.get_processor_list(b);
        let boxes = ranks.iter().map(|&r| self.regions[r]).collect();
        (ranks, boxes)
    }
}

/// Axes along which the global geometry has no extent. An empty box has none.
fn flat_axes(global: &BoundingBox) -> [bool; 3] {
    if global.is_empty() {
        return [false; 3];
    }
    std::array::from_fn(|a| global.extent(a) == 0.0)
}

/// Union of every rank's local extent.
fn global_bounds<C: Communicator + ?Sized>(
    comm: &C,
    contents: &[&dyn SpatialContent],
) -> Result<BoundingBox, CmfeError> {
    let mut local = BoundingBox::empty();
    for c in contents {
        c.extend_bounds(&mut local);
    }
    let mut min = local.min;
    let mut max = local.max;
    comm.all_reduce_f64(&mut min, ReduceOp::Min)?;
    comm.all_reduce_f64(&mut max, ReduceOp::Max)?;
    Ok(BoundingBox::new(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    struct Cloud(Vec<[f64; 3]>);

    impl SpatialContent for Cloud {
        fn extend_bounds(&self, bounds: &mut BoundingBox) {
            for p in &self.0 {
                bounds.extend(p);
            }
        }
        fn classify(&self, region: &mut Region) {
            for p in &self.0 {
                region.add_point(p);
            }
        }
    }

    #[test]
    fn flat_axes_follow_zero_extents() {
        let xz = BoundingBox::new([0.0, 2.0, -1.0], [1.0, 2.0, 1.0]);
        assert_eq!(flat_axes(&xz), [false, true, false]);
        let yz = BoundingBox::new([3.0, 0.0, 0.0], [3.0, 1.0, 1.0]);
        assert_eq!(flat_axes(&yz), [true, false, false]);
        assert_eq!(flat_axes(&BoundingBox::empty()), [false; 3]);
    }

    #[test]
    fn single_rank_is_one_region_covering_everything() {
        let cloud = Cloud(vec![[0.0; 3], [2.0, 1.0, 3.0]]);
        let part =
            SpatialPartition::build(&NoComm, &PartitionConfig::default(), &[&cloud]).unwrap();
        assert_eq!(part.num_regions(), 1);
        assert_eq!(part.get_processor(&[2.0, 1.0, 3.0]).unwrap(), 0);
        assert_eq!(part.get_processor(&[0.0, 0.0, 0.0]).unwrap(), 0);
        assert!(matches!(
            part.get_processor(&[50.0, 0.0, 0.0]),
            Err(CmfeError::PointOutsidePartition(_))
        ));
    }

    #[test]
    fn empty_geometry_gets_a_unit_root() {
        let part = SpatialPartition::build(&NoComm, &PartitionConfig::default(), &[]).unwrap();
        assert_eq!(part.bounds(), &BoundingBox::new([0.0; 3], [1.0; 3]));
    }

    #[test]
    fn box_queries_on_hand_built_leaves() {
        let cfg = PartitionConfig::default();
        let root = BoundingBox::new([0.0; 3], [2.0, 1.0, 1.0]);
        let left = Region::new(BoundingBox::new([0.0; 3], [1.0; 3]), 0, 1, Axis::Y, &cfg);
        let right = Region::new(
            BoundingBox::new([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]),
            1,
            1,
            Axis::Y,
            &cfg,
        );
        let part = SpatialPartition::from_leaves(root, vec![right, left]);

        assert_eq!(part.get_processor(&[1.0, 0.5, 0.5]).unwrap(), 1);
        let inside = BoundingBox::new([0.2; 3], [0.4; 3]);
        assert_eq!(part.get_processor_box(&inside), BoxOwner::Rank(0));
        let straddle = BoundingBox::new([0.5, 0.2, 0.2], [1.5, 0.4, 0.4]);
        assert_eq!(part.get_processor_box(&straddle), BoxOwner::Ambiguous);
        let outside = BoundingBox::new([5.0; 3], [6.0; 3]);
        assert_eq!(part.get_processor_box(&outside), BoxOwner::None);

        // A box ending on the shared face touches the right region too.
        let touching = BoundingBox::new([0.5, 0.2, 0.2], [1.0, 0.4, 0.4]);
        let (ranks, boxes) = part.get_processor_boundaries(&touching);
        assert_eq!(ranks, vec![0, 1]);
        assert_eq!(boxes[1].min[0], 1.0);
    }
}
