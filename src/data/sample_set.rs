//! SampleSet: every target location that needs a donor value on this rank.
//!
//! Datasets are stored in one of two shapes. Explicit datasets keep a flat
//! point list. Rectilinear datasets keep only their three ascending axes, so
//! an `nx × ny × nz` lattice never materializes its points; local index `n`
//! decodes as `i = n % nx`, `j = (n / nx) % ny`, `k = n / (nx * ny)`.
//!
//! [`SampleSet::finalize`] numbers samples globally with all explicit
//! datasets first, then all rectilinear ones, and sizes the value buffer.
//! Datasets keep their insertion index for [`SampleSet::value`] regardless
//! of where the global numbering puts them.
//!
//! In distributed runs [`SampleSet::relocate`] swaps the contents for the
//! samples this rank's partition region owns, and [`SampleSet::unrelocate`]
//! ships the evaluated values back and restores the original layout. The
//! return trip carries no indices: the receiving rank re-derives each
//! sample's owner from the partition, which is a pure function of position,
//! and consumes every owner's value stream in the order it was sent.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::all_to_all_v;
use crate::algs::wire::{PointPayload, decode_values, encode_values};
use crate::cmfe_error::CmfeError;
use crate::data::field::Centering;
use crate::data::mesh::Mesh;
use crate::geometry::bbox::BoundingBox;
use crate::partitioning::region::Region;
use crate::partitioning::{SpatialContent, SpatialPartition};
use bytes::Bytes;
use itertools::iproduct;
use std::ops::Range;

/// Marker stored in component 0 of a sample no donor cell contains.
pub const NOT_FOUND: f64 = f64::MAX;

/// True when `value` carries the [`NOT_FOUND`] marker.
#[inline]
pub fn is_not_found(value: &[f64]) -> bool {
    value.first() == Some(&NOT_FOUND)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Slot {
    Explicit(usize),
    Rectilinear(usize),
}

#[derive(Clone, Debug, Default)]
struct Storage {
    slots: Vec<Slot>,
    explicit: Vec<Vec<[f64; 3]>>,
    grids: Vec<[Vec<f64>; 3]>,
}

#[derive(Clone, Debug)]
pub struct SampleSet {
    centering: Centering,
    n_comp: usize,
    store: Storage,
    /// Pre-relocation storage, present only while relocated.
    orig: Option<Storage>,
    /// Source rank of each received chunk / slab, in storage order.
    came_from_chunks: Vec<usize>,
    came_from_slabs: Vec<usize>,

    finalized: bool,
    /// Per dataset in global order: sample count and first global index.
    counts: Vec<usize>,
    starts: Vec<usize>,
    values: Vec<f64>,
}

fn grid_len(g: &[Vec<f64>; 3]) -> usize {
    g[0].len() * g[1].len() * g[2].len()
}

fn grid_bounds(g: &[Vec<f64>; 3]) -> BoundingBox {
    let mut b = BoundingBox::empty();
    if g.iter().any(Vec::is_empty) {
        return b;
    }
    b.extend(&[g[0][0], g[1][0], g[2][0]]);
    b.extend(&[
        g[0][g[0].len() - 1],
        g[1][g[1].len() - 1],
        g[2][g[2].len() - 1],
    ]);
    b
}

/// Index sub-range of `g` owned by `region`, or `None` if empty on any axis.
fn slab_ranges(g: &[Vec<f64>; 3], region: &BoundingBox) -> Option<[Range<usize>; 3]> {
    let ranges: [Range<usize>; 3] = std::array::from_fn(|a| region.owned_range(a, &g[a]));
    if ranges.iter().any(|r| r.is_empty()) {
        None
    } else {
        Some(ranges)
    }
}

impl SampleSet {
    /// Empty set sampling `centering` locations with `n_comp`-wide values.
    pub fn new(centering: Centering, n_comp: usize) -> Self {
        Self {
            centering,
            n_comp,
            store: Storage::default(),
            orig: None,
            came_from_chunks: Vec::new(),
            came_from_slabs: Vec::new(),
            finalized: false,
            counts: Vec::new(),
            starts: vec![0],
            values: Vec::new(),
        }
    }

    pub fn centering(&self) -> Centering {
        self.centering
    }

    pub fn n_comp(&self) -> usize {
        self.n_comp
    }

    /// Ingest one target dataset. A mesh with nothing to sample still takes
    /// a dataset index and contributes zero samples.
    pub fn add_dataset(&mut self, mesh: &Mesh) {
        let slot = match mesh {
            Mesh::Rectilinear(grid) => {
                let axes = match self.centering {
                    Centering::Node => std::array::from_fn(|a| grid.axis(a).to_vec()),
                    Centering::Cell if grid.num_cells() == 0 => Default::default(),
                    Centering::Cell => grid.cell_center_axes(),
                };
                self.store.grids.push(axes);
                Slot::Rectilinear(self.store.grids.len() - 1)
            }
            Mesh::Unstructured(_) => {
                let points = match self.centering {
                    Centering::Node => (0..mesh.num_points()).map(|n| mesh.point(n)).collect(),
                    Centering::Cell => (0..mesh.num_cells()).map(|c| mesh.cell_center(c)).collect(),
                };
                self.store.explicit.push(points);
                Slot::Explicit(self.store.explicit.len() - 1)
            }
        };
        self.store.slots.push(slot);
        self.finalized = false;
    }

    /// Build the count, start and owner tables and zero the value buffer.
    pub fn finalize(&mut self) {
        self.counts.clear();
        self.counts.extend(self.store.explicit.iter().map(Vec::len));
        self.counts.extend(self.store.grids.iter().map(grid_len));
        self.starts.clear();
        self.starts.push(0);
        let mut acc = 0;
        for &n in &self.counts {
            acc += n;
            self.starts.push(acc);
        }
        self.values.clear();
        self.values.resize(acc * self.n_comp, 0.0);
        self.finalized = true;
    }

    fn require_finalized(&self) -> Result<(), CmfeError> {
        if self.finalized {
            Ok(())
        } else {
            Err(CmfeError::NotFinalized("SampleSet"))
        }
    }

    /// Datasets in insertion order.
    pub fn num_datasets(&self) -> usize {
        self.store.slots.len()
    }

    /// Total samples across all datasets; zero before `finalize`.
    pub fn num_points(&self) -> usize {
        self.starts.last().copied().unwrap_or(0)
    }

    /// Position of dataset `dataset` (insertion order) in the global numbering.
    fn ordinal(&self, dataset: usize) -> Result<usize, CmfeError> {
        match self.store.slots.get(dataset) {
            Some(Slot::Explicit(e)) => Ok(*e),
            Some(Slot::Rectilinear(g)) => Ok(self.store.explicit.len() + g),
            None => Err(CmfeError::DatasetOutOfRange {
                index: dataset,
                count: self.store.slots.len(),
            }),
        }
    }

    pub fn dataset_len(&self, dataset: usize) -> Result<usize, CmfeError> {
        self.require_finalized()?;
        Ok(self.counts[self.ordinal(dataset)?])
    }

    fn check_global(&self, index: usize) -> Result<(), CmfeError> {
        self.require_finalized()?;
        let total = self.num_points();
        if index >= total {
            return Err(CmfeError::SampleOutOfRange { index, total });
        }
        Ok(())
    }

    /// Global ordinal of the dataset that holds global sample `index`.
    fn owner_of(&self, index: usize) -> usize {
        self.starts.partition_point(|&s| s <= index) - 1
    }

    /// Position of global sample `index`.
    pub fn point(&self, index: usize) -> Result<[f64; 3], CmfeError> {
        self.check_global(index)?;
        let d = self.owner_of(index);
        let local = index - self.starts[d];
        let n_explicit = self.store.explicit.len();
        if d < n_explicit {
            return Ok(self.store.explicit[d][local]);
        }
        let g = &self.store.grids[d - n_explicit];
        let (nx, ny) = (g[0].len(), g[1].len());
        let (i, j, k) = (local % nx, (local / nx) % ny, local / (nx * ny));
        Ok([g[0][i], g[1][j], g[2][k]])
    }

    pub fn set_value(&mut self, index: usize, value: &[f64]) -> Result<(), CmfeError> {
        self.check_global(index)?;
        if value.len() != self.n_comp {
            return Err(CmfeError::ValueWidth {
                expected: self.n_comp,
                found: value.len(),
            });
        }
        let nc = self.n_comp;
        self.values[index * nc..(index + 1) * nc].copy_from_slice(value);
        Ok(())
    }

    /// Store the [`NOT_FOUND`] marker for global sample `index`.
    pub fn set_not_found(&mut self, index: usize) -> Result<(), CmfeError> {
        self.check_global(index)?;
        let nc = self.n_comp;
        let slot = &mut self.values[index * nc..(index + 1) * nc];
        slot.fill(0.0);
        if let Some(first) = slot.first_mut() {
            *first = NOT_FOUND;
        }
        Ok(())
    }

    /// Value of sample `local` in dataset `dataset` (insertion order).
    pub fn value(&self, dataset: usize, local: usize) -> Result<&[f64], CmfeError> {
        self.require_finalized()?;
        let d = self.ordinal(dataset)?;
        let total = self.counts[d];
        if local >= total {
            return Err(CmfeError::SampleOutOfRange {
                index: local,
                total,
            });
        }
        let g = self.starts[d] + local;
        Ok(&self.values[g * self.n_comp..(g + 1) * self.n_comp])
    }

    pub fn is_relocated(&self) -> bool {
        self.orig.is_some()
    }

    /// Collective: ship every sample to the rank whose region owns it.
    ///
    /// Explicit points go one by one; each rectilinear grid is cut against
    /// the regions it overlaps and only the owned index sub-range of its axes
    /// travels. The original storage is kept for [`SampleSet::unrelocate`].
    pub fn relocate<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
        partition: &SpatialPartition,
    ) -> Result<(), CmfeError> {
        self.require_finalized()?;
        if self.is_relocated() {
            return Err(CmfeError::RelocationState("samples are already relocated"));
        }
        let size = comm.size();
        let mut payloads = vec![PointPayload::default(); size];

        let mut per_dest: Vec<Vec<[f64; 3]>> = vec![Vec::new(); size];
        for points in &self.store.explicit {
            for p in points {
                per_dest[partition.get_processor(p)?].push(*p);
            }
            for (dst, chunk) in per_dest.iter_mut().enumerate() {
                if !chunk.is_empty() {
                    payloads[dst].chunks.push(std::mem::take(chunk));
                }
            }
        }
        for g in &self.store.grids {
            let (ranks, boxes) = partition.get_processor_boundaries(&grid_bounds(g));
            for (r, b) in ranks.into_iter().zip(&boxes) {
                if let Some(ranges) = slab_ranges(g, b) {
                    let slab = std::array::from_fn(|a| g[a][ranges[a].clone()].to_vec());
                    payloads[r].slabs.push(slab);
                }
            }
        }

        let outgoing: Vec<Bytes> = payloads.iter().map(PointPayload::encode).collect();
        for (dst, buf) in outgoing.iter().enumerate() {
            log::debug!(
                "[rank {}] relocate samples → {dst}: {} chunk(s), {} slab(s), {} bytes",
                comm.rank(),
                payloads[dst].chunks.len(),
                payloads[dst].slabs.len(),
                buf.len()
            );
        }
        let incoming = all_to_all_v(comm, outgoing)?;

        let mut fresh = Storage::default();
        let mut came_from_chunks = Vec::new();
        let mut came_from_slabs = Vec::new();
        let mut slabs = Vec::new();
        for (src, buf) in incoming.into_iter().enumerate() {
            let payload = PointPayload::decode(buf)?;
            for chunk in payload.chunks {
                fresh.slots.push(Slot::Explicit(fresh.explicit.len()));
                fresh.explicit.push(chunk);
                came_from_chunks.push(src);
            }
            for slab in payload.slabs {
                slabs.push(slab);
                came_from_slabs.push(src);
            }
        }
        for slab in slabs {
            fresh.slots.push(Slot::Rectilinear(fresh.grids.len()));
            fresh.grids.push(slab);
        }

        self.orig = Some(std::mem::replace(&mut self.store, fresh));
        self.came_from_chunks = came_from_chunks;
        self.came_from_slabs = came_from_slabs;
        self.finalize();
        Ok(())
    }

    /// Collective: return evaluated values to the ranks that submitted the
    /// samples, restore the original datasets and fill their values.
    pub fn unrelocate<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
        partition: &SpatialPartition,
    ) -> Result<(), CmfeError> {
        self.require_finalized()?;
        let Some(orig) = self.orig.take() else {
            return Err(CmfeError::RelocationState("samples were never relocated"));
        };
        let size = comm.size();
        let nc = self.n_comp;

        // Received datasets are numbered chunks first, then slabs; each
        // source's values therefore leave in the order it packed them.
        let sources = self
            .came_from_chunks
            .iter()
            .chain(&self.came_from_slabs)
            .copied();
        let mut back: Vec<Vec<f64>> = vec![Vec::new(); size];
        for (d, src) in sources.enumerate() {
            let range = self.starts[d] * nc..self.starts[d + 1] * nc;
            back[src].extend_from_slice(&self.values[range]);
        }
        let outgoing: Vec<Bytes> = back.iter().map(|v| encode_values(v)).collect();
        let incoming = all_to_all_v(comm, outgoing)?;
        let mut streams: Vec<ValueStream> = incoming
            .into_iter()
            .enumerate()
            .map(|(src, buf)| decode_values(buf).map(|v| ValueStream::new(src, v)))
            .collect::<Result<_, _>>()?;

        self.store = orig;
        self.came_from_chunks.clear();
        self.came_from_slabs.clear();
        self.finalize();

        let n_explicit = self.store.explicit.len();
        for d in 0..n_explicit {
            for local in 0..self.store.explicit[d].len() {
                let p = self.store.explicit[d][local];
                let owner = partition.get_processor(&p)?;
                let g = self.starts[d] + local;
                streams[owner].take_into(&mut self.values[g * nc..(g + 1) * nc])?;
            }
        }
        for gi in 0..self.store.grids.len() {
            let grid = &self.store.grids[gi];
            let [nx, ny, _] = [grid[0].len(), grid[1].len(), grid[2].len()];
            let base = self.starts[n_explicit + gi];
            let (ranks, boxes) = partition.get_processor_boundaries(&grid_bounds(grid));
            for (r, b) in ranks.into_iter().zip(&boxes) {
                let Some([ri, rj, rk]) = slab_ranges(grid, b) else {
                    continue;
                };
                // Slab order: i fastest, as the receiver numbered it.
                for (k, j, i) in iproduct!(rk, rj, ri) {
                    let g = base + i + nx * (j + ny * k);
                    streams[r].take_into(&mut self.values[g * nc..(g + 1) * nc])?;
                }
            }
        }
        for s in &streams {
            s.finish()?;
        }
        Ok(())
    }
}

/// Values returned by one rank, consumed in send order.
struct ValueStream {
    src: usize,
    values: Vec<f64>,
    pos: usize,
}

impl ValueStream {
    fn new(src: usize, values: Vec<f64>) -> Self {
        Self {
            src,
            values,
            pos: 0,
        }
    }

    fn take_into(&mut self, out: &mut [f64]) -> Result<(), CmfeError> {
        let end = self.pos + out.len();
        let Some(src) = self.values.get(self.pos..end) else {
            return Err(CmfeError::CommError {
                neighbor: self.src,
                reason: format!("returned {} values, more expected", self.values.len()),
            });
        };
        out.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    fn finish(&self) -> Result<(), CmfeError> {
        if self.pos == self.values.len() {
            Ok(())
        } else {
            Err(CmfeError::CommError {
                neighbor: self.src,
                reason: format!(
                    "returned {} values, only {} consumed",
                    self.values.len(),
                    self.pos
                ),
            })
        }
    }
}

impl SpatialContent for SampleSet {
    fn extend_bounds(&self, bounds: &mut BoundingBox) {
        for points in &self.store.explicit {
            for p in points {
                bounds.extend(p);
            }
        }
        for g in &self.store.grids {
            bounds.merge(&grid_bounds(g));
        }
    }

    fn classify(&self, region: &mut Region) {
        for points in &self.store.explicit {
            for p in points {
                region.add_point(p);
            }
        }
        for g in &self.store.grids {
            region.add_grid(g);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mesh::{RectilinearMesh, UnstructuredMesh};

    fn grid(nx: usize, ny: usize, nz: usize) -> Mesh {
        let axis = |n: usize, s: f64| (0..n).map(|i| s * i as f64).collect::<Vec<_>>();
        RectilinearMesh::new(axis(nx, 1.0), axis(ny, 10.0), axis(nz, 100.0))
            .unwrap()
            .into()
    }

    #[test]
    fn explicit_datasets_are_numbered_before_grids() {
        let mut s = SampleSet::new(Centering::Node, 1);
        s.add_dataset(&grid(2, 2, 1));
        s.add_dataset(&UnstructuredMesh::new(vec![[7.0, 8.0, 9.0]]).into());
        s.finalize();
        assert_eq!(s.num_points(), 5);
        assert_eq!(s.point(0).unwrap(), [7.0, 8.0, 9.0]);
        assert_eq!(s.point(4).unwrap(), [1.0, 10.0, 0.0]);
        s.set_value(0, &[3.0]).unwrap();
        assert_eq!(s.value(1, 0).unwrap(), &[3.0]);
        assert_eq!(s.dataset_len(0).unwrap(), 4);
    }

    #[test]
    fn access_before_finalize_is_an_error() {
        let mut s = SampleSet::new(Centering::Node, 1);
        s.add_dataset(&grid(2, 2, 2));
        assert!(matches!(s.point(0), Err(CmfeError::NotFinalized(_))));
    }

    #[test]
    fn cell_centered_grid_samples_cell_centers() {
        let mut s = SampleSet::new(Centering::Cell, 1);
        s.add_dataset(&grid(3, 2, 1));
        s.finalize();
        assert_eq!(s.num_points(), 2);
        assert_eq!(s.point(1).unwrap(), [1.5, 5.0, 0.0]);
    }

    #[test]
    fn not_found_marks_component_zero() {
        let mut s = SampleSet::new(Centering::Node, 2);
        s.add_dataset(&UnstructuredMesh::new(vec![[0.0; 3]]).into());
        s.finalize();
        s.set_not_found(0).unwrap();
        assert!(is_not_found(s.value(0, 0).unwrap()));
        assert!(matches!(
            s.set_value(0, &[1.0]),
            Err(CmfeError::ValueWidth { .. })
        ));
        assert!(matches!(
            s.value(0, 1),
            Err(CmfeError::SampleOutOfRange { .. })
        ));
    }

    #[test]
    fn serial_relocation_round_trip_keeps_layout() {
        use crate::algs::communicator::NoComm;
        use crate::partitioning::PartitionConfig;

        let mut s = SampleSet::new(Centering::Node, 1);
        s.add_dataset(&grid(3, 3, 2));
        s.add_dataset(&UnstructuredMesh::new(vec![[0.5, 0.5, 0.5], [1.5, 2.5, 0.0]]).into());
        s.finalize();
        let before: Vec<_> = (0..s.num_points()).map(|g| s.point(g).unwrap()).collect();

        let part = SpatialPartition::build(&NoComm, &PartitionConfig::default(), &[&s]).unwrap();
        s.relocate(&NoComm, &part).unwrap();
        assert!(s.is_relocated());
        for g in 0..s.num_points() {
            let p = s.point(g).unwrap();
            s.set_value(g, &[p[0] + p[1] + p[2]]).unwrap();
        }
        s.unrelocate(&NoComm, &part).unwrap();

        let after: Vec<_> = (0..s.num_points()).map(|g| s.point(g).unwrap()).collect();
        assert_eq!(before, after);
        for d in 0..2 {
            for i in 0..s.dataset_len(d).unwrap() {
                let g = if d == 0 { 2 + i } else { i };
                let p = before[g];
                assert_eq!(s.value(d, i).unwrap(), &[p[0] + p[1] + p[2]]);
            }
        }
    }
}
