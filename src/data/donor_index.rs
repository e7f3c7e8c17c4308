//! DonorIndex: bounding-box lookup and interpolation over donor meshes.
//!
//! All registered meshes share one linear cell numbering: mesh `m` owns
//! cells `[mesh_cell_start[m], mesh_cell_start[m + 1])`. An
//! [`IntervalTree`] over the cell boxes narrows a query to a few candidates,
//! and [`cell::locate`] decides true containment. A box hit alone never
//! yields a value.
//!
//! Consecutive queries tend to land in the same cell, so the candidate list
//! of the last successful query is tried before the tree. The cache belongs
//! to the index and is cleared on a miss. Only a point strictly inside a
//! warm cell is answered from the cache; a point on a cell face is matched
//! against every tree candidate so shared faces resolve the same way on
//! every rank.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::all_to_all_v;
use crate::algs::wire::{decode_meshes, encode_meshes};
use crate::cmfe_error::CmfeError;
use crate::data::field::{Centering, Field};
use crate::data::mesh::{Mesh, UnstructuredMesh};
use crate::geometry::bbox::BoundingBox;
use crate::geometry::cell;
use crate::geometry::interval_tree::IntervalTree;
use crate::partitioning::region::Region;
use crate::partitioning::{SpatialContent, SpatialPartition};
use bytes::Bytes;
use hashbrown::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct DonorIndex {
    meshes: Vec<Arc<Mesh>>,
    var: String,

    finalized: bool,
    tree: IntervalTree,
    cell_bounds: Vec<BoundingBox>,
    mesh_of_cell: Vec<u32>,
    mesh_cell_start: Vec<usize>,

    /// Candidates that satisfied the last successful query.
    warm: Vec<usize>,
    scratch: Vec<usize>,
    nodes: Vec<usize>,
    verts: Vec<[f64; 3]>,
}

/// Weights at or below this put a point on the cell's boundary.
const FACE_TOL: f64 = 1e-9;

/// A contained cell and its interpolation weights.
struct Hit {
    mesh: usize,
    cell: usize,
    weights: Vec<f64>,
    /// Strictly inside: every weight above `FACE_TOL`.
    interior: bool,
    centroid: [f64; 3],
}

impl Hit {
    /// Smaller centroid first, compared x then y then z.
    fn precedes(&self, other: &Hit) -> bool {
        self.centroid
            .iter()
            .zip(&other.centroid)
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| o.is_ne())
            .is_some_and(|o| o.is_lt())
    }
}

impl DonorIndex {
    /// Index that evaluates the field named `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            meshes: Vec::new(),
            var: var.into(),
            finalized: false,
            tree: IntervalTree::default(),
            cell_bounds: Vec::new(),
            mesh_of_cell: Vec::new(),
            mesh_cell_start: vec![0],
            warm: Vec::new(),
            scratch: Vec::new(),
            nodes: Vec::new(),
            verts: Vec::new(),
        }
    }

    pub fn var(&self) -> &str {
        &self.var
    }

    /// Register a donor mesh by shared reference.
    pub fn add_mesh(&mut self, mesh: Arc<Mesh>) {
        self.meshes.push(mesh);
        self.finalized = false;
    }

    pub fn clear_all_input_meshes(&mut self) {
        self.meshes.clear();
        self.finalized = false;
    }

    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.meshes
    }

    /// Cells across every registered mesh (excluding the placeholder).
    pub fn num_cells(&self) -> usize {
        self.mesh_of_cell.len()
    }

    /// Build the interval tree and cell tables.
    ///
    /// With no cells at all the tree still gets one unit-box entry that
    /// matches no real cell, so lookups stay valid and simply miss.
    pub fn finalize(&mut self) {
        self.cell_bounds.clear();
        self.mesh_of_cell.clear();
        self.mesh_cell_start.clear();
        self.mesh_cell_start.push(0);
        for (m, mesh) in self.meshes.iter().enumerate() {
            for c in 0..mesh.num_cells() {
                self.cell_bounds.push(mesh.cell_bounds(c));
                self.mesh_of_cell.push(m as u32);
            }
            self.mesh_cell_start.push(self.cell_bounds.len());
        }
        let entries: Vec<(usize, BoundingBox)> = if self.cell_bounds.is_empty() {
            vec![(0, BoundingBox::new([0.0; 3], [1.0; 3]))]
        } else {
            self.cell_bounds.iter().copied().enumerate().collect()
        };
        self.tree = IntervalTree::build(entries);
        self.warm.clear();
        self.finalized = true;
        log::debug!(
            "donor index over {} mesh(es), {} cell(s)",
            self.meshes.len(),
            self.cell_bounds.len()
        );
    }

    fn require_finalized(&self) -> Result<(), CmfeError> {
        if self.finalized {
            Ok(())
        } else {
            Err(CmfeError::NotFinalized("DonorIndex"))
        }
    }

    /// Evaluate the donor field at `point` into `out`. Returns `false` when
    /// no cell contains the point; `out` is then left untouched.
    ///
    /// A point on a face shared by several cells resolves to the containing
    /// cell with the lexicographically smallest centroid, whatever order the
    /// cells were registered or relocated in.
    pub fn get_value(&mut self, point: &[f64; 3], out: &mut [f64]) -> Result<bool, CmfeError> {
        self.require_finalized()?;

        let hit = match self.warm_hit(point)? {
            Some(hit) => Some(hit),
            None => {
                self.tree.containing(point, &mut self.scratch);
                let hit = self.best_candidate(point)?;
                if hit.is_some() {
                    std::mem::swap(&mut self.warm, &mut self.scratch);
                } else {
                    self.warm.clear();
                }
                hit
            }
        };
        match hit {
            Some(hit) => {
                self.interpolate(&hit, out)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// First warm candidate holding `p` strictly inside. Face points always
    /// go through the full scan.
    fn warm_hit(&mut self, p: &[f64; 3]) -> Result<Option<Hit>, CmfeError> {
        for k in 0..self.warm.len() {
            if let Some(hit) = self.test_cell(self.warm[k], p)? {
                return Ok(hit.interior.then_some(hit));
            }
        }
        Ok(None)
    }

    /// Every tree candidate is tested; ties go to the smallest centroid.
    fn best_candidate(&mut self, p: &[f64; 3]) -> Result<Option<Hit>, CmfeError> {
        let mut best: Option<Hit> = None;
        for k in 0..self.scratch.len() {
            let Some(hit) = self.test_cell(self.scratch[k], p)? else {
                continue;
            };
            if best.as_ref().is_none_or(|b| hit.precedes(b)) {
                best = Some(hit);
            }
        }
        Ok(best)
    }

    fn test_cell(&mut self, id: usize, p: &[f64; 3]) -> Result<Option<Hit>, CmfeError> {
        if id >= self.mesh_of_cell.len() || !self.cell_bounds[id].contains(p) {
            return Ok(None);
        }
        let m = self.mesh_of_cell[id] as usize;
        let c = id - self.mesh_cell_start[m];
        let mesh = &self.meshes[m];
        mesh.cell_vertices_into(c, &mut self.verts);
        let Some(weights) = cell::locate(mesh.cell_type(c), &self.verts, p)? else {
            return Ok(None);
        };
        let interior = weights.iter().all(|&w| w > FACE_TOL);
        let mut centroid = [0.0; 3];
        for v in &self.verts {
            for a in 0..3 {
                centroid[a] += v[a];
            }
        }
        let n = self.verts.len().max(1) as f64;
        Ok(Some(Hit {
            mesh: m,
            cell: c,
            weights,
            interior,
            centroid: centroid.map(|x| x / n),
        }))
    }

    fn interpolate(&mut self, hit: &Hit, out: &mut [f64]) -> Result<(), CmfeError> {
        let mesh = &self.meshes[hit.mesh];
        let field = mesh
            .field(&self.var)
            .ok_or_else(|| CmfeError::MissingCellField {
                name: self.var.clone(),
                mesh: hit.mesh,
                cell: hit.cell,
            })?;
        if field.n_comp() != out.len() {
            return Err(CmfeError::ValueWidth {
                expected: out.len(),
                found: field.n_comp(),
            });
        }
        match field.centering() {
            Centering::Cell => out.copy_from_slice(field.tuple(hit.cell)),
            Centering::Node => {
                mesh.cell_nodes_into(hit.cell, &mut self.nodes);
                // Offsets from the first node: a constant field comes back exactly.
                let base = field.tuple(self.nodes[0]);
                out.copy_from_slice(base);
                for (&n, &w) in self.nodes.iter().zip(&hit.weights).skip(1) {
                    for ((o, v), b) in out.iter_mut().zip(field.tuple(n)).zip(base) {
                        *o += w * (v - b);
                    }
                }
            }
        }
        Ok(())
    }

    /// Collective: replace the registered meshes by the cells whose boxes
    /// overlap this rank's region. A cell straddling several regions is
    /// sent to each of them. Only the evaluated field travels.
    pub fn relocate<C: Communicator + ?Sized>(
        &mut self,
        comm: &C,
        partition: &SpatialPartition,
    ) -> Result<(), CmfeError> {
        self.require_finalized()?;
        let size = comm.size();
        let mut subsets: Vec<Vec<(UnstructuredMesh, Field)>> = vec![Vec::new(); size];

        for (m, mesh) in self.meshes.iter().enumerate() {
            let mut builders: Vec<Option<SubsetBuilder>> = (0..size).map(|_| None).collect();
            for c in 0..mesh.num_cells() {
                let id = self.mesh_cell_start[m] + c;
                for r in partition.get_processor_list(&self.cell_bounds[id]) {
                    builders[r]
                        .get_or_insert_with(SubsetBuilder::default)
                        .add_cell(mesh, c, &mut self.nodes)?;
                }
            }
            if builders.iter().all(Option::is_none) {
                continue;
            }
            let field = mesh
                .field(&self.var)
                .ok_or_else(|| CmfeError::MissingCellField {
                    name: self.var.clone(),
                    mesh: m,
                    cell: 0,
                })?;
            for (r, b) in builders.into_iter().enumerate() {
                if let Some(b) = b {
                    subsets[r].push(b.finish(field)?);
                }
            }
        }

        let outgoing: Vec<Bytes> = subsets.iter().map(|s| encode_meshes(s)).collect();
        for (dst, buf) in outgoing.iter().enumerate() {
            let cells: usize = subsets[dst].iter().map(|(m, _)| m.num_cells()).sum();
            log::debug!(
                "[rank {}] relocate donors → {dst}: {cells} cell(s), {} bytes",
                comm.rank(),
                buf.len()
            );
        }
        drop(subsets);
        let incoming = all_to_all_v(comm, outgoing)?;

        self.clear_all_input_meshes();
        for buf in incoming {
            for (mesh, field) in decode_meshes(buf)? {
                self.add_mesh(Arc::new(Mesh::from(mesh).with_field(field)?));
            }
        }
        Ok(())
    }
}

/// Cells of one donor mesh bound for one rank, with only the nodes they use.
#[derive(Default)]
struct SubsetBuilder {
    node_map: HashMap<usize, usize>,
    node_ids: Vec<usize>,
    cell_ids: Vec<usize>,
    mesh: UnstructuredMesh,
}

impl SubsetBuilder {
    fn add_cell(&mut self, src: &Mesh, c: usize, nodes: &mut Vec<usize>) -> Result<(), CmfeError> {
        src.cell_nodes_into(c, nodes);
        let mut local = Vec::with_capacity(nodes.len());
        let mut points = Vec::new();
        for &n in nodes.iter() {
            let next = self.node_ids.len();
            let id = *self.node_map.entry(n).or_insert_with(|| {
                points.push(src.point(n));
                next
            });
            if id == next {
                self.node_ids.push(n);
            }
            local.push(id);
        }
        self.mesh.extend_points(points);
        self.mesh.add_cell(src.cell_type(c), &local)?;
        self.cell_ids.push(c);
        Ok(())
    }

    fn finish(self, field: &Field) -> Result<(UnstructuredMesh, Field), CmfeError> {
        let ids = match field.centering() {
            Centering::Node => &self.node_ids,
            Centering::Cell => &self.cell_ids,
        };
        let mut values = Vec::with_capacity(ids.len() * field.n_comp());
        for &i in ids {
            values.extend_from_slice(field.tuple(i));
        }
        let sub = Field::new(field.name(), field.centering(), field.n_comp(), values)?;
        Ok((self.mesh, sub))
    }
}

impl SpatialContent for DonorIndex {
    fn extend_bounds(&self, bounds: &mut BoundingBox) {
        for mesh in &self.meshes {
            bounds.merge(&mesh.bounds());
        }
    }

    /// Unstructured cells count once at their box center; rectilinear
    /// donors count their cell-center lattice without enumerating it.
    fn classify(&self, region: &mut Region) {
        for mesh in &self.meshes {
            match mesh.as_ref() {
                Mesh::Rectilinear(grid) => {
                    if grid.num_cells() > 0 {
                        region.add_grid(&grid.cell_center_axes());
                    }
                }
                Mesh::Unstructured(_) => {
                    for c in 0..mesh.num_cells() {
                        region.add_point(&mesh.cell_bounds(c).center());
                    }
                }
            }
        }
    }
}
