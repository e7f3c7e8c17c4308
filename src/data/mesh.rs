//! In-memory meshes supplied by the caller.
//!
//! Two storage shapes exist. [`UnstructuredMesh`] keeps explicit node
//! coordinates plus a typed connectivity list; [`RectilinearMesh`] keeps only
//! its three coordinate axes and derives nodes and hexahedral (or, for a flat
//! axis, quadrilateral or segment) cells on demand. [`Mesh`] wraps both behind
//! one read-only contract: counts, node positions, cell geometry and named
//! fields.

use crate::cmfe_error::CmfeError;
use crate::data::field::{Centering, Field};
use crate::geometry::bbox::BoundingBox;
use crate::topology::cell_type::CellType;

/// Explicit points with typed cells.
#[derive(Clone, Debug, PartialEq)]
pub struct UnstructuredMesh {
    points: Vec<[f64; 3]>,
    cell_types: Vec<CellType>,
    /// CSR offsets into `connectivity`; `offsets.len() == n_cells + 1`.
    offsets: Vec<usize>,
    connectivity: Vec<usize>,
    fields: Vec<Field>,
}

impl UnstructuredMesh {
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self {
            points,
            cell_types: Vec::new(),
            offsets: vec![0],
            connectivity: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Append nodes; returns the index of the first one.
    pub fn extend_points<I: IntoIterator<Item = [f64; 3]>>(&mut self, points: I) -> usize {
        let first = self.points.len();
        self.points.extend(points);
        first
    }

    /// Append a cell, validating node count and indices.
    pub fn add_cell(&mut self, cell_type: CellType, nodes: &[usize]) -> Result<usize, CmfeError> {
        if nodes.len() != cell_type.vertex_count() {
            return Err(CmfeError::InvalidGeometry(format!(
                "{cell_type:?} needs {} nodes, got {}",
                cell_type.vertex_count(),
                nodes.len()
            )));
        }
        if let Some(&bad) = nodes.iter().find(|&&n| n >= self.points.len()) {
            return Err(CmfeError::InvalidGeometry(format!(
                "node index {bad} out of range ({} points)",
                self.points.len()
            )));
        }
        self.cell_types.push(cell_type);
        self.connectivity.extend_from_slice(nodes);
        self.offsets.push(self.connectivity.len());
        Ok(self.cell_types.len() - 1)
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn num_cells(&self) -> usize {
        self.cell_types.len()
    }

    pub fn cell_nodes(&self, c: usize) -> &[usize] {
        &self.connectivity[self.offsets[c]..self.offsets[c + 1]]
    }

    pub fn cell_type(&self, c: usize) -> CellType {
        self.cell_types[c]
    }
}

impl Default for UnstructuredMesh {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// Corner offsets along the active axes, reference-element order.
const POINT_CORNERS: [[usize; 3]; 1] = [[0, 0, 0]];
const SEGMENT_CORNERS: [[usize; 3]; 2] = [[0, 0, 0], [1, 0, 0]];
const QUAD_CORNERS: [[usize; 3]; 4] = [[0, 0, 0], [1, 0, 0], [1, 1, 0], [0, 1, 0]];
const HEX_CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Tensor-product grid stored as three monotone coordinate axes.
#[derive(Clone, Debug, PartialEq)]
pub struct RectilinearMesh {
    axes: [Vec<f64>; 3],
    fields: Vec<Field>,
}

impl RectilinearMesh {
    /// Each axis must hold at least one strictly increasing coordinate.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Result<Self, CmfeError> {
        for (name, axis) in [("x", &x), ("y", &y), ("z", &z)] {
            if axis.is_empty() {
                return Err(CmfeError::InvalidGeometry(format!("{name} axis is empty")));
            }
            if axis.windows(2).any(|w| !(w[0] < w[1])) {
                return Err(CmfeError::InvalidGeometry(format!(
                    "{name} axis is not strictly increasing"
                )));
            }
        }
        Ok(Self {
            axes: [x, y, z],
            fields: Vec::new(),
        })
    }

    pub fn axis(&self, a: usize) -> &[f64] {
        &self.axes[a]
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.axes[0].len(), self.axes[1].len(), self.axes[2].len()]
    }

    /// Axes with more than one coordinate.
    fn active_axes(&self) -> Vec<usize> {
        (0..3).filter(|&a| self.axes[a].len() > 1).collect()
    }

    /// Cells per axis; a flat axis contributes one layer.
    pub fn cell_dims(&self) -> [usize; 3] {
        let d = self.dims();
        [d[0].max(2) - 1, d[1].max(2) - 1, d[2].max(2) - 1]
    }

    pub fn num_points(&self) -> usize {
        let d = self.dims();
        d[0] * d[1] * d[2]
    }

    pub fn num_cells(&self) -> usize {
        if self.active_axes().is_empty() {
            return 0;
        }
        let c = self.cell_dims();
        c[0] * c[1] * c[2]
    }

    pub fn point(&self, n: usize) -> [f64; 3] {
        let [nx, ny, _] = self.dims();
        let (i, j, k) = (n % nx, (n / nx) % ny, n / (nx * ny));
        [self.axes[0][i], self.axes[1][j], self.axes[2][k]]
    }

    fn cell_ijk(&self, c: usize) -> [usize; 3] {
        let [cx, cy, _] = self.cell_dims();
        [c % cx, (c / cx) % cy, c / (cx * cy)]
    }

    pub fn cell_type(&self) -> CellType {
        match self.active_axes().len() {
            0 => CellType::Vertex,
            1 => CellType::Segment,
            2 => CellType::Quadrilateral,
            _ => CellType::Hexahedron,
        }
    }

    /// Node indices of cell `c` in reference-element order.
    pub fn cell_nodes(&self, c: usize) -> Vec<usize> {
        let [nx, ny, _] = self.dims();
        let base = self.cell_ijk(c);
        let active = self.active_axes();
        let corners: &[[usize; 3]] = match active.len() {
            0 => &POINT_CORNERS,
            1 => &SEGMENT_CORNERS,
            2 => &QUAD_CORNERS,
            _ => &HEX_CORNERS,
        };
        corners
            .iter()
            .map(|offs| {
                let mut ijk = base;
                for (&axis, &o) in active.iter().zip(offs.iter()) {
                    ijk[axis] += o;
                }
                ijk[0] + nx * (ijk[1] + ny * ijk[2])
            })
            .collect()
    }

    pub fn cell_bounds(&self, c: usize) -> BoundingBox {
        let ijk = self.cell_ijk(c);
        let mut b = BoundingBox::empty();
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for a in 0..3 {
            let axis = &self.axes[a];
            lo[a] = axis[ijk[a]];
            hi[a] = if axis.len() > 1 { axis[ijk[a] + 1] } else { axis[0] };
        }
        b.extend(&lo);
        b.extend(&hi);
        b
    }

    /// Per-axis cell-center coordinates: midpoints of adjacent pairs, or the
    /// single coordinate of a flat axis.
    pub fn cell_center_axes(&self) -> [Vec<f64>; 3] {
        std::array::from_fn(|a| {
            let axis = &self.axes[a];
            if axis.len() > 1 {
                axis.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
            } else {
                axis.clone()
            }
        })
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut b = BoundingBox::empty();
        b.extend(&[self.axes[0][0], self.axes[1][0], self.axes[2][0]]);
        b.extend(&[
            self.axes[0][self.axes[0].len() - 1],
            self.axes[1][self.axes[1].len() - 1],
            self.axes[2][self.axes[2].len() - 1],
        ]);
        b
    }
}

/// A donor or target dataset.
#[derive(Clone, Debug, PartialEq)]
pub enum Mesh {
    Unstructured(UnstructuredMesh),
    Rectilinear(RectilinearMesh),
}

impl From<UnstructuredMesh> for Mesh {
    fn from(m: UnstructuredMesh) -> Self {
        Mesh::Unstructured(m)
    }
}

impl From<RectilinearMesh> for Mesh {
    fn from(m: RectilinearMesh) -> Self {
        Mesh::Rectilinear(m)
    }
}

impl Mesh {
    pub fn is_rectilinear(&self) -> bool {
        matches!(self, Mesh::Rectilinear(_))
    }

    pub fn num_points(&self) -> usize {
        match self {
            Mesh::Unstructured(m) => m.points.len(),
            Mesh::Rectilinear(m) => m.num_points(),
        }
    }

    pub fn num_cells(&self) -> usize {
        match self {
            Mesh::Unstructured(m) => m.num_cells(),
            Mesh::Rectilinear(m) => m.num_cells(),
        }
    }

    /// Number of tuples a field of the given centering must carry.
    pub fn num_tuples(&self, centering: Centering) -> usize {
        match centering {
            Centering::Node => self.num_points(),
            Centering::Cell => self.num_cells(),
        }
    }

    pub fn point(&self, n: usize) -> [f64; 3] {
        match self {
            Mesh::Unstructured(m) => m.points[n],
            Mesh::Rectilinear(m) => m.point(n),
        }
    }

    pub fn cell_type(&self, c: usize) -> CellType {
        match self {
            Mesh::Unstructured(m) => m.cell_type(c),
            Mesh::Rectilinear(m) => m.cell_type(),
        }
    }

    /// Node indices of cell `c`, written into `out`.
    pub fn cell_nodes_into(&self, c: usize, out: &mut Vec<usize>) {
        out.clear();
        match self {
            Mesh::Unstructured(m) => out.extend_from_slice(m.cell_nodes(c)),
            Mesh::Rectilinear(m) => out.extend(m.cell_nodes(c)),
        }
    }

    /// Node positions of cell `c`, written into `out`.
    pub fn cell_vertices_into(&self, c: usize, out: &mut Vec<[f64; 3]>) {
        out.clear();
        match self {
            Mesh::Unstructured(m) => out.extend(m.cell_nodes(c).iter().map(|&n| m.points[n])),
            Mesh::Rectilinear(m) => out.extend(m.cell_nodes(c).into_iter().map(|n| m.point(n))),
        }
    }

    pub fn cell_bounds(&self, c: usize) -> BoundingBox {
        match self {
            Mesh::Unstructured(m) => {
                BoundingBox::from_points(m.cell_nodes(c).iter().map(|&n| &m.points[n]))
            }
            Mesh::Rectilinear(m) => m.cell_bounds(c),
        }
    }

    /// Average of the cell's node positions.
    pub fn cell_center(&self, c: usize) -> [f64; 3] {
        let mut verts = Vec::with_capacity(8);
        self.cell_vertices_into(c, &mut verts);
        let inv = 1.0 / verts.len().max(1) as f64;
        let mut out = [0.0; 3];
        for v in &verts {
            for a in 0..3 {
                out[a] += v[a] * inv;
            }
        }
        out
    }

    pub fn bounds(&self) -> BoundingBox {
        match self {
            Mesh::Unstructured(m) => BoundingBox::from_points(&m.points),
            Mesh::Rectilinear(m) => m.bounds(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        match self {
            Mesh::Unstructured(m) => &m.fields,
            Mesh::Rectilinear(m) => &m.fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|f| f.name() == name)
    }

    /// Attach a field, replacing any field of the same name.
    pub fn add_field(&mut self, field: Field) -> Result<(), CmfeError> {
        let expected = self.num_tuples(field.centering());
        if field.n_tuples() != expected {
            return Err(CmfeError::InvalidGeometry(format!(
                "field `{}` has {} tuples, mesh needs {expected} ({:?}-centered)",
                field.name(),
                field.n_tuples(),
                field.centering()
            )));
        }
        let fields = match self {
            Mesh::Unstructured(m) => &mut m.fields,
            Mesh::Rectilinear(m) => &mut m.fields,
        };
        fields.retain(|f| f.name() != field.name());
        fields.push(field);
        Ok(())
    }

    /// Builder-style [`Mesh::add_field`].
    pub fn with_field(mut self, field: Field) -> Result<Self, CmfeError> {
        self.add_field(field)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectilinear_hex_cells_follow_reference_order() {
        let m = RectilinearMesh::new(vec![0.0, 1.0, 3.0], vec![0.0, 2.0], vec![0.0, 5.0]).unwrap();
        assert_eq!(m.num_points(), 12);
        assert_eq!(m.num_cells(), 2);
        let mesh = Mesh::from(m);
        let mut verts = Vec::new();
        mesh.cell_vertices_into(1, &mut verts);
        assert_eq!(verts[0], [1.0, 0.0, 0.0]);
        assert_eq!(verts[6], [3.0, 2.0, 5.0]);
        assert_eq!(mesh.cell_type(0), CellType::Hexahedron);
        assert_eq!(mesh.cell_center(0), [0.5, 1.0, 2.5]);
    }

    #[test]
    fn flat_rectilinear_grid_is_quads() {
        let m = RectilinearMesh::new(vec![0.0, 1.0, 2.0], vec![0.0, 1.0], vec![0.0]).unwrap();
        assert_eq!(m.num_cells(), 2);
        assert_eq!(m.cell_type(), CellType::Quadrilateral);
        assert_eq!(m.cell_nodes(1), vec![1, 2, 5, 4]);
        assert_eq!(m.cell_center_axes()[2], vec![0.0]);
    }

    #[test]
    fn unstructured_rejects_bad_connectivity() {
        let mut m = UnstructuredMesh::new(vec![[0.0; 3], [1.0, 0.0, 0.0]]);
        assert!(m.add_cell(CellType::Segment, &[0, 1]).is_ok());
        assert!(m.add_cell(CellType::Segment, &[0, 2]).is_err());
        assert!(m.add_cell(CellType::Triangle, &[0, 1]).is_err());
    }

    #[test]
    fn field_tuple_count_is_checked() {
        let m = RectilinearMesh::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0]).unwrap();
        let mut mesh = Mesh::from(m);
        assert!(mesh
            .add_field(Field::scalar("p", Centering::Node, vec![1.0; 4]))
            .is_ok());
        assert!(mesh
            .add_field(Field::scalar("q", Centering::Cell, vec![1.0; 4]))
            .is_err());
    }
}
