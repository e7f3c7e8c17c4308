//! Cell type metadata for donor and target mesh cells.

use crate::cmfe_error::CmfeError;

/// Linear cell shapes understood by the geometry kernels.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CellType {
    /// 0D vertex.
    #[default]
    Vertex,
    /// 1D segment/edge.
    Segment,
    /// 2D simplex (triangle).
    Triangle,
    /// 2D tensor-product cell (quad).
    Quadrilateral,
    /// 3D simplex (tet).
    Tetrahedron,
    /// 3D tensor-product cell (hex).
    Hexahedron,
    /// 3D wedge/prism.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

impl CellType {
    /// Returns the topological dimension of the cell.
    pub fn dimension(self) -> usize {
        match self {
            CellType::Vertex => 0,
            CellType::Segment => 1,
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron | CellType::Hexahedron | CellType::Prism | CellType::Pyramid => 3,
        }
    }

    /// Number of nodes a cell of this type references.
    pub fn vertex_count(self) -> usize {
        match self {
            CellType::Vertex => 1,
            CellType::Segment => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Pyramid => 5,
            CellType::Prism => 6,
            CellType::Hexahedron => 8,
        }
    }

    /// Stable one-byte code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            CellType::Vertex => 0,
            CellType::Segment => 1,
            CellType::Triangle => 2,
            CellType::Quadrilateral => 3,
            CellType::Tetrahedron => 4,
            CellType::Hexahedron => 5,
            CellType::Prism => 6,
            CellType::Pyramid => 7,
        }
    }

    /// Inverse of [`CellType::code`].
    pub fn from_code(code: u8) -> Result<Self, CmfeError> {
        Ok(match code {
            0 => CellType::Vertex,
            1 => CellType::Segment,
            2 => CellType::Triangle,
            3 => CellType::Quadrilateral,
            4 => CellType::Tetrahedron,
            5 => CellType::Hexahedron,
            6 => CellType::Prism,
            7 => CellType::Pyramid,
            other => {
                return Err(CmfeError::WireDecode(format!("unknown cell type code {other}")));
            }
        })
    }
}
