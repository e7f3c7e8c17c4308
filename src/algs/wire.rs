//! Fixed, versioned, little-endian wire format for relocation payloads.
//!
//! Every per-destination buffer starts with a [`WireHdr`] naming its payload
//! kind, followed by a body of `u64` counts and `f64` values. Writers size
//! the buffer in one pass and fill it in a second; readers check every length
//! before slicing and report truncation as [`CmfeError::WireDecode`].

use crate::cmfe_error::CmfeError;
use crate::data::field::{Centering, Field};
use crate::data::mesh::UnstructuredMesh;
use crate::topology::cell_type::CellType;
use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Sample coordinates: explicit chunks then rectilinear slabs.
pub const KIND_POINTS: u16 = 1;
/// Evaluated sample values.
pub const KIND_VALUES: u16 = 2;
/// Donor mesh subsets with their field.
pub const KIND_MESH: u16 = 3;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,  // = WIRE_VERSION.to_le()
    pub kind_le: u16,     // one of the KIND_* constants
    pub reserved_le: u32, // keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

// Layout guards.
static_assertions::const_assert_eq!(size_of::<WireHdr>(), 8);
static_assertions::const_assert_eq!(align_of::<WireHdr>(), 4);

const HDR: usize = size_of::<WireHdr>();
const WORD: usize = 8;

fn decode_err(msg: impl Into<String>) -> CmfeError {
    CmfeError::WireDecode(msg.into())
}

/// Sequential writer over a pre-sized buffer.
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Start a buffer of `kind` with room for `body_len` more bytes.
    pub fn new(kind: u16, body_len: usize) -> Self {
        let mut buf = BytesMut::with_capacity(HDR + body_len);
        buf.put_slice(bytemuck::bytes_of(&WireHdr::new(kind)));
        Self { buf }
    }

    pub fn put_count(&mut self, n: usize) {
        self.buf.put_u64_le(n as u64);
    }

    pub fn put_f64s(&mut self, values: &[f64]) {
        for &v in values {
            self.buf.put_f64_le(v);
        }
    }

    pub fn put_points(&mut self, points: &[[f64; 3]]) {
        for p in points {
            self.put_f64s(p);
        }
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_count(s.len());
        self.buf.put_slice(s.as_bytes());
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked sequential reader.
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    /// Validate the header and position the reader at the body.
    pub fn open(mut buf: Bytes, kind: u16) -> Result<Self, CmfeError> {
        if buf.len() < HDR {
            return Err(decode_err(format!(
                "buffer of {} bytes is shorter than the header",
                buf.len()
            )));
        }
        let hdr: WireHdr = bytemuck::pod_read_unaligned(&buf[..HDR]);
        if hdr.version() != WIRE_VERSION {
            return Err(decode_err(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        if hdr.kind() != kind {
            return Err(decode_err(format!(
                "payload kind {} (expected {kind})",
                hdr.kind()
            )));
        }
        buf.advance(HDR);
        Ok(Self { buf })
    }

    fn need(&self, bytes: usize) -> Result<(), CmfeError> {
        if self.buf.remaining() < bytes {
            Err(decode_err(format!(
                "truncated: need {bytes} bytes, {} left",
                self.buf.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn count(&mut self) -> Result<usize, CmfeError> {
        self.need(WORD)?;
        Ok(self.buf.get_u64_le() as usize)
    }

    /// A count that prefixes `width`-byte records; rejected if the records
    /// cannot fit in what is left.
    fn bounded_count(&mut self, width: usize) -> Result<usize, CmfeError> {
        let n = self.count()?;
        match n.checked_mul(width) {
            Some(total) if total <= self.buf.remaining() => Ok(n),
            _ => Err(decode_err(format!(
                "count {n} exceeds remaining {} bytes",
                self.buf.remaining()
            ))),
        }
    }

    pub fn f64s(&mut self, n: usize) -> Result<Vec<f64>, CmfeError> {
        self.need(n.saturating_mul(WORD))?;
        Ok((0..n).map(|_| self.buf.get_f64_le()).collect())
    }

    pub fn points(&mut self, n: usize) -> Result<Vec<[f64; 3]>, CmfeError> {
        self.need(n.saturating_mul(3 * WORD))?;
        Ok((0..n)
            .map(|_| {
                [
                    self.buf.get_f64_le(),
                    self.buf.get_f64_le(),
                    self.buf.get_f64_le(),
                ]
            })
            .collect())
    }

    pub fn string(&mut self) -> Result<String, CmfeError> {
        let n = self.bounded_count(1)?;
        let raw = self.buf.split_to(n);
        String::from_utf8(raw.to_vec()).map_err(|e| decode_err(e.to_string()))
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(self) -> Result<(), CmfeError> {
        if self.buf.has_remaining() {
            Err(decode_err(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

// ===== Sample coordinates ===================================================

/// Sample locations bound for one rank.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointPayload {
    /// Explicit point chunks, one per (source dataset, destination).
    pub chunks: Vec<Vec<[f64; 3]>>,
    /// Rectilinear sub-grids: three axis arrays each.
    pub slabs: Vec<[Vec<f64>; 3]>,
}

impl PointPayload {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.slabs.is_empty()
    }

    fn body_len(&self) -> usize {
        let chunk_words: usize = self.chunks.iter().map(|c| 1 + 3 * c.len()).sum();
        let slab_words: usize = self
            .slabs
            .iter()
            .map(|s| 3 + s.iter().map(Vec::len).sum::<usize>())
            .sum();
        WORD * (2 + chunk_words + slab_words)
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new(KIND_POINTS, self.body_len());
        w.put_count(self.chunks.len());
        for chunk in &self.chunks {
            w.put_count(chunk.len());
            w.put_points(chunk);
        }
        w.put_count(self.slabs.len());
        for slab in &self.slabs {
            for axis in slab {
                w.put_count(axis.len());
            }
            for axis in slab {
                w.put_f64s(axis);
            }
        }
        w.finish()
    }

    pub fn decode(buf: Bytes) -> Result<Self, CmfeError> {
        let mut r = WireReader::open(buf, KIND_POINTS)?;
        let n_chunks = r.bounded_count(WORD)?;
        let mut chunks = Vec::with_capacity(n_chunks);
        for _ in 0..n_chunks {
            let n = r.bounded_count(3 * WORD)?;
            chunks.push(r.points(n)?);
        }
        let n_slabs = r.bounded_count(3 * WORD)?;
        let mut slabs = Vec::with_capacity(n_slabs);
        for _ in 0..n_slabs {
            let dims = [r.count()?, r.count()?, r.count()?];
            slabs.push([r.f64s(dims[0])?, r.f64s(dims[1])?, r.f64s(dims[2])?]);
        }
        r.finish()?;
        Ok(Self { chunks, slabs })
    }
}

// ===== Sample values ========================================================

pub fn encode_values(values: &[f64]) -> Bytes {
    let mut w = WireWriter::new(KIND_VALUES, WORD * (1 + values.len()));
    w.put_count(values.len());
    w.put_f64s(values);
    w.finish()
}

pub fn decode_values(buf: Bytes) -> Result<Vec<f64>, CmfeError> {
    let mut r = WireReader::open(buf, KIND_VALUES)?;
    let n = r.bounded_count(WORD)?;
    let values = r.f64s(n)?;
    r.finish()?;
    Ok(values)
}

// ===== Donor meshes =========================================================

fn mesh_body_len(mesh: &UnstructuredMesh, field: &Field) -> usize {
    let conn: usize = (0..mesh.num_cells())
        .map(|c| 1 + mesh.cell_nodes(c).len())
        .sum();
    WORD * (1 + 3 * mesh.points().len() + 1 + conn)
        + WORD * (1 + 2 + 1 + field.values().len())
        + field.name().len()
}

/// Encode donor subsets, each carrying exactly one field.
pub fn encode_meshes(meshes: &[(UnstructuredMesh, Field)]) -> Bytes {
    let body = WORD + meshes.iter().map(|(m, f)| mesh_body_len(m, f)).sum::<usize>();
    let mut w = WireWriter::new(KIND_MESH, body);
    w.put_count(meshes.len());
    for (mesh, field) in meshes {
        w.put_count(mesh.points().len());
        w.put_points(mesh.points());
        w.put_count(mesh.num_cells());
        for c in 0..mesh.num_cells() {
            let nodes = mesh.cell_nodes(c);
            // Cell code in the low byte, node count above it.
            w.put_count(mesh.cell_type(c).code() as usize | (nodes.len() << 8));
            for &n in nodes {
                w.put_count(n);
            }
        }
        w.put_str(field.name());
        w.put_count(field.centering().code() as usize);
        w.put_count(field.n_comp());
        w.put_count(field.values().len());
        w.put_f64s(field.values());
    }
    w.finish()
}

pub fn decode_meshes(buf: Bytes) -> Result<Vec<(UnstructuredMesh, Field)>, CmfeError> {
    let mut r = WireReader::open(buf, KIND_MESH)?;
    let n_meshes = r.bounded_count(WORD)?;
    let mut out = Vec::with_capacity(n_meshes);
    let mut nodes = Vec::new();
    for _ in 0..n_meshes {
        let n_points = r.bounded_count(3 * WORD)?;
        let mut mesh = UnstructuredMesh::new(r.points(n_points)?);
        let n_cells = r.bounded_count(WORD)?;
        for _ in 0..n_cells {
            let packed = r.count()?;
            let cell_type = CellType::from_code((packed & 0xff) as u8)
                .map_err(|e| decode_err(e.to_string()))?;
            let n = packed >> 8;
            nodes.clear();
            for _ in 0..n {
                nodes.push(r.count()?);
            }
            mesh.add_cell(cell_type, &nodes)
                .map_err(|e| decode_err(e.to_string()))?;
        }
        let name = r.string()?;
        let centering = Centering::from_code(r.count()? as u64)
            .ok_or_else(|| decode_err(format!("bad centering for field `{name}`")))?;
        let n_comp = r.count()?;
        let n_values = r.bounded_count(WORD)?;
        let values = r.f64s(n_values)?;
        let field = Field::new(name, centering, n_comp, values)
            .map_err(|e| decode_err(e.to_string()))?;
        out.push((mesh, field));
    }
    r.finish()?;
    Ok(out)
}
