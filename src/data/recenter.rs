//! Node ↔ cell recentering of fields.

use crate::cmfe_error::CmfeError;
use crate::data::field::{Centering, Field};
use crate::data::mesh::Mesh;

/// Return `field` expressed with `target` centering on `mesh`.
///
/// Node → cell averages each cell's node tuples. Cell → node averages the
/// tuples of every cell incident to a node; nodes with no incident cell get
/// zeros. Same-centering input is cloned.
pub fn recenter(mesh: &Mesh, field: &Field, target: Centering) -> Result<Field, CmfeError> {
    let have = mesh.num_tuples(field.centering());
    if field.n_tuples() != have {
        return Err(CmfeError::InvalidGeometry(format!(
            "field `{}` has {} tuples, mesh has {have}",
            field.name(),
            field.n_tuples()
        )));
    }
    if field.centering() == target {
        return Ok(field.clone());
    }
    let values = match target {
        Centering::Cell => node_to_cell(mesh, field),
        Centering::Node => cell_to_node(mesh, field),
    };
    Field::new(field.name(), target, field.n_comp(), values)
}

fn node_to_cell(mesh: &Mesh, field: &Field) -> Vec<f64> {
    let nc = field.n_comp();
    let mut out = vec![0.0; mesh.num_cells() * nc];
    let mut nodes = Vec::with_capacity(8);
    for (c, acc) in out.chunks_exact_mut(nc.max(1)).enumerate().take(mesh.num_cells()) {
        mesh.cell_nodes_into(c, &mut nodes);
        for &n in &nodes {
            for (a, v) in acc.iter_mut().zip(field.tuple(n)) {
                *a += v;
            }
        }
        let inv = 1.0 / nodes.len().max(1) as f64;
        acc.iter_mut().for_each(|a| *a *= inv);
    }
    out
}

fn cell_to_node(mesh: &Mesh, field: &Field) -> Vec<f64> {
    let nc = field.n_comp();
    let mut out = vec![0.0; mesh.num_points() * nc];
    let mut hits = vec![0u32; mesh.num_points()];
    let mut nodes = Vec::with_capacity(8);
    for c in 0..mesh.num_cells() {
        mesh.cell_nodes_into(c, &mut nodes);
        let tuple = field.tuple(c);
        for &n in &nodes {
            hits[n] += 1;
            for (a, v) in out[n * nc..(n + 1) * nc].iter_mut().zip(tuple) {
                *a += v;
            }
        }
    }
    for (n, &h) in hits.iter().enumerate() {
        if h > 0 {
            let inv = 1.0 / f64::from(h);
            out[n * nc..(n + 1) * nc].iter_mut().for_each(|a| *a *= inv);
        }
    }
    out
}
