#![allow(dead_code)]
use mesh_cmfe::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Run `f` once per rank of an in-process universe and collect the results
/// in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = ThreadComm::universe(n)
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// `n` evenly spaced coordinates from `lo` to `hi` inclusive.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![lo];
    }
    (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect()
}

/// The linear function every donor in these tests carries.
pub fn linear(p: [f64; 3]) -> f64 {
    1.0 + p[0] + 2.0 * p[1] + 3.0 * p[2]
}

/// Rectilinear donor with `linear` sampled at its nodes under `name`.
pub fn linear_grid(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>, name: &str) -> Mesh {
    let grid = RectilinearMesh::new(x, y, z).expect("valid axes");
    let mesh = Mesh::from(grid);
    let values = (0..mesh.num_points()).map(|n| linear(mesh.point(n))).collect();
    mesh.with_field(Field::scalar(name, Centering::Node, values))
        .expect("node field")
}

/// The unit-cube donor of `cells` per axis cut into `parts` slabs along x;
/// part `r` of `parts`. Slabs share their boundary nodes.
pub fn donor_slab(cells: usize, r: usize, parts: usize) -> Mesh {
    let x = linspace(0.0, 1.0, cells + 1);
    let (a, b) = (cells * r / parts, cells * (r + 1) / parts);
    linear_grid(
        x[a..=b].to_vec(),
        linspace(0.0, 1.0, 5),
        linspace(0.0, 1.0, 5),
        "p",
    )
}

/// Scattered points in `[lo, hi)^3` carrying a constant default field `d`.
pub fn cloud(seed: u64, n: usize, lo: f64, hi: f64, default: f64) -> Mesh {
    let mut rng = SmallRng::seed_from_u64(seed);
    let pts = (0..n)
        .map(|_| {
            [
                rng.gen_range(lo..hi),
                rng.gen_range(lo..hi),
                rng.gen_range(lo..hi),
            ]
        })
        .collect();
    Mesh::from(UnstructuredMesh::new(pts))
        .with_field(Field::scalar("d", Centering::Node, vec![default; n]))
        .expect("default field")
}

/// Rectilinear target with a constant node default field `d`.
pub fn target_grid(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>, default: f64) -> Mesh {
    let mesh = Mesh::from(RectilinearMesh::new(x, y, z).expect("valid axes"));
    let n = mesh.num_points();
    mesh.with_field(Field::scalar("d", Centering::Node, vec![default; n]))
        .expect("default field")
}

pub fn shared(meshes: Vec<Mesh>) -> Vec<Arc<Mesh>> {
    meshes.into_iter().map(Arc::new).collect()
}

pub fn assert_close(got: &[f64], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() <= tol, "value {i}: got {g}, want {w}");
    }
}
