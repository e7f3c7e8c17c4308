//! Natural coordinates, containment and interpolation weights for linear cells.
//!
//! The reference elements use the following vertex ordering:
//! - Segment: `[v0, v1]` with `r \in [0, 1]`.
//! - Triangle: `[v0, v1, v2]` with `(r, s)` in the unit right triangle.
//! - Quadrilateral: `[v0, v1, v2, v3]` with `(r, s)` in `[0, 1]^2`.
//! - Tetrahedron: `[v0, v1, v2, v3]` with `(r, s, t)` in the unit tetrahedron.
//! - Hexahedron: `[v0, .., v7]` with `(r, s, t)` in `[0, 1]^3`, bottom face
//!   counter-clockwise then top face.
//! - Prism: `[v0, .., v5]` with `(r, s)` in the unit triangle and `t` in `[0, 1]`.
//! - Pyramid: `[v0, .., v4]` with `(r, s)` in `[0, 1]^2` and apex at `t = 1`.
//!
//! Natural coordinates are always carried as `[f64; 3]`; components beyond the
//! cell dimension are zero.

use crate::cmfe_error::CmfeError;
use crate::geometry::bbox::BoundingBox;
use crate::topology::cell_type::CellType;

const EPS: f64 = 1e-12;
/// Slack on the reference-element bounds.
const NATURAL_TOL: f64 = 1e-8;
/// Allowed physical residual, relative to the cell diagonal.
const RESIDUAL_TOL: f64 = 1e-8;
const MAX_NEWTON: usize = 25;

/// Shape-function values and their natural-coordinate gradients at `r`.
pub fn shape_functions(cell_type: CellType, r: [f64; 3]) -> (Vec<f64>, Vec<[f64; 3]>) {
    let [r, s, t] = r;
    match cell_type {
        CellType::Vertex => (vec![1.0], vec![[0.0; 3]]),
        CellType::Segment => (vec![1.0 - r, r], vec![[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]),
        CellType::Triangle => (
            vec![1.0 - r - s, r, s],
            vec![[-1.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        ),
        CellType::Quadrilateral => (
            vec![(1.0 - r) * (1.0 - s), r * (1.0 - s), r * s, (1.0 - r) * s],
            vec![
                [-(1.0 - s), -(1.0 - r), 0.0],
                [1.0 - s, -r, 0.0],
                [s, r, 0.0],
                [-s, 1.0 - r, 0.0],
            ],
        ),
        CellType::Tetrahedron => (
            vec![1.0 - r - s - t, r, s, t],
            vec![
                [-1.0, -1.0, -1.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
        ),
        CellType::Hexahedron => {
            let (rm, sm, tm) = (1.0 - r, 1.0 - s, 1.0 - t);
            (
                vec![
                    rm * sm * tm,
                    r * sm * tm,
                    r * s * tm,
                    rm * s * tm,
                    rm * sm * t,
                    r * sm * t,
                    r * s * t,
                    rm * s * t,
                ],
                vec![
                    [-sm * tm, -rm * tm, -rm * sm],
                    [sm * tm, -r * tm, -r * sm],
                    [s * tm, r * tm, -r * s],
                    [-s * tm, rm * tm, -rm * s],
                    [-sm * t, -rm * t, rm * sm],
                    [sm * t, -r * t, r * sm],
                    [s * t, r * t, r * s],
                    [-s * t, rm * t, rm * s],
                ],
            )
        }
        CellType::Prism => {
            let (rs, tm) = (1.0 - r - s, 1.0 - t);
            (
                vec![rs * tm, r * tm, s * tm, rs * t, r * t, s * t],
                vec![
                    [-tm, -tm, -rs],
                    [tm, 0.0, -r],
                    [0.0, tm, -s],
                    [-t, -t, rs],
                    [t, 0.0, r],
                    [0.0, t, s],
                ],
            )
        }
        CellType::Pyramid => {
            let (rm, sm, tm) = (1.0 - r, 1.0 - s, 1.0 - t);
            (
                vec![tm * rm * sm, tm * r * sm, tm * r * s, tm * rm * s, t],
                vec![
                    [-tm * sm, -tm * rm, -rm * sm],
                    [tm * sm, -tm * r, -r * sm],
                    [tm * s, tm * r, -r * s],
                    [-tm * s, tm * rm, -rm * s],
                    [0.0, 0.0, 1.0],
                ],
            )
        }
    }
}

/// Solve for the natural coordinates of `point` by Newton iteration.
///
/// Each step solves the normal equations `JᵀJ δ = Jᵀ res`, which handles 1D
/// and 2D cells embedded in 3D. Returns `None` for a degenerate Jacobian.
pub fn natural_coordinates(
    cell_type: CellType,
    vertices: &[[f64; 3]],
    point: &[f64; 3],
) -> Result<Option<[f64; 3]>, CmfeError> {
    check_vertex_count(cell_type, vertices)?;
    let dim = cell_type.dimension();
    let mut r = reference_center(cell_type);
    if dim == 0 {
        return Ok(Some(r));
    }
    let scale = diagonal(vertices).max(EPS);
    for _ in 0..MAX_NEWTON {
        let (weights, grads) = shape_functions(cell_type, r);
        let mapped = weighted_sum(&weights, vertices);
        let res = sub(*point, mapped);
        let cols = jacobian_columns(&grads, vertices, dim);
        let Some(delta) = least_squares(&cols, res) else {
            return Ok(None);
        };
        for a in 0..dim {
            r[a] += delta[a];
        }
        if norm(delta) <= 1e-14 || norm(res) <= 1e-15 * scale {
            break;
        }
    }
    Ok(Some(r))
}

/// True when `r` lies inside the reference element of `cell_type` (with slack).
pub fn inside_reference(cell_type: CellType, r: [f64; 3]) -> bool {
    let tol = NATURAL_TOL;
    let unit = |v: f64| v >= -tol && v <= 1.0 + tol;
    let [r, s, t] = r;
    match cell_type {
        CellType::Vertex => true,
        CellType::Segment => unit(r),
        CellType::Triangle => r >= -tol && s >= -tol && r + s <= 1.0 + tol,
        CellType::Quadrilateral => unit(r) && unit(s),
        CellType::Tetrahedron => r >= -tol && s >= -tol && t >= -tol && r + s + t <= 1.0 + tol,
        CellType::Hexahedron | CellType::Pyramid => unit(r) && unit(s) && unit(t),
        CellType::Prism => r >= -tol && s >= -tol && r + s <= 1.0 + tol && unit(t),
    }
}

/// Point-in-cell test. On containment returns the interpolation weights, one
/// per cell vertex, which sum to one.
pub fn locate(
    cell_type: CellType,
    vertices: &[[f64; 3]],
    point: &[f64; 3],
) -> Result<Option<Vec<f64>>, CmfeError> {
    let Some(r) = natural_coordinates(cell_type, vertices, point)? else {
        return Ok(None);
    };
    if !inside_reference(cell_type, r) {
        return Ok(None);
    }
    let (weights, _) = shape_functions(cell_type, r);
    let mapped = weighted_sum(&weights, vertices);
    let tol = RESIDUAL_TOL * diagonal(vertices).max(EPS);
    if norm(sub(mapped, *point)) > tol {
        return Ok(None);
    }
    Ok(Some(weights))
}

/// Bounding box of a vertex list.
pub fn vertex_bounds(vertices: &[[f64; 3]]) -> BoundingBox {
    BoundingBox::from_points(vertices)
}

fn check_vertex_count(cell_type: CellType, vertices: &[[f64; 3]]) -> Result<(), CmfeError> {
    let expected = cell_type.vertex_count();
    if vertices.len() != expected {
        return Err(CmfeError::InvalidGeometry(format!(
            "vertex count mismatch for {cell_type:?}: expected {expected}, got {}",
            vertices.len()
        )));
    }
    Ok(())
}

fn reference_center(cell_type: CellType) -> [f64; 3] {
    match cell_type {
        CellType::Vertex => [0.0; 3],
        CellType::Segment => [0.5, 0.0, 0.0],
        CellType::Triangle => [1.0 / 3.0, 1.0 / 3.0, 0.0],
        CellType::Quadrilateral => [0.5, 0.5, 0.0],
        CellType::Tetrahedron => [0.25, 0.25, 0.25],
        CellType::Hexahedron => [0.5, 0.5, 0.5],
        CellType::Prism => [1.0 / 3.0, 1.0 / 3.0, 0.5],
        CellType::Pyramid => [0.5, 0.5, 0.25],
    }
}

fn weighted_sum(weights: &[f64], vertices: &[[f64; 3]]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (w, v) in weights.iter().zip(vertices) {
        out[0] += w * v[0];
        out[1] += w * v[1];
        out[2] += w * v[2];
    }
    out
}

fn jacobian_columns(grads: &[[f64; 3]], vertices: &[[f64; 3]], dim: usize) -> Vec<[f64; 3]> {
    (0..dim)
        .map(|d| {
            let mut col = [0.0; 3];
            for (g, v) in grads.iter().zip(vertices) {
                col[0] += v[0] * g[d];
                col[1] += v[1] * g[d];
                col[2] += v[2] * g[d];
            }
            col
        })
        .collect()
}

fn least_squares(cols: &[[f64; 3]], rhs: [f64; 3]) -> Option<[f64; 3]> {
    match cols.len() {
        1 => {
            let denom = dot(cols[0], cols[0]);
            (denom > EPS * EPS).then(|| [dot(cols[0], rhs) / denom, 0.0, 0.0])
        }
        2 => {
            let a = dot(cols[0], cols[0]);
            let b = dot(cols[0], cols[1]);
            let c = dot(cols[1], cols[1]);
            let det = a * c - b * b;
            if det.abs() <= EPS * a.max(c).max(EPS) * a.max(c).max(EPS) {
                return None;
            }
            let r0 = dot(cols[0], rhs);
            let r1 = dot(cols[1], rhs);
            Some([(c * r0 - b * r1) / det, (a * r1 - b * r0) / det, 0.0])
        }
        3 => {
            // Square system: solve J δ = rhs directly.
            let m = [
                cols[0][0], cols[1][0], cols[2][0], //
                cols[0][1], cols[1][1], cols[2][1], //
                cols[0][2], cols[1][2], cols[2][2],
            ];
            let inv = invert_3x3(m)?;
            Some([
                inv[0] * rhs[0] + inv[1] * rhs[1] + inv[2] * rhs[2],
                inv[3] * rhs[0] + inv[4] * rhs[1] + inv[5] * rhs[2],
                inv[6] * rhs[0] + inv[7] * rhs[1] + inv[8] * rhs[2],
            ])
        }
        _ => None,
    }
}

fn invert_3x3(m: [f64; 9]) -> Option<[f64; 9]> {
    let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6]);
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(EPS);
    if det.abs() <= EPS * scale * scale * scale {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        (m[4] * m[8] - m[5] * m[7]) * inv,
        (m[2] * m[7] - m[1] * m[8]) * inv,
        (m[1] * m[5] - m[2] * m[4]) * inv,
        (m[5] * m[6] - m[3] * m[8]) * inv,
        (m[0] * m[8] - m[2] * m[6]) * inv,
        (m[2] * m[3] - m[0] * m[5]) * inv,
        (m[3] * m[7] - m[4] * m[6]) * inv,
        (m[1] * m[6] - m[0] * m[7]) * inv,
        (m[0] * m[4] - m[1] * m[3]) * inv,
    ])
}

fn diagonal(vertices: &[[f64; 3]]) -> f64 {
    let b = vertex_bounds(vertices);
    if b.is_empty() {
        return 0.0;
    }
    norm(sub(b.max, b.min))
}

#[inline]
fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}
