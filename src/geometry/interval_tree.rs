//! Bounding-box interval tree.
//!
//! A static, bulk-built hierarchy over axis-aligned boxes keyed by a `usize`
//! id. Each node stores the union box of its subtree; leaves hold a handful of
//! ids. Construction splits at the median centroid along the axis with the
//! widest centroid spread, so the tree is balanced regardless of input order.
//!
//! Queries use closed-box semantics and report ids in ascending order.

use crate::geometry::bbox::BoundingBox;

const LEAF_SIZE: usize = 8;

#[derive(Clone, Debug)]
enum Node {
    Leaf {
        bounds: BoundingBox,
        start: usize,
        end: usize,
    },
    Inner {
        bounds: BoundingBox,
        left: usize,
        right: usize,
    },
}

impl Node {
    fn bounds(&self) -> &BoundingBox {
        match self {
            Node::Leaf { bounds, .. } | Node::Inner { bounds, .. } => bounds,
        }
    }
}

/// Static interval tree over `(id, box)` entries.
#[derive(Clone, Debug, Default)]
pub struct IntervalTree {
    nodes: Vec<Node>,
    /// Entries permuted so each leaf owns a contiguous run.
    entries: Vec<(usize, BoundingBox)>,
}

impl IntervalTree {
    /// Bulk-build the tree.
    pub fn build(mut entries: Vec<(usize, BoundingBox)>) -> Self {
        let mut nodes = Vec::with_capacity(2 * entries.len() / LEAF_SIZE + 1);
        if !entries.is_empty() {
            let n = entries.len();
            build_recursive(&mut nodes, &mut entries, 0, n);
        }
        Self { nodes, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of every entry.
    pub fn bounds(&self) -> BoundingBox {
        self.nodes
            .first()
            .map(|n| *n.bounds())
            .unwrap_or_else(BoundingBox::empty)
    }

    /// Ids whose box contains `p`. `out` is cleared first.
    pub fn containing(&self, p: &[f64; 3], out: &mut Vec<usize>) {
        out.clear();
        self.visit(|b| b.contains(p), out);
    }

    /// Ids whose box intersects `query`. `out` is cleared first.
    pub fn overlapping(&self, query: &BoundingBox, out: &mut Vec<usize>) {
        out.clear();
        if query.is_empty() {
            return;
        }
        self.visit(|b| b.intersects(query), out);
    }

    fn visit<F: Fn(&BoundingBox) -> bool>(&self, hit: F, out: &mut Vec<usize>) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if !hit(node.bounds()) {
                continue;
            }
            match *node {
                Node::Leaf { start, end, .. } => {
                    out.extend(
                        self.entries[start..end]
                            .iter()
                            .filter(|(_, b)| hit(b))
                            .map(|(id, _)| *id),
                    );
                }
                Node::Inner { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        out.sort_unstable();
    }
}

fn build_recursive(
    nodes: &mut Vec<Node>,
    entries: &mut [(usize, BoundingBox)],
    start: usize,
    end: usize,
) -> usize {
    let mut bounds = BoundingBox::empty();
    for (_, b) in &entries[start..end] {
        bounds.merge(b);
    }
    let me = nodes.len();
    if end - start <= LEAF_SIZE {
        nodes.push(Node::Leaf { bounds, start, end });
        return me;
    }

    let mut spread = BoundingBox::empty();
    for (_, b) in &entries[start..end] {
        spread.extend(&b.center());
    }
    let axis = spread.longest_axis();
    let mid = start + (end - start) / 2;
    entries[start..end].select_nth_unstable_by(mid - start, |a, b| {
        a.1.center()[axis].total_cmp(&b.1.center()[axis])
    });

    // Placeholder, patched once children exist.
    nodes.push(Node::Leaf {
        bounds,
        start,
        end,
    });
    let left = build_recursive(nodes, entries, start, mid);
    let right = build_recursive(nodes, entries, mid, end);
    nodes[me] = Node::Inner {
        bounds,
        left,
        right,
    };
    me
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn unit_box_at(x: f64, y: f64, z: f64) -> BoundingBox {
        BoundingBox::new([x, y, z], [x + 1.0, y + 1.0, z + 1.0])
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let tree = IntervalTree::build(Vec::new());
        let mut out = vec![7];
        tree.containing(&[0.0; 3], &mut out);
        assert!(out.is_empty());
        assert!(tree.bounds().is_empty());
    }

    #[test]
    fn grid_of_boxes_point_queries() {
        let mut entries = Vec::new();
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    let id = i + 4 * (j + 4 * k);
                    entries.push((id, unit_box_at(i as f64, j as f64, k as f64)));
                }
            }
        }
        let tree = IntervalTree::build(entries);
        let mut out = Vec::new();
        tree.containing(&[1.5, 2.5, 3.5], &mut out);
        assert_eq!(out, vec![1 + 4 * (2 + 4 * 3)]);

        // A shared corner touches eight boxes.
        tree.containing(&[2.0, 2.0, 2.0], &mut out);
        assert_eq!(out.len(), 8);

        tree.containing(&[9.0, 0.5, 0.5], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn matches_brute_force_on_random_boxes() {
        let mut rng = SmallRng::seed_from_u64(7);
        let entries: Vec<_> = (0..500)
            .map(|id| {
                let min = [rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>()];
                let d = rng.r#gen::<f64>() * 0.1;
                (id, BoundingBox::new(min, [min[0] + d, min[1] + d, min[2] + d]))
            })
            .collect();
        let tree = IntervalTree::build(entries.clone());
        let mut out = Vec::new();
        for _ in 0..200 {
            let q = BoundingBox::new(
                [rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>()],
                [1.0, 1.0, 1.0],
            );
            tree.overlapping(&q, &mut out);
            let want: Vec<_> = entries
                .iter()
                .filter(|(_, b)| b.intersects(&q))
                .map(|(id, _)| *id)
                .collect();
            assert_eq!(out, want);
        }
    }
}
