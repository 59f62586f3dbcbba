//! SAH-based BVH builder.
//!
//! Bins primitive centroids along each axis, picks the cheapest split by the
//! surface area heuristic and recurses with an explicit task stack.

use super::bvh::{Aabb, Bvh, BvhNode, BvhPrimitive};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
pub const MAX_LEAF_SIZE: usize = 4;

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self { bounds: Aabb::EMPTY, count: 0 };
}

/// Build a BVH over `prims`.
///
/// Primitives are not moved; leaves index into [`Bvh::prim_indices`], which
/// is a permutation of `0..prims.len()`.
#[tracing::instrument(skip_all, fields(prim_count = prims.len()))]
pub fn build_bvh(prims: &[BvhPrimitive]) -> Bvh {
    let n = prims.len();
    if n == 0 {
        return Bvh { nodes: Vec::new(), prim_indices: Vec::new(), max_depth: 0 };
    }

    // Working index array (reordered by partitioning)
    let mut indices: Vec<usize> = (0..n).collect();

    // Worst case for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n - 1);
    nodes.push(BvhNode::PLACEHOLDER);

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize,
        depth: u32,
    }

    let mut stack = vec![Task { node_idx: 0, start: 0, end: n, depth: 1 }];
    let mut max_depth = 1;

    while let Some(task) = stack.pop() {
        let Task { node_idx, start, end, depth } = task;
        let count = end - start;
        max_depth = max_depth.max(depth);

        let mut node_aabb = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            node_aabb.grow(&prims[idx].aabb);
        }

        let leaf = BvhNode {
            aabb: node_aabb,
            left_or_first: start as u32,
            count: count as u32,
            split_axis: 0,
        };

        if count <= MAX_LEAF_SIZE {
            nodes[node_idx] = leaf;
            continue;
        }

        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.grow_point(prims[idx].centroid);
        }

        let split = find_best_split(&indices[start..end], prims, &centroid_bounds);
        let leaf_cost = count as f32 * INTERSECT_COST * node_aabb.area();

        let (axis, mid) = match split {
            Some((axis, pos, cost)) if cost < leaf_cost => {
                let mid = partition(&mut indices[start..end], |&idx| prims[idx].centroid[axis] < pos) + start;
                // Degenerate partition falls back to a median split
                let mid = if mid == start || mid == end { (start + end) / 2 } else { mid };
                (axis, mid)
            }
            // All centroids coincide: SAH cannot separate them, but oversized
            // leaves are split at the median so every leaf stays small.
            None if count > MAX_LEAF_SIZE * 4 => (0, (start + end) / 2),
            _ => {
                nodes[node_idx] = leaf;
                continue;
            }
        };

        let left_idx = nodes.len();
        nodes.push(BvhNode::PLACEHOLDER);
        nodes.push(BvhNode::PLACEHOLDER);

        nodes[node_idx] = BvhNode {
            aabb: node_aabb,
            left_or_first: left_idx as u32,
            count: 0,
            split_axis: axis as u32,
        };

        // Right first so the left subtree is processed first
        stack.push(Task { node_idx: left_idx + 1, start: mid, end, depth: depth + 1 });
        stack.push(Task { node_idx: left_idx, start, end: mid, depth: depth + 1 });
    }

    tracing::debug!(nodes = nodes.len(), max_depth, "BVH built");

    Bvh { nodes, prim_indices: indices, max_depth }
}

/// SAH binned split search across all 3 axes.
/// Returns `(axis, split_position, cost)`, or `None` when every axis is degenerate.
fn find_best_split(
    indices: &[usize],
    prims: &[BvhPrimitive],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let bin_id = ((prims[idx].centroid[axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin = &mut bins[bin_id.min(NUM_BINS - 1)];
            bin.bounds.grow(&prims[idx].aabb);
            bin.count += 1;
        }

        // Prefix areas and counts from the left
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        // Sweep from the right and evaluate SAH cost
        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * sweep.area());

            if best.map_or(true, |(_, _, c)| cost < c) {
                let pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
                best = Some((axis, pos, cost));
            }
        }
    }

    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tri(i: u32, cx: f32, cy: f32, cz: f32) -> BvhPrimitive {
        BvhPrimitive::new(
            [i * 3, i * 3 + 1, i * 3 + 2],
            [[cx - 0.5, cy - 0.5, cz], [cx + 0.5, cy - 0.5, cz], [cx, cy + 0.5, cz]],
            0,
        )
    }

    fn leaf_prims(bvh: &Bvh) -> Vec<usize> {
        let mut out = Vec::new();
        for node in bvh.nodes.iter().filter(|n| n.is_leaf()) {
            let start = node.left_or_first as usize;
            out.extend_from_slice(&bvh.prim_indices[start..start + node.count as usize]);
        }
        out.sort_unstable();
        out
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert!(bvh.is_empty());
        assert_eq!(bvh.max_depth, 0);
    }

    #[test]
    fn test_single_triangle() {
        let bvh = build_bvh(&[make_tri(0, 0.0, 0.0, 0.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
        assert_eq!(bvh.max_depth, 1);
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        let tris: Vec<BvhPrimitive> = (0..100).map(|i| make_tri(i, i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");
        assert!(bvh.nodes.len() <= 2 * tris.len() - 1);
        assert_eq!(leaf_prims(&bvh), (0..100).collect::<Vec<_>>());
        assert!(bvh.max_depth > 1);

        let root = &bvh.nodes[0];
        assert!(root.aabb.min[0] < 0.0);
        assert!(root.aabb.max[0] > 198.0);
    }

    #[test]
    fn test_interior_bounds_enclose_children() {
        let tris: Vec<BvhPrimitive> = (0..64)
            .map(|i| make_tri(i, (i % 8) as f32, (i / 8) as f32 * 3.0, (i % 5) as f32))
            .collect();
        let bvh = build_bvh(&tris);
        for node in bvh.nodes.iter().filter(|n| !n.is_leaf()) {
            let l = node.left_or_first as usize;
            assert!(node.aabb.contains(&bvh.nodes[l].aabb));
            assert!(node.aabb.contains(&bvh.nodes[l + 1].aabb));
        }
    }

    #[test]
    fn test_leaf_count_correct() {
        let tris = vec![make_tri(0, 0.0, 0.0, 0.0), make_tri(1, 1.0, 0.0, 0.0), make_tri(2, 2.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_coincident_centroids_still_bounded() {
        let tris: Vec<BvhPrimitive> = (0..50).map(|i| make_tri(i, 0.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);
        assert_eq!(leaf_prims(&bvh), (0..50).collect::<Vec<_>>());
        assert!(bvh.nodes.iter().all(|n| !n.is_leaf() || n.count as usize <= MAX_LEAF_SIZE * 4));
    }
}
