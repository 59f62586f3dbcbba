//! Linearised BVH for GPU traversal.
//!
//! Every record is two RGBA32 texels, laid out depth first:
//!
//! | record        | texel 0                         | texel 1                            |
//! |---------------|---------------------------------|------------------------------------|
//! | interior node | `min.xyz` (f32 bits), split axis | `max.xyz` (f32 bits), second child |
//! | leaf triangle | `i0, i1, i2`, `-count` (i32)     | face normal (f32 bits), material   |
//!
//! The first child of an interior node starts right after it; the second
//! child's texel index is stored explicitly. A leaf with `count` triangles is
//! `count` consecutive triangle records, each carrying the count.

use super::bvh::{Bvh, BvhPrimitive};
use crate::util::{Error, Result, TextureDimensions};

/// Texels per record.
pub const TEXELS_PER_RECORD: usize = 2;

/// Flattened BVH ready for upload as an `Rgba32Uint` data texture.
#[derive(Debug, Clone, Default)]
pub struct FlatBvh {
    pub texels: Vec<[u32; 4]>,
    /// Levels counting the root as 1; sizes the traversal stack
    pub max_depth: u32,
}

impl FlatBvh {
    /// Number of texels.
    pub fn count(&self) -> usize {
        self.texels.len()
    }

    /// Number of two-texel records.
    pub fn record_count(&self) -> usize {
        self.texels.len() / TEXELS_PER_RECORD
    }

    pub fn dimensions(&self) -> TextureDimensions {
        TextureDimensions::from_count(self.count())
    }

    /// Texels padded to the data texture size.
    pub fn padded_texels(&self) -> Vec<[u32; 4]> {
        let mut out = self.texels.clone();
        out.resize(self.dimensions().size(), [0; 4]);
        out
    }

    /// Peak stack occupancy of a depth-first traversal that visits every node.
    ///
    /// Walks the flattened records rather than trusting the builder's depth.
    pub fn required_stack(&self) -> u32 {
        if self.texels.is_empty() {
            return 0;
        }
        let mut peak = 1u32;
        // (texel index, number of entries on the stack while visiting it)
        let mut pending = vec![(0usize, 1u32)];
        while let Some((i, depth)) = pending.pop() {
            let head = self.texels[i];
            if (head[3] as i32) < 0 {
                continue;
            }
            let second = self.texels[i + 1][3] as usize;
            peak = peak.max(depth + 1);
            pending.push((i + TEXELS_PER_RECORD, depth + 1));
            pending.push((second, depth + 1));
        }
        peak
    }

    /// Fail if a traversal stack of `available` entries could overflow.
    pub fn verify_stack(&self, available: u32) -> Result<()> {
        let required = self.required_stack();
        if required > available {
            return Err(Error::StackDepth { required, available });
        }
        Ok(())
    }
}

/// Flatten `bvh` into the texel layout described in the module docs.
#[tracing::instrument(skip_all, fields(nodes = bvh.nodes.len()))]
pub fn flatten_bvh(bvh: &Bvh, prims: &[BvhPrimitive]) -> FlatBvh {
    if bvh.is_empty() {
        return FlatBvh::default();
    }

    enum Step {
        Visit(usize),
        PatchSecondChild(usize),
    }

    let mut texels: Vec<[u32; 4]> = Vec::with_capacity(bvh.nodes.len() * TEXELS_PER_RECORD);
    let mut stack = vec![Step::Visit(0)];

    while let Some(step) = stack.pop() {
        match step {
            Step::Visit(node_idx) => {
                let node = &bvh.nodes[node_idx];
                if node.is_leaf() {
                    let start = node.left_or_first as usize;
                    let count = node.count as usize;
                    for &prim_idx in &bvh.prim_indices[start..start + count] {
                        let p = &prims[prim_idx];
                        let n = p.face_normal;
                        texels.push([p.indices[0], p.indices[1], p.indices[2], (-(count as i32)) as u32]);
                        texels.push([n[0].to_bits(), n[1].to_bits(), n[2].to_bits(), p.material_index]);
                    }
                } else {
                    let (min, max) = (node.aabb.min, node.aabb.max);
                    let record = texels.len();
                    texels.push([min[0].to_bits(), min[1].to_bits(), min[2].to_bits(), node.split_axis]);
                    texels.push([max[0].to_bits(), max[1].to_bits(), max[2].to_bits(), 0]);
                    let left = node.left_or_first as usize;
                    stack.push(Step::Visit(left + 1));
                    stack.push(Step::PatchSecondChild(record + 1));
                    stack.push(Step::Visit(left));
                }
            }
            Step::PatchSecondChild(texel) => {
                texels[texel][3] = texels.len() as u32;
            }
        }
    }

    FlatBvh { texels, max_depth: bvh.max_depth }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathtracer::build::build_bvh;

    fn grid(n: u32) -> Vec<BvhPrimitive> {
        (0..n)
            .map(|i| {
                let x = (i % 10) as f32 * 2.0;
                let z = (i / 10) as f32 * 2.0;
                BvhPrimitive::new(
                    [i * 3, i * 3 + 1, i * 3 + 2],
                    [[x, 0.0, z], [x + 1.0, 0.0, z], [x, 0.0, z + 1.0]],
                    i % 3,
                )
            })
            .collect()
    }

    /// Walk the flat buffer like the shader does and collect triangle vertex indices.
    fn leaf_triangles(flat: &FlatBvh) -> Vec<[u32; 3]> {
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            let head = flat.texels[i];
            if (head[3] as i32) < 0 {
                let count = -(head[3] as i32) as usize;
                for j in 0..count {
                    let t = flat.texels[i + j * TEXELS_PER_RECORD];
                    out.push([t[0], t[1], t[2]]);
                }
            } else {
                stack.push(flat.texels[i + 1][3] as usize);
                stack.push(i + TEXELS_PER_RECORD);
            }
        }
        out
    }

    #[test]
    fn test_every_triangle_in_exactly_one_leaf() {
        let prims = grid(137);
        let flat = flatten_bvh(&build_bvh(&prims), &prims);
        let mut tris = leaf_triangles(&flat);
        tris.sort_unstable();
        let expected: Vec<[u32; 3]> = prims.iter().map(|p| p.indices).collect();
        assert_eq!(tris, expected);
    }

    #[test]
    fn test_record_count_bounded() {
        for n in [1u32, 2, 5, 33, 200] {
            let prims = grid(n);
            let flat = flatten_bvh(&build_bvh(&prims), &prims);
            assert!(flat.record_count() <= 2 * n as usize - 1, "n = {n}");
        }
    }

    #[test]
    fn test_stack_bound_from_max_depth() {
        let prims = grid(500);
        let flat = flatten_bvh(&build_bvh(&prims), &prims);
        assert!(flat.required_stack() <= flat.max_depth);
        assert!(flat.verify_stack(flat.max_depth).is_ok());
        let err = flat.verify_stack(1).unwrap_err();
        assert!(matches!(err, Error::StackDepth { available: 1, .. }));
    }

    #[test]
    fn test_leaf_payload() {
        let prims = grid(1);
        let flat = flatten_bvh(&build_bvh(&prims), &prims);
        assert_eq!(flat.count(), 2);
        assert_eq!(flat.texels[0], [0, 1, 2, (-1i32) as u32]);
        assert_eq!(f32::from_bits(flat.texels[1][1]), -1.0);
        assert_eq!(flat.texels[1][3], 0);
    }

    #[test]
    fn test_empty() {
        let flat = flatten_bvh(&build_bvh(&[]), &[]);
        assert_eq!(flat.count(), 0);
        assert_eq!(flat.required_stack(), 0);
        assert!(flat.verify_stack(0).is_ok());
    }
}
