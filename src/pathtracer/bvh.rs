//! Bounding volume hierarchy types.
//!
//! The builder produces a node array where children of an interior node are
//! allocated as a pair (`left`, `left + 1`) and leaves reference a range of
//! the reordered primitive list. [`super::flatten`] turns this into the
//! texel stream the shaders traverse.

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// True if `other` lies inside this box.
    pub fn contains(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.min[i] && self.max[i] >= other.max[i])
    }
}

/// Triangle as seen by the builder: vertex indices into the merged geometry.
#[derive(Debug, Clone, Copy)]
pub struct BvhPrimitive {
    pub indices: [u32; 3],
    pub face_normal: [f32; 3],
    pub material_index: u32,
    pub aabb: Aabb,
    pub centroid: [f32; 3],
}

impl BvhPrimitive {
    pub fn new(indices: [u32; 3], positions: [[f32; 3]; 3], material_index: u32) -> Self {
        let mut aabb = Aabb::EMPTY;
        for p in positions {
            aabb.grow_point(p);
        }
        let [a, b, c] = positions.map(glam::Vec3::from_array);
        let face_normal = (b - a).cross(c - a).normalize_or_zero().to_array();
        let centroid = ((a + b + c) / 3.0).to_array();
        Self { indices, face_normal, material_index, aabb, centroid }
    }
}

/// Build-time node.
///
/// Interior node: `count == 0`, children at `left_or_first` and `left_or_first + 1`.
/// Leaf node: `count > 0` primitives starting at `left_or_first` in [`Bvh::prim_indices`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub aabb: Aabb,
    pub left_or_first: u32,
    pub count: u32,
    /// Axis the interior node was split on (0=x, 1=y, 2=z)
    pub split_axis: u32,
}

impl BvhNode {
    pub const PLACEHOLDER: Self = Self {
        aabb: Aabb::EMPTY,
        left_or_first: 0,
        count: 0,
        split_axis: 0,
    };

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Built BVH result.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Node array, index 0 is the root. Empty when there are no primitives.
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference ranges of this list)
    pub prim_indices: Vec<usize>,
    /// Number of levels, counting the root as 1
    pub max_depth: u32,
}

impl Bvh {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
