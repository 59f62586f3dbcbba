//! CPU side of the path tracer: geometry merging, BVH construction and
//! flattening, material packing, environment baking and stratified sampling.

pub mod build;
pub mod bvh;
pub mod environment;
pub mod flatten;
pub mod geometry;
pub mod materials;
pub mod sampler;

pub use build::{build_bvh, MAX_LEAF_SIZE};
pub use bvh::{Aabb, Bvh, BvhNode, BvhPrimitive};
pub use environment::{
    background_image, bake_environment, decode_env_map, direction_to_uv, env_distribution, EnvDistribution, EnvImage,
};
pub use flatten::{flatten_bvh, FlatBvh, TEXELS_PER_RECORD};
pub use geometry::{compute_vertex_normals, merge_meshes, GpuVertex, MergedGeometry};
pub use materials::{pack_materials, MaterialKind, MaterialRecord, PackedMaterials, TextureSet};
pub use sampler::{sampling_dimensions, StratifiedSampler, StratifiedSamplerCombined};
