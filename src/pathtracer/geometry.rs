//! Merging every mesh of a scene into one indexed triangle set.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec3};
use std::sync::Arc;

use super::bvh::BvhPrimitive;
use crate::scene::{Geometry, Material, MeshInstance};

/// Interleaved vertex used by the G-buffer rasterizer (40 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// x = material index, y = mesh index (1-based, 0 means "no mesh")
    pub material_mesh: [u32; 2],
}

impl GpuVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 4] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2, 3 => Uint32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GpuVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// All scene geometry in world space, sharing one index buffer.
#[derive(Debug, Clone, Default)]
pub struct MergedGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    /// Per-vertex (material index, mesh index)
    pub material_mesh: Vec<[u32; 2]>,
    pub indices: Vec<u32>,
    /// Unique materials, indexed by `material_mesh[..][0]`
    pub materials: Vec<Arc<Material>>,
}

impl MergedGeometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Interleaved vertices for rasterization.
    pub fn vertices(&self) -> Vec<GpuVertex> {
        (0..self.vertex_count())
            .map(|i| GpuVertex {
                position: self.positions[i],
                normal: self.normals[i],
                uv: self.uvs[i],
                material_mesh: self.material_mesh[i],
            })
            .collect()
    }

    /// One BVH primitive per triangle; the material comes from the first vertex.
    pub fn primitives(&self) -> Vec<BvhPrimitive> {
        self.indices
            .chunks_exact(3)
            .map(|t| {
                let tri = [t[0], t[1], t[2]];
                let positions = tri.map(|i| self.positions[i as usize]);
                BvhPrimitive::new(tri, positions, self.material_mesh[t[0] as usize][0])
            })
            .collect()
    }
}

/// Concatenate visible meshes (node and material both visible) into a single [`MergedGeometry`].
///
/// Meshes whose geometry fails [`Geometry::validate`] are skipped with a warning.
/// Positions are moved to world space and normals transformed by the inverse
/// transpose of the world matrix. Materials shared between meshes (same `Arc`)
/// get one index.
#[tracing::instrument(skip_all, fields(meshes = meshes.len()))]
pub fn merge_meshes(meshes: &[MeshInstance]) -> MergedGeometry {
    let mut merged = MergedGeometry::default();
    let mut mesh_index = 0u32;

    for mesh in meshes.iter().filter(|m| m.visible && m.material.visible) {
        if let Err(err) = mesh.geometry.validate() {
            tracing::warn!(mesh = %mesh.name, %err, "mesh geometry is malformed, skipped");
            continue;
        }
        mesh_index += 1;
        let material_index = material_slot(&mut merged.materials, &mesh.material);
        append_mesh(&mut merged, &mesh.geometry, mesh, [material_index, mesh_index]);
    }

    tracing::debug!(
        vertices = merged.vertex_count(),
        triangles = merged.triangle_count(),
        materials = merged.materials.len(),
        "merged scene geometry"
    );
    merged
}

fn material_slot(materials: &mut Vec<Arc<Material>>, material: &Arc<Material>) -> u32 {
    if let Some(i) = materials.iter().position(|m| Arc::ptr_eq(m, material)) {
        return i as u32;
    }
    materials.push(Arc::clone(material));
    (materials.len() - 1) as u32
}

fn append_mesh(merged: &mut MergedGeometry, geometry: &Geometry, mesh: &MeshInstance, tag: [u32; 2]) {
    let base = merged.positions.len() as u32;
    let count = geometry.vertex_count();

    let local_indices: Vec<u32> = match &geometry.indices {
        Some(indices) => indices.clone(),
        None => (0..(count - count % 3) as u32).collect(),
    };

    let normals = match &geometry.normals {
        Some(n) => n.clone(),
        None => compute_vertex_normals(&geometry.positions, &local_indices),
    };

    let normal_matrix = Mat3::from_mat4(mesh.world).inverse().transpose();
    for i in 0..count {
        let p = mesh.world.transform_point3(Vec3::from_array(geometry.positions[i]));
        let n = (normal_matrix * Vec3::from_array(normals[i])).normalize_or_zero();
        merged.positions.push(p.to_array());
        merged.normals.push(n.to_array());
        let uv = geometry.uvs.as_ref().and_then(|uvs| uvs.get(i)).copied().unwrap_or([0.0, 0.0]);
        merged.uvs.push(uv);
        merged.material_mesh.push(tag);
    }

    merged.indices.extend(local_indices.iter().map(|&i| i + base));
}

/// Area-weighted vertex normals from triangle faces.
pub fn compute_vertex_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for t in indices.chunks_exact(3) {
        let [a, b, c] = [t[0], t[1], t[2]].map(|i| Vec3::from_array(positions[i as usize]));
        // Unnormalized cross product weights each face by its area
        let face = (b - a).cross(c - a);
        for &i in t {
            normals[i as usize] += face;
        }
    }
    normals.into_iter().map(|n| n.normalize_or_zero().to_array()).collect()
}
