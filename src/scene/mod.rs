//! Scene description consumed by the renderer.
//!
//! A host builds a tree of [`SceneNode`]s; [`decompose_scene`] flattens it into
//! the [`SceneDescription`] the pipeline is built from. Textures and materials
//! are shared through `Arc` and deduplicated by pointer identity.

mod camera;
mod decompose;

pub use camera::{Camera, CameraSnapshot, CAMERA_EPSILON};
pub use decompose::{decompose_scene, MeshInstance, SceneDescription};

use glam::{Mat4, Vec3};
use std::path::Path;
use std::sync::Arc;

use crate::util::{Error, Result};

/// 8-bit RGBA image used for material maps.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, row-major, `width * height * 4` bytes
    pub data: Vec<u8>,
}

impl TextureImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(Error::invalid(format!(
                "texture data is {} bytes, expected {}x{}x4",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Single-colour texture.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(width as usize * height as usize);
        Self { width, height, data }
    }

    /// Load any format the `image` crate can decode (PNG is enabled).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgba8();
        Ok(Self { width: img.width(), height: img.height(), data: img.into_raw() })
    }
}

/// Triangle mesh data in object space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    /// Computed from faces when absent
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    /// Non-indexed geometry is read as consecutive triangles
    pub indices: Option<Vec<u32>>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(i) => i.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    /// Check that indices stay inside the vertex range and that per-vertex
    /// attributes have one entry per position.
    pub fn validate(&self) -> Result<()> {
        let count = self.positions.len();
        if let Some(indices) = &self.indices {
            if indices.len() % 3 != 0 {
                return Err(Error::invalid(format!("{} indices do not form whole triangles", indices.len())));
            }
            if let Some(&i) = indices.iter().find(|&&i| i as usize >= count) {
                return Err(Error::invalid(format!("index {i} out of range for {count} vertices")));
            }
        }
        if let Some(normals) = self.normals.as_ref().filter(|n| n.len() != count) {
            return Err(Error::invalid(format!("{} normals for {count} vertices", normals.len())));
        }
        if let Some(uvs) = self.uvs.as_ref().filter(|uv| uv.len() != count) {
            return Err(Error::invalid(format!("{} uvs for {count} vertices", uvs.len())));
        }
        Ok(())
    }

    /// Axis aligned box from `min` to `max`, 24 vertices with normals and uvs.
    pub fn cuboid(min: Vec3, max: Vec3) -> Self {
        let mut g = Geometry::default();
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut uvs = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let center = (min + max) * 0.5;
        let half = (max - min) * 0.5;
        for (n, u, v) in faces {
            let base = positions.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = center + (n + u * su + v * sv) * half;
                positions.push(p.to_array());
                normals.push(n.to_array());
                uvs.push([(su + 1.0) * 0.5, (sv + 1.0) * 0.5]);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        g.positions = positions;
        g.normals = Some(normals);
        g.uvs = Some(uvs);
        g.indices = Some(indices);
        g
    }

    /// Square in the XZ plane centred at the origin, facing +Y.
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        Geometry {
            positions: vec![[-h, 0.0, h], [h, 0.0, h], [h, 0.0, -h], [-h, 0.0, -h]],
            normals: Some(vec![[0.0, 1.0, 0.0]; 4]),
            uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            indices: Some(vec![0, 1, 2, 0, 2, 3]),
        }
    }
}

/// Physically based material with the path tracer's extra flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub color: Vec3,
    pub roughness: f32,
    pub metalness: f32,
    pub normal_scale: f32,
    pub map: Option<Arc<TextureImage>>,
    pub normal_map: Option<Arc<TextureImage>>,
    pub roughness_map: Option<Arc<TextureImage>>,
    pub metalness_map: Option<Arc<TextureImage>>,
    pub transparent: bool,
    /// Transparent material with volume (refracts) rather than a thin sheet
    pub solid: bool,
    /// Invisible surface that only receives shadows
    pub shadow_catcher: bool,
    pub visible: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            roughness: 1.0,
            metalness: 0.0,
            normal_scale: 1.0,
            map: None,
            normal_map: None,
            roughness_map: None,
            metalness_map: None,
            transparent: false,
            solid: false,
            shadow_catcher: false,
            visible: true,
        }
    }
}

/// Material slot on a mesh node. Only standard materials are path traced.
#[derive(Debug, Clone)]
pub enum MeshMaterial {
    Standard(Arc<Material>),
    /// Any other shading model the host may attach
    Unsupported(String),
}

/// Distant light with a soft angular falloff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Direction from the scene towards the light, in the node's local space
    pub direction: Vec3,
    /// 0 gives a hard sun, 1 spreads the light over the hemisphere
    pub softness: Option<f32>,
}

impl DirectionalLight {
    pub const DEFAULT_SOFTNESS: f32 = 0.01;

    pub fn new(color: Vec3, intensity: f32, direction: Vec3) -> Self {
        Self { color, intensity, direction, softness: None }
    }

    pub fn softness(&self) -> f32 {
        self.softness.unwrap_or(Self::DEFAULT_SOFTNESS).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

/// How the texels of an [`EnvironmentMap`] are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvEncoding {
    /// RGB mantissas with a shared exponent in alpha, 0..255 per channel
    Rgbe,
    /// Linear float radiance
    Linear,
    /// Display-referred colour; not usable as a light source
    Srgb,
}

/// Equirectangular radiance map.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentMap {
    pub width: u32,
    pub height: u32,
    /// RGBA per texel, interpreted according to `encoding`
    pub data: Vec<f32>,
    pub encoding: EnvEncoding,
}

impl EnvironmentMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>, encoding: EnvEncoding) -> Result<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(Error::invalid(format!(
                "environment map data has {} floats, expected {}x{}x4",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, data, encoding })
    }

    /// Load a Radiance `.hdr` file as linear radiance.
    pub fn load_hdr(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgba32f();
        Ok(Self {
            width: img.width(),
            height: img.height(),
            data: img.into_raw(),
            encoding: EnvEncoding::Linear,
        })
    }

    pub fn is_hdr(&self) -> bool {
        matches!(self.encoding, EnvEncoding::Rgbe | EnvEncoding::Linear) && !self.data.is_empty()
    }
}

/// Image-based light surrounding the scene.
#[derive(Debug, Clone)]
pub struct EnvironmentLight {
    pub map: Option<Arc<EnvironmentMap>>,
    pub color: Vec3,
    pub intensity: f32,
}

impl EnvironmentLight {
    pub fn new(map: Arc<EnvironmentMap>) -> Self {
        Self { map: Some(map), color: Vec3::ONE, intensity: 1.0 }
    }

    /// Only lights carrying an HDR map are usable.
    pub fn is_valid(&self) -> bool {
        self.map.as_ref().is_some_and(|m| m.is_hdr())
    }
}

/// What the camera sees where no geometry is hit.
#[derive(Debug, Clone)]
pub enum Background {
    Color(Vec3),
    Image(Arc<EnvironmentMap>),
}

/// Payload of a scene node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Group,
    Mesh {
        geometry: Option<Arc<Geometry>>,
        material: MeshMaterial,
    },
    DirectionalLight(DirectionalLight),
    AmbientLight(AmbientLight),
    EnvironmentLight(EnvironmentLight),
}

/// Node in the host scene tree.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    /// Transform relative to the parent
    pub transform: Mat4,
    pub visible: bool,
    pub kind: NodeKind,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            visible: true,
            kind,
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    pub fn mesh(name: impl Into<String>, geometry: Arc<Geometry>, material: Arc<Material>) -> Self {
        Self::new(
            name,
            NodeKind::Mesh { geometry: Some(geometry), material: MeshMaterial::Standard(material) },
        )
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Root of a host scene.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub background: Option<Background>,
    pub nodes: Vec<SceneNode>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: SceneNode) -> &mut Self {
        self.nodes.push(node);
        self
    }
}
