//! Material packing: texture deduplication into per-role arrays, material
//! classification and the per-material uniform block.

use std::sync::Arc;

use crate::gpu::{Defines, UniformBlock};
use crate::scene::{Material, TextureImage};
use crate::util::Result;

/// Surface class the shader switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MaterialKind {
    Opaque = 0,
    /// Transparent sheet without volume
    ThinGlass = 1,
    /// Refracting transparent solid
    ThickGlass = 2,
    ShadowCatcher = 3,
}

impl MaterialKind {
    pub fn classify(material: &Material) -> Self {
        if material.shadow_catcher {
            Self::ShadowCatcher
        } else if material.transparent {
            if material.solid {
                Self::ThickGlass
            } else {
                Self::ThinGlass
            }
        } else {
            Self::Opaque
        }
    }
}

/// Images bound to one texture array, deduplicated by `Arc` identity.
#[derive(Debug, Clone, Default)]
pub struct TextureSet {
    pub images: Vec<Arc<TextureImage>>,
}

impl TextureSet {
    /// Layer of `image`, appending it on first use. `None` maps to -1.
    pub fn slot(&mut self, image: Option<&Arc<TextureImage>>) -> i32 {
        let Some(image) = image else {
            return -1;
        };
        let index = match self.images.iter().position(|i| Arc::ptr_eq(i, image)) {
            Some(i) => i,
            None => {
                self.images.push(Arc::clone(image));
                self.images.len() - 1
            }
        };
        index as i32
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Largest width and height across the set.
    pub fn max_size(&self) -> (u32, u32) {
        let w = self.images.iter().map(|i| i.width).max().unwrap_or(0);
        let h = self.images.iter().map(|i| i.height).max().unwrap_or(0);
        (w, h)
    }

    /// Size of layer `index` relative to the array layer size, `[1, 1]` for -1.
    pub fn relative_size(&self, index: i32) -> [f32; 2] {
        let Some(image) = usize::try_from(index).ok().and_then(|i| self.images.get(i)) else {
            return [1.0, 1.0];
        };
        let (w, h) = self.max_size();
        [image.width as f32 / w.max(1) as f32, image.height as f32 / h.max(1) as f32]
    }
}

/// Packed scalars and map slots of one material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialRecord {
    pub color: [f32; 3],
    pub kind: MaterialKind,
    pub roughness: f32,
    pub metalness: f32,
    pub normal_scale: [f32; 2],
    /// Diffuse, normal, roughness and metalness layers, -1 when absent
    pub map_index: [i32; 4],
}

/// All materials of a scene ready for upload.
#[derive(Debug, Clone, Default)]
pub struct PackedMaterials {
    pub records: Vec<MaterialRecord>,
    pub diffuse: TextureSet,
    pub normal: TextureSet,
    /// Shared by roughness (`.g`) and metalness (`.b`) maps
    pub pbr: TextureSet,
}

#[tracing::instrument(skip_all, fields(materials = materials.len()))]
pub fn pack_materials(materials: &[Arc<Material>]) -> PackedMaterials {
    let mut packed = PackedMaterials::default();
    for m in materials {
        let map_index = [
            packed.diffuse.slot(m.map.as_ref()),
            packed.normal.slot(m.normal_map.as_ref()),
            packed.pbr.slot(m.roughness_map.as_ref()),
            packed.pbr.slot(m.metalness_map.as_ref()),
        ];
        packed.records.push(MaterialRecord {
            color: m.color.to_array(),
            kind: MaterialKind::classify(m),
            roughness: m.roughness,
            metalness: m.metalness,
            normal_scale: [m.normal_scale, m.normal_scale],
            map_index,
        });
    }
    tracing::debug!(
        diffuse = packed.diffuse.len(),
        normal = packed.normal.len(),
        pbr = packed.pbr.len(),
        "packed material maps"
    );
    packed
}

impl PackedMaterials {
    /// Array length of the material block; at least one slot.
    pub fn block_len(&self) -> u32 {
        self.records.len().max(1) as u32
    }

    pub fn has_kind(&self, kind: MaterialKind) -> bool {
        self.records.iter().any(|r| r.kind == kind)
    }

    pub fn defines(&self) -> Defines {
        let mut d = Defines::new();
        d.set("NUM_MATERIALS", self.block_len())
            .set("NUM_DIFFUSE_MAPS", self.diffuse.len() as u32)
            .set("NUM_NORMAL_MAPS", self.normal.len() as u32)
            .set("NUM_DIFFUSE_NORMAL_MAPS", self.diffuse.len().max(self.normal.len()) as u32)
            .set("NUM_PBR_MAPS", self.pbr.len() as u32);
        d
    }

    /// Write every material into `block` at its reflected offsets.
    pub fn write_block(&self, block: &mut UniformBlock) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        let n = self.records.len();
        let mut color_type = Vec::with_capacity(n * 4);
        let mut rmn = Vec::with_capacity(n * 4);
        let mut indices = Vec::with_capacity(n * 4);
        let mut diffuse_normal_size = Vec::with_capacity(n * 4);
        let mut pbr_size = Vec::with_capacity(n * 4);

        for r in &self.records {
            let [d, nm, rough, metal] = r.map_index;
            color_type.extend_from_slice(&[r.color[0], r.color[1], r.color[2], r.kind as u32 as f32]);
            rmn.extend_from_slice(&[r.roughness, r.metalness, r.normal_scale[0], r.normal_scale[1]]);
            indices.extend_from_slice(&r.map_index);
            diffuse_normal_size.extend_from_slice(&self.diffuse.relative_size(d));
            diffuse_normal_size.extend_from_slice(&self.normal.relative_size(nm));
            pbr_size.extend_from_slice(&self.pbr.relative_size(rough));
            pbr_size.extend_from_slice(&self.pbr.relative_size(metal));
        }

        block.set("color_and_material_type", &color_type[..])?;
        block.set("roughness_metalness_normal_scale", &rmn[..])?;
        block.set("diffuse_normal_roughness_metalness_map_index", crate::gpu::UniformValue::ints(&indices))?;
        block.set("diffuse_normal_map_size", &diffuse_normal_size[..])?;
        block.set("pbr_map_size", &pbr_size[..])?;
        Ok(())
    }
}
