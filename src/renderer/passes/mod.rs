//! Shader-driving stages of the pipeline.
//!
//! Each pass owns one [`PassProgram`] (two for tone mapping) and exposes
//! setters for the values it reads, so the pipeline can mutate pass state in
//! place and draw without rebuilding anything.

mod gbuffer;
mod ray_trace;
mod reproject;
mod tone_map;

pub use gbuffer::{gbuffer_program, GBufferPass, GBufferTargets, GBUFFER_FORMATS};
pub use ray_trace::{ray_trace_defines, ray_trace_program, GBufferViews, RayTracePass, RayTraceScene, NOISE_SIZE};
pub use reproject::{reproject_program, ReprojectInputs, ReprojectPass};
pub use tone_map::{tone_map_program, ToneMapPass};

use crate::gpu::{create_texture_array, Defines, GpuTexture, PassProgram};
use crate::pathtracer::PackedMaterials;
use crate::util::Result;

pub(crate) const COMMON: &str = include_str!("../shaders/common.wgsl");
pub(crate) const FULLSCREEN: &str = include_str!("../shaders/fullscreen.wgsl");
pub(crate) const MATERIALS: &str = include_str!("../shaders/materials.wgsl");
pub(crate) const GBUFFER: &str = include_str!("../shaders/gbuffer.wgsl");
pub(crate) const BVH: &str = include_str!("../shaders/bvh.wgsl");
pub(crate) const ENV: &str = include_str!("../shaders/env.wgsl");
pub(crate) const RAY_TRACE: &str = include_str!("../shaders/ray_trace.wgsl");
pub(crate) const REPROJECT: &str = include_str!("../shaders/reproject.wgsl");
pub(crate) const TONE_MAP: &str = include_str!("../shaders/tone_map.wgsl");

/// HDR accumulation and reprojection targets: `(sum_rgb, sample_count)`.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Material block contents and map arrays, shared by the G-buffer and ray
/// trace passes.
#[derive(Debug)]
pub struct MaterialResources {
    pub packed: PackedMaterials,
    pub diffuse: GpuTexture,
    pub normal: GpuTexture,
    pub pbr: GpuTexture,
    pub sampler: wgpu::Sampler,
}

impl MaterialResources {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, packed: PackedMaterials) -> Self {
        let diffuse = create_texture_array(device, queue, "diffuse_map", &packed.diffuse.images, true);
        let normal = create_texture_array(device, queue, "normal_map", &packed.normal.images, false);
        let pbr = create_texture_array(device, queue, "pbr_map", &packed.pbr.images, false);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("map_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Self { packed, diffuse, normal, pbr, sampler }
    }

    pub fn defines(&self) -> Defines {
        self.packed.defines()
    }

    /// Upload the material block and bind the map arrays on `pass`.
    pub(crate) fn bind(&self, pass: &mut PassProgram) -> Result<()> {
        pass.write_block("materials", |block| self.packed.write_block(block))?;
        pass.set_texture("diffuse_map", &self.diffuse.view);
        pass.set_texture("normal_map", &self.normal.view);
        pass.set_texture("pbr_map", &self.pbr.view);
        pass.set_sampler("map_sampler", &self.sampler);
        Ok(())
    }
}

/// Viewport covering `(width, height)` from the top-left corner.
pub(crate) fn set_viewport(rpass: &mut wgpu::RenderPass<'_>, (width, height): (u32, u32)) {
    rpass.set_viewport(0.0, 0.0, width.max(1) as f32, height.max(1) as f32, 0.0, 1.0);
}

/// Render pass writing one colour target that keeps its contents.
pub(crate) fn begin_color_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
