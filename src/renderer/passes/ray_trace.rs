//! Path tracing over the G-buffer's primary hits.
//!
//! Secondary rays walk the flattened BVH stored in an `Rgba32Uint` data
//! texture; vertex attributes come from float data textures. Lighting is the
//! baked environment, importance sampled through its CDF texture. Random
//! numbers are per-frame stratified samples offset per pixel by a noise
//! texture.

use rand::Rng;

use super::{MaterialResources, BVH, COMMON, ENV, FULLSCREEN, HDR_FORMAT, MATERIALS, RAY_TRACE};
use crate::gpu::{
    create_data_texture, create_env_texture, create_float_texture, BindingHints, Defines, GpuTexture, PassProgram,
    PipelineVariant, ShaderProgram, ADDITIVE,
};
use crate::pathtracer::{
    sampling_dimensions, EnvDistribution, EnvImage, FlatBvh, MaterialKind, MergedGeometry, PackedMaterials,
    StratifiedSamplerCombined,
};
use crate::renderer::tiles::Tile;
use crate::scene::Camera;
use crate::util::{Result, TextureDimensions};

/// Side of the square per-pixel noise texture.
pub const NOISE_SIZE: u32 = 64;

const ADDITIVE_VARIANT: usize = 1;

const UNFILTERABLE: &[&str] = &[
    "position_buffer",
    "normal_buffer",
    "uv_buffer",
    "env_distribution",
    "noise_tex",
    "g_position",
    "g_normal",
    "g_face_normal",
    "g_color",
];

pub fn ray_trace_program(defines: &Defines) -> Result<ShaderProgram> {
    ShaderProgram::compile(
        "ray_trace",
        &[COMMON, FULLSCREEN, MATERIALS, BVH, ENV, RAY_TRACE],
        defines,
        "vs_fullscreen",
        "fs_main",
    )
}

/// Scene data the pass is built from.
#[derive(Debug, Clone, Copy)]
pub struct RayTraceScene<'a> {
    pub geometry: &'a MergedGeometry,
    pub bvh: &'a FlatBvh,
    pub env: &'a EnvImage,
    pub distribution: &'a EnvDistribution,
    pub background: &'a EnvImage,
    pub materials: &'a MaterialResources,
    pub bounces: u32,
    /// Linear filtering of the environment; nearest otherwise
    pub linear_env: bool,
}

impl RayTraceScene<'_> {
    pub fn defines(&self) -> Defines {
        ray_trace_defines(self.geometry, self.bvh, &self.materials.packed, self.bounces)
    }
}

/// Compile-time constants of the ray trace program for a scene.
pub fn ray_trace_defines(geometry: &MergedGeometry, bvh: &FlatBvh, packed: &PackedMaterials, bounces: u32) -> Defines {
    let dims: usize = sampling_dimensions(bounces).iter().sum();
    let vertex_dims = TextureDimensions::from_count(geometry.vertex_count().max(1));
    let index_dims = TextureDimensions::from_count(geometry.triangle_count().max(1));
    let bvh_dims = TextureDimensions::from_count(bvh.count().max(1));

    let mut d = packed.defines();
    d.set("BOUNCES", bounces)
        .set("SAMPLING_DIMENSIONS", dims as u32)
        .set("SAMPLE_VEC4S", dims.div_ceil(4).max(1) as u32)
        .set("STACK_SIZE", bvh.max_depth.max(1))
        .set("NUM_TRIS", geometry.triangle_count() as u32)
        .set("VERTEX_COLUMNS", vertex_dims.columns_log)
        .set("INDEX_COLUMNS", index_dims.columns_log)
        .set("BVH_COLUMNS", bvh_dims.columns_log)
        .set("USE_GLASS", packed.has_kind(MaterialKind::ThinGlass) || packed.has_kind(MaterialKind::ThickGlass))
        .set("USE_SHADOW_CATCHER", packed.has_kind(MaterialKind::ShadowCatcher));
    d
}

/// Views of the G-buffer the pass shades.
#[derive(Debug, Clone, Copy)]
pub struct GBufferViews<'a> {
    pub position: &'a wgpu::TextureView,
    pub normal: &'a wgpu::TextureView,
    pub face_normal: &'a wgpu::TextureView,
    pub color: &'a wgpu::TextureView,
}

#[derive(Debug)]
pub struct RayTracePass {
    pass: PassProgram,
    samples: StratifiedSamplerCombined,
    dimensions: Vec<usize>,
    padded_samples: Vec<f32>,
    // Keeps the bound data textures alive
    _resources: Vec<GpuTexture>,
    _env_sampler: wgpu::Sampler,
}

impl RayTracePass {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, scene: RayTraceScene<'_>) -> Result<Self> {
        let program = ray_trace_program(&scene.defines())?;
        let stack = program.constant_u32("STACK_SIZE").unwrap_or(0);
        scene.bvh.verify_stack(stack)?;

        let hints = BindingHints { unfilterable: UNFILTERABLE, non_filtering: &[] };
        let variants = [
            PipelineVariant::fullscreen(HDR_FORMAT, None),
            PipelineVariant::fullscreen(HDR_FORMAT, Some(ADDITIVE)),
        ];
        let mut pass = PassProgram::new(device, program, hints, &variants);
        scene.materials.bind(&mut pass)?;

        let geometry = scene.geometry;
        let positions: Vec<[f32; 4]> = geometry.positions.iter().map(|p| [p[0], p[1], p[2], 0.0]).collect();
        let normals: Vec<[f32; 4]> = geometry.normals.iter().map(|n| [n[0], n[1], n[2], 0.0]).collect();
        let float4 = wgpu::TextureFormat::Rgba32Float;

        let resources = vec![
            create_data_texture(device, queue, "bvh_buffer", wgpu::TextureFormat::Rgba32Uint, &scene.bvh.texels)?,
            create_data_texture(device, queue, "position_buffer", float4, &positions)?,
            create_data_texture(device, queue, "normal_buffer", float4, &normals)?,
            create_data_texture(device, queue, "uv_buffer", wgpu::TextureFormat::Rg32Float, &geometry.uvs)?,
            create_env_texture(device, queue, "env_map", scene.env),
            create_env_texture(device, queue, "background_map", scene.background),
            distribution_texture(device, queue, scene.distribution),
            noise_texture(device, queue),
        ];
        let names = [
            "bvh_buffer",
            "position_buffer",
            "normal_buffer",
            "uv_buffer",
            "env_map",
            "background_map",
            "env_distribution",
            "noise_tex",
        ];
        for (name, texture) in names.iter().zip(&resources) {
            pass.set_texture(name, &texture.view);
        }

        let filter = if scene.linear_env { wgpu::FilterMode::Linear } else { wgpu::FilterMode::Nearest };
        let env_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("env_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        pass.set_sampler("env_sampler", &env_sampler);

        let dimensions = sampling_dimensions(scene.bounces);
        let mut ray_trace = Self {
            pass,
            samples: StratifiedSamplerCombined::new(1, &dimensions),
            dimensions,
            padded_samples: Vec::new(),
            _resources: resources,
            _env_sampler: env_sampler,
        };
        ray_trace.set_strata_count(1);
        Ok(ray_trace)
    }

    /// Size of the region being rendered; sets the pixel to uv scale.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.pass.set_uniform("pixel_size", [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32].as_slice());
    }

    pub fn set_camera(&mut self, camera: &Camera) {
        self.pass.set_uniform("camera.transform", camera.world);
        self.pass.set_uniform("camera.aspect", camera.aspect);
        self.pass.set_uniform("camera.fov", camera.fov_scale());
    }

    pub fn set_jitter(&mut self, jitter: [f32; 2]) {
        self.pass.set_uniform("jitter", jitter.as_slice());
    }

    pub fn set_gbuffer(&mut self, views: GBufferViews<'_>) {
        self.pass.set_texture("g_position", views.position);
        self.pass.set_texture("g_normal", views.normal);
        self.pass.set_texture("g_face_normal", views.face_normal);
        self.pass.set_texture("g_color", views.color);
    }

    /// Change the number of strata per dimension.
    ///
    /// A new sampler is only made for a different count above one; otherwise
    /// the current one restarts its cycle.
    pub fn set_strata_count(&mut self, strata: u32) {
        if strata > 1 && strata != self.samples.strata_count() {
            self.samples = StratifiedSamplerCombined::new(strata, &self.dimensions);
        } else {
            self.samples.restart();
        }
        self.pass.set_uniform("strata_size", 1.0 / strata.max(1) as f32);
        self.next_seed();
    }

    pub fn strata_count(&self) -> u32 {
        self.samples.strata_count()
    }

    /// Draw the next set of stratified samples.
    pub fn next_seed(&mut self) {
        pad_to_vec4(self.samples.next(), &mut self.padded_samples);
        self.pass.set_uniform("stratified_samples", self.padded_samples.as_slice());
    }

    /// Trace into `target`, restricted to `scissor` when rendering a tile.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        target_size: (u32, u32),
        viewport: (u32, u32),
        scissor: Option<Tile>,
        additive: bool,
    ) -> Result<()> {
        self.pass.prepare(device, queue)?;
        let mut rpass = super::begin_color_pass(encoder, "ray_trace", target, wgpu::LoadOp::Load);
        super::set_viewport(&mut rpass, viewport);
        if let Some(tile) = scissor {
            let Some((x, y, w, h)) = tile.clip(target_size.0, target_size.1) else {
                return Ok(());
            };
            rpass.set_scissor_rect(x, y, w, h);
        }
        let variant = if additive { ADDITIVE_VARIANT } else { 0 };
        self.pass.draw_fullscreen(&mut rpass, variant)
    }
}

/// Pad a sample vector to whole `vec4`s, at least one.
fn pad_to_vec4(samples: &[f32], out: &mut Vec<f32>) {
    out.clear();
    out.extend_from_slice(samples);
    out.resize(samples.len().div_ceil(4).max(1) * 4, 0.0);
}

/// Environment CDF uploaded at its exact `(W+2)×(H+1)` size.
fn distribution_texture(device: &wgpu::Device, queue: &wgpu::Queue, distribution: &EnvDistribution) -> GpuTexture {
    create_float_texture(
        device,
        queue,
        "env_distribution",
        wgpu::TextureFormat::Rg32Float,
        distribution.width,
        distribution.height,
        bytemuck::cast_slice(&distribution.data),
    )
}

fn noise_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> GpuTexture {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; (NOISE_SIZE * NOISE_SIZE * 4) as usize];
    rng.fill(bytes.as_mut_slice());
    create_float_texture(
        device,
        queue,
        "noise_tex",
        wgpu::TextureFormat::Rgba8Unorm,
        NOISE_SIZE,
        NOISE_SIZE,
        &bytes,
    )
}
