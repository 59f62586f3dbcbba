//! Rasterized primary visibility: world position, shading and face normals,
//! albedo and material properties for every pixel.

use glam::Mat4;
use wgpu::util::DeviceExt;

use super::{MaterialResources, GBUFFER, MATERIALS};
use crate::gpu::{BindingHints, Defines, PassProgram, PipelineVariant, ShaderProgram};
use crate::pathtracer::{GpuVertex, MergedGeometry};
use crate::scene::Camera;
use crate::util::Result;

/// Formats of the position, normal, face normal and colour targets.
pub const GBUFFER_FORMATS: [wgpu::TextureFormat; 4] = [
    wgpu::TextureFormat::Rgba32Float,
    wgpu::TextureFormat::Rgba16Float,
    wgpu::TextureFormat::Rgba16Float,
    wgpu::TextureFormat::Rgba8Unorm,
];

pub fn gbuffer_program(defines: &Defines) -> Result<ShaderProgram> {
    ShaderProgram::compile("gbuffer", &[MATERIALS, GBUFFER], defines, "vs_main", "fs_main")
}

/// Attachments of one G-buffer draw.
#[derive(Debug, Clone, Copy)]
pub struct GBufferTargets<'a> {
    pub position: &'a wgpu::TextureView,
    pub normal: &'a wgpu::TextureView,
    pub face_normal: &'a wgpu::TextureView,
    pub color: &'a wgpu::TextureView,
    pub depth: &'a wgpu::TextureView,
}

#[derive(Debug)]
pub struct GBufferPass {
    pass: PassProgram,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    camera: Camera,
    jitter: [f32; 2],
}

impl GBufferPass {
    pub fn new(device: &wgpu::Device, geometry: &MergedGeometry, materials: &MaterialResources) -> Result<Self> {
        let program = gbuffer_program(&materials.defines())?;

        let vertex_layouts = [GpuVertex::layout()];
        let targets = GBUFFER_FORMATS
            .iter()
            .map(|&format| Some(wgpu::ColorTargetState { format, blend: None, write_mask: wgpu::ColorWrites::ALL }))
            .collect();
        let variant = PipelineVariant {
            targets,
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            vertex_buffers: &vertex_layouts,
            cull_mode: None,
        };
        let mut pass = PassProgram::new(device, program, BindingHints::default(), &[variant]);
        materials.bind(&mut pass)?;

        // Never create zero-sized buffers; an empty scene simply draws nothing
        let mut vertices = geometry.vertices();
        if vertices.is_empty() {
            vertices.push(bytemuck::Zeroable::zeroed());
        }
        let mut indices = geometry.indices.clone();
        let index_count = indices.len() as u32;
        if indices.is_empty() {
            indices.extend_from_slice(&[0, 0, 0]);
        }

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("gbuffer_vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("gbuffer_indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Ok(Self { pass, vertex_buffer, index_buffer, index_count, camera: Camera::default(), jitter: [0.0; 2] })
    }

    pub fn set_camera(&mut self, camera: &Camera) {
        self.camera = *camera;
    }

    /// Sub-pixel offset in fractions of the viewport.
    pub fn set_jitter(&mut self, jitter: [f32; 2]) {
        self.jitter = jitter;
    }

    fn proj_view(&self) -> Mat4 {
        self.camera.jittered_projection(self.jitter) * self.camera.view()
    }

    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        targets: GBufferTargets<'_>,
    ) -> Result<()> {
        self.pass.set_uniform("proj_view", self.proj_view());
        self.pass.prepare(device, queue)?;

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("gbuffer"),
            color_attachments: &[
                cleared(targets.position),
                cleared(targets.normal),
                cleared(targets.face_normal),
                cleared(targets.color),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: targets.depth,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if self.index_count == 0 {
            return Ok(());
        }
        self.pass.bind(&mut rpass, 0)?;
        rpass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        rpass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        rpass.draw_indexed(0..self.index_count, 0, 0..1);
        Ok(())
    }
}

fn cleared(view: &wgpu::TextureView) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        depth_slice: None,
        resolve_target: None,
        ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT), store: wgpu::StoreOp::Store },
    })
}
