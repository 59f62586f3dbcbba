//! A render pass program: compiled shader, pipelines, reflected bind group
//! layout, uniform channel and the named resources its bind group is built from.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::shader::{BindingHints, BindingKind, ShaderProgram};
use super::uniforms::{UniformBlock, UniformChannel, UniformValue};
use crate::util::{Error, Result};

#[derive(Debug, Clone)]
enum Resource {
    Texture(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

/// Pipeline state for one variant of a pass.
#[derive(Debug, Clone)]
pub struct PipelineVariant<'a> {
    pub targets: Vec<Option<wgpu::ColorTargetState>>,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
    pub cull_mode: Option<wgpu::Face>,
}

impl<'a> PipelineVariant<'a> {
    /// Single colour target without vertex buffers.
    pub fn fullscreen(format: wgpu::TextureFormat, blend: Option<wgpu::BlendState>) -> Self {
        Self {
            targets: vec![Some(wgpu::ColorTargetState { format, blend, write_mask: wgpu::ColorWrites::ALL })],
            depth_stencil: None,
            vertex_buffers: &[],
            cull_mode: None,
        }
    }
}

/// Additive blend on all channels.
pub const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

#[derive(Debug)]
struct UniformBinding {
    name: String,
    channel: UniformChannel,
    buffer: wgpu::Buffer,
}

#[derive(Debug)]
pub struct PassProgram {
    program: ShaderProgram,
    pipelines: Vec<wgpu::RenderPipeline>,
    layout: wgpu::BindGroupLayout,
    uniforms: Vec<UniformBinding>,
    warned: HashSet<String>,
    resources: HashMap<String, Resource>,
    bind_group: Option<wgpu::BindGroup>,
}

impl PassProgram {
    pub fn new(device: &wgpu::Device, program: ShaderProgram, hints: BindingHints<'_>, variants: &[PipelineVariant<'_>]) -> Self {
        let module = program.create_module(device);
        let layout = program.create_bind_group_layout(device, hints);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(program.label()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipelines = variants
            .iter()
            .map(|v| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(program.label()),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: Some(program.vertex_entry()),
                        buffers: v.vertex_buffers,
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: Some(program.fragment_entry()),
                        targets: &v.targets,
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        cull_mode: v.cull_mode,
                        ..Default::default()
                    },
                    depth_stencil: v.depth_stencil.clone(),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            })
            .collect();

        let uniforms = program
            .bindings()
            .iter()
            .filter(|b| matches!(b.kind, BindingKind::UniformBuffer { .. }))
            .filter_map(|b| {
                let block = UniformBlock::new(program.uniform_block(&b.name)?.clone());
                let buffer = block.create_buffer(device, &format!("{}_{}", program.label(), b.name));
                Some(UniformBinding { name: b.name.clone(), channel: UniformChannel::new(block), buffer })
            })
            .collect();

        Self {
            program,
            pipelines,
            layout,
            uniforms,
            warned: HashSet::new(),
            resources: HashMap::new(),
            bind_group: None,
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn pipeline(&self, variant: usize) -> &wgpu::RenderPipeline {
        &self.pipelines[variant.min(self.pipelines.len() - 1)]
    }

    /// Stage a uniform for the next [`prepare`](Self::prepare).
    ///
    /// The member is looked up across all uniform blocks of the program;
    /// unknown names are warned about once and dropped.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        match self.uniforms.iter_mut().find(|u| u.channel.block().has(name)) {
            Some(u) => u.channel.set(name, value),
            None => {
                if self.warned.insert(name.to_string()) {
                    warn!(pass = self.program.label(), "uniform '{name}' is not used by the shader");
                }
            }
        }
    }

    /// Write a whole uniform block at once.
    pub fn write_block(&mut self, block: &str, f: impl FnOnce(&mut UniformBlock) -> Result<()>) -> Result<()> {
        let label = self.program.label().to_string();
        let binding = self
            .uniforms
            .iter_mut()
            .find(|u| u.name == block)
            .ok_or_else(|| Error::UniformLayout { block: block.to_string(), message: format!("not declared by {label}") })?;
        binding.channel.write(f)
    }

    pub fn set_texture(&mut self, name: &str, view: &wgpu::TextureView) {
        self.resources.insert(name.to_string(), Resource::Texture(view.clone()));
        self.bind_group = None;
    }

    pub fn set_sampler(&mut self, name: &str, sampler: &wgpu::Sampler) {
        self.resources.insert(name.to_string(), Resource::Sampler(sampler.clone()));
        self.bind_group = None;
    }

    /// Upload staged uniforms and rebuild the bind group if a resource changed.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<()> {
        for u in &mut self.uniforms {
            u.channel.flush(queue, &u.buffer)?;
        }
        if self.bind_group.is_none() {
            self.rebuild_bind_group(device)?;
        }
        Ok(())
    }

    fn rebuild_bind_group(&mut self, device: &wgpu::Device) -> Result<()> {
        let mut entries = Vec::new();
        for b in self.program.bindings().iter().filter(|b| b.group == 0) {
            let resource = match (&b.kind, self.resources.get(&b.name)) {
                (BindingKind::UniformBuffer { .. }, _) => match self.uniforms.iter().find(|u| u.name == b.name) {
                    Some(u) => u.buffer.as_entire_binding(),
                    None => return Err(Error::Gpu(format!("{}: no buffer for '{}'", self.program.label(), b.name))),
                },
                (BindingKind::Texture { .. }, Some(Resource::Texture(view))) => wgpu::BindingResource::TextureView(view),
                (BindingKind::Sampler, Some(Resource::Sampler(sampler))) => wgpu::BindingResource::Sampler(sampler),
                _ => {
                    return Err(Error::Gpu(format!("{}: resource '{}' is not bound", self.program.label(), b.name)));
                }
            };
            entries.push(wgpu::BindGroupEntry { binding: b.binding, resource });
        }

        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.program.label()),
            layout: &self.layout,
            entries: &entries,
        }));
        Ok(())
    }

    /// Bind the pipeline and resources on `rpass`. Call after [`prepare`](Self::prepare).
    pub fn bind(&self, rpass: &mut wgpu::RenderPass<'_>, variant: usize) -> Result<()> {
        let group = self
            .bind_group
            .as_ref()
            .ok_or_else(|| Error::Gpu(format!("{}: bind group not prepared", self.program.label())))?;
        rpass.set_pipeline(self.pipeline(variant));
        rpass.set_bind_group(0, group, &[]);
        Ok(())
    }

    /// Draw a single triangle covering the viewport.
    pub fn draw_fullscreen(&self, rpass: &mut wgpu::RenderPass<'_>, variant: usize) -> Result<()> {
        self.bind(rpass, variant)?;
        rpass.draw(0..3, 0..1);
        Ok(())
    }
}
