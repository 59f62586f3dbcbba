//! Temporal reprojection: blends the accumulated light of the previous frame
//! into the current one wherever the surface under a pixel persists.

use glam::Mat4;

use super::{COMMON, FULLSCREEN, HDR_FORMAT, REPROJECT};
use crate::gpu::{BindingHints, Defines, PassProgram, PipelineVariant, ShaderProgram};
use crate::renderer::schedule::MAX_REPROJECTED_SAMPLES;
use crate::util::Result;

const UNFILTERABLE: &[&str] = &["light_tex", "position_tex", "previous_light_tex", "previous_position_tex"];

pub fn reproject_program(defines: &Defines) -> Result<ShaderProgram> {
    let mut defines = defines.clone();
    // History weight, in samples, of a full blend
    defines.set("MAX_SAMPLES", MAX_REPROJECTED_SAMPLES as f32);
    ShaderProgram::compile("reproject", &[COMMON, FULLSCREEN, REPROJECT], &defines, "vs_fullscreen", "fs_main")
}

/// Textures and scales read by one reprojection.
#[derive(Debug, Clone, Copy)]
pub struct ReprojectInputs<'a> {
    pub light: &'a wgpu::TextureView,
    pub light_scale: [f32; 2],
    pub position: &'a wgpu::TextureView,
    pub previous_light: &'a wgpu::TextureView,
    pub previous_light_scale: [f32; 2],
    pub previous_position: &'a wgpu::TextureView,
    pub blend: f32,
}

#[derive(Debug)]
pub struct ReprojectPass {
    pass: PassProgram,
}

impl ReprojectPass {
    pub fn new(device: &wgpu::Device) -> Result<Self> {
        let program = reproject_program(&Defines::new())?;
        let hints = BindingHints { unfilterable: UNFILTERABLE, non_filtering: &[] };
        let pass = PassProgram::new(device, program, hints, &[PipelineVariant::fullscreen(HDR_FORMAT, None)]);
        Ok(Self { pass })
    }

    /// View projection the history was rendered with.
    pub fn set_previous_camera(&mut self, view_projection: Mat4) {
        self.pass.set_uniform("history_camera", view_projection);
    }

    pub fn set_jitter(&mut self, jitter: [f32; 2]) {
        self.pass.set_uniform("jitter", jitter.as_slice());
    }

    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        viewport: (u32, u32),
        inputs: ReprojectInputs<'_>,
    ) -> Result<()> {
        self.pass.set_uniform("light_scale", inputs.light_scale.as_slice());
        self.pass.set_uniform("previous_light_scale", inputs.previous_light_scale.as_slice());
        self.pass.set_uniform("blend_amount", inputs.blend);
        self.pass.set_texture("light_tex", inputs.light);
        self.pass.set_texture("position_tex", inputs.position);
        self.pass.set_texture("previous_light_tex", inputs.previous_light);
        self.pass.set_texture("previous_position_tex", inputs.previous_position);
        self.pass.prepare(device, queue)?;

        let mut rpass =
            super::begin_color_pass(encoder, "reproject", target, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
        super::set_viewport(&mut rpass, viewport);
        self.pass.draw_fullscreen(&mut rpass, 0)
    }
}
