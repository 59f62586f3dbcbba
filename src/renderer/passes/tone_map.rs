//! HDR light to display colour.
//!
//! Two programs share the shader: a nearest lookup for full-resolution light
//! and an edge-preserving bilinear upscale for reduced-resolution light.
//! Pipelines are built for the output texture's format and rebuilt when it
//! changes.

use super::{COMMON, FULLSCREEN, TONE_MAP};
use crate::config::ToneMapping;
use crate::gpu::{BindingHints, Defines, PassProgram, PipelineVariant, ShaderProgram};
use crate::util::Result;

const UNFILTERABLE: &[&str] = &["light_tex", "position_tex"];

pub fn tone_map_program(defines: &Defines) -> Result<ShaderProgram> {
    ShaderProgram::compile("tone_map", &[COMMON, FULLSCREEN, TONE_MAP], defines, "vs_fullscreen", "fs_main")
}

#[derive(Debug)]
pub struct ToneMapPass {
    native: PassProgram,
    upscale: PassProgram,
    format: wgpu::TextureFormat,
    tone_mapping: ToneMapping,
    exposure: f32,
    white_point: f32,
}

impl ToneMapPass {
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        tone_mapping: ToneMapping,
        exposure: f32,
        white_point: f32,
    ) -> Result<Self> {
        let (native, upscale) = Self::build(device, format, tone_mapping)?;
        Ok(Self { native, upscale, format, tone_mapping, exposure, white_point })
    }

    fn build(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        tone_mapping: ToneMapping,
    ) -> Result<(PassProgram, PassProgram)> {
        let defines = Defines::new().with("TONE_MAPPING", tone_mapping.shader_id());
        let hints = BindingHints { unfilterable: UNFILTERABLE, non_filtering: &[] };
        let variant = [PipelineVariant::fullscreen(format, None)];

        let native = PassProgram::new(device, tone_map_program(&defines)?, hints, &variant);
        let upscale_defines = defines.with("EDGE_PRESERVING_UPSCALE", true);
        let upscale = PassProgram::new(device, tone_map_program(&upscale_defines)?, hints, &variant);
        Ok((native, upscale))
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Rebuild the pipelines when the output format changes.
    pub fn ensure_format(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<()> {
        if format == self.format {
            return Ok(());
        }
        tracing::debug!(?format, "rebuilding tone map pipelines");
        let (native, upscale) = Self::build(device, format, self.tone_mapping)?;
        self.native = native;
        self.upscale = upscale;
        self.format = format;
        Ok(())
    }

    pub fn set_exposure(&mut self, exposure: f32, white_point: f32) {
        self.exposure = exposure;
        self.white_point = white_point;
    }

    /// Compose `light` onto `target`.
    ///
    /// `light_scale` is the fraction of `light` holding valid samples; the
    /// upscaling program is used whenever it is not one.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        light: &wgpu::TextureView,
        light_scale: [f32; 2],
        position: &wgpu::TextureView,
    ) -> Result<()> {
        let upscale = light_scale != [1.0, 1.0];
        let pass = if upscale { &mut self.upscale } else { &mut self.native };

        pass.set_uniform("light_scale", light_scale.as_slice());
        pass.set_uniform("exposure", self.exposure);
        pass.set_uniform("white_point", self.white_point);
        pass.set_texture("light_tex", light);
        pass.set_texture("position_tex", position);
        pass.prepare(device, queue)?;

        let mut rpass = super::begin_color_pass(encoder, "tone_map", target, wgpu::LoadOp::Clear(wgpu::Color::BLACK));
        pass.draw_fullscreen(&mut rpass, 0)
    }
}
