//! Host-facing renderer and the frame algorithm behind it.
//!
//! [`RayTracingRenderer`] is what an application talks to: it rebuilds the
//! [`RenderingPipeline`] whenever the scene is flagged as changed, feeds it
//! the host clock and reports finished samples through a callback.

mod framebuffer;
pub mod passes;
mod pipeline;
pub mod render_size;
pub mod schedule;
pub mod tiles;
pub mod timer;

pub use framebuffer::DoubleBuffer;
pub use pipeline::{RenderingPipeline, SampleRendered};
pub use render_size::RenderSize;
pub use schedule::{FramePlan, FrameScheduler, LightRef, RenderState, Step, StrataUpdate};
pub use tiles::{Tile, TileRender};
pub use timer::{FrameTime, FrameTimer};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RendererOptions;
use crate::gpu::GpuCapabilities;
use crate::scene::{decompose_scene, Camera, Scene};
use crate::util::{Error, Result};

type SampleCallback = Box<dyn FnMut(u32, Option<f64>) + Send>;

pub struct RayTracingRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: GpuCapabilities,
    options: RendererOptions,
    pipeline: Option<RenderingPipeline>,
    timer: FrameTimer,
    size: (u32, u32),
    has_focus: bool,
    needs_update: bool,
    on_sample_rendered: Mutex<Option<SampleCallback>>,
}

impl std::fmt::Debug for RayTracingRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayTracingRenderer")
            .field("capabilities", &self.capabilities)
            .field("options", &self.options)
            .field("size", &self.size)
            .field("has_focus", &self.has_focus)
            .field("needs_update", &self.needs_update)
            .finish_non_exhaustive()
    }
}

impl RayTracingRenderer {
    /// Whether `adapter` has the capabilities the renderer requires.
    pub fn is_supported(adapter: &wgpu::Adapter) -> bool {
        crate::gpu::is_supported(adapter)
    }

    /// Create a renderer on a device opened with `features` enabled.
    ///
    /// Fails with [`Error::Unsupported`] when float blending is missing.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        features: wgpu::Features,
        options: RendererOptions,
    ) -> Result<Self> {
        let capabilities = GpuCapabilities {
            float_blend: features.contains(wgpu::Features::FLOAT32_BLENDABLE),
            float_linear: features.contains(wgpu::Features::FLOAT32_FILTERABLE),
            max_texture_dimension: device.limits().max_texture_dimension_2d,
        };
        if !capabilities.is_supported() {
            return Err(Error::Unsupported("device was opened without FLOAT32_BLENDABLE".into()));
        }
        debug!(?capabilities, "renderer created");

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            capabilities,
            options,
            pipeline: None,
            timer: FrameTimer::new(),
            size: (0, 0),
            has_focus: true,
            needs_update: true,
            on_sample_rendered: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    /// Replace the options.
    ///
    /// Bounce count and tone curve are compiled into shaders, so changing
    /// them rebuilds the pipeline on the next render.
    pub fn set_options(&mut self, options: RendererOptions) {
        if options.clamped_bounces() != self.options.clamped_bounces() || options.tone_mapping != self.options.tone_mapping
        {
            self.needs_update = true;
        }
        if let Some(pipeline) = &mut self.pipeline {
            pipeline.set_exposure(options.tone_mapping_exposure, options.tone_mapping_white_point);
            pipeline.set_max_hardware_usage(options.max_hardware_usage);
        }
        self.options = options;
    }

    /// Flag the scene as changed; it is rebuilt on the next render.
    pub fn set_needs_update(&mut self) {
        self.needs_update = true;
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        if let Some(pipeline) = &mut self.pipeline {
            pipeline.set_size(width, height);
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Host timestamp in milliseconds of the frame about to be rendered.
    pub fn sync(&mut self, time_ms: f64) {
        self.timer.sync(time_ms);
    }

    /// Drop the last timestamp, for example after the host was paused.
    pub fn restart_timer(&mut self) {
        self.timer.restart();
    }

    pub fn set_has_focus(&mut self, focus: bool) {
        if focus && !self.has_focus {
            self.timer.restart();
        }
        self.has_focus = focus;
    }

    pub fn total_samples_rendered(&self) -> u32 {
        self.pipeline.as_ref().map_or(0, RenderingPipeline::total_samples_rendered)
    }

    /// Called with the sample count and the milliseconds it took whenever a
    /// full sample completes.
    pub fn on_sample_rendered(&self, callback: impl FnMut(u32, Option<f64>) + Send + 'static) {
        *self.on_sample_rendered.lock() = Some(Box::new(callback));
    }

    /// Render one frame of `scene` seen from `camera` into `target`.
    ///
    /// `target` must be a render attachment; its format selects the tone map
    /// pipeline and its size the frame size when none was set.
    pub fn render(&mut self, scene: &Scene, camera: &Camera, target: &wgpu::Texture) -> Result<()> {
        if !self.options.render_when_off_focus && !self.has_focus {
            return Ok(());
        }

        let target_size = (target.width(), target.height());
        if self.size == (0, 0) {
            self.size = target_size;
        }

        if self.needs_update || self.pipeline.is_none() {
            self.rebuild(scene, target.format())?;
        }
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(());
        };
        pipeline.ensure_output_format(target.format())?;

        pipeline.time(self.timer.tick());
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let events = pipeline.draw(camera, &view)?;

        if !events.is_empty() {
            let mut callback = self.on_sample_rendered.lock();
            if let Some(cb) = callback.as_mut() {
                for e in &events {
                    cb(e.samples, e.elapsed);
                }
            }
        }
        Ok(())
    }

    fn rebuild(&mut self, scene: &Scene, format: wgpu::TextureFormat) -> Result<()> {
        let description = decompose_scene(scene);
        info!(
            meshes = description.meshes.len(),
            directional = description.directional_lights.len(),
            ambient = description.ambient_lights.len(),
            environment = description.environment_light.is_some(),
            "building scene"
        );
        // A failed build leaves no pipeline behind
        self.pipeline = None;
        let mut pipeline = RenderingPipeline::new(
            &self.device,
            &self.queue,
            &description,
            &self.options,
            self.capabilities,
            format,
        )?;
        pipeline.set_size(self.size.0, self.size.1);
        self.pipeline = Some(pipeline);
        self.needs_update = false;
        self.timer.restart();
        Ok(())
    }

    /// Release every GPU resource. The next render rebuilds from the scene.
    pub fn dispose(&mut self) {
        self.pipeline = None;
        self.needs_update = true;
        *self.on_sample_rendered.lock() = None;
    }
}
