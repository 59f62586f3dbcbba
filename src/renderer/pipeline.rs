//! GPU side of the frame algorithm.
//!
//! [`RenderingPipeline`] owns every pass and frame target for one scene and
//! executes the [`FramePlan`]s produced by the [`FrameScheduler`]. Each step
//! is encoded and submitted on its own so uniform uploads land in the order
//! the steps read them.

use glam::Mat4;
use tracing::{debug, trace};

use super::passes::{
    begin_color_pass, GBufferPass, GBufferTargets, GBufferViews, MaterialResources, RayTracePass, RayTraceScene,
    ReprojectInputs, ReprojectPass, ToneMapPass, GBUFFER_FORMATS, HDR_FORMAT,
};
use super::schedule::{FramePlan, FrameScheduler, LightRef, Step, StrataUpdate};
use super::timer::FrameTime;
use crate::config::RendererOptions;
use crate::gpu::{create_depth_target, create_render_target, GpuCapabilities, GpuTexture};
use crate::pathtracer::{
    background_image, bake_environment, build_bvh, env_distribution, flatten_bvh, merge_meshes, pack_materials,
};
use crate::scene::{Camera, CameraSnapshot, SceneDescription};
use crate::util::{Error, Result};

/// A sample finished accumulating over the whole frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRendered {
    pub samples: u32,
    /// Milliseconds since the previous sample, when the host clock is synced
    pub elapsed: Option<f64>,
}

/// Frame-sized textures. Pairs are indexed by the scheduler's buffer indices.
#[derive(Debug)]
struct FrameTargets {
    size: (u32, u32),
    hdr: [GpuTexture; 2],
    reproject: [GpuTexture; 2],
    position: [GpuTexture; 2],
    normal: GpuTexture,
    face_normal: GpuTexture,
    color: GpuTexture,
    depth: GpuTexture,
}

impl FrameTargets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let target = |label: &str, format| create_render_target(device, label, format, width, height);
        let [position, normal, face_normal, color] = GBUFFER_FORMATS;
        Self {
            size: (width, height),
            hdr: [target("hdr_0", HDR_FORMAT), target("hdr_1", HDR_FORMAT)],
            reproject: [target("reproject_0", HDR_FORMAT), target("reproject_1", HDR_FORMAT)],
            position: [target("gbuffer_position_0", position), target("gbuffer_position_1", position)],
            normal: target("gbuffer_normal", normal),
            face_normal: target("gbuffer_face_normal", face_normal),
            color: target("gbuffer_color", color),
            depth: create_depth_target(device, "gbuffer_depth", width, height),
        }
    }

    fn light(&self, light: LightRef) -> &wgpu::TextureView {
        match light {
            LightRef::Hdr(i) => &self.hdr[i].view,
            LightRef::Reproject(i) => &self.reproject[i].view,
        }
    }

    fn gbuffer_views(&self, index: usize) -> GBufferViews<'_> {
        GBufferViews {
            position: &self.position[index].view,
            normal: &self.normal.view,
            face_normal: &self.face_normal.view,
            color: &self.color.view,
        }
    }
}

#[derive(Debug)]
pub struct RenderingPipeline {
    device: wgpu::Device,
    queue: wgpu::Queue,
    scheduler: FrameScheduler,
    gbuffer: GBufferPass,
    ray_trace: RayTracePass,
    reproject: ReprojectPass,
    tone_map: ToneMapPass,
    _materials: MaterialResources,
    targets: Option<FrameTargets>,
    /// Near and far planes of the latest camera, reused for the history projection
    clip: (f32, f32),
    max_hardware_usage: bool,
}

impl RenderingPipeline {
    /// Build every CPU structure and GPU resource for `scene`.
    ///
    /// Tone mapping starts out targeting `output_format`; see
    /// [`ensure_output_format`](Self::ensure_output_format).
    #[tracing::instrument(skip_all, fields(meshes = scene.meshes.len()))]
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &SceneDescription,
        options: &RendererOptions,
        capabilities: GpuCapabilities,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let geometry = merge_meshes(&scene.meshes);
        let prims = geometry.primitives();
        let bvh = build_bvh(&prims);
        let flat = flatten_bvh(&bvh, &prims);

        let materials = MaterialResources::new(device, queue, pack_materials(&geometry.materials));

        let env = bake_environment(&scene.directional_lights, &scene.ambient_lights, scene.environment_light.as_ref());
        let distribution = env_distribution(&env);
        let background = match &scene.background {
            Some(b) => background_image(b),
            None => env.clone(),
        };

        debug!(
            vertices = geometry.vertex_count(),
            triangles = geometry.triangle_count(),
            bvh_texels = flat.count(),
            bvh_depth = flat.max_depth,
            materials = geometry.materials.len(),
            env = ?(env.width, env.height),
            "scene built"
        );

        let gbuffer = GBufferPass::new(device, &geometry, &materials)?;
        let ray_trace = RayTracePass::new(
            device,
            queue,
            RayTraceScene {
                geometry: &geometry,
                bvh: &flat,
                env: &env,
                distribution: &distribution,
                background: &background,
                materials: &materials,
                bounces: options.clamped_bounces(),
                linear_env: capabilities.float_linear,
            },
        )?;
        let reproject = ReprojectPass::new(device)?;
        let tone_map = ToneMapPass::new(
            device,
            output_format,
            options.tone_mapping,
            options.tone_mapping_exposure,
            options.tone_mapping_white_point,
        )?;

        Ok(Self {
            device: device.clone(),
            queue: queue.clone(),
            scheduler: FrameScheduler::new(capabilities.max_texture_dimension),
            gbuffer,
            ray_trace,
            reproject,
            tone_map,
            _materials: materials,
            targets: None,
            clip: (Camera::default().near, Camera::default().far),
            max_hardware_usage: options.max_hardware_usage,
        })
    }

    /// Resize the frame targets. History is dropped.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.scheduler.set_size(width, height);
        self.targets = (width > 0 && height > 0).then(|| FrameTargets::new(&self.device, width, height));
    }

    pub fn size(&self) -> (u32, u32) {
        self.scheduler.size()
    }

    pub fn time(&mut self, frame: FrameTime) {
        self.scheduler.time(frame);
    }

    pub fn total_samples_rendered(&self) -> u32 {
        self.scheduler.total_samples_rendered()
    }

    pub fn set_max_hardware_usage(&mut self, enabled: bool) {
        self.max_hardware_usage = enabled;
    }

    pub fn set_exposure(&mut self, exposure: f32, white_point: f32) {
        self.tone_map.set_exposure(exposure, white_point);
    }

    /// Rebuild the tone map pipelines for another output format.
    pub fn ensure_output_format(&mut self, format: wgpu::TextureFormat) -> Result<()> {
        self.tone_map.ensure_format(&self.device, format)
    }

    /// Render one frame of `camera` into `output`.
    pub fn draw(&mut self, camera: &Camera, output: &wgpu::TextureView) -> Result<Vec<SampleRendered>> {
        let plan = if self.max_hardware_usage {
            self.scheduler.draw_full(camera)
        } else {
            self.scheduler.draw(camera)
        };
        self.execute(&plan, camera, output)
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn execute(&mut self, plan: &FramePlan, camera: &Camera, output: &wgpu::TextureView) -> Result<Vec<SampleRendered>> {
        let mut events = Vec::new();
        if plan.is_empty() {
            return Ok(events);
        }
        if self.targets.is_none() {
            return Err(Error::other("frame targets missing; set_size was not called"));
        }
        self.clip = (camera.near, camera.far);

        for step in &plan.steps {
            trace!(?step, "execute");
            match step {
                Step::SetCameras { previous } => {
                    self.gbuffer.set_camera(camera);
                    self.ray_trace.set_camera(camera);
                    let previous = previous.unwrap_or_else(|| camera.snapshot());
                    self.reproject.set_previous_camera(history_view_projection(&previous, self.clip));
                }
                Step::SetPreviousCamera(previous) => {
                    let history = history_view_projection(previous, self.clip);
                    self.reproject.set_previous_camera(history);
                }
                Step::Seed { width, height, jitter, strata } => {
                    self.ray_trace.set_size(*width, *height);
                    self.gbuffer.set_jitter(*jitter);
                    self.ray_trace.set_jitter(*jitter);
                    self.reproject.set_jitter(*jitter);
                    match strata {
                        StrataUpdate::Count(n) => self.ray_trace.set_strata_count(*n),
                        StrataUpdate::Next => self.ray_trace.next_seed(),
                    }
                }
                Step::SampleRendered { samples, elapsed } => {
                    events.push(SampleRendered { samples: *samples, elapsed: *elapsed });
                }
                _ => self.encode(step, output)?,
            }
        }
        Ok(events)
    }

    /// Encode and submit one drawing step.
    fn encode(&mut self, step: &Step, output: &wgpu::TextureView) -> Result<()> {
        let mut encoder = self.encoder("frame_step");
        let Some(targets) = self.targets.as_ref() else {
            return Ok(());
        };
        let (device, queue) = (&self.device, &self.queue);

        match *step {
            Step::ClearHdr { hdr } => {
                begin_color_pass(&mut encoder, "clear_hdr", &targets.hdr[hdr].view, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
            }
            Step::RenderGBuffer { gbuffer } => {
                let gbuffer_targets = GBufferTargets {
                    position: &targets.position[gbuffer].view,
                    normal: &targets.normal.view,
                    face_normal: &targets.face_normal.view,
                    color: &targets.color.view,
                    depth: &targets.depth.view,
                };
                self.gbuffer.draw(device, queue, &mut encoder, gbuffer_targets)?;
            }
            Step::RayTrace { hdr, gbuffer, viewport, scissor, additive } => {
                self.ray_trace.set_gbuffer(targets.gbuffer_views(gbuffer));
                self.ray_trace.draw(
                    device,
                    queue,
                    &mut encoder,
                    &targets.hdr[hdr].view,
                    targets.size,
                    viewport,
                    scissor,
                    additive,
                )?;
            }
            Step::Reproject {
                target,
                blend,
                light,
                light_scale,
                previous_light,
                previous_light_scale,
                gbuffer,
                previous_gbuffer,
                viewport,
            } => {
                let inputs = ReprojectInputs {
                    light: targets.light(light),
                    light_scale,
                    position: &targets.position[gbuffer].view,
                    previous_light: targets.light(previous_light),
                    previous_light_scale,
                    previous_position: &targets.position[previous_gbuffer].view,
                    blend,
                };
                self.reproject.draw(device, queue, &mut encoder, &targets.reproject[target].view, viewport, inputs)?;
            }
            Step::ToneMap { light, light_scale, gbuffer } => {
                self.tone_map.draw(
                    device,
                    queue,
                    &mut encoder,
                    output,
                    targets.light(light),
                    light_scale,
                    &targets.position[gbuffer].view,
                )?;
            }
            Step::SetCameras { .. }
            | Step::SetPreviousCamera(_)
            | Step::Seed { .. }
            | Step::SampleRendered { .. } => return Ok(()),
        }

        queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

/// View projection of a previous camera pose with the given clip planes.
fn history_view_projection(previous: &CameraSnapshot, (near, far): (f32, f32)) -> Mat4 {
    Mat4::perspective_rh(previous.fov.to_radians(), previous.aspect, near, far) * previous.world().inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_history_projection_maps_center() {
        // A point straight ahead of the previous camera lands at clip-space origin
        let camera = Camera::new(60.0, 1.5, 0.1, 100.0).look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let vp = history_view_projection(&camera.snapshot(), (camera.near, camera.far));
        let clip = vp * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.w > 0.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
        assert!(vp.abs_diff_eq(camera.view_projection(), 1e-4));
    }

    #[test]
    fn test_history_projection_tracks_previous_pose() {
        let before = Camera::new(50.0, 1.0, 0.1, 100.0).look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let after = before.look_at(Vec3::new(3.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let vp = history_view_projection(&before.snapshot(), (after.near, after.far));
        assert!(vp.abs_diff_eq(before.view_projection(), 1e-4));
        assert!(!vp.abs_diff_eq(after.view_projection(), 1e-3));
    }
}
