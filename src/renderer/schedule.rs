//! Frame scheduling state machine.
//!
//! [`FrameScheduler`] decides what every `draw` call renders and emits it as
//! a [`FramePlan`], a list of GPU steps referencing physical buffer indices.
//! The GPU side executes plans without keeping any state of its own, so the
//! camera-change resets, tile progression and buffer ownership rules are all
//! decided (and tested) here.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::framebuffer::DoubleBuffer;
use super::render_size::RenderSize;
use super::tiles::{Tile, TileRender};
use super::timer::FrameTime;
use crate::scene::{Camera, CameraSnapshot};

/// Samples after which temporal reprojection is switched off.
pub const MAX_REPROJECTED_SAMPLES: u32 = 20;
/// Samples drawn with plain random noise before switching to stratified noise.
pub const NUM_UNIFORM_SAMPLES: u32 = 4;
/// Strata per dimension once stratified sampling starts.
pub const STRATA_COUNT: u32 = 6;
/// Preview frames rendered before their timing is trusted.
pub const PREVIEW_FRAMES_BEFORE_BENCHMARK: u32 = 2;

/// Physical texture read by a reprojection or tone map step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightRef {
    Hdr(usize),
    Reproject(usize),
}

/// How the ray trace sampler advances before a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataUpdate {
    /// Switch to `n` strata per dimension (restarting the current sampler if unchanged)
    Count(u32),
    Next,
}

/// One GPU operation of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Current camera to the G-buffer and ray trace passes, `previous` to reprojection.
    /// `None` before any camera was drawn.
    SetCameras { previous: Option<CameraSnapshot> },
    SetPreviousCamera(CameraSnapshot),
    Seed { width: u32, height: u32, jitter: [f32; 2], strata: StrataUpdate },
    ClearHdr { hdr: usize },
    RenderGBuffer { gbuffer: usize },
    RayTrace { hdr: usize, gbuffer: usize, viewport: (u32, u32), scissor: Option<Tile>, additive: bool },
    Reproject {
        target: usize,
        blend: f32,
        light: LightRef,
        light_scale: [f32; 2],
        previous_light: LightRef,
        previous_light_scale: [f32; 2],
        gbuffer: usize,
        previous_gbuffer: usize,
        viewport: (u32, u32),
    },
    ToneMap { light: LightRef, light_scale: [f32; 2], gbuffer: usize },
    /// A full sample finished; fired when the next one starts
    SampleRendered { samples: u32, elapsed: Option<f64> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePlan {
    pub steps: Vec<Step>,
}

impl FramePlan {
    fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    FirstFrame,
    /// Camera just changed
    Preview,
    Accumulating,
}

#[derive(Debug)]
pub struct FrameScheduler {
    width: u32,
    height: u32,
    tiles: TileRender,
    preview: RenderSize,
    sample_count: u32,
    first_frame: bool,
    previews_rendered: u32,
    last_camera: Option<CameraSnapshot>,
    frame: FrameTime,
    sample_time: Option<f64>,
    hdr: DoubleBuffer,
    reproject: DoubleBuffer,
    gbuffer: DoubleBuffer,
    last_tone_mapped: LightRef,
    last_tone_mapped_scale: [f32; 2],
    state: RenderState,
    rng: StdRng,
}

const FULL_SCALE: [f32; 2] = [1.0, 1.0];

impl FrameScheduler {
    pub fn new(max_texture_dimension: u32) -> Self {
        Self::with_rng(max_texture_dimension, StdRng::from_entropy())
    }

    pub fn with_rng(max_texture_dimension: u32, rng: StdRng) -> Self {
        Self {
            width: 0,
            height: 0,
            tiles: TileRender::new(max_texture_dimension),
            preview: RenderSize::new(max_texture_dimension),
            sample_count: 0,
            first_frame: true,
            previews_rendered: 0,
            last_camera: None,
            frame: FrameTime::default(),
            sample_time: None,
            hdr: DoubleBuffer::default(),
            reproject: DoubleBuffer::default(),
            gbuffer: DoubleBuffer::default(),
            last_tone_mapped: LightRef::Hdr(0),
            last_tone_mapped_scale: FULL_SCALE,
            state: RenderState::FirstFrame,
            rng,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn total_samples_rendered(&self) -> u32 {
        self.sample_count
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn preview_size(&self) -> &RenderSize {
        &self.preview
    }

    pub fn tiles(&self) -> &TileRender {
        &self.tiles
    }

    /// Resize; buffers are recreated by the caller, so history is dropped.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.tiles.set_size(width, height);
        self.preview.set_size(width, height);
        self.hdr.reset();
        self.reproject.reset();
        self.gbuffer.reset();
        self.last_tone_mapped = LightRef::Hdr(self.hdr.front());
        self.last_tone_mapped_scale = FULL_SCALE;
        self.last_camera = None;
        self.sample_count = 0;
        self.first_frame = true;
    }

    /// Clock reading for the frame about to be drawn.
    pub fn time(&mut self, frame: FrameTime) {
        self.frame = frame;
    }

    /// Progressive draw: one tile while the camera is still, a preview otherwise.
    pub fn draw(&mut self, camera: &Camera) -> FramePlan {
        let mut plan = FramePlan::default();
        if !self.is_ready() {
            return plan;
        }

        let snapshot = camera.snapshot();
        if self.is_last_camera(&snapshot) {
            self.draw_tile(&mut plan);
            self.previews_rendered = 0;
            self.state = RenderState::Accumulating;
            return plan;
        }

        self.set_cameras(&mut plan, snapshot);
        if self.first_frame {
            self.first_frame = false;
            self.state = RenderState::FirstFrame;
        } else {
            self.draw_preview(&mut plan);
            self.previews_rendered += 1;
            self.state = RenderState::Preview;
        }

        self.tiles.reset();
        self.sample_count = 0;
        trace!(steps = plan.steps.len(), state = ?self.state, "camera changed");
        plan
    }

    /// Full-resolution sample and reprojection every call.
    pub fn draw_full(&mut self, camera: &Camera) -> FramePlan {
        let mut plan = FramePlan::default();
        if !self.is_ready() {
            return plan;
        }

        self.gbuffer.swap();
        let reproject_target = self.claim_reproject_target();

        let snapshot = camera.snapshot();
        if self.is_last_camera(&snapshot) {
            self.sample_count += 1;
        } else {
            self.sample_count = 0;
            plan.push(Step::ClearHdr { hdr: self.hdr.front() });
        }

        self.set_cameras(&mut plan, snapshot);
        self.update_seed(&mut plan, self.width, self.height, true);
        plan.push(Step::RenderGBuffer { gbuffer: self.gbuffer.front() });
        plan.push(Step::RayTrace {
            hdr: self.hdr.front(),
            gbuffer: self.gbuffer.front(),
            viewport: (self.width, self.height),
            scissor: None,
            additive: true,
        });
        plan.push(Step::Reproject {
            target: reproject_target,
            blend: 1.0,
            light: LightRef::Hdr(self.hdr.front()),
            light_scale: FULL_SCALE,
            previous_light: self.last_tone_mapped,
            previous_light_scale: self.last_tone_mapped_scale,
            gbuffer: self.gbuffer.front(),
            previous_gbuffer: self.gbuffer.back(),
            viewport: (self.width, self.height),
        });
        self.tone_map(&mut plan, LightRef::Reproject(reproject_target), FULL_SCALE);
        self.state = RenderState::Accumulating;
        plan
    }

    fn swap_buffers(&mut self) {
        self.reproject.swap();
        self.gbuffer.swap();
        self.hdr.swap();
    }

    /// Front reprojection buffer, swapped first if it holds the image last
    /// shown, which the next reprojection reads as history.
    fn claim_reproject_target(&mut self) -> usize {
        if self.last_tone_mapped == LightRef::Reproject(self.reproject.front()) {
            self.reproject.swap();
        }
        self.reproject.front()
    }

    fn is_last_camera(&self, camera: &CameraSnapshot) -> bool {
        self.last_camera.is_some_and(|last| camera.matches(&last))
    }

    fn set_cameras(&mut self, plan: &mut FramePlan, camera: CameraSnapshot) {
        plan.push(Step::SetCameras { previous: self.last_camera });
        self.last_camera = Some(camera);
    }

    fn update_seed(&mut self, plan: &mut FramePlan, width: u32, height: u32, use_jitter: bool) {
        let jitter = if use_jitter {
            [
                (self.rng.gen::<f32>() - 0.5) / width.max(1) as f32,
                (self.rng.gen::<f32>() - 0.5) / height.max(1) as f32,
            ]
        } else {
            [0.0, 0.0]
        };
        let strata = match self.sample_count {
            0 => StrataUpdate::Count(1),
            NUM_UNIFORM_SAMPLES => StrataUpdate::Count(STRATA_COUNT),
            _ => StrataUpdate::Next,
        };
        plan.push(Step::Seed { width, height, jitter, strata });
    }

    fn tone_map(&mut self, plan: &mut FramePlan, light: LightRef, light_scale: [f32; 2]) {
        plan.push(Step::ToneMap { light, light_scale, gbuffer: self.gbuffer.front() });
        self.last_tone_mapped = light;
        self.last_tone_mapped_scale = light_scale;
    }

    fn draw_preview(&mut self, plan: &mut FramePlan) {
        if self.sample_count > 0 {
            self.swap_buffers();
        }
        if self.previews_rendered >= PREVIEW_FRAMES_BEFORE_BENCHMARK {
            self.preview.adjust(self.frame.elapsed);
        }

        let (pw, ph) = (self.preview.width(), self.preview.height());
        let scale = self.preview.scale();
        let reproject_target = self.claim_reproject_target();
        self.update_seed(plan, pw, ph, false);
        plan.push(Step::RenderGBuffer { gbuffer: self.gbuffer.front() });
        plan.push(Step::RayTrace {
            hdr: self.hdr.front(),
            gbuffer: self.gbuffer.front(),
            viewport: (pw, ph),
            scissor: None,
            additive: false,
        });
        plan.push(Step::Reproject {
            target: reproject_target,
            blend: 1.0,
            light: LightRef::Hdr(self.hdr.front()),
            light_scale: scale,
            previous_light: self.last_tone_mapped,
            previous_light_scale: self.last_tone_mapped_scale,
            gbuffer: self.gbuffer.front(),
            previous_gbuffer: self.gbuffer.back(),
            viewport: (pw, ph),
        });
        self.tone_map(plan, LightRef::Reproject(reproject_target), scale);
        self.swap_buffers();
    }

    fn draw_tile(&mut self, plan: &mut FramePlan) {
        let tile = self.tiles.next_tile(self.frame.elapsed);
        let (w, h) = (self.width, self.height);

        if tile.is_first {
            if self.sample_count == 0 {
                // The previous image was a preview
                plan.push(Step::ClearHdr { hdr: self.hdr.front() });
                if let Some(previous) = self.last_camera {
                    plan.push(Step::SetPreviousCamera(previous));
                }
            } else {
                let elapsed = match (self.frame.time, self.sample_time) {
                    (Some(now), Some(then)) => Some(now - then),
                    _ => None,
                };
                plan.push(Step::SampleRendered { samples: self.sample_count, elapsed });
                self.sample_time = self.frame.time;
            }
            self.update_seed(plan, w, h, true);
            plan.push(Step::RenderGBuffer { gbuffer: self.gbuffer.front() });
        }

        plan.push(Step::RayTrace {
            hdr: self.hdr.front(),
            gbuffer: self.gbuffer.front(),
            viewport: (w, h),
            scissor: Some(tile),
            additive: true,
        });

        if tile.is_last {
            self.sample_count += 1;
            let blend = (1.0 - self.sample_count as f32 / MAX_REPROJECTED_SAMPLES as f32).clamp(0.0, 1.0).powi(2);
            if blend > 0.0 {
                plan.push(Step::Reproject {
                    target: self.reproject.front(),
                    blend,
                    light: LightRef::Hdr(self.hdr.front()),
                    light_scale: FULL_SCALE,
                    previous_light: LightRef::Reproject(self.reproject.back()),
                    previous_light_scale: self.preview.scale(),
                    gbuffer: self.gbuffer.front(),
                    previous_gbuffer: self.gbuffer.back(),
                    viewport: (w, h),
                });
                self.tone_map(plan, LightRef::Reproject(self.reproject.front()), FULL_SCALE);
            } else {
                self.tone_map(plan, LightRef::Hdr(self.hdr.front()), FULL_SCALE);
            }
            trace!(samples = self.sample_count, blend, "sample complete");
        }
    }
}
