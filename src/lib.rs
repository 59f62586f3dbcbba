//! # rt-renderer
//!
//! Progressive GPU path tracer on wgpu.
//!
//! A retained scene is merged into one vertex buffer, covered by a BVH and
//! path traced in a fragment shader. While the camera is still, samples
//! accumulate tile by tile; when it moves, a reduced-resolution preview is
//! rendered and temporally reprojected so the image stays responsive.
//!
//! ## Modules
//!
//! - [`scene`] - Plain-data scene tree, camera and lights
//! - [`pathtracer`] - CPU builds: geometry merge, BVH, materials, environment, sampling
//! - [`gpu`] - Shader compilation, uniform packing, textures and passes over wgpu
//! - [`renderer`] - Frame scheduling, render passes and the host-facing renderer
//! - [`config`] - Renderer options
//! - [`util`] - Errors and numeric helpers
//!
//! ## Example
//!
//! ```ignore
//! use rt_renderer::prelude::*;
//!
//! let ctx = pollster::block_on(GpuContext::headless())?;
//! let mut renderer = RayTracingRenderer::new(
//!     &ctx.device,
//!     &ctx.queue,
//!     ctx.capabilities.required_features(),
//!     RendererOptions::default(),
//! )?;
//! renderer.set_size(640, 480);
//! renderer.render(&scene, &camera, &target)?;
//! ```

pub mod config;
pub mod gpu;
pub mod pathtracer;
pub mod renderer;
pub mod scene;
pub mod util;

pub use util::{Error, Result};

/// Types most applications need.
pub mod prelude {
    pub use crate::config::{RendererOptions, ToneMapping};
    pub use crate::gpu::{GpuCapabilities, GpuContext};
    pub use crate::renderer::{RayTracingRenderer, SampleRendered};
    pub use crate::scene::{
        AmbientLight, Background, Camera, DirectionalLight, EnvEncoding, EnvironmentLight, EnvironmentMap, Geometry,
        Material, MeshMaterial, NodeKind, Scene, SceneNode, TextureImage,
    };
    pub use crate::util::{Error, Result};
}
