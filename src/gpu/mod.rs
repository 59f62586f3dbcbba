//! Thin layer over wgpu and naga used by the render passes.

pub mod capabilities;
pub mod pass;
pub mod shader;
pub mod texture;
pub mod uniforms;

pub use capabilities::{is_supported, GpuCapabilities, GpuContext};
pub use pass::{PassProgram, PipelineVariant, ADDITIVE};
pub use shader::{preprocess, BindingHints, BindingInfo, BindingKind, DefineValue, Defines, ShaderProgram};
pub use texture::{
    create_data_texture, create_depth_target, create_env_texture, create_float_texture, create_render_target,
    create_texture_array, read_rgba8, GpuTexture,
};
pub use uniforms::{UniformBlock, UniformChannel, UniformKind, UniformLayout, UniformMember, UniformValue};
