//! Adapter feature probing and headless device creation.

use tracing::{info, warn};

use crate::util::{Error, Result};

/// Features the path tracer relies on.
///
/// Accumulation targets are `Rgba32Float` with additive blending, so
/// `FLOAT32_BLENDABLE` is mandatory. Linear filtering of float textures is
/// optional; without it environment lookups use nearest filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub float_blend: bool,
    pub float_linear: bool,
    pub max_texture_dimension: u32,
}

impl GpuCapabilities {
    pub fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        Self::from_parts(adapter.features(), &adapter.limits())
    }

    pub fn from_device(device: &wgpu::Device) -> Self {
        Self::from_parts(device.features(), &device.limits())
    }

    fn from_parts(features: wgpu::Features, limits: &wgpu::Limits) -> Self {
        Self {
            float_blend: features.contains(wgpu::Features::FLOAT32_BLENDABLE),
            float_linear: features.contains(wgpu::Features::FLOAT32_FILTERABLE),
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.float_blend
    }

    /// Features to request: the mandatory ones plus optional ones the adapter has.
    pub fn required_features(&self) -> wgpu::Features {
        let mut f = wgpu::Features::FLOAT32_BLENDABLE;
        if self.float_linear {
            f |= wgpu::Features::FLOAT32_FILTERABLE;
        }
        f
    }
}

/// Whether an adapter can run the renderer at all.
pub fn is_supported(adapter: &wgpu::Adapter) -> bool {
    GpuCapabilities::from_adapter(adapter).is_supported()
}

/// Device and queue owned by a headless renderer.
#[derive(Debug)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub capabilities: GpuCapabilities,
    pub adapter_name: String,
}

impl GpuContext {
    /// Open a device on an existing adapter with the features the renderer needs.
    pub async fn from_adapter(adapter: &wgpu::Adapter) -> Result<Self> {
        let capabilities = GpuCapabilities::from_adapter(adapter);
        if !capabilities.is_supported() {
            return Err(Error::Unsupported("adapter lacks FLOAT32_BLENDABLE".into()));
        }
        if !capabilities.float_linear {
            warn!("FLOAT32_FILTERABLE unavailable, environment lookups use nearest filtering");
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("rt-renderer device"),
                required_features: capabilities.required_features(),
                required_limits: wgpu::Limits {
                    max_texture_dimension_2d: capabilities.max_texture_dimension,
                    ..wgpu::Limits::default()
                },
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Gpu(e.to_string()))?;

        let adapter_name = adapter.get_info().name;
        info!(adapter = %adapter_name, max_texture = capabilities.max_texture_dimension, "device ready");
        Ok(Self { device, queue, capabilities, adapter_name })
    }

    /// Pick a high-performance adapter without a surface.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| Error::Unsupported(format!("no adapter: {e}")))?;
        Self::from_adapter(&adapter).await
    }
}
