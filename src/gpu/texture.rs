//! Texture creation helpers: float/uint data textures, material map arrays,
//! the half-float environment texture and render targets.

use std::sync::Arc;
use wgpu::util::DeviceExt;

use crate::pathtracer::EnvImage;
use crate::scene::TextureImage;
use crate::util::{Error, Result, TextureDimensions};

/// Texture with its default view.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
}

impl GpuTexture {
    fn from_texture(texture: wgpu::Texture, dimension: Option<wgpu::TextureViewDimension>) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor { dimension, ..Default::default() });
        let format = texture.format();
        let size = (texture.width(), texture.height());
        Self { texture, view, format, size }
    }
}

fn texture_desc(label: &str, format: wgpu::TextureFormat, width: u32, height: u32, layers: u32, usage: wgpu::TextureUsages) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: layers },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    }
}

/// Upload `texels` into a row-packed texture sized by [`TextureDimensions`].
///
/// Trailing texels past `texels.len()` are zero filled.
pub fn create_data_texture<T: bytemuck::Pod + Default>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    format: wgpu::TextureFormat,
    texels: &[T],
) -> Result<GpuTexture> {
    let dims = TextureDimensions::from_count(texels.len().max(1));
    let max = device.limits().max_texture_dimension_2d;
    if dims.columns > max || dims.rows > max {
        return Err(Error::Unsupported(format!(
            "{label}: {}x{} data texture exceeds the {max} texel limit",
            dims.columns, dims.rows
        )));
    }
    let mut padded = texels.to_vec();
    padded.resize(dims.size(), T::default());
    let texture = device.create_texture_with_data(
        queue,
        &texture_desc(label, format, dims.columns, dims.rows, 1, wgpu::TextureUsages::TEXTURE_BINDING),
        wgpu::util::TextureDataOrder::LayerMajor,
        bytemuck::cast_slice(&padded),
    );
    Ok(GpuTexture::from_texture(texture, None))
}

/// Upload a full `width × height` float texture.
pub fn create_float_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    bytes: &[u8],
) -> GpuTexture {
    let texture = device.create_texture_with_data(
        queue,
        &texture_desc(label, format, width, height, 1, wgpu::TextureUsages::TEXTURE_BINDING),
        wgpu::util::TextureDataOrder::LayerMajor,
        bytes,
    );
    GpuTexture::from_texture(texture, None)
}

/// Environment radiance as `Rgba16Float`.
pub fn create_env_texture(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, image: &EnvImage) -> GpuTexture {
    let half = image.to_f16();
    create_float_texture(
        device,
        queue,
        label,
        wgpu::TextureFormat::Rgba16Float,
        image.width,
        image.height,
        bytemuck::cast_slice(&half),
    )
}

/// Array of material maps, one layer per image.
///
/// Layers are as large as the largest image; smaller images occupy the
/// top-left corner of their layer. An empty list yields a 1×1 dummy.
pub fn create_texture_array(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    images: &[Arc<TextureImage>],
    srgb: bool,
) -> GpuTexture {
    let width = images.iter().map(|i| i.width).max().unwrap_or(1).max(1);
    let height = images.iter().map(|i| i.height).max().unwrap_or(1).max(1);
    let layers = images.len().max(1) as u32;
    let format = if srgb { wgpu::TextureFormat::Rgba8UnormSrgb } else { wgpu::TextureFormat::Rgba8Unorm };

    let texture = device.create_texture(&texture_desc(
        label,
        format,
        width,
        height,
        layers,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    ));

    for (layer, image) in images.iter().enumerate() {
        if image.width == 0 || image.height == 0 {
            continue;
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer as u32 },
                aspect: wgpu::TextureAspect::All,
            },
            &image.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width * 4),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d { width: image.width, height: image.height, depth_or_array_layers: 1 },
        );
    }

    GpuTexture::from_texture(texture, Some(wgpu::TextureViewDimension::D2Array))
}

/// Sampleable colour attachment.
pub fn create_render_target(device: &wgpu::Device, label: &str, format: wgpu::TextureFormat, width: u32, height: u32) -> GpuTexture {
    let texture = device.create_texture(&texture_desc(
        label,
        format,
        width.max(1),
        height.max(1),
        1,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
    ));
    GpuTexture::from_texture(texture, None)
}

pub fn create_depth_target(device: &wgpu::Device, label: &str, width: u32, height: u32) -> GpuTexture {
    let texture = device.create_texture(&texture_desc(
        label,
        wgpu::TextureFormat::Depth32Float,
        width.max(1),
        height.max(1),
        1,
        wgpu::TextureUsages::RENDER_ATTACHMENT,
    ));
    GpuTexture::from_texture(texture, None)
}

/// Read an `Rgba8Unorm` texture back into tightly packed RGBA bytes.
pub fn read_rgba8(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<Vec<u8>> {
    let (width, height) = (texture.width(), texture.height());
    // bytes_per_row must be aligned to COPY_BYTES_PER_ROW_ALIGNMENT
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: (padded * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| Error::Gpu(e.to_string()))?;
    rx.recv()
        .map_err(|e| Error::Gpu(e.to_string()))?
        .map_err(|e| Error::Gpu(e.to_string()))?;

    let mut out = Vec::with_capacity((unpadded * height) as usize);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks(padded as usize) {
            out.extend_from_slice(&row[..unpadded as usize]);
        }
    }
    buffer.unmap();
    Ok(out)
}
