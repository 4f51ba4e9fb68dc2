use std::ops::Range;

use super::gpu::GpuContext;

pub const MAGNITUDE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const COLORMAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub fn create_magnitude_texture(gpu: &GpuContext, width: u32, height: u32) -> wgpu::Texture {
    gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("magnitude_texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: MAGNITUDE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

/// Push a run of columns from a row-major `width × height` host buffer.
pub fn write_magnitude_columns(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    data: &[f32],
    width: u32,
    height: u32,
    columns: Range<usize>,
) {
    let first = columns.start.min(width as usize) as u32;
    let last = columns.end.min(width as usize) as u32;
    if first >= last || height == 0 || data.len() < (width * height) as usize {
        return;
    }

    gpu.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: first, y: 0, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(data),
        wgpu::TexelCopyBufferLayout {
            offset: first as u64 * std::mem::size_of::<f32>() as u64,
            bytes_per_row: Some(width * std::mem::size_of::<f32>() as u32),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width: last - first,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// A `lut.len() × 1` RGBA texture holding colormap entries.
pub fn create_colormap_texture(gpu: &GpuContext, lut: &[[u8; 4]]) -> wgpu::Texture {
    let width = lut.len().max(1) as u32;
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("colormap_texture"),
        size: wgpu::Extent3d {
            width,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLORMAP_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_colormap(gpu, &texture, lut);
    texture
}

pub fn write_colormap(gpu: &GpuContext, texture: &wgpu::Texture, lut: &[[u8; 4]]) {
    if lut.is_empty() || lut.len() as u32 != texture.width() {
        return;
    }
    gpu.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(lut),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(lut.len() as u32 * 4),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width: lut.len() as u32,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
}
