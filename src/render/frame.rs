use anyhow::{Context, Result};

use super::gpu::GpuContext;

/// Colormap entries are already display-encoded bytes, so the target stores them as-is.
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Bytes per row of a readback, before and after `COPY_BYTES_PER_ROW_ALIGNMENT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowPitch {
    pub packed: u32,
    pub padded: u32,
}

impl RowPitch {
    pub fn for_width(width: u32) -> Self {
        let packed = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        Self {
            packed,
            padded: packed.div_ceil(align) * align,
        }
    }

    /// Drop the per-row alignment padding of a mapped readback.
    pub fn unpad(&self, data: &[u8], rows: u32) -> Vec<u8> {
        if self.packed == self.padded {
            return data[..(self.packed * rows) as usize].to_vec();
        }
        data.chunks(self.padded as usize)
            .take(rows as usize)
            .flat_map(|row| &row[..self.packed as usize])
            .copied()
            .collect()
    }
}

/// Offscreen band the spectrogram pass draws into, plus its readback buffer.
pub struct FrameRenderer {
    pub width: u32,
    pub height: u32,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    pitch: RowPitch,
}

impl FrameRenderer {
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> Self {
        let target = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("spectrogram_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let pitch = RowPitch::for_width(width);
        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("spectrogram_readback"),
            size: (pitch.padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        log::debug!("Spectrogram target {}x{} (row pitch {})", width, height, pitch.padded);

        Self {
            width,
            height,
            target,
            target_view,
            readback,
            pitch,
        }
    }

    /// Clear to `clear`, run the full-screen pass if one is given, and return
    /// tightly packed RGBA rows, top row first.
    pub fn render_and_readback(
        &self,
        gpu: &GpuContext,
        draw: Option<(&wgpu::RenderPipeline, &wgpu::BindGroup)>,
        clear: wgpu::Color,
    ) -> Result<Vec<u8>> {
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("spectrogram_frame"),
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("spectrogram_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some((pipeline, bind_group)) = draw {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1); // fullscreen triangle
            }
        }

        encoder.copy_texture_to_buffer(
            self.target.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.pitch.padded),
                    rows_per_image: Some(self.height),
                },
            },
            self.target.size(),
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .context("Readback callback dropped")?
            .context("Failed to map spectrogram readback")?;

        let pixels = {
            let mapped = slice.get_mapped_range();
            self.pitch.unpad(&mapped, self.height)
        };
        self.readback.unmap();
        Ok(pixels)
    }
}

/// Byte colour as a render-pass clear value.
pub fn clear_color(rgba: [u8; 4]) -> wgpu::Color {
    let c = |b: u8| b as f64 / 255.0;
    wgpu::Color {
        r: c(rgba[0]),
        g: c(rgba[1]),
        b: c(rgba[2]),
        a: c(rgba[3]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_aligns_rows() {
        let pitch = RowPitch::for_width(100);
        assert_eq!(pitch.packed, 400);
        assert_eq!(pitch.padded, 512);
        assert_eq!(RowPitch::for_width(64).padded, 256);
    }

    #[test]
    fn unpad_keeps_packed_bytes_per_row() {
        let pitch = RowPitch { packed: 4, padded: 8 };
        let data: Vec<u8> = (0..16).collect();
        assert_eq!(pitch.unpad(&data, 2), vec![0, 1, 2, 3, 8, 9, 10, 11]);

        let tight = RowPitch { packed: 4, padded: 4 };
        assert_eq!(tight.unpad(&data, 2), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn clear_color_scales_bytes() {
        let c = clear_color([255, 0, 51, 255]);
        assert_eq!((c.r, c.g, c.b, c.a), (1.0, 0.0, 0.2, 1.0));
    }
}
