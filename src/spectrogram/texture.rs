use std::ops::Range;

use crate::render::gpu::GpuContext;
use crate::render::upload;
use crate::viewport::SampleRange;

use super::shading::FrequencyScale;

struct GpuMagnitude {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// FFT magnitudes for one tier, kept on the host so the GPU copy can be
/// rebuilt after a context loss without recomputing.
///
/// Layout is row-major: row = frequency bin (0 is DC), column = time slice.
pub struct MagnitudeTexture {
    data: Vec<f32>,
    width: u32,
    height: u32,
    source_samples: SampleRange,
    frequency_scale: FrequencyScale,
    filled_columns: u32,
    gpu: Option<GpuMagnitude>,
}

impl MagnitudeTexture {
    pub fn new(width: u32, height: u32, source_samples: SampleRange, frequency_scale: FrequencyScale) -> Self {
        Self {
            data: vec![0.0; width as usize * height as usize],
            width,
            height,
            source_samples,
            frequency_scale,
            filled_columns: 0,
            gpu: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn source_samples(&self) -> SampleRange {
        self.source_samples
    }

    pub fn frequency_scale(&self) -> FrequencyScale {
        self.frequency_scale
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn filled_columns(&self) -> u32 {
        self.filled_columns
    }

    pub fn is_complete(&self) -> bool {
        self.width > 0 && self.filled_columns >= self.width
    }

    /// Only a texture computed under the active scale may be displayed.
    pub fn is_valid_for(&self, scale: FrequencyScale) -> bool {
        self.width > 0 && self.frequency_scale == scale
    }

    pub fn value(&self, column: u32, row: u32) -> f32 {
        if column >= self.width || row >= self.height {
            return 0.0;
        }
        self.data[row as usize * self.width as usize + column as usize]
    }

    /// Nearest texel at fractional coordinates, clamped to the edges.
    pub fn sample(&self, column: f32, row: f32) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let x = texel(column, self.width);
        let y = texel(row, self.height);
        self.value(x, y)
    }

    /// Store spectra for consecutive columns starting at `first`; returns the
    /// columns actually written.
    pub fn write_columns(&mut self, first: usize, columns: &[Vec<f32>]) -> Range<usize> {
        let width = self.width as usize;
        let height = self.height as usize;
        let start = first.min(width);
        let end = (first + columns.len()).min(width);
        for (column, spectrum) in (start..end).zip(columns) {
            for (row, &magnitude) in spectrum.iter().take(height).enumerate() {
                self.data[row * width + column] = magnitude;
            }
        }
        self.filled_columns = self.filled_columns.max(end as u32);
        start..end
    }

    pub fn host_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn gpu_bytes(&self) -> usize {
        if self.gpu.is_some() {
            self.host_bytes()
        } else {
            0
        }
    }

    pub fn gpu_view(&self) -> Option<&wgpu::TextureView> {
        self.gpu.as_ref().map(|g| &g.view)
    }

    /// Allocate the GPU copy if needed and push every column.
    pub fn upload(&mut self, gpu: &GpuContext) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        if self.gpu.is_none() {
            let texture = upload::create_magnitude_texture(gpu, self.width, self.height);
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.gpu = Some(GpuMagnitude { texture, view });
        }
        self.upload_columns(gpu, 0..self.width as usize);
    }

    pub fn upload_columns(&self, gpu: &GpuContext, columns: Range<usize>) {
        if let Some(g) = &self.gpu {
            upload::write_magnitude_columns(gpu, &g.texture, &self.data, self.width, self.height, columns);
        }
    }

    /// Drop the GPU handle without touching the device, for when the context
    /// is already gone. Host data is kept for re-upload.
    pub fn forget_gpu(&mut self) {
        self.gpu = None;
    }

    /// Free the GPU texture and host buffer. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let Some(g) = self.gpu.take() {
            g.texture.destroy();
        }
        self.data = Vec::new();
        self.width = 0;
        self.height = 0;
        self.filled_columns = 0;
    }
}

fn texel(fraction: f32, size: u32) -> u32 {
    let max = size.saturating_sub(1);
    if !fraction.is_finite() {
        return 0;
    }
    ((fraction * size as f32).floor().max(0.0) as u32).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_land_row_major() {
        let mut texture = MagnitudeTexture::new(3, 2, SampleRange::new(0, 10), FrequencyScale::Linear);
        let written = texture.write_columns(1, &[vec![1.0, 2.0], vec![3.0, 4.0, 99.0]]);
        assert_eq!(written, 1..3);
        assert_eq!(texture.data(), &[0.0, 1.0, 3.0, 0.0, 2.0, 4.0]);
        assert_eq!(texture.value(2, 1), 4.0);
        assert_eq!(texture.filled_columns(), 3);
        assert!(texture.is_complete());
    }

    #[test]
    fn writes_past_width_are_dropped() {
        let mut texture = MagnitudeTexture::new(2, 1, SampleRange::new(0, 10), FrequencyScale::Linear);
        assert_eq!(texture.write_columns(5, &[vec![1.0]]), 2..2);
        assert!(!texture.is_complete());
    }

    #[test]
    fn sampling_clamps_to_edges() {
        let mut texture = MagnitudeTexture::new(2, 2, SampleRange::new(0, 10), FrequencyScale::Linear);
        texture.write_columns(0, &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(texture.sample(-1.0, 0.0), 1.0);
        assert_eq!(texture.sample(1.0, 1.0), 4.0);
        assert_eq!(texture.sample(0.6, 0.2), 3.0);
    }

    #[test]
    fn validity_follows_scale() {
        let texture = MagnitudeTexture::new(2, 2, SampleRange::new(0, 10), FrequencyScale::SquareRoot);
        assert!(texture.is_valid_for(FrequencyScale::SquareRoot));
        assert!(!texture.is_valid_for(FrequencyScale::Logarithmic));
    }

    #[test]
    fn dispose_releases_everything() {
        let mut texture = MagnitudeTexture::new(4, 4, SampleRange::new(0, 10), FrequencyScale::Linear);
        assert_eq!(texture.host_bytes(), 64);
        assert_eq!(texture.gpu_bytes(), 0);
        texture.dispose();
        texture.dispose();
        assert_eq!(texture.host_bytes(), 0);
        assert!(!texture.is_valid_for(FrequencyScale::Linear));
        assert_eq!(texture.sample(0.5, 0.5), 0.0);
    }
}
