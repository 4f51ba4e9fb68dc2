use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use crate::spectrogram::{DisplaySource, FramePlan, GpuBindings, ShadeParams};

use super::frame::{clear_color, FrameRenderer};
use super::gpu::GpuContext;

/// Mirrors `Uniforms` in [`SPECTROGRAM_SHADER`]; 80 bytes, 16-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SpectrogramUniforms {
    pub resolution: [f32; 2],
    pub full_window: [f32; 2],
    pub region_window: [f32; 2],
    pub region_weight: f32,
    pub stretch: f32,
    pub min_frequency: f32,
    pub nyquist: f32,
    pub db_floor: f32,
    pub db_range: f32,
    pub background: [f32; 4],
    pub scale: u32,
    pub _padding: [u32; 3],
}

impl SpectrogramUniforms {
    pub fn new(params: &ShadeParams, width: u32, height: u32) -> Self {
        let [r, g, b, a] = params.background;
        Self {
            resolution: [width as f32, height as f32],
            full_window: params.full_window,
            region_window: params.region_window,
            region_weight: params.region_weight.clamp(0.0, 1.0),
            stretch: params.effective_stretch(),
            min_frequency: params.min_frequency,
            nyquist: params.nyquist,
            db_floor: params.db_floor,
            db_range: params.db_range,
            background: [r, g, b, a].map(|c| c as f32 / 255.0),
            scale: params.frequency_scale.shader_index(),
            _padding: [0; 3],
        }
    }
}

/// The rendering transform of `spectrogram::shading::shade`, per fragment.
pub const SPECTROGRAM_SHADER: &str = r#"
struct Uniforms {
    resolution: vec2<f32>,
    full_window: vec2<f32>,
    region_window: vec2<f32>,
    region_weight: f32,
    stretch: f32,
    min_frequency: f32,
    nyquist: f32,
    db_floor: f32,
    db_range: f32,
    background: vec4<f32>,
    scale: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var full_tex: texture_2d<f32>;
@group(0) @binding(2) var region_tex: texture_2d<f32>;
@group(0) @binding(3) var colormap: texture_2d<f32>;

const LN_10: f32 = 2.302585093;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    return vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
}

fn frequency_at(v: f32) -> f32 {
    let t = clamp(v, 0.0, 1.0);
    if (u.scale == 1u) {
        return t * t * u.nyquist;
    }
    if (u.scale == 2u) {
        let lo = max(u.min_frequency, 0.001);
        if (lo >= u.nyquist) {
            return u.nyquist;
        }
        let log_min = log(lo) / LN_10;
        let log_max = log(u.nyquist) / LN_10;
        return pow(10.0, log_min + t * (log_max - log_min));
    }
    return t * u.nyquist;
}

fn texel(fraction: f32, size: u32) -> u32 {
    if (!(fraction > 0.0)) {
        return 0u;
    }
    return min(u32(floor(fraction * f32(size))), size - 1u);
}

fn level_at(tex: texture_2d<f32>, window: vec2<f32>, x: f32, row: f32) -> f32 {
    let dims = textureDimensions(tex);
    let column = window.x + clamp(x, 0.0, 1.0) * (window.y - window.x);
    let magnitude = textureLoad(tex, vec2<u32>(texel(column, dims.x), texel(row, dims.y)), 0).r;
    let db = 20.0 * log(max(magnitude, 0.0) + 1e-10) / LN_10;
    if (u.db_range <= 0.0) {
        return select(0.0, 1.0, db >= u.db_floor);
    }
    return clamp((db - u.db_floor) / u.db_range, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let x = pos.x / u.resolution.x;
    let v = 1.0 - pos.y / u.resolution.y;
    let effective_v = v / u.stretch;
    if (effective_v > 1.0) {
        return u.background;
    }

    var row = 0.0;
    if (u.nyquist > 0.0) {
        row = frequency_at(effective_v) / u.nyquist;
    }

    let w = clamp(u.region_weight, 0.0, 1.0);
    var level: f32;
    if (w <= 0.0) {
        level = level_at(full_tex, u.full_window, x, row);
    } else if (w >= 1.0) {
        level = level_at(region_tex, u.region_window, x, row);
    } else {
        let full = level_at(full_tex, u.full_window, x, row);
        let region = level_at(region_tex, u.region_window, x, row);
        level = full + (region - full) * w;
    }

    let size = textureDimensions(colormap).x;
    let index = u32(floor(level * f32(size - 1u) + 0.5));
    return textureLoad(colormap, vec2<u32>(min(index, size - 1u), 0u), 0);
}
"#;

/// Full-screen spectrogram pass over the two magnitude tiers.
pub struct SpectrogramRenderer {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

impl SpectrogramRenderer {
    pub fn new(gpu: &GpuContext, texture_format: wgpu::TextureFormat) -> Result<Self> {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("spectrogram_shader"),
            source: wgpu::ShaderSource::Wgsl(SPECTROGRAM_SHADER.into()),
        });

        let texture_entry = |binding: u32, filterable: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("spectrogram_bind_group_layout"),
            entries: &[
                // @binding(0): SpectrogramUniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(1..=2): overview and region magnitudes (R32Float is not filterable)
                texture_entry(1, false),
                texture_entry(2, false),
                // @binding(3): colormap row
                texture_entry(3, true),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("spectrogram_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("spectrogram_render_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: texture_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("spectrogram_uniforms"),
            size: std::mem::size_of::<SpectrogramUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
        })
    }

    /// Draw `plan` into `frame` and read it back. A plan with nothing to show
    /// yields a background-filled frame.
    pub fn draw(
        &self,
        gpu: &GpuContext,
        frame: &FrameRenderer,
        plan: &FramePlan,
        bindings: Option<&GpuBindings<'_>>,
    ) -> Result<Vec<u8>> {
        let clear = clear_color(plan.params.background);
        let bindings = match bindings {
            Some(b) if plan.source != DisplaySource::Nothing => b,
            _ => return frame.render_and_readback(gpu, None, clear),
        };

        let uniforms = SpectrogramUniforms::new(&plan.params, frame.width, frame.height);
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("spectrogram_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(bindings.full),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(bindings.region),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(bindings.colormap),
                },
            ],
        });

        frame.render_and_readback(gpu, Some((&self.pipeline, &bind_group)), clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrogram::FrequencyScale;

    #[test]
    fn uniforms_match_shader_layout() {
        assert_eq!(std::mem::size_of::<SpectrogramUniforms>(), 80);
        assert_eq!(std::mem::offset_of!(SpectrogramUniforms, background), 48);
        assert_eq!(std::mem::offset_of!(SpectrogramUniforms, scale), 64);
    }

    #[test]
    fn uniforms_carry_shade_params() {
        let params = ShadeParams {
            full_window: [0.25, 0.5],
            region_window: [0.1, 0.9],
            region_weight: 1.5,
            stretch: 0.0,
            frequency_scale: FrequencyScale::Logarithmic,
            min_frequency: 10.0,
            nyquist: 25.0,
            db_floor: -100.0,
            db_range: 80.0,
            background: [255, 0, 0, 255],
        };
        let uniforms = SpectrogramUniforms::new(&params, 640, 480);
        assert_eq!(uniforms.resolution, [640.0, 480.0]);
        assert_eq!(uniforms.full_window, [0.25, 0.5]);
        assert_eq!(uniforms.region_weight, 1.0);
        assert_eq!(uniforms.stretch, 1.0);
        assert_eq!(uniforms.scale, 2);
        assert_eq!(uniforms.background, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn shader_declares_entry_points_and_bindings() {
        for needle in ["fn vs_main", "fn fs_main", "@binding(3) var colormap"] {
            assert!(SPECTROGRAM_SHADER.contains(needle), "missing {}", needle);
        }
    }
}
