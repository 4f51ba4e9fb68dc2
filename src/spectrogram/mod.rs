pub mod cancel;
pub mod fft;
pub mod memory;
pub mod pipeline;
pub mod shading;
pub mod texture;

pub use cancel::{CancellationToken, RenderOutcome, RenderRequest, RequestId};
pub use fft::SliceLayout;
pub use memory::{MemoryMonitor, MemoryReport};
pub use pipeline::{
    DisplaySource, FramePlan, GpuBindings, PipelineEvent, PipelineSettings, RegionRequest, RegionTexture,
    SpectrogramPipeline,
};
pub use shading::{shade, Colormap, FrequencyScale, ShadeParams};
pub use texture::MagnitudeTexture;
