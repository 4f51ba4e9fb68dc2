pub mod frame;
pub mod gpu;
pub mod overlay;
pub mod pipeline;
pub mod text;
pub mod upload;

pub use frame::{FrameRenderer, TEXTURE_FORMAT};
pub use gpu::GpuContext;
pub use pipeline::{SpectrogramRenderer, SpectrogramUniforms};
pub use text::TextOverlay;
