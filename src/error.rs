use thiserror::Error;

use crate::viewport::Timestamp;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewportError {
    #[error("viewport has not been initialized with dataset metadata")]
    NotInitialized,
    #[error("dataset metadata is missing")]
    MissingMetadata,
    #[error("invalid dataset metadata: {0}")]
    InvalidMetadata(&'static str),
    #[error("invalid time range [{start}, {end}]")]
    InvalidRange { start: Timestamp, end: Timestamp },
    #[error("region [{start}, {end}] is not a strict subset of the dataset")]
    RegionOutsideDataset { start: Timestamp, end: Timestamp },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("no dataset loaded")]
    NoDataset,
    #[error("region too small: {samples} samples does not exceed FFT window of {fft_size}")]
    RegionTooSmall { samples: u64, fft_size: usize },
    #[error("invalid render range")]
    InvalidRange,
    #[error("FFT worker failed: {0}")]
    WorkerFailed(String),
}
