//! Zoomable time-series spectrogram and waveform core.

pub mod audio;
pub mod config;
pub mod error;
pub mod render;
pub mod spectrogram;
pub mod timeline;
pub mod viewport;
