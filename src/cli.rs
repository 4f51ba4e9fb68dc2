use clap::Parser;
use std::path::PathBuf;

use spectroview::spectrogram::{Colormap, FrequencyScale};

#[derive(Parser, Debug)]
#[command(
    name = "spectroview",
    about = "Render a zooming spectrogram + waveform video from a raw sample file"
)]
pub struct Cli {
    /// Raw little-endian f32 sample file
    pub input: PathBuf,

    /// Output video file
    #[arg(short, long, default_value = "spectroview.mp4")]
    pub output: PathBuf,

    /// Acquisition sample rate of the input in Hz
    #[arg(long, default_value_t = 100.0)]
    pub sample_rate: f64,

    /// Resampling ratio applied for playback
    #[arg(long, default_value_t = 1.0)]
    pub resampling_ratio: f64,

    /// UTC timestamp of the first sample (RFC 3339)
    #[arg(long, default_value = "2024-01-01T00:00:00Z")]
    pub start_time: String,

    /// Region to zoom into, in seconds from the start of the data
    #[arg(long)]
    pub region_start: Option<f64>,

    /// End of the zoom region, in seconds from the start of the data
    #[arg(long)]
    pub region_end: Option<f64>,

    /// Seconds to hold on each view between transitions
    #[arg(long, default_value_t = 1.5)]
    pub hold: f64,

    /// Playback rate used to stretch the frequency axis
    #[arg(long, default_value_t = 1.0)]
    pub playback_rate: f32,

    /// Frequency scale: linear, sqrt or log
    #[arg(long)]
    pub frequency_scale: Option<FrequencyScale>,

    /// Colormap: viridis, inferno or greyscale
    #[arg(long)]
    pub colormap: Option<Colormap>,

    /// Remove slow baseline drift from the waveform strip
    #[arg(long)]
    pub remove_dc: bool,

    /// TTF/OTF font for tick labels. Without one only tick lines are drawn.
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Shade on the CPU instead of the GPU
    #[arg(long)]
    pub cpu: bool,

    /// Video width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// H.264 CRF quality (0-51, lower = better). Ignored when --bitrate is set.
    #[arg(long, default_value_t = 18)]
    pub crf: u32,

    /// Video bitrate (e.g. 2400k, 5M). When set, uses -b:v instead of -crf.
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// Config file (defaults to spectroview.toml or the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
