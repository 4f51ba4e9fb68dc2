use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::WaveformRequest;
use crate::spectrogram::{Colormap, FrequencyScale, PipelineSettings};
use crate::timeline::transition::DEFAULT_TRANSITION_DURATION;
use crate::timeline::TickPlanner;

pub const CONFIG_FILE_NAME: &str = "spectroview.toml";

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub spectrogram: SpectrogramConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub ticks: TicksConfig,
    #[serde(default)]
    pub waveform: WaveformConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_codec")]
    pub codec: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpectrogramConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_region_padding")]
    pub region_padding: f64,
    #[serde(default = "default_db_floor")]
    pub db_floor: f32,
    #[serde(default = "default_db_range")]
    pub db_range: f32,
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f32,
    #[serde(default)]
    pub frequency_scale: FrequencyScale,
    #[serde(default)]
    pub colormap: Colormap,
    #[serde(default = "default_crossfade_ms")]
    pub crossfade_ms: u64,
    #[serde(default = "default_max_texture_columns")]
    pub max_texture_columns: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnimationConfig {
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TicksConfig {
    #[serde(default = "default_min_label_spacing")]
    pub min_label_spacing: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WaveformConfig {
    #[serde(default)]
    pub remove_dc: bool,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_check_interval_s")]
    pub check_interval_s: u64,
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            crf: default_crf(),
            codec: default_codec(),
        }
    }
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            batch_size: default_batch_size(),
            region_padding: default_region_padding(),
            db_floor: default_db_floor(),
            db_range: default_db_range(),
            min_frequency: default_min_frequency(),
            frequency_scale: FrequencyScale::default(),
            colormap: Colormap::default(),
            crossfade_ms: default_crossfade_ms(),
            max_texture_columns: default_max_texture_columns(),
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
        }
    }
}

impl Default for TicksConfig {
    fn default() -> Self {
        Self {
            min_label_spacing: default_min_label_spacing(),
        }
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            remove_dc: false,
            alpha: default_alpha(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            check_interval_s: default_check_interval_s(),
            window: default_window(),
        }
    }
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> u32 { 30 }
fn default_crf() -> u32 { 18 }
fn default_codec() -> String { "libx264".into() }
fn default_fft_size() -> usize { 2048 }
fn default_batch_size() -> usize { 50 }
fn default_region_padding() -> f64 { 0.3 }
fn default_db_floor() -> f32 { -100.0 }
fn default_db_range() -> f32 { 80.0 }
fn default_min_frequency() -> f32 { 10.0 }
fn default_crossfade_ms() -> u64 { 120 }
fn default_max_texture_columns() -> u32 { 8192 }
fn default_duration_ms() -> u64 { DEFAULT_TRANSITION_DURATION.as_millis() as u64 }
fn default_min_label_spacing() -> f64 { 44.0 }
fn default_alpha() -> f32 { 0.001 }
fn default_check_interval_s() -> u64 { 5 }
fn default_window() -> usize { 6 }

impl Config {
    pub fn pipeline_settings(&self, canvas_width: u32) -> PipelineSettings {
        let s = &self.spectrogram;
        PipelineSettings {
            fft_size: s.fft_size,
            batch_size: s.batch_size,
            region_padding: s.region_padding,
            canvas_width,
            max_texture_columns: s.max_texture_columns,
            crossfade: Duration::from_millis(s.crossfade_ms),
            db_floor: s.db_floor,
            db_range: s.db_range,
            min_frequency: s.min_frequency,
            frequency_scale: s.frequency_scale,
            colormap: s.colormap,
            memory_check_interval: Duration::from_secs(self.memory.check_interval_s),
            memory_window: self.memory.window,
            ..PipelineSettings::default()
        }
    }

    pub fn transition_duration(&self) -> Duration {
        Duration::from_millis(self.animation.duration_ms)
    }

    pub fn tick_planner(&self) -> TickPlanner {
        TickPlanner::new(self.ticks.min_label_spacing)
    }

    pub fn waveform_request(&self, canvas_width: u32, canvas_height: u32) -> WaveformRequest {
        WaveformRequest {
            canvas_width,
            canvas_height,
            remove_dc: self.waveform.remove_dc,
            alpha: self.waveform.alpha,
            start_sample: None,
            end_sample: None,
        }
    }
}

/// `spectroview.toml` in the working directory, then
/// `~/.config/spectroview/config.toml`, then the platform config directory.
pub fn discover_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("spectroview").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("spectroview").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}
