//! Two-tier spectrogram: a whole-dataset overview and a padded hi-res region,
//! computed off the main schedule and swapped in only when complete.

use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::RenderError;
use crate::render::gpu::GpuContext;
use crate::render::upload;
use crate::viewport::{DatasetMetadata, SampleRange, TimeRange};

use super::cancel::{CancellationToken, RenderOutcome, RenderRequest, RequestId};
use super::fft::{self, SliceLayout, DEFAULT_FFT_SIZE};
use super::memory::{MemoryMonitor, MemoryReport};
use super::shading::{self, Colormap, FrequencyScale, ShadeParams, DEFAULT_BACKGROUND};
use super::texture::MagnitudeTexture;

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub fft_size: usize,
    /// Slices per worker message.
    pub batch_size: usize,
    /// Fraction of the requested span added on each side of a region render.
    pub region_padding: f64,
    pub canvas_width: u32,
    pub max_texture_columns: u32,
    pub crossfade: Duration,
    pub db_floor: f32,
    pub db_range: f32,
    pub min_frequency: f32,
    pub frequency_scale: FrequencyScale,
    pub colormap: Colormap,
    pub background: [u8; 4],
    pub memory_check_interval: Duration,
    pub memory_window: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            batch_size: 50,
            region_padding: 0.3,
            canvas_width: 1200,
            max_texture_columns: 8192,
            crossfade: Duration::from_millis(120),
            db_floor: -100.0,
            db_range: 80.0,
            min_frequency: 10.0,
            frequency_scale: FrequencyScale::Linear,
            colormap: Colormap::Viridis,
            background: DEFAULT_BACKGROUND,
            memory_check_interval: Duration::from_secs(5),
            memory_window: 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    OverviewProgress { columns: u32, total: u32 },
    OverviewReady,
    RegionReady(RequestId),
    RenderCancelled(RequestId),
    RenderFailed { id: RequestId, error: RenderError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionRequest {
    Started(RequestId),
    /// The completed region texture already covers the target.
    Reused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplaySource {
    Nothing,
    Full,
    Crossfade,
    Region,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FramePlan {
    pub source: DisplaySource,
    pub params: ShadeParams,
}

pub struct RegionTexture {
    texture: MagnitudeTexture,
    target: TimeRange,
    expanded: TimeRange,
    request: RequestId,
}

impl RegionTexture {
    pub fn texture(&self) -> &MagnitudeTexture {
        &self.texture
    }

    pub fn target(&self) -> TimeRange {
        self.target
    }

    pub fn expanded(&self) -> TimeRange {
        self.expanded
    }

    pub fn request_id(&self) -> RequestId {
        self.request
    }
}

/// Views to bind for a GPU frame. A missing tier is stood in for by the other.
pub struct GpuBindings<'a> {
    pub full: &'a wgpu::TextureView,
    pub region: &'a wgpu::TextureView,
    pub colormap: &'a wgpu::TextureView,
}

enum WorkerMessage {
    Columns {
        id: RequestId,
        first: usize,
        spectra: Vec<Vec<f32>>,
    },
    Finished {
        id: RequestId,
        outcome: RenderOutcome<()>,
    },
    Failed {
        id: RequestId,
        reason: String,
    },
}

struct Dataset {
    metadata: DatasetMetadata,
    samples: Arc<Vec<f32>>,
    pool: rayon::ThreadPool,
}

struct RegionJob {
    request: RenderRequest,
    staging: MagnitudeTexture,
    target: TimeRange,
    expanded: TimeRange,
}

pub struct SpectrogramPipeline {
    settings: PipelineSettings,
    playback_rate: f32,
    lut: Vec<[u8; 4]>,
    dataset: Option<Dataset>,
    next_request: u64,
    messages_tx: Sender<WorkerMessage>,
    messages_rx: Receiver<WorkerMessage>,
    overview_job: Option<RenderRequest>,
    region_job: Option<RegionJob>,
    full: Option<MagnitudeTexture>,
    region: Option<RegionTexture>,
    smart_bounds_complete: bool,
    swap_started: Option<Instant>,
    gpu: Option<Arc<GpuContext>>,
    colormap_texture: Option<(wgpu::Texture, wgpu::TextureView)>,
    context_lost: bool,
    memory: MemoryMonitor,
    on_redraw: Option<Box<dyn FnMut()>>,
}

impl SpectrogramPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let (messages_tx, messages_rx) = mpsc::channel();
        let memory = MemoryMonitor::new(settings.memory_check_interval, settings.memory_window);
        Self {
            lut: settings.colormap.lut(),
            settings,
            playback_rate: 1.0,
            dataset: None,
            next_request: 0,
            messages_tx,
            messages_rx,
            overview_job: None,
            region_job: None,
            full: None,
            region: None,
            smart_bounds_complete: false,
            swap_started: None,
            gpu: None,
            colormap_texture: None,
            context_lost: false,
            memory,
            on_redraw: None,
        }
    }

    /// Called whenever newly computed columns or a finished region become displayable.
    pub fn set_redraw_callback(&mut self, callback: Box<dyn FnMut()>) {
        self.on_redraw = Some(callback);
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.dataset.is_some()
    }

    pub fn full_texture(&self) -> Option<&MagnitudeTexture> {
        self.full.as_ref()
    }

    pub fn region_texture(&self) -> Option<&RegionTexture> {
        self.region.as_ref()
    }

    pub fn is_region_pending(&self) -> bool {
        self.region_job.is_some()
    }

    pub fn smart_bounds_complete(&self) -> bool {
        self.smart_bounds_complete
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    pub fn colormap_lut(&self) -> &[[u8; 4]] {
        &self.lut
    }

    /// Rendering is paused, not failed, while the GPU context is gone.
    pub fn is_paused(&self) -> bool {
        self.context_lost
    }

    /// Replace any previous dataset, spin up a fresh worker pool and start the overview.
    pub fn load_dataset(&mut self, metadata: DatasetMetadata, samples: Vec<f32>) -> Result<(), RenderError> {
        self.reset();
        if let Err(reason) = metadata.validate() {
            log::warn!("Rejecting dataset: {}", reason);
            return Err(RenderError::InvalidRange);
        }
        if samples.len() as u64 != metadata.total_samples {
            log::warn!(
                "Dataset declares {} samples but {} were supplied",
                metadata.total_samples,
                samples.len()
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("fft-worker-{}", i))
            .build()
            .map_err(|e| RenderError::WorkerFailed(e.to_string()))?;

        log::info!(
            "Loaded dataset: {} samples at {} Hz over {:.1}s",
            metadata.total_samples,
            metadata.original_sample_rate,
            metadata.data_range().duration()
        );
        self.dataset = Some(Dataset {
            metadata,
            samples: Arc::new(samples),
            pool,
        });
        self.start_overview()
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    fn live_gpu(&self) -> Option<Arc<GpuContext>> {
        if self.context_lost {
            None
        } else {
            self.gpu.clone()
        }
    }

    fn start_overview(&mut self) -> Result<(), RenderError> {
        if let Some(job) = self.overview_job.take() {
            job.token.cancel();
        }
        if let Some(mut full) = self.full.take() {
            full.dispose();
        }

        let (total, pool_samples) = match &self.dataset {
            Some(d) => (d.metadata.total_samples, Arc::clone(&d.samples)),
            None => return Err(RenderError::NoDataset),
        };
        let width = self.settings.canvas_width.min(self.settings.max_texture_columns) as usize;
        let fft_size = self.settings.fft_size;
        let layout = SliceLayout::overview(total, fft_size, width).ok_or_else(|| {
            log::warn!("Dataset of {} samples is too short for a {}-point FFT", total, fft_size);
            RenderError::RegionTooSmall {
                samples: total,
                fft_size,
            }
        })?;

        let mut texture = MagnitudeTexture::new(
            layout.columns as u32,
            layout.bins() as u32,
            layout.sample_range(),
            self.settings.frequency_scale,
        );
        if let Some(gpu) = self.live_gpu() {
            texture.upload(&gpu);
        }
        self.full = Some(texture);

        let request = RenderRequest::new(self.next_request_id(), SampleRange::new(0, total));
        log::info!(
            "Overview render {}: {} columns, hop {:.2}",
            request.id,
            layout.columns,
            layout.hop
        );
        self.spawn_job(&request, layout, pool_samples);
        self.overview_job = Some(request);
        Ok(())
    }

    fn spawn_job(&self, request: &RenderRequest, layout: SliceLayout, samples: Arc<Vec<f32>>) {
        let Some(dataset) = &self.dataset else {
            return;
        };
        let id = request.id;
        let token = request.token.clone();
        let tx = self.messages_tx.clone();
        let batch_size = self.settings.batch_size.max(1);
        dataset
            .pool
            .spawn(move || run_job(&samples, layout, batch_size, id, &token, &tx));
    }

    /// Start a hi-res render of `target` padded by the smart-bounds fraction,
    /// unless the current region texture already covers it.
    pub fn request_region_render(&mut self, target: TimeRange) -> Result<RegionRequest, RenderError> {
        let (samples, metadata) = match &self.dataset {
            Some(d) => (Arc::clone(&d.samples), d.metadata.clone()),
            None => return Err(RenderError::NoDataset),
        };
        if !target.is_valid() {
            log::warn!("Ignoring region render for invalid range [{}, {}]", target.start, target.end);
            return Err(RenderError::InvalidRange);
        }
        let total = metadata.total_samples as f64;
        let position = |t: f64| metadata.sample_position(t).clamp(0.0, total);
        let requested = (position(target.end).round() - position(target.start).round()) as u64;
        let fft_size = self.settings.fft_size;
        if requested <= fft_size as u64 {
            log::warn!(
                "Region of {} samples does not exceed the {}-sample FFT window",
                requested,
                fft_size
            );
            return Err(RenderError::RegionTooSmall {
                samples: requested,
                fft_size,
            });
        }

        let scale = self.settings.frequency_scale;
        let covered = self.smart_bounds_complete
            && self
                .region
                .as_ref()
                .is_some_and(|r| r.texture.is_valid_for(scale) && texture_covers(&r.texture, &target, &metadata));
        if covered {
            log::debug!("Region [{:.1}, {:.1}] within smart bounds, reusing", target.start, target.end);
            self.cancel_region_render();
            return Ok(RegionRequest::Reused);
        }

        self.cancel_region_render();

        // Rounded outward so the texture spans at least the padded range.
        let expanded = target.padded(self.settings.region_padding, &metadata.data_range());
        let expanded_samples = SampleRange::new(
            position(expanded.start).floor() as u64,
            position(expanded.end).ceil() as u64,
        );
        let zoom = expanded.duration() / target.duration();
        let columns = ((self.settings.canvas_width as f64 * zoom).ceil() as usize)
            .clamp(1, self.settings.max_texture_columns.max(1) as usize);
        let layout = SliceLayout::region(expanded_samples, fft_size, columns).ok_or(
            RenderError::RegionTooSmall {
                samples: expanded_samples.len(),
                fft_size,
            },
        )?;

        let request = RenderRequest::new(self.next_request_id(), expanded_samples);
        log::info!(
            "Region render {}: samples {}..{} ({} columns)",
            request.id,
            expanded_samples.start,
            expanded_samples.end,
            layout.columns
        );
        let staging = MagnitudeTexture::new(layout.columns as u32, layout.bins() as u32, layout.sample_range(), scale);
        self.spawn_job(&request, layout, samples);
        let id = request.id;
        self.region_job = Some(RegionJob {
            request,
            staging,
            target,
            expanded,
        });
        Ok(RegionRequest::Started(id))
    }

    /// Cancel the in-flight region render, if any, and free its partial buffers.
    pub fn cancel_region_render(&mut self) {
        if let Some(mut job) = self.region_job.take() {
            log::debug!(
                "Cancelling region render {} (samples {}..{})",
                job.request.id,
                job.request.samples.start,
                job.request.samples.end
            );
            job.request.token.cancel();
            job.staging.dispose();
        }
    }

    /// Apply worker results. Only results for the current requests are kept.
    pub fn poll(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        let mut redraw = false;

        while let Ok(message) = self.messages_rx.try_recv() {
            match message {
                WorkerMessage::Columns { id, first, spectra } => {
                    if self.overview_job.as_ref().is_some_and(|r| r.id == id) {
                        let gpu = self.live_gpu();
                        if let Some(full) = self.full.as_mut() {
                            let written = full.write_columns(first, &spectra);
                            if let Some(gpu) = gpu {
                                full.upload_columns(&gpu, written);
                            }
                            events.push(PipelineEvent::OverviewProgress {
                                columns: full.filled_columns(),
                                total: full.width(),
                            });
                            redraw = true;
                        }
                    } else if let Some(job) = self.region_job.as_mut().filter(|j| j.request.id == id) {
                        job.staging.write_columns(first, &spectra);
                    } else {
                        log::trace!("Dropping columns from stale render {}", id);
                    }
                }
                WorkerMessage::Finished { id, outcome } if outcome.is_cancelled() => {
                    log::debug!("Render {} cancelled", id);
                    events.push(PipelineEvent::RenderCancelled(id));
                }
                WorkerMessage::Finished { id, .. } => {
                    if self.overview_job.as_ref().is_some_and(|r| r.id == id) {
                        self.overview_job = None;
                        log::info!("Overview render {} complete", id);
                        events.push(PipelineEvent::OverviewReady);
                        redraw = true;
                    } else if self.region_job.as_ref().is_some_and(|j| j.request.id == id) {
                        if let Some(job) = self.region_job.take() {
                            self.install_region(job);
                            log::info!("Region render {} complete", id);
                            events.push(PipelineEvent::RegionReady(id));
                            redraw = true;
                        }
                    } else {
                        log::trace!("Ignoring completion of stale render {}", id);
                    }
                }
                WorkerMessage::Failed { id, reason } => {
                    let current_overview = self.overview_job.as_ref().is_some_and(|r| r.id == id);
                    let current_region = self.region_job.as_ref().is_some_and(|j| j.request.id == id);
                    if current_overview {
                        self.overview_job = None;
                    }
                    if current_region {
                        if let Some(mut job) = self.region_job.take() {
                            job.staging.dispose();
                        }
                    }
                    if current_overview || current_region {
                        log::warn!("Render {} failed: {}", id, reason);
                        events.push(PipelineEvent::RenderFailed {
                            id,
                            error: RenderError::WorkerFailed(reason),
                        });
                    }
                }
            }
        }

        if redraw {
            if let Some(callback) = self.on_redraw.as_mut() {
                callback();
            }
        }
        events
    }

    fn install_region(&mut self, job: RegionJob) {
        let RegionJob {
            request,
            mut staging,
            target,
            expanded,
        } = job;
        if let Some(gpu) = self.live_gpu() {
            staging.upload(&gpu);
        }
        if let Some(mut old) = self.region.take() {
            old.texture.dispose();
        }
        self.region = Some(RegionTexture {
            texture: staging,
            target,
            expanded,
            request: request.id,
        });
        self.smart_bounds_complete = true;
    }

    fn region_displayable(&self, display: &TimeRange) -> bool {
        self.smart_bounds_complete
            && self.region.as_ref().is_some_and(|r| {
                r.texture.is_complete()
                    && r.texture.is_valid_for(self.settings.frequency_scale)
                    && self
                        .dataset
                        .as_ref()
                        .is_some_and(|d| texture_covers(&r.texture, display, &d.metadata))
            })
    }

    /// Decide what to draw for `display` this frame, advancing the crossfade.
    /// Returns `None` when there is nothing sensible to draw.
    pub fn plan_frame(&mut self, display: TimeRange, now: Instant) -> Option<FramePlan> {
        if self.region_displayable(&display) {
            if self.swap_started.is_none() {
                log::debug!("Swapping display to region texture");
                self.swap_started = Some(now);
            }
        } else if self.swap_started.take().is_some() {
            log::debug!("Display range left region bounds, showing overview");
        }

        let weight = match self.swap_started {
            Some(started) => {
                let elapsed = now.saturating_duration_since(started);
                if self.settings.crossfade.is_zero() {
                    1.0
                } else {
                    (elapsed.as_secs_f32() / self.settings.crossfade.as_secs_f32()).min(1.0)
                }
            }
            None => 0.0,
        };
        self.build_plan(&display, weight, self.playback_rate)
    }

    fn build_plan(&self, display: &TimeRange, region_weight: f32, playback_rate: f32) -> Option<FramePlan> {
        let dataset = self.dataset.as_ref()?;
        if !display.is_valid() {
            log::debug!("Skipping draw for invalid range [{}, {}]", display.start, display.end);
            return None;
        }
        let scale = self.settings.frequency_scale;
        let full = self.full.as_ref().filter(|t| t.is_valid_for(scale));
        let region = self
            .region
            .as_ref()
            .filter(|_| self.region_displayable(display))
            .map(|r| &r.texture);

        let mut weight = if region.is_some() { region_weight } else { 0.0 };
        if full.is_none() && region.is_some() {
            weight = 1.0;
        }
        let source = match (full.is_some(), region.is_some()) {
            (_, true) if weight >= 1.0 => DisplaySource::Region,
            (_, true) => DisplaySource::Crossfade,
            (true, false) => DisplaySource::Full,
            (false, false) => DisplaySource::Nothing,
        };

        let metadata = &dataset.metadata;
        let window = |texture: Option<&MagnitudeTexture>| {
            texture.map_or([0.0, 1.0], |t| {
                let [a, b] = texture_window(t, display, metadata);
                [a as f32, b as f32]
            })
        };
        // Coverage is checked with a little slack; keep the region inside its texels.
        let region_window = window(region).map(|u| u.clamp(0.0, 1.0));

        Some(FramePlan {
            source,
            params: ShadeParams {
                full_window: window(full),
                region_window,
                region_weight: weight,
                stretch: playback_rate,
                frequency_scale: scale,
                min_frequency: self.settings.min_frequency,
                nyquist: (metadata.original_sample_rate * 0.5) as f32,
                db_floor: self.settings.db_floor,
                db_range: self.settings.db_range,
                background: self.settings.background,
            },
        })
    }

    /// Shade a plan on the CPU into tightly packed RGBA rows, top row first.
    pub fn render_cpu(&self, plan: &FramePlan, width: u32, height: u32) -> Vec<u8> {
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        if width == 0 || height == 0 {
            return pixels;
        }
        let scale = self.settings.frequency_scale;
        let full = self.full.as_ref().filter(|t| t.is_valid_for(scale));
        let region = match plan.source {
            DisplaySource::Region | DisplaySource::Crossfade => self.region.as_ref().map(|r| &r.texture),
            _ => None,
        };
        let lut = &self.lut;

        pixels
            .par_chunks_mut(width as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let v = 1.0 - (y as f32 + 0.5) / height as f32;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let u = (x as f32 + 0.5) / width as f32;
                    px.copy_from_slice(&shading::shade(u, v, &plan.params, full, region, lut));
                }
            });
        pixels
    }

    /// Static RGBA copy of `range` at the given playback rate, using the best
    /// texture available without any crossfade.
    pub fn snapshot(&self, range: TimeRange, playback_rate: f32, width: u32, height: u32) -> Option<Vec<u8>> {
        let plan = self.build_plan(&range, 1.0, playback_rate)?;
        Some(self.render_cpu(&plan, width, height))
    }

    pub fn set_playback_rate(&mut self, rate: f32) {
        if rate.is_finite() && rate > 0.0 {
            self.playback_rate = rate;
        } else {
            log::warn!("Ignoring invalid playback rate {}", rate);
        }
    }

    pub fn set_colormap(&mut self, colormap: Colormap) {
        if colormap == self.settings.colormap {
            return;
        }
        self.settings.colormap = colormap;
        self.lut = colormap.lut();
        if let (Some(gpu), Some((texture, _))) = (self.live_gpu(), &self.colormap_texture) {
            upload::write_colormap(&gpu, texture, &self.lut);
        }
    }

    /// Textures computed under another scale are invalid: the region is
    /// dropped and the overview recomputed.
    pub fn set_frequency_scale(&mut self, scale: FrequencyScale) -> Result<(), RenderError> {
        if scale == self.settings.frequency_scale {
            return Ok(());
        }
        log::info!("Frequency scale changed to {:?}", scale);
        self.settings.frequency_scale = scale;
        self.cancel_region_render();
        if let Some(mut region) = self.region.take() {
            region.texture.dispose();
        }
        self.smart_bounds_complete = false;
        self.swap_started = None;
        if self.dataset.is_some() {
            self.start_overview()?;
        }
        Ok(())
    }

    /// New canvas width; the overview is recomputed at the new resolution.
    pub fn resize(&mut self, canvas_width: u32) -> Result<(), RenderError> {
        if canvas_width == self.settings.canvas_width || canvas_width == 0 {
            return Ok(());
        }
        self.settings.canvas_width = canvas_width;
        if self.dataset.is_some() {
            self.start_overview()?;
        }
        Ok(())
    }

    /// Attach a device and upload everything currently held on the host.
    pub fn attach_gpu(&mut self, gpu: Arc<GpuContext>) {
        self.gpu = Some(gpu);
        self.context_lost = false;
        self.upload_all();
    }

    pub fn handle_context_lost(&mut self) {
        log::warn!("GPU context lost, pausing spectrogram rendering");
        self.context_lost = true;
        self.colormap_texture = None;
        if let Some(full) = self.full.as_mut() {
            full.forget_gpu();
        }
        if let Some(region) = self.region.as_mut() {
            region.texture.forget_gpu();
        }
    }

    /// Re-upload the colormap and both tiers from host buffers; nothing is recomputed.
    pub fn handle_context_restored(&mut self, gpu: Arc<GpuContext>) {
        log::info!("GPU context restored, re-uploading textures");
        self.attach_gpu(gpu);
    }

    fn upload_all(&mut self) {
        let Some(gpu) = self.live_gpu() else {
            return;
        };
        if let Some((texture, _)) = self.colormap_texture.take() {
            texture.destroy();
        }
        let texture = upload::create_colormap_texture(&gpu, &self.lut);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.colormap_texture = Some((texture, view));
        if let Some(full) = self.full.as_mut() {
            full.upload(&gpu);
        }
        if let Some(region) = self.region.as_mut() {
            region.texture.upload(&gpu);
        }
    }

    pub fn gpu(&self) -> Option<Arc<GpuContext>> {
        self.live_gpu()
    }

    /// Views for the shader, or `None` while paused or before anything is uploaded.
    pub fn gpu_bindings(&self, plan: &FramePlan) -> Option<GpuBindings<'_>> {
        if self.context_lost {
            return None;
        }
        let colormap = self.colormap_texture.as_ref().map(|(_, view)| view)?;
        let full = self.full.as_ref().and_then(|t| t.gpu_view());
        let region = match plan.source {
            DisplaySource::Region | DisplaySource::Crossfade => {
                self.region.as_ref().and_then(|r| r.texture.gpu_view())
            }
            _ => None,
        };
        let (full, region) = match (full, region) {
            (Some(f), Some(r)) => (f, r),
            (Some(f), None) => (f, f),
            (None, Some(r)) => (r, r),
            (None, None) => return None,
        };
        Some(GpuBindings {
            full,
            region,
            colormap,
        })
    }

    /// Host plus GPU bytes held by textures and in-flight buffers.
    pub fn memory_usage(&self) -> usize {
        let tier = |t: &MagnitudeTexture| t.host_bytes() + t.gpu_bytes();
        self.full.as_ref().map_or(0, tier)
            + self.region.as_ref().map_or(0, |r| tier(&r.texture))
            + self.region_job.as_ref().map_or(0, |j| j.staging.host_bytes())
            + self.colormap_texture.as_ref().map_or(0, |_| self.lut.len() * 4)
    }

    /// Periodic health check; see [`MemoryMonitor`].
    pub fn check_memory(&mut self, now: Instant) -> Option<MemoryReport> {
        let bytes = self.memory_usage();
        self.memory.check(now, bytes)
    }

    /// Cancel all work, dispose both tiers and tear down the worker pool.
    /// The GPU attachment survives so the next dataset can upload straight away.
    pub fn reset(&mut self) {
        if let Some(job) = self.overview_job.take() {
            job.token.cancel();
        }
        self.cancel_region_render();
        if let Some(mut full) = self.full.take() {
            full.dispose();
        }
        if let Some(mut region) = self.region.take() {
            region.texture.dispose();
        }
        self.smart_bounds_complete = false;
        self.swap_started = None;
        if self.dataset.take().is_some() {
            log::info!("Spectrogram dataset released");
        }
        while self.messages_rx.try_recv().is_ok() {}
        self.memory.reset();
    }

    /// Reset and release every GPU resource.
    pub fn dispose(&mut self) {
        self.reset();
        if let Some((texture, _)) = self.colormap_texture.take() {
            texture.destroy();
        }
        self.gpu = None;
    }
}

impl Drop for SpectrogramPipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Position of `display` across the samples `texture` covers: 0 is the
/// leading edge of the first column, 1 the trailing edge of the last.
fn texture_window(texture: &MagnitudeTexture, display: &TimeRange, metadata: &DatasetMetadata) -> [f64; 2] {
    let source = texture.source_samples();
    let len = source.len().max(1) as f64;
    let to_u = |t: f64| (metadata.sample_position(t) - source.start as f64) / len;
    [to_u(display.start), to_u(display.end)]
}

/// Whether every column `display` needs lies inside `texture`.
fn texture_covers(texture: &MagnitudeTexture, display: &TimeRange, metadata: &DatasetMetadata) -> bool {
    const SLACK: f64 = 1e-6;
    let [a, b] = texture_window(texture, display, metadata);
    a >= -SLACK && b <= 1.0 + SLACK
}

fn run_job(
    samples: &[f32],
    layout: SliceLayout,
    batch_size: usize,
    id: RequestId,
    token: &CancellationToken,
    tx: &Sender<WorkerMessage>,
) {
    let mut first = 0;
    while first < layout.columns {
        if token.is_cancelled() {
            let _ = tx.send(WorkerMessage::Finished {
                id,
                outcome: RenderOutcome::Cancelled,
            });
            return;
        }
        let end = (first + batch_size).min(layout.columns);
        let batch = panic::catch_unwind(AssertUnwindSafe(|| fft::compute_columns(samples, &layout, first..end)));
        match batch {
            Ok(spectra) => {
                if tx.send(WorkerMessage::Columns { id, first, spectra }).is_err() {
                    return;
                }
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "FFT worker panicked".to_string());
                let _ = tx.send(WorkerMessage::Failed { id, reason });
                return;
            }
        }
        first = end;
    }
    let outcome = if token.is_cancelled() {
        RenderOutcome::Cancelled
    } else {
        RenderOutcome::Completed(())
    };
    let _ = tx.send(WorkerMessage::Finished { id, outcome });
}
