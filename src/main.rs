mod cli;
mod encode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cli::Cli;
use encode::ffmpeg::{EncoderSettings, FfmpegEncoder};
use spectroview::audio::{ReducerWorker, WorkerRequest, WorkerResponse};
use spectroview::config::{self, Config};
use spectroview::render::overlay;
use spectroview::render::{FrameRenderer, GpuContext, SpectrogramRenderer, TextOverlay, TEXTURE_FORMAT};
use spectroview::spectrogram::{MemoryReport, PipelineEvent, RegionRequest, SpectrogramPipeline};
use spectroview::timeline::{PanelCapabilities, TransitionAnimator, TransitionDirection};
use spectroview::viewport::{DatasetMetadata, RegionId, TimeRange, Timestamp, ViewportState};

/// Samples per message to the reducer worker.
const ADD_SAMPLES_CHUNK: usize = 65_536;
/// Share of the frame height given to the waveform strip.
const WAVEFORM_SHARE: f64 = 0.25;
const OVERVIEW_TIMEOUT: Duration = Duration::from_secs(600);
const REGION_CATCH_UP: Duration = Duration::from_secs(30);
const WAVEFORM_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct GpuStage {
    gpu: Arc<GpuContext>,
    frame: FrameRenderer,
    renderer: SpectrogramRenderer,
}

impl GpuStage {
    fn new(width: u32, height: u32) -> Result<Self> {
        let gpu = Arc::new(GpuContext::new()?);
        let frame = FrameRenderer::new(&gpu, width, height);
        let renderer = SpectrogramRenderer::new(&gpu, TEXTURE_FORMAT)?;
        Ok(Self { gpu, frame, renderer })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect spectroview.toml / global config
    let config_path = cli.config.clone().or_else(config::discover_config_path);
    let mut cfg = Config::default();
    if let Some(ref path) = config_path {
        if let Some(loaded) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            cfg = loaded;
            // Merge: config values apply only when CLI is at its default
            if cli.width == 1280 { cli.width = cfg.output.width; }
            if cli.height == 720 { cli.height = cfg.output.height; }
            if cli.fps == 30 { cli.fps = cfg.output.fps; }
            if cli.crf == 18 { cli.crf = cfg.output.crf; }
            if cli.codec == "libx264" { cli.codec = cfg.output.codec.clone(); }
            if !cli.remove_dc { cli.remove_dc = cfg.waveform.remove_dc; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }
    if let Some(scale) = cli.frequency_scale {
        cfg.spectrogram.frequency_scale = scale;
    }
    if let Some(colormap) = cli.colormap {
        cfg.spectrogram.colormap = colormap;
    }
    cfg.waveform.remove_dc = cli.remove_dc;

    if cli.fps == 0 || cli.width == 0 || cli.height < 4 {
        anyhow::bail!("Invalid output geometry {}x{} @ {}fps", cli.width, cli.height, cli.fps);
    }

    log::info!("spectroview - zooming spectrogram renderer");
    log::info!("Input: {}", cli.input.display());
    log::info!("Output: {}", cli.output.display());
    log::info!("Resolution: {}x{} @ {}fps", cli.width, cli.height, cli.fps);

    // 1. Load samples and describe the dataset
    let samples = read_samples(&cli.input)?;
    let start_time = parse_start_time(&cli.start_time)?;
    let metadata = DatasetMetadata {
        original_sample_rate: cli.sample_rate,
        resampling_ratio: cli.resampling_ratio,
        data_start_time: start_time,
        data_end_time: start_time + samples.len() as f64 / cli.sample_rate,
        total_samples: samples.len() as u64,
    };
    log::info!(
        "Dataset: {} samples @ {} Hz ({:.1}s)",
        metadata.total_samples,
        metadata.original_sample_rate,
        metadata.data_range().duration()
    );

    let mut viewport = ViewportState::new();
    viewport.set_metadata(metadata.clone())?;
    viewport.initialize(metadata.total_samples)?;
    let data_range = metadata.data_range();
    let region = region_range(&data_range, cli.region_start, cli.region_end)?;

    // 2. Frame layout
    let strip_height = ((cli.height as f64 * WAVEFORM_SHARE) as u32).max(1);
    let spectrogram_height = cli.height - strip_height;

    // 3. Spectrogram pipeline, on the GPU when one is available
    let mut settings = cfg.pipeline_settings(cli.width);
    let mut gpu_stage = if cli.cpu {
        None
    } else {
        match GpuStage::new(cli.width, spectrogram_height) {
            Ok(stage) => {
                settings.max_texture_columns = settings.max_texture_columns.min(stage.gpu.max_texture_columns());
                Some(stage)
            }
            Err(err) => {
                log::warn!("GPU unavailable, shading on the CPU: {:#}", err);
                None
            }
        }
    };

    let mut pipeline = SpectrogramPipeline::new(settings);
    let redraw_requests = Rc::new(Cell::new(0u64));
    {
        let counter = Rc::clone(&redraw_requests);
        pipeline.set_redraw_callback(Box::new(move || counter.set(counter.get() + 1)));
    }
    if let Some(stage) = &gpu_stage {
        pipeline.attach_gpu(Arc::clone(&stage.gpu));
    }
    pipeline.set_playback_rate(cli.playback_rate);

    // 4. Waveform reducer
    let worker = ReducerWorker::spawn(Some(metadata.total_samples))?;
    for chunk in samples.chunks(ADD_SAMPLES_CHUNK) {
        if !worker.send(WorkerRequest::AddSamples {
            samples: chunk.to_vec(),
            raw_samples: None,
        }) {
            anyhow::bail!("Waveform worker stopped while loading samples");
        }
    }

    // 5. Overview
    log::info!("Computing overview spectrogram...");
    pipeline.load_dataset(metadata.clone(), samples)?;
    wait_for_overview(&mut pipeline)?;

    // 6. Frame schedule: hold, zoom in, hold, zoom out, hold
    let fps = cli.fps as f64;
    let hold_frames = (cli.hold.max(0.0) * fps).round() as usize;
    let transition_frames = (cfg.transition_duration().as_secs_f64() * fps).ceil() as usize + 1;
    let enter_at = hold_frames;
    let region_hold_at = enter_at + transition_frames;
    let exit_at = region_hold_at + hold_frames;
    let total_frames = exit_at + transition_frames + hold_frames;

    // The frame loop below recomposes every frame itself.
    let mut animator = TransitionAnimator::new(cfg.transition_duration(), Vec::new());
    let planner = cfg.tick_planner();
    let text = match &cli.font {
        Some(path) => {
            let size = (cli.height as f32 * 0.025).max(12.0);
            Some(TextOverlay::from_file(path, size)?)
        }
        None => None,
    };
    let waveform_request = cfg.waveform_request(cli.width, strip_height);

    log::info!("Starting FFmpeg encoder...");
    let mut encoder = FfmpegEncoder::new(
        &cli.output,
        &EncoderSettings {
            width: cli.width,
            height: cli.height,
            fps: cli.fps,
            codec: &cli.codec,
            pix_fmt: &cli.pix_fmt,
            crf: cli.crf,
            bitrate: cli.bitrate.as_deref(),
        },
    )?;

    // 7. Render loop on a virtual clock
    let pb = ProgressBar::new(total_frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")?
            .progress_chars("=>-"),
    );

    let clock = Instant::now();
    let mut frame_pixels = vec![0u8; cli.width as usize * cli.height as usize * 4];

    for frame_idx in 0..total_frames {
        let now = clock + Duration::from_secs_f64(frame_idx as f64 / fps);

        if frame_idx == enter_at {
            match pipeline.request_region_render(region) {
                Ok(RegionRequest::Started(id)) => log::info!("Region render {} started", id),
                Ok(RegionRequest::Reused) => log::info!("Region texture reused"),
                Err(err) => log::warn!("Region render not started: {}", err),
            }
            let old = animator.display_range(&viewport).unwrap_or(data_range);
            viewport.enter_region(region, RegionId(1))?;
            animator.start(old, region, TransitionDirection::EnterRegion, now)?;
        }
        if frame_idx == region_hold_at {
            wait_for_region(&mut pipeline)?;
        }
        if frame_idx == exit_at {
            let old = animator.display_range(&viewport).unwrap_or(region);
            viewport.exit_to_full()?;
            animator.start(old, data_range, TransitionDirection::ExitRegion, now)?;
        }

        if gpu_stage.as_ref().is_some_and(|stage| stage.gpu.is_lost()) {
            pipeline.handle_context_lost();
            gpu_stage = match GpuStage::new(cli.width, spectrogram_height) {
                Ok(stage) => {
                    pipeline.handle_context_restored(Arc::clone(&stage.gpu));
                    Some(stage)
                }
                Err(err) => {
                    log::warn!("GPU could not be restored, continuing on the CPU: {:#}", err);
                    None
                }
            };
        }

        for event in pipeline.poll() {
            log_event(&event);
        }
        animator.tick(now);
        if let Some(MemoryReport::SuspectedLeak { first, last, samples }) = pipeline.check_memory(now) {
            log::warn!("Texture memory grew {} -> {} bytes over {} checks", first, last, samples);
        }

        let display = animator.display_range(&viewport).unwrap_or(data_range);

        // Spectrogram band
        let spectrogram = match pipeline.plan_frame(display, now) {
            Some(plan) => match &gpu_stage {
                Some(stage) if pipeline.gpu().is_some() => {
                    let bindings = pipeline.gpu_bindings(&plan);
                    stage.renderer.draw(&stage.gpu, &stage.frame, &plan, bindings.as_ref())?
                }
                _ => pipeline.render_cpu(&plan, cli.width, spectrogram_height),
            },
            None => {
                let mut blank = vec![0u8; cli.width as usize * spectrogram_height as usize * 4];
                overlay::fill_rows(&mut blank, cli.width, 0, spectrogram_height, pipeline.settings().background);
                blank
            }
        };
        overlay::blit_rows(&mut frame_pixels, cli.width, 0, &spectrogram);

        // Waveform strip
        overlay::fill_rows(&mut frame_pixels, cli.width, spectrogram_height, strip_height, overlay::WAVEFORM_BACKGROUND);
        let mut request = waveform_request.clone();
        if let Some(range) = viewport.range_to_samples(&display) {
            request.start_sample = Some(range.start);
            request.end_sample = Some(range.end);
        }
        if let Some((mins, maxs)) = build_waveform(&worker, request) {
            overlay::draw_envelope(
                &mut frame_pixels,
                cli.width,
                spectrogram_height,
                strip_height,
                &mins,
                &maxs,
                overlay::WAVEFORM_COLOR,
            );
        }

        // Time axis
        let ticks = planner.plan(&display, cli.width as f64, PanelCapabilities::default());
        let label_row = spectrogram_height.saturating_sub(text.as_ref().map_or(0, |t| t.line_height() + 4));
        overlay::draw_ticks(&mut frame_pixels, cli.width, cli.height, &ticks, text.as_ref(), label_row);

        encoder.write_frame(&frame_pixels)?;
        pb.set_position(frame_idx as u64 + 1);
    }

    pb.finish_with_message("Rendering complete");
    log::debug!("Pipeline requested {} redraws", redraw_requests.get());

    // 8. Finish encoding
    log::info!("Finishing encoding...");
    encoder.finish()?;
    worker.send(WorkerRequest::Reset);
    pipeline.dispose();

    log::info!("Done! Output: {}", cli.output.display());
    Ok(())
}

fn read_samples(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_samples(&bytes)
}

/// Little-endian f32 samples, four bytes each.
fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("Input length {} is not a whole number of f32 samples", bytes.len());
    }
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if samples.is_empty() {
        anyhow::bail!("Input contains no samples");
    }
    Ok(samples)
}

fn parse_start_time(text: &str) -> Result<Timestamp> {
    let time = chrono::DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid start time {:?}", text))?;
    Ok(time.timestamp() as f64 + time.timestamp_subsec_nanos() as f64 * 1e-9)
}

/// Zoom target from offsets in seconds; the middle tenth of the data by default.
fn region_range(data: &TimeRange, start: Option<f64>, end: Option<f64>) -> Result<TimeRange> {
    let duration = data.duration();
    let start = data.start + start.unwrap_or(duration * 0.45);
    let end = data.start + end.unwrap_or(duration * 0.55);
    let region = TimeRange::new(start, end);
    if !region.is_valid() || !data.contains_range(&region) || region == *data {
        anyhow::bail!(
            "Region [{:.1}s, {:.1}s] must be a non-empty part of the {:.1}s dataset",
            start - data.start,
            end - data.start,
            duration
        );
    }
    Ok(region)
}

fn wait_for_overview(pipeline: &mut SpectrogramPipeline) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.green/blue} {pos}/{len} columns")?
            .progress_chars("=>-"),
    );
    let deadline = Instant::now() + OVERVIEW_TIMEOUT;
    loop {
        for event in pipeline.poll() {
            match event {
                PipelineEvent::OverviewProgress { columns, total } => {
                    pb.set_length(total as u64);
                    pb.set_position(columns as u64);
                }
                PipelineEvent::OverviewReady => {
                    pb.finish_and_clear();
                    log::info!("Overview ready");
                    return Ok(());
                }
                PipelineEvent::RenderFailed { id, error } => {
                    anyhow::bail!("Overview render {} failed: {}", id, error);
                }
                other => log_event(&other),
            }
        }
        if Instant::now() > deadline {
            anyhow::bail!("Timed out waiting for the overview spectrogram");
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Let an in-flight region render finish before holding on the region.
fn wait_for_region(pipeline: &mut SpectrogramPipeline) -> Result<()> {
    let deadline = Instant::now() + REGION_CATCH_UP;
    while pipeline.is_region_pending() {
        for event in pipeline.poll() {
            log_event(&event);
        }
        if Instant::now() > deadline {
            log::warn!("Region render still pending, continuing with the overview");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn build_waveform(
    worker: &ReducerWorker,
    request: spectroview::audio::WaveformRequest,
) -> Option<(Vec<f32>, Vec<f32>)> {
    let sent = worker.send(WorkerRequest::BuildWaveform {
        canvas_width: request.canvas_width,
        canvas_height: request.canvas_height,
        remove_dc: request.remove_dc,
        alpha: request.alpha,
        start_sample: request.start_sample,
        end_sample: request.end_sample,
    });
    if !sent {
        log::warn!("Waveform worker is gone");
        return None;
    }
    match worker.recv_timeout(WAVEFORM_TIMEOUT) {
        Some(WorkerResponse::WaveformReady { mins, maxs, .. }) => Some((mins, maxs)),
        Some(other) => {
            log::debug!("Unexpected waveform worker reply: {:?}", other);
            None
        }
        None => {
            log::warn!("Waveform worker timed out");
            None
        }
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::OverviewProgress { columns, total } => {
            log::debug!("Overview {}/{} columns", columns, total)
        }
        PipelineEvent::OverviewReady => log::info!("Overview ready"),
        PipelineEvent::RegionReady(id) => log::info!("Region render {} ready", id),
        PipelineEvent::RenderCancelled(id) => log::debug!("Render {} cancelled", id),
        PipelineEvent::RenderFailed { id, error } => log::warn!("Render {} failed: {}", id, error),
    }
}
