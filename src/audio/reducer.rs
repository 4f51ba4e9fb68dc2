use std::f32::consts::PI;

/// Per-column `(min, max)` envelope ready for waveform drawing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaveformEnvelope {
    pub mins: Vec<f32>,
    pub maxs: Vec<f32>,
    pub total_samples: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaveformRequest {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub remove_dc: bool,
    /// EMA coefficient of the drift-removal pass.
    pub alpha: f32,
    pub start_sample: Option<u64>,
    pub end_sample: Option<u64>,
}

struct DriftCache {
    alpha_bits: u32,
    generation: u64,
    data: Vec<f32>,
}

/// Reduces an append-only sample stream to a fixed-width envelope.
pub struct SampleReducer {
    samples: Vec<f32>,
    raw_samples: Vec<f32>,
    expected_total: Option<u64>,
    generation: u64,
    drift_cache: Option<DriftCache>,
}

impl SampleReducer {
    /// `expected_total` lets progressive builds fill only the loaded fraction.
    pub fn new(expected_total: Option<u64>) -> Self {
        Self {
            samples: Vec::new(),
            raw_samples: Vec::new(),
            expected_total,
            generation: 0,
            drift_cache: None,
        }
    }

    pub fn add_samples(&mut self, samples: &[f32], raw_samples: Option<&[f32]>) {
        self.samples.extend_from_slice(samples);
        if let Some(raw) = raw_samples {
            self.raw_samples.extend_from_slice(raw);
        }
        self.generation += 1;
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.raw_samples.clear();
        self.drift_cache = None;
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn build(&mut self, request: &WaveformRequest) -> WaveformEnvelope {
        let width = request.canvas_width as usize;
        let total_samples = self.samples.len() as u64;
        let zoomed = request.start_sample.is_some() || request.end_sample.is_some();
        let expected_total = self.expected_total;

        let source: &[f32] = if request.remove_dc {
            self.drift_removed(request.alpha)
        } else {
            &self.samples
        };

        let (mins, maxs) = if zoomed {
            let len = source.len() as u64;
            let start = request.start_sample.unwrap_or(0).min(len) as usize;
            let end = request.end_sample.unwrap_or(len).clamp(start as u64, len) as usize;
            let slice = &source[start..end];
            reduce_min_max(slice, width, slice.len() as f64 / width.max(1) as f64)
        } else {
            let span = expected_total
                .unwrap_or(source.len() as u64)
                .max(source.len() as u64);
            reduce_min_max(source, width, span as f64 / width.max(1) as f64)
        };

        WaveformEnvelope {
            mins,
            maxs,
            total_samples,
        }
    }

    /// High-passed copy of the history, cached per (alpha, dataset generation).
    fn drift_removed(&mut self, alpha: f32) -> &[f32] {
        let alpha_bits = alpha.to_bits();
        let fresh = self
            .drift_cache
            .as_ref()
            .is_some_and(|c| c.alpha_bits == alpha_bits && c.generation == self.generation);
        if !fresh {
            let input = if self.raw_samples.len() == self.samples.len() {
                &self.raw_samples
            } else {
                &self.samples
            };
            log::debug!("Recomputing drift removal over {} samples (alpha={})", input.len(), alpha);
            self.drift_cache = Some(DriftCache {
                alpha_bits,
                generation: self.generation,
                data: remove_drift(input, alpha),
            });
        }
        match &self.drift_cache {
            Some(cache) => &cache.data,
            None => &self.samples,
        }
    }
}

/// Column `i` covers `[floor(i * spp), floor((i + 1) * spp))`. Empty columns are `(0, 0)`.
pub fn reduce_min_max(samples: &[f32], width: usize, samples_per_pixel: f64) -> (Vec<f32>, Vec<f32>) {
    let mut mins = vec![0.0f32; width];
    let mut maxs = vec![0.0f32; width];
    if samples.is_empty() || samples_per_pixel <= 0.0 || !samples_per_pixel.is_finite() {
        return (mins, maxs);
    }

    for i in 0..width {
        let start = ((i as f64 * samples_per_pixel).floor() as usize).min(samples.len());
        let end = (((i + 1) as f64 * samples_per_pixel).floor() as usize).min(samples.len());
        if start >= end {
            continue;
        }
        let (lo, hi) = samples[start..end]
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        mins[i] = lo;
        maxs[i] = hi;
    }
    (mins, maxs)
}

/// Zero-phase high-pass: subtract the average of a forward and a backward EMA,
/// each warm-started from the mean of its leading edge, then taper both ends.
pub fn remove_drift(samples: &[f32], alpha: f32) -> Vec<f32> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let alpha = alpha.clamp(f32::EPSILON, 1.0);
    let warm = ((1.0 / alpha).round() as usize).clamp(1, n);

    let edge_mean = |edge: &[f32]| edge.iter().sum::<f32>() / edge.len() as f32;

    let mut forward = vec![0.0f32; n];
    let mut state = edge_mean(&samples[..warm]);
    for i in 0..n {
        state = alpha * samples[i] + (1.0 - alpha) * state;
        forward[i] = state;
    }

    let mut backward = vec![0.0f32; n];
    let mut state = edge_mean(&samples[n - warm..]);
    for i in (0..n).rev() {
        state = alpha * samples[i] + (1.0 - alpha) * state;
        backward[i] = state;
    }

    let mut out: Vec<f32> = (0..n)
        .map(|i| samples[i] - (forward[i] + backward[i]) * 0.5)
        .collect();

    let taper = warm.min(n / 2);
    for i in 0..taper {
        let w = 0.5 * (1.0 - (PI * i as f32 / taper as f32).cos());
        out[i] *= w;
        out[n - 1 - i] *= w;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32) -> WaveformRequest {
        WaveformRequest {
            canvas_width: width,
            canvas_height: 100,
            remove_dc: false,
            alpha: 0.01,
            start_sample: None,
            end_sample: None,
        }
    }

    #[test]
    fn min_max_per_column() {
        let samples = [0.0, 1.0, -1.0, 0.5, 0.2, -0.3, 0.9, 0.1];
        let (mins, maxs) = reduce_min_max(&samples, 4, 2.0);
        assert_eq!(mins, vec![0.0, -1.0, -0.3, 0.1]);
        assert_eq!(maxs, vec![1.0, 0.5, 0.2, 0.9]);
    }

    #[test]
    fn empty_columns_are_zero() {
        let (mins, maxs) = reduce_min_max(&[0.5, -0.5], 4, 0.5);
        // columns 1 and 3 hold one sample each, 0 and 2 are empty
        assert_eq!(mins, vec![0.0, 0.5, 0.0, -0.5]);
        assert_eq!(maxs, vec![0.0, 0.5, 0.0, -0.5]);
    }

    #[test]
    fn progressive_mode_fills_loaded_fraction() {
        let mut reducer = SampleReducer::new(Some(1000));
        reducer.add_samples(&vec![1.0; 250], None);
        let envelope = reducer.build(&request(100));
        assert_eq!(envelope.total_samples, 250);
        assert!(envelope.maxs[..25].iter().all(|&m| m == 1.0));
        assert!(envelope.maxs[25..].iter().all(|&m| m == 0.0));
    }

    #[test]
    fn zoomed_mode_fills_entire_width() {
        let mut reducer = SampleReducer::new(Some(1000));
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        reducer.add_samples(&samples, None);
        let envelope = reducer.build(&WaveformRequest {
            start_sample: Some(100),
            end_sample: Some(200),
            ..request(10)
        });
        assert_eq!(envelope.mins[0], 100.0);
        assert_eq!(envelope.maxs[9], 199.0);
        assert!(envelope.maxs.iter().all(|&m| m > 0.0));
    }

    #[test]
    fn drift_removal_flattens_offset() {
        let samples: Vec<f32> = (0..4000)
            .map(|i| 5.0 + (i as f32 * 0.3).sin() * 0.1)
            .collect();
        let out = remove_drift(&samples, 0.01);
        let mid = &out[1000..3000];
        let mean = mid.iter().sum::<f32>() / mid.len() as f32;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn drift_cache_tracks_alpha_and_data() {
        let mut reducer = SampleReducer::new(None);
        reducer.add_samples(&vec![2.0; 500], None);
        let dc = WaveformRequest {
            remove_dc: true,
            ..request(10)
        };
        reducer.build(&dc);
        let generation = reducer.drift_cache.as_ref().map(|c| c.generation);
        reducer.build(&dc);
        assert_eq!(reducer.drift_cache.as_ref().map(|c| c.generation), generation);

        reducer.add_samples(&[2.0; 10], None);
        reducer.build(&dc);
        assert_ne!(reducer.drift_cache.as_ref().map(|c| c.generation), generation);

        reducer.build(&WaveformRequest { alpha: 0.5, ..dc });
        assert_eq!(
            reducer.drift_cache.as_ref().map(|c| c.alpha_bits),
            Some(0.5f32.to_bits())
        );
    }

    #[test]
    fn reset_twice_matches_once() {
        let mut reducer = SampleReducer::new(None);
        reducer.add_samples(&[1.0, 2.0], Some(&[1.0, 2.0][..]));
        reducer.reset();
        reducer.reset();
        assert!(reducer.is_empty());
        assert!(reducer.drift_cache.is_none());
        assert_eq!(reducer.build(&request(4)), WaveformEnvelope {
            mins: vec![0.0; 4],
            maxs: vec![0.0; 4],
            total_samples: 0,
        });
    }
}
