use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use crate::viewport::SampleRange;

pub const DEFAULT_FFT_SIZE: usize = 2048;

thread_local! {
    static FFT_PLANNER: RefCell<FftPlanner<f32>> = RefCell::new(FftPlanner::new());
    static HANN_CACHE: RefCell<HashMap<usize, Arc<[f32]>>> = RefCell::new(HashMap::new());
}

/// How a texture's columns tile its source samples. Column `c` owns
/// `span.start + [c, c + 1) * hop` and its FFT window is centred there, so
/// texture coordinate `u` maps linearly onto the span.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SliceLayout {
    pub span: SampleRange,
    pub hop: f64,
    pub columns: usize,
    pub fft_size: usize,
}

impl SliceLayout {
    /// One slice per canvas column over the whole dataset.
    pub fn overview(total_samples: u64, fft_size: usize, canvas_width: usize) -> Option<Self> {
        Self::region(SampleRange::new(0, total_samples), fft_size, canvas_width)
    }

    /// Up to `columns` slices spread evenly across `range`, never more than
    /// there are distinct window positions.
    pub fn region(range: SampleRange, fft_size: usize, columns: usize) -> Option<Self> {
        if range.len() <= fft_size as u64 || columns == 0 {
            return None;
        }
        let available = range.len() - fft_size as u64;
        let columns = columns.min(available as usize + 1);
        Some(Self {
            span: range,
            hop: range.len() as f64 / columns as f64,
            columns,
            fft_size,
        })
    }

    pub fn column_center(&self, column: usize) -> f64 {
        self.span.start as f64 + (column as f64 + 0.5) * self.hop
    }

    /// First sample of the column's window. May lie before zero or run past
    /// the data near the edges; those samples read as silence.
    pub fn column_start(&self, column: usize) -> i64 {
        (self.column_center(column) - self.fft_size as f64 / 2.0).round() as i64
    }

    pub fn sample_range(&self) -> SampleRange {
        self.span
    }

    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }
}

pub fn hann_window(size: usize) -> Arc<[f32]> {
    HANN_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .entry(size)
            .or_insert_with(|| {
                (0..size)
                    .map(|i| {
                        0.5 * (1.0
                            - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
                    })
                    .collect()
            })
            .clone()
    })
}

/// Hann-windowed magnitude spectrum of `fft_size` samples starting at `start`.
/// Anything outside `samples` reads as silence.
pub fn magnitude_spectrum(samples: &[f32], start: i64, fft_size: usize) -> Vec<f32> {
    let window = hann_window(fft_size);
    let fft = FFT_PLANNER.with(|p| p.borrow_mut().plan_fft_forward(fft_size));

    let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); fft_size];
    let lo = start.max(0);
    let hi = (start + fft_size as i64).min(samples.len() as i64);
    for index in lo..hi {
        let i = (index - start) as usize;
        buffer[i] = Complex::new(samples[index as usize] * window[i], 0.0);
    }
    fft.process(&mut buffer);

    // Amplitude-normalized so a full-scale sinusoid peaks near 1.0.
    let window_sum: f32 = window.iter().sum();
    let scale = if window_sum > 0.0 { 2.0 / window_sum } else { 0.0 };
    buffer[..fft_size / 2].iter().map(|c| c.norm() * scale).collect()
}

/// Spectra for `columns` of `layout`, computed in parallel on the current rayon pool.
pub fn compute_columns(samples: &[f32], layout: &SliceLayout, columns: Range<usize>) -> Vec<Vec<f32>> {
    columns
        .into_par_iter()
        .map(|column| {
            magnitude_spectrum(samples, layout.column_start(column), layout.fft_size)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_hop_follows_canvas_width() {
        let layout = SliceLayout::overview(100_000, 2048, 1000).unwrap();
        assert_eq!(layout.hop, 100.0);
        assert_eq!(layout.columns, 1000);
        assert_eq!(layout.bins(), 1024);
        assert_eq!(layout.sample_range(), SampleRange::new(0, 100_000));
        assert!(SliceLayout::overview(2048, 2048, 1000).is_none());
    }

    #[test]
    fn short_dataset_caps_columns_at_window_positions() {
        let layout = SliceLayout::overview(2100, 2048, 1000).unwrap();
        assert_eq!(layout.columns, 53);
        assert!((layout.hop - 2100.0 / 53.0).abs() < 1e-9);
        assert_eq!(layout.sample_range(), SampleRange::new(0, 2100));
    }

    #[test]
    fn region_layout_centres_windows_on_columns() {
        let layout = SliceLayout::region(SampleRange::new(10_000, 30_000), 2048, 500).unwrap();
        assert_eq!(layout.hop, 40.0);
        assert_eq!(layout.column_center(0), 10_020.0);
        assert_eq!(layout.column_start(0), 10_020 - 1024);
        assert_eq!(layout.column_center(499), 29_980.0);
        assert_eq!(layout.sample_range(), SampleRange::new(10_000, 30_000));
        assert!(SliceLayout::region(SampleRange::new(0, 50), 2048, 500).is_none());
    }

    #[test]
    fn edge_columns_straddle_the_data() {
        let layout = SliceLayout::overview(100, 64, 10).unwrap();
        assert!(layout.column_start(0) < 0);
        assert!(layout.column_start(9) + 64 > 100);
    }

    #[test]
    fn sinusoid_peaks_in_expected_bin() {
        let rate = 8000.0;
        let freq = 1000.0;
        let samples: Vec<f32> = (0..4096)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect();
        let spectrum = magnitude_spectrum(&samples, 0, 1024);
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 128);
        assert!((spectrum[peak] - 1.0).abs() < 0.05, "peak {}", spectrum[peak]);
    }

    #[test]
    fn columns_past_end_are_silent() {
        let spectrum = magnitude_spectrum(&[1.0; 10], 100, 64);
        assert!(spectrum.iter().all(|&m| m == 0.0));
        let before = magnitude_spectrum(&[1.0; 10], -64, 64);
        assert!(before.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn window_before_start_zero_pads() {
        let samples = vec![1.0f32; 64];
        let inside = magnitude_spectrum(&samples, 0, 64);
        let straddling = magnitude_spectrum(&samples, -32, 64);
        // Half the window is silent, so the DC term roughly halves.
        assert!(straddling[0] > 0.0);
        assert!(straddling[0] < inside[0] * 0.75, "{} vs {}", straddling[0], inside[0]);
    }
}
