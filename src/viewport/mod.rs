//! The coordinate authority: the only owner of "what time range is visible".
//!
//! Four coordinate spaces meet here: absolute timestamp, sample index,
//! normalized progress through the dataset, and device pixel. Timestamps are
//! authoritative; sample positions are always re-derived from them, never
//! accumulated, so resampling and variable output rates cannot drift the
//! clock away from wall time.

mod range;

pub use range::{DatasetMetadata, SampleRange, TimeRange, Timestamp};

use crate::error::ViewportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMode {
    Uninitialized,
    Full,
    Region(RegionId),
}

#[derive(Debug, Clone)]
pub struct ViewportState {
    mode: ViewMode,
    view: TimeRange,
    metadata: Option<DatasetMetadata>,
    total_samples: u64,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportState {
    pub fn new() -> Self {
        Self {
            mode: ViewMode::Uninitialized,
            view: TimeRange::new(0.0, 0.0),
            metadata: None,
            total_samples: 0,
        }
    }

    /// Attach metadata for a newly loaded dataset. Any previous view is dropped.
    pub fn set_metadata(&mut self, metadata: DatasetMetadata) -> Result<(), ViewportError> {
        metadata.validate().map_err(ViewportError::InvalidMetadata)?;
        self.reset();
        self.total_samples = metadata.total_samples;
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Show the full dataset span once the sample count is known.
    pub fn initialize(&mut self, total_samples: u64) -> Result<(), ViewportError> {
        let metadata = self.metadata.as_ref().ok_or(ViewportError::MissingMetadata)?;
        if total_samples == 0 {
            return Err(ViewportError::InvalidMetadata("total samples must be positive"));
        }
        self.total_samples = total_samples;
        self.view = metadata.data_range();
        self.mode = ViewMode::Full;
        log::info!(
            "Viewport initialized: {} samples over {:.1}s",
            total_samples,
            self.view.duration()
        );
        Ok(())
    }

    pub fn enter_region(&mut self, range: TimeRange, id: RegionId) -> Result<(), ViewportError> {
        let data = self.data_range().ok_or(ViewportError::NotInitialized)?;
        if self.mode == ViewMode::Uninitialized {
            return Err(ViewportError::NotInitialized);
        }
        if !range.is_valid() {
            log::warn!("Ignoring region with invalid range [{}, {}]", range.start, range.end);
            return Err(ViewportError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        if !data.contains_range(&range) || range == data {
            return Err(ViewportError::RegionOutsideDataset {
                start: range.start,
                end: range.end,
            });
        }
        self.view = range;
        self.mode = ViewMode::Region(id);
        Ok(())
    }

    pub fn exit_to_full(&mut self) -> Result<(), ViewportError> {
        if self.mode == ViewMode::Uninitialized {
            return Err(ViewportError::NotInitialized);
        }
        let data = self.data_range().ok_or(ViewportError::MissingMetadata)?;
        self.view = data;
        self.mode = ViewMode::Full;
        Ok(())
    }

    /// Pan or zoom within the current mode. The range is clamped to the dataset.
    pub fn set_view(&mut self, range: TimeRange) -> Result<(), ViewportError> {
        if self.mode == ViewMode::Uninitialized {
            return Err(ViewportError::NotInitialized);
        }
        if !range.is_valid() {
            log::warn!("Ignoring view with invalid range [{}, {}]", range.start, range.end);
            return Err(ViewportError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        let data = self.data_range().ok_or(ViewportError::MissingMetadata)?;
        self.view = range.clamped_to(&data);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.mode = ViewMode::Uninitialized;
        self.view = TimeRange::new(0.0, 0.0);
        self.metadata = None;
        self.total_samples = 0;
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn active_region(&self) -> Option<RegionId> {
        match self.mode {
            ViewMode::Region(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.mode != ViewMode::Uninitialized
    }

    pub fn view_range(&self) -> Option<TimeRange> {
        self.is_initialized().then_some(self.view)
    }

    pub fn data_range(&self) -> Option<TimeRange> {
        self.metadata.as_ref().map(DatasetMetadata::data_range)
    }

    pub fn metadata(&self) -> Option<&DatasetMetadata> {
        self.metadata.as_ref()
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Original acquisition rate.
    pub fn sample_rate(&self) -> Option<f64> {
        self.metadata.as_ref().map(|m| m.original_sample_rate)
    }

    /// Rate the samples are delivered at after resampling.
    pub fn output_sample_rate(&self) -> Option<f64> {
        self.metadata
            .as_ref()
            .map(|m| m.original_sample_rate * m.resampling_ratio)
    }

    pub fn timestamp_to_pixel(&self, t: Timestamp, width: f64) -> Option<f64> {
        self.view_range().map(|view| view.timestamp_to_pixel(t, width))
    }

    pub fn pixel_to_timestamp(&self, x: f64, width: f64) -> Option<Timestamp> {
        self.view_range().map(|view| view.pixel_to_timestamp(x, width))
    }

    /// `dataStart + (s / totalSamples) * (dataEnd - dataStart)`.
    pub fn sample_to_timestamp(&self, sample: u64) -> Option<Timestamp> {
        if !self.is_initialized() || self.total_samples == 0 {
            return None;
        }
        let data = self.data_range()?;
        let fraction = sample as f64 / self.total_samples as f64;
        Some(data.start + fraction * data.duration())
    }

    /// Inverse of [`sample_to_timestamp`](Self::sample_to_timestamp), clamped to `[0, totalSamples]`.
    pub fn timestamp_to_sample(&self, t: Timestamp) -> Option<u64> {
        if !self.is_initialized() || self.total_samples == 0 || !t.is_finite() {
            return None;
        }
        let data = self.data_range()?;
        let fraction = data.fraction_of(t).clamp(0.0, 1.0);
        Some((fraction * self.total_samples as f64).round() as u64)
    }

    pub fn range_to_samples(&self, range: &TimeRange) -> Option<SampleRange> {
        let start = self.timestamp_to_sample(range.start)?;
        let end = self.timestamp_to_sample(range.end)?;
        Some(SampleRange::new(start, end.max(start)))
    }

    /// Normalized position in the dataset, clamped to `[0, 1]`.
    pub fn timestamp_to_progress(&self, t: Timestamp) -> Option<f64> {
        if !self.is_initialized() {
            return None;
        }
        let data = self.data_range()?;
        Some(data.fraction_of(t).clamp(0.0, 1.0))
    }

    pub fn progress_to_timestamp(&self, progress: f64) -> Option<Timestamp> {
        if !self.is_initialized() || !progress.is_finite() {
            return None;
        }
        let data = self.data_range()?;
        Some(data.start + progress.clamp(0.0, 1.0) * data.duration())
    }

    /// Visible span in samples at the original rate, rounded down.
    pub fn view_range_samples(&self) -> u64 {
        match (self.view_range(), self.sample_rate()) {
            (Some(view), Some(rate)) if view.is_valid() => (view.duration() * rate).floor() as u64,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const JAN_1: Timestamp = 1_704_067_200.0;

    fn six_hour_dataset() -> ViewportState {
        let mut viewport = ViewportState::new();
        viewport
            .set_metadata(DatasetMetadata {
                original_sample_rate: 50.0,
                resampling_ratio: 882.0,
                data_start_time: JAN_1,
                data_end_time: JAN_1 + 21_600.0,
                total_samples: 21_600 * 50,
            })
            .unwrap();
        viewport.initialize(21_600 * 50).unwrap();
        viewport
    }

    #[test]
    fn queries_before_initialization_return_none() {
        let viewport = ViewportState::new();
        assert_eq!(viewport.timestamp_to_pixel(JAN_1, 100.0), None);
        assert_eq!(viewport.pixel_to_timestamp(10.0, 100.0), None);
        assert_eq!(viewport.sample_to_timestamp(0), None);
        assert_eq!(viewport.timestamp_to_sample(JAN_1), None);
        assert_eq!(viewport.view_range_samples(), 0);
    }

    #[test]
    fn initialize_requires_metadata() {
        let mut viewport = ViewportState::new();
        assert_eq!(viewport.initialize(10), Err(ViewportError::MissingMetadata));
    }

    #[test]
    fn pixel_round_trip_within_one_pixel() {
        let viewport = six_hour_dataset();
        let width = 1200.0;
        for x in 0..1200 {
            let t = viewport.pixel_to_timestamp(x as f64, width).unwrap();
            let back = viewport.timestamp_to_pixel(t, width).unwrap();
            assert!((back - x as f64).abs() <= 1.0, "x={} back={}", x, back);
        }
    }

    #[test]
    fn sample_timestamp_round_trip_is_exact() {
        let viewport = six_hour_dataset();
        let total = viewport.total_samples();
        for s in (0..=total).step_by(997).chain([total]) {
            let t = viewport.sample_to_timestamp(s).unwrap();
            assert_eq!(viewport.timestamp_to_sample(t), Some(s));
        }
    }

    #[test]
    fn region_midpoint_maps_to_center() {
        let mut viewport = six_hour_dataset();
        let region = TimeRange::new(JAN_1 + 3600.0, JAN_1 + 3900.0);
        viewport.enter_region(region, RegionId(7)).unwrap();
        assert_eq!(viewport.active_region(), Some(RegionId(7)));
        let x = viewport.timestamp_to_pixel(JAN_1 + 3750.0, 1200.0).unwrap();
        assert!((x - 600.0).abs() <= 1.0);
        assert_eq!(viewport.view_range_samples(), 300 * 50);
    }

    #[test]
    fn region_must_be_strict_subset() {
        let mut viewport = six_hour_dataset();
        let full = viewport.data_range().unwrap();
        assert!(viewport.enter_region(full, RegionId(1)).is_err());
        let outside = TimeRange::new(JAN_1 - 10.0, JAN_1 + 10.0);
        assert!(viewport.enter_region(outside, RegionId(1)).is_err());
        let inverted = TimeRange::new(JAN_1 + 10.0, JAN_1 + 5.0);
        assert!(matches!(
            viewport.enter_region(inverted, RegionId(1)),
            Err(ViewportError::InvalidRange { .. })
        ));
        assert_eq!(viewport.mode(), ViewMode::Full);
    }

    #[test]
    fn exit_to_full_restores_dataset_span() {
        let mut viewport = six_hour_dataset();
        viewport
            .enter_region(TimeRange::new(JAN_1 + 60.0, JAN_1 + 120.0), RegionId(2))
            .unwrap();
        viewport.exit_to_full().unwrap();
        assert_eq!(viewport.mode(), ViewMode::Full);
        assert_eq!(viewport.view_range(), viewport.data_range());
        assert_eq!(viewport.active_region(), None);
    }

    #[test]
    fn set_view_clamps_into_dataset() {
        let mut viewport = six_hour_dataset();
        viewport
            .set_view(TimeRange::new(JAN_1 + 21_000.0, JAN_1 + 22_000.0))
            .unwrap();
        let view = viewport.view_range().unwrap();
        assert_eq!(view.end, JAN_1 + 21_600.0);
        assert_eq!(view.duration(), 1000.0);
    }

    #[test]
    fn progress_conversions() {
        let viewport = six_hour_dataset();
        assert_eq!(viewport.timestamp_to_progress(JAN_1 + 10_800.0), Some(0.5));
        assert_eq!(viewport.progress_to_timestamp(2.0), Some(JAN_1 + 21_600.0));
        assert_eq!(viewport.sample_rate(), Some(50.0));
        assert_eq!(viewport.output_sample_rate(), Some(44_100.0));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut once = six_hour_dataset();
        once.reset();
        let mut twice = six_hour_dataset();
        twice.reset();
        twice.reset();
        assert_eq!(once.mode(), twice.mode());
        assert_eq!(once.view_range(), twice.view_range());
        assert_eq!(once.metadata(), twice.metadata());
        assert_eq!(once.total_samples(), twice.total_samples());
    }
}
