use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch, UTC.
pub type Timestamp = f64;

/// A half-open span of absolute time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Finite bounds with `end > start`.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end > self.start
    }

    pub fn contains_range(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn midpoint(&self) -> Timestamp {
        self.start + self.duration() * 0.5
    }

    /// Linear interpolation of both endpoints towards `target`.
    pub fn lerp(&self, target: &TimeRange, t: f64) -> TimeRange {
        TimeRange {
            start: self.start + (target.start - self.start) * t,
            end: self.end + (target.end - self.end) * t,
        }
    }

    /// Expand by `fraction` of the duration on each side, clamped to `bounds`.
    pub fn padded(&self, fraction: f64, bounds: &TimeRange) -> TimeRange {
        let pad = self.duration() * fraction.max(0.0);
        TimeRange {
            start: (self.start - pad).max(bounds.start),
            end: (self.end + pad).min(bounds.end),
        }
    }

    /// Clamp into `bounds`, keeping the duration where it fits.
    pub fn clamped_to(&self, bounds: &TimeRange) -> TimeRange {
        let duration = self.duration().min(bounds.duration());
        let start = self.start.clamp(bounds.start, bounds.end - duration);
        TimeRange {
            start,
            end: start + duration,
        }
    }

    /// `(t - start) / duration * width`; 0 when the span is degenerate.
    pub fn timestamp_to_pixel(&self, t: Timestamp, width: f64) -> f64 {
        let duration = self.duration();
        if !duration.is_finite() || duration <= 0.0 || !t.is_finite() || !width.is_finite() {
            return 0.0;
        }
        (t - self.start) / duration * width
    }

    pub fn pixel_to_timestamp(&self, x: f64, width: f64) -> Timestamp {
        if !width.is_finite() || width <= 0.0 || !x.is_finite() || !self.is_valid() {
            return self.start;
        }
        let fraction = (x / width).clamp(0.0, 1.0);
        self.start + fraction * self.duration()
    }

    /// Position of `t` within this range as a fraction, unclamped.
    pub fn fraction_of(&self, t: Timestamp) -> f64 {
        let duration = self.duration();
        if !duration.is_finite() || duration <= 0.0 {
            return 0.0;
        }
        (t - self.start) / duration
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleRange {
    pub start: u64,
    pub end: u64,
}

impl SampleRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dataset description handed over by the data source at load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    /// Acquisition rate of the sensor, not the playback/output rate.
    pub original_sample_rate: f64,
    pub resampling_ratio: f64,
    pub data_start_time: Timestamp,
    pub data_end_time: Timestamp,
    pub total_samples: u64,
}

impl DatasetMetadata {
    pub fn data_range(&self) -> TimeRange {
        TimeRange::new(self.data_start_time, self.data_end_time)
    }

    /// Fractional sample index of `t`, unclamped.
    pub fn sample_position(&self, t: Timestamp) -> f64 {
        self.data_range().fraction_of(t) * self.total_samples as f64
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if !(self.original_sample_rate.is_finite() && self.original_sample_rate > 0.0) {
            return Err("sample rate must be positive");
        }
        if !(self.resampling_ratio.is_finite() && self.resampling_ratio > 0.0) {
            return Err("resampling ratio must be positive");
        }
        if !self.data_range().is_valid() {
            return Err("data end must follow data start");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_clamps_to_bounds() {
        let bounds = TimeRange::new(0.0, 100.0);
        let r = TimeRange::new(5.0, 15.0).padded(0.3, &bounds);
        assert_eq!(r.start, 2.0);
        assert_eq!(r.end, 18.0);

        let edge = TimeRange::new(0.0, 10.0).padded(0.3, &bounds);
        assert_eq!(edge.start, 0.0);
        assert_eq!(edge.end, 13.0);
    }

    #[test]
    fn clamped_keeps_duration() {
        let bounds = TimeRange::new(0.0, 100.0);
        let r = TimeRange::new(95.0, 110.0).clamped_to(&bounds);
        assert_eq!(r, TimeRange::new(85.0, 100.0));
        let wide = TimeRange::new(-50.0, 200.0).clamped_to(&bounds);
        assert_eq!(wide, bounds);
    }

    #[test]
    fn sample_position_spans_the_data() {
        let metadata = DatasetMetadata {
            original_sample_rate: 100.0,
            resampling_ratio: 1.0,
            data_start_time: 1000.0,
            data_end_time: 1200.0,
            total_samples: 20_000,
        };
        assert_eq!(metadata.sample_position(1000.0), 0.0);
        assert_eq!(metadata.sample_position(1200.0), 20_000.0);
        assert!((metadata.sample_position(1050.0) - 5_000.0).abs() < 1e-6);
        assert!(metadata.sample_position(900.0) < 0.0);
    }

    #[test]
    fn degenerate_range_maps_to_zero() {
        let r = TimeRange::new(10.0, 10.0);
        assert_eq!(r.timestamp_to_pixel(10.0, 500.0), 0.0);
        let nan = TimeRange::new(0.0, f64::NAN);
        assert_eq!(nan.timestamp_to_pixel(1.0, 500.0), 0.0);
    }

    #[test]
    fn pixel_input_is_clamped() {
        let r = TimeRange::new(0.0, 10.0);
        assert_eq!(r.pixel_to_timestamp(-20.0, 100.0), 0.0);
        assert_eq!(r.pixel_to_timestamp(250.0, 100.0), 10.0);
    }

    #[test]
    fn metadata_validation() {
        let mut meta = DatasetMetadata {
            original_sample_rate: 50.0,
            resampling_ratio: 1.0,
            data_start_time: 0.0,
            data_end_time: 10.0,
            total_samples: 500,
        };
        assert!(meta.validate().is_ok());
        meta.original_sample_rate = 0.0;
        assert!(meta.validate().is_err());
    }
}
