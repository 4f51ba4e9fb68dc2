use chrono::{DateTime, Utc};

use crate::viewport::{TimeRange, Timestamp};

const MINUTE: u32 = 60;
const HOUR: u32 = 3600;
const DAY: u32 = 86_400;
const MAX_TICKS: usize = 10_000;

pub const DEFAULT_MIN_LABEL_SPACING: f64 = 44.0;

/// One rung of the tick ladder and the visible spans it is allowed for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickInterval {
    pub seconds: u32,
    min_span: f64,
    max_span: f64,
}

impl TickInterval {
    const fn new(seconds: u32, min_span: u32, max_span: Option<u32>) -> Self {
        Self {
            seconds,
            min_span: min_span as f64,
            max_span: match max_span {
                Some(s) => s as f64,
                None => f64::INFINITY,
            },
        }
    }

    pub fn is_eligible(&self, span_seconds: f64) -> bool {
        span_seconds >= self.min_span && span_seconds <= self.max_span
    }
}

/// Finest to coarsest. Every interval divides a UTC day.
pub const TICK_LADDER: [TickInterval; 12] = [
    TickInterval::new(MINUTE, 0, Some(HOUR)),
    TickInterval::new(5 * MINUTE, 0, Some(3 * HOUR)),
    TickInterval::new(10 * MINUTE, 0, Some(4 * HOUR)),
    TickInterval::new(15 * MINUTE, 0, Some(4 * HOUR)),
    TickInterval::new(30 * MINUTE, 0, Some(12 * HOUR)),
    TickInterval::new(HOUR, 0, Some(DAY)),
    TickInterval::new(2 * HOUR, 0, Some(2 * DAY)),
    TickInterval::new(4 * HOUR, 0, Some(4 * DAY)),
    TickInterval::new(6 * HOUR, 0, Some(6 * DAY)),
    TickInterval::new(8 * HOUR, 0, Some(8 * DAY)),
    TickInterval::new(12 * HOUR, 0, None),
    TickInterval::new(DAY, DAY, None),
];

#[derive(Clone, Debug, PartialEq)]
pub struct Tick {
    pub timestamp: Timestamp,
    pub x: f64,
    pub is_day_boundary: bool,
    pub label: String,
}

/// What a panel wants drawn on top of its time axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PanelCapabilities {
    /// Label day-boundary ticks with the date instead of the time of day.
    pub day_boundary_labels: bool,
    pub region_markers: bool,
}

impl Default for PanelCapabilities {
    fn default() -> Self {
        Self {
            day_boundary_labels: true,
            region_markers: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TickPlanner {
    min_label_spacing: f64,
}

impl Default for TickPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LABEL_SPACING)
    }
}

impl TickPlanner {
    pub fn new(min_label_spacing: f64) -> Self {
        Self { min_label_spacing }
    }

    pub fn min_label_spacing(&self) -> f64 {
        self.min_label_spacing
    }

    /// Finest eligible interval whose projected spacing meets the threshold,
    /// else the coarsest rung.
    pub fn choose_interval(&self, span_seconds: f64, canvas_width: f64) -> TickInterval {
        let coarsest = TICK_LADDER[TICK_LADDER.len() - 1];
        if !span_seconds.is_finite() || span_seconds <= 0.0 || canvas_width <= 0.0 {
            return coarsest;
        }
        TICK_LADDER
            .iter()
            .copied()
            .filter(|interval| interval.is_eligible(span_seconds))
            .find(|interval| {
                let tick_count = span_seconds / interval.seconds as f64;
                canvas_width / tick_count >= self.min_label_spacing
            })
            .unwrap_or(coarsest)
    }

    pub fn plan(&self, range: &TimeRange, canvas_width: f64, caps: PanelCapabilities) -> Vec<Tick> {
        if !range.is_valid() {
            return Vec::new();
        }
        let interval = self.choose_interval(range.duration(), canvas_width);
        generate_ticks(range, interval, canvas_width, caps)
    }
}

/// Ticks on absolute UTC multiples of `interval` inside `range`.
pub fn generate_ticks(
    range: &TimeRange,
    interval: TickInterval,
    canvas_width: f64,
    caps: PanelCapabilities,
) -> Vec<Tick> {
    if !range.is_valid() || canvas_width <= 0.0 {
        return Vec::new();
    }
    let step = interval.seconds as f64;
    let mut t = (range.start / step).ceil() * step;
    let mut ticks = Vec::new();
    let mut previous_day: Option<i64> = None;

    while t <= range.end && ticks.len() < MAX_TICKS {
        let day = (t / DAY as f64).floor() as i64;
        let at_midnight = t.rem_euclid(DAY as f64) == 0.0;
        let is_day_boundary = at_midnight || previous_day.is_some_and(|prev| prev != day);
        let label = format_label(t, is_day_boundary && caps.day_boundary_labels);

        ticks.push(Tick {
            timestamp: t,
            x: range.timestamp_to_pixel(t, canvas_width),
            is_day_boundary,
            label,
        });
        previous_day = Some(day);
        t += step;
    }
    ticks
}

fn format_label(t: Timestamp, as_date: bool) -> String {
    let Some(time) = DateTime::<Utc>::from_timestamp(t.floor() as i64, 0) else {
        return String::new();
    };
    if as_date {
        time.format("%b %d").to_string()
    } else {
        time.format("%H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const JAN_1: Timestamp = 1_704_067_200.0;

    #[test]
    fn six_hours_at_1200px_picks_half_hour() {
        let planner = TickPlanner::default();
        let interval = planner.choose_interval(21_600.0, 1200.0);
        assert_eq!(interval.seconds, 30 * MINUTE);

        let range = TimeRange::new(JAN_1, JAN_1 + 21_600.0);
        let ticks = generate_ticks(&range, interval, 1200.0, PanelCapabilities::default());
        assert_eq!(ticks.len(), 13);
        assert!((ticks[1].x - ticks[0].x - 100.0).abs() < 1e-6);
    }

    #[test]
    fn five_minute_region_picks_finest_rung() {
        let planner = TickPlanner::default();
        assert_eq!(planner.choose_interval(300.0, 1200.0).seconds, MINUTE);
    }

    #[test]
    fn daily_ticks_need_a_day_of_span() {
        let planner = TickPlanner::default();
        assert!(!TICK_LADDER[11].is_eligible(3600.0));
        let interval = planner.choose_interval(7.0 * 86_400.0, 1200.0);
        assert_eq!(interval.seconds, 8 * HOUR);
    }

    #[test]
    fn spacing_meets_threshold_and_narrowing_coarsens() {
        let planner = TickPlanner::default();
        for span in [600.0, 3600.0, 4.0 * 3600.0, 21_600.0, 86_400.0, 3.0 * 86_400.0] {
            let mut previous = 0;
            for width in (200..=2000).rev().step_by(50) {
                let width = width as f64;
                let interval = planner.choose_interval(span, width);
                assert!(interval.seconds >= previous, "span {} width {}", span, width);
                previous = interval.seconds;

                let range = TimeRange::new(JAN_1, JAN_1 + span);
                let ticks = generate_ticks(&range, interval, width, PanelCapabilities::default());
                let qualifies = width / (span / interval.seconds as f64) >= 44.0;
                if qualifies && ticks.len() >= 2 {
                    let avg = (ticks[ticks.len() - 1].x - ticks[0].x) / (ticks.len() - 1) as f64;
                    assert!(avg >= 44.0 - 1e-9, "span {} width {} avg {}", span, width, avg);
                }
            }
        }
    }

    #[test]
    fn ticks_are_utc_aligned() {
        let range = TimeRange::new(JAN_1 + 17.0 * 60.0, JAN_1 + 3.0 * 3600.0);
        let ticks = generate_ticks(&range, TICK_LADDER[4], 1000.0, PanelCapabilities::default());
        assert_eq!(ticks[0].timestamp, JAN_1 + 1800.0);
        assert_eq!(ticks[0].label, "00:30");
        assert!(ticks.iter().all(|t| t.timestamp.rem_euclid(1800.0) == 0.0));
    }

    #[test]
    fn midnight_is_a_day_boundary() {
        let range = TimeRange::new(JAN_1 - 7200.0, JAN_1 + 7200.0);
        let ticks = generate_ticks(&range, TICK_LADDER[5], 800.0, PanelCapabilities::default());
        let midnight = ticks.iter().find(|t| t.timestamp == JAN_1).unwrap();
        assert!(midnight.is_day_boundary);
        assert_eq!(midnight.label, "Jan 01");
        assert_eq!(ticks.iter().filter(|t| t.is_day_boundary).count(), 1);

        let plain = PanelCapabilities {
            day_boundary_labels: false,
            ..Default::default()
        };
        let ticks = generate_ticks(&range, TICK_LADDER[5], 800.0, plain);
        let midnight = ticks.iter().find(|t| t.timestamp == JAN_1).unwrap();
        assert!(midnight.is_day_boundary);
        assert_eq!(midnight.label, "00:00");
    }

    #[test]
    fn invalid_range_yields_no_ticks() {
        let planner = TickPlanner::default();
        let range = TimeRange::new(JAN_1, JAN_1);
        assert!(planner.plan(&range, 1000.0, PanelCapabilities::default()).is_empty());
    }
}
