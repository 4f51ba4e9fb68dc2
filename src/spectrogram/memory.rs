use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryReport {
    Healthy { bytes: usize },
    /// Every sample in a full window grew over the previous one.
    SuspectedLeak { first: usize, last: usize, samples: usize },
}

/// Periodic memory health check. Only reports; never frees anything.
pub struct MemoryMonitor {
    interval: Duration,
    window: usize,
    samples: VecDeque<usize>,
    last_check: Option<Instant>,
}

impl MemoryMonitor {
    pub fn new(interval: Duration, window: usize) -> Self {
        Self {
            interval,
            window: window.max(2),
            samples: VecDeque::new(),
            last_check: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_check
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Record `bytes` if the interval has elapsed; returns the verdict when a sample was taken.
    pub fn check(&mut self, now: Instant, bytes: usize) -> Option<MemoryReport> {
        if !self.is_due(now) {
            return None;
        }
        self.last_check = Some(now);
        Some(self.record(bytes))
    }

    pub fn record(&mut self, bytes: usize) -> MemoryReport {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(bytes);

        let growing = self.samples.len() == self.window
            && self
                .samples
                .iter()
                .zip(self.samples.iter().skip(1))
                .all(|(a, b)| b > a);

        if growing {
            let first = self.samples.front().copied().unwrap_or(0);
            log::warn!(
                "Texture memory grew on each of the last {} checks ({} -> {} bytes)",
                self.window,
                first,
                bytes
            );
            MemoryReport::SuspectedLeak {
                first,
                last: bytes,
                samples: self.window,
            }
        } else {
            MemoryReport::Healthy { bytes }
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_check = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_growth_is_flagged() {
        let mut monitor = MemoryMonitor::new(Duration::from_secs(5), 3);
        assert_eq!(monitor.record(10), MemoryReport::Healthy { bytes: 10 });
        assert_eq!(monitor.record(20), MemoryReport::Healthy { bytes: 20 });
        assert_eq!(
            monitor.record(30),
            MemoryReport::SuspectedLeak {
                first: 10,
                last: 30,
                samples: 3
            }
        );
        // a plateau breaks the run
        assert_eq!(monitor.record(30), MemoryReport::Healthy { bytes: 30 });
    }

    #[test]
    fn checks_respect_interval() {
        let mut monitor = MemoryMonitor::new(Duration::from_secs(5), 3);
        let t0 = Instant::now();
        assert!(monitor.check(t0, 1).is_some());
        assert!(monitor.check(t0 + Duration::from_secs(1), 2).is_none());
        assert!(monitor.check(t0 + Duration::from_secs(5), 2).is_some());
        monitor.reset();
        assert!(monitor.is_due(t0));
    }
}
