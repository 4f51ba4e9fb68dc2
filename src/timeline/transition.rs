use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use crate::error::ViewportError;
use crate::viewport::{TimeRange, ViewportState};

pub const DEFAULT_TRANSITION_DURATION: Duration = Duration::from_millis(600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionDirection {
    EnterRegion,
    ExitRegion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionReason {
    Completed,
    /// Replaced by a newer transition before finishing.
    Superseded,
    Stopped,
    /// Frames were starved past twice the expected duration.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionCompletion {
    pub epoch: u64,
    pub reason: CompletionReason,
    pub final_range: TimeRange,
}

/// Live only while an animation is in flight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionState {
    pub epoch: u64,
    pub old_range: TimeRange,
    pub target_range: TimeRange,
    pub started: Instant,
    pub duration: Duration,
    pub direction: TransitionDirection,
}

/// What every redraw callback receives once per display refresh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionFrame {
    pub epoch: u64,
    pub range: TimeRange,
    pub progress: f64,
    pub factor: f64,
    pub direction: TransitionDirection,
    /// Final redraw at the exact target range.
    pub settled: bool,
}

pub type RedrawCallback = Box<dyn FnMut(&TransitionFrame)>;

/// Completion signal for one transition, tagged with its epoch.
pub struct TransitionTicket {
    pub epoch: u64,
    completion: Receiver<TransitionCompletion>,
}

impl TransitionTicket {
    pub fn try_completion(&self) -> Option<TransitionCompletion> {
        self.completion.try_recv().ok()
    }
}

struct ActiveTransition {
    state: TransitionState,
    current: TimeRange,
    done: Sender<TransitionCompletion>,
}

/// Eased interpolation between two viewport ranges, driven by `tick` once per frame.
pub struct TransitionAnimator {
    duration: Duration,
    active: Option<ActiveTransition>,
    last_settled: Option<(u64, TimeRange, TransitionDirection)>,
    next_epoch: u64,
    redraws: Vec<RedrawCallback>,
}

impl TransitionAnimator {
    pub fn new(duration: Duration, redraws: Vec<RedrawCallback>) -> Self {
        Self {
            duration,
            active: None,
            last_settled: None,
            next_epoch: 1,
            redraws,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_animating(&self) -> bool {
        self.active.is_some()
    }

    pub fn state(&self) -> Option<&TransitionState> {
        self.active.as_ref().map(|a| &a.state)
    }

    /// The interpolated range while animating.
    pub fn current_range(&self) -> Option<TimeRange> {
        self.active.as_ref().map(|a| a.current)
    }

    /// Interpolated range while animating, else the viewport's own range.
    pub fn display_range(&self, viewport: &ViewportState) -> Option<TimeRange> {
        self.current_range().or_else(|| viewport.view_range())
    }

    /// Begin animating towards `target`. A transition already in flight is
    /// cancelled and the new one starts from its current interpolated range.
    pub fn start(
        &mut self,
        old_range: TimeRange,
        target_range: TimeRange,
        direction: TransitionDirection,
        now: Instant,
    ) -> Result<TransitionTicket, ViewportError> {
        if !target_range.is_valid() {
            log::warn!(
                "Refusing transition to invalid range [{}, {}]",
                target_range.start,
                target_range.end
            );
            return Err(ViewportError::InvalidRange {
                start: target_range.start,
                end: target_range.end,
            });
        }

        let mut old_range = if old_range.is_valid() { old_range } else { target_range };
        if let Some(previous) = self.active.take() {
            log::debug!("Transition {} superseded", previous.state.epoch);
            old_range = previous.current;
            let _ = previous.done.send(TransitionCompletion {
                epoch: previous.state.epoch,
                reason: CompletionReason::Superseded,
                final_range: previous.current,
            });
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let (done, completion) = mpsc::channel();
        self.active = Some(ActiveTransition {
            state: TransitionState {
                epoch,
                old_range,
                target_range,
                started: now,
                duration: self.duration,
                direction,
            },
            current: old_range,
            done,
        });

        Ok(TransitionTicket { epoch, completion })
    }

    /// Advance one display refresh. Returns the frame that was drawn, if any.
    pub fn tick(&mut self, now: Instant) -> Option<TransitionFrame> {
        let active = self.active.as_mut()?;
        let state = active.state;
        let elapsed = now.saturating_duration_since(state.started);

        if elapsed >= state.duration * 2 && !state.duration.is_zero() {
            log::warn!(
                "Transition {} stalled for {:?}, forcing settle",
                state.epoch,
                elapsed
            );
            return self.finish(CompletionReason::TimedOut);
        }

        let progress = if state.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / state.duration.as_secs_f64()).min(1.0)
        };
        let factor = ease_in_out_cubic(progress);
        let range = state.old_range.lerp(&state.target_range, factor);
        active.current = range;

        let frame = TransitionFrame {
            epoch: state.epoch,
            range,
            progress,
            factor,
            direction: state.direction,
            settled: false,
        };
        self.emit(&frame);

        if progress >= 1.0 {
            return self.finish(CompletionReason::Completed);
        }
        Some(frame)
    }

    /// Watchdog entry point for hosts whose frame loop may stall.
    pub fn check_timeout(&mut self, now: Instant) -> Option<TransitionFrame> {
        let state = self.active.as_ref()?.state;
        let elapsed = now.saturating_duration_since(state.started);
        if elapsed >= state.duration * 2 {
            log::warn!("Transition {} timed out after {:?}", state.epoch, elapsed);
            return self.finish(CompletionReason::TimedOut);
        }
        None
    }

    /// Idempotent. Always issues a settle redraw at the last target.
    pub fn stop(&mut self) -> Option<TransitionFrame> {
        if self.active.is_some() {
            return self.finish(CompletionReason::Stopped);
        }
        let (epoch, range, direction) = self.last_settled?;
        let frame = settle_frame(epoch, range, direction);
        self.emit(&frame);
        Some(frame)
    }

    fn finish(&mut self, reason: CompletionReason) -> Option<TransitionFrame> {
        let active = self.active.take()?;
        let state = active.state;
        let frame = settle_frame(state.epoch, state.target_range, state.direction);
        self.emit(&frame);
        self.last_settled = Some((state.epoch, state.target_range, state.direction));
        let _ = active.done.send(TransitionCompletion {
            epoch: state.epoch,
            reason,
            final_range: state.target_range,
        });
        Some(frame)
    }

    fn emit(&mut self, frame: &TransitionFrame) {
        for redraw in self.redraws.iter_mut() {
            redraw(frame);
        }
    }
}

fn settle_frame(epoch: u64, range: TimeRange, direction: TransitionDirection) -> TransitionFrame {
    TransitionFrame {
        epoch,
        range,
        progress: 1.0,
        factor: 1.0,
        direction,
        settled: true,
    }
}

/// `4p³` below the midpoint, mirrored above it.
pub fn ease_in_out_cubic(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    if p < 0.5 {
        4.0 * p * p * p
    } else {
        1.0 - (-2.0 * p + 2.0).powi(3) / 2.0
    }
}
