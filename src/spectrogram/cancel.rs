use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::viewport::SampleRange;

/// Shared flag checked by FFT workers between batches.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Monotonic across the pipeline's lifetime, including dataset reloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct RenderRequest {
    pub id: RequestId,
    pub samples: SampleRange,
    pub token: CancellationToken,
}

impl RenderRequest {
    pub fn new(id: RequestId, samples: SampleRange) -> Self {
        Self {
            id,
            samples,
            token: CancellationToken::new(),
        }
    }
}

/// How a render job ended. Cancellation is an ordinary outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> RenderOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let request = RenderRequest::new(RequestId(7), SampleRange::new(0, 10));
        let worker_side = request.token.clone();
        assert!(!worker_side.is_cancelled());
        request.token.cancel();
        request.token.cancel();
        assert!(worker_side.is_cancelled());
    }

    #[test]
    fn request_ids_order() {
        assert!(RequestId(3) > RequestId(2));
        assert_eq!(RequestId(3).to_string(), "#3");
        assert!(RenderOutcome::<()>::Cancelled.is_cancelled());
        assert!(!RenderOutcome::Completed(1).is_cancelled());
    }
}
