use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a patch job and its owner.
///
/// Scanning, planning and writing check the flag between units of work;
/// nothing is interrupted mid-write.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a stage that may stop early on cancellation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Done(T),
    Cancelled,
}

impl<T> Step<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Step::Cancelled)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Step::Done(value) => Some(value),
            Step::Cancelled => None,
        }
    }
}
