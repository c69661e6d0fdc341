use std::time::Duration;

use backon::BackoffBuilder;

/// Linear backoff: retry `n` waits `n * step`, up to `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    step: Duration,
    max_retries: usize,
}

impl LinearBackoff {
    /// Schedule with the given step and retry bound.
    #[must_use]
    pub const fn new(step: Duration, max_retries: usize) -> Self {
        Self { step, max_retries }
    }
}

impl BackoffBuilder for LinearBackoff {
    type Backoff = LinearBackoffIter;

    fn build(self) -> Self::Backoff {
        LinearBackoffIter {
            step: self.step,
            max_retries: self.max_retries,
            attempt: 0,
        }
    }
}

/// Delays produced by [`LinearBackoff`].
#[derive(Debug, Clone)]
pub struct LinearBackoffIter {
    step: Duration,
    max_retries: usize,
    attempt: usize,
}

impl Iterator for LinearBackoffIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(
            self.step
                .saturating_mul(u32::try_from(self.attempt).unwrap_or(u32::MAX)),
        )
    }
}
