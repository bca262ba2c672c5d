//! Drop-guard timing spans
//!
//! A [`PerfSpan`] logs its elapsed time when dropped, optionally only when
//! the duration crosses a threshold. Used by the `perf_span!` macro.

use std::time::Instant;

/// Guard that logs a duration event on drop
#[derive(Debug)]
pub struct PerfSpan {
    name: &'static str,
    start: Instant,
    threshold_us: Option<u64>,
}

impl PerfSpan {
    pub fn new(name: &'static str, threshold_us: Option<u64>) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_us,
        }
    }

    /// Elapsed time so far, in microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        let duration_us = self.elapsed_us();
        if let Some(threshold) = self.threshold_us {
            if duration_us < threshold {
                return;
            }
        }
        tracing::debug!(
            operation = self.name,
            duration_us,
            duration_ms = duration_us as f64 / 1000.0,
            "perf_span_complete"
        );
    }
}
