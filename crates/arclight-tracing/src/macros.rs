//! Convenience macros for performance instrumentation

/// Create a [`crate::perf::PerfSpan`] that logs its duration when dropped.
///
/// ```
/// use arclight_tracing::perf_span;
///
/// {
///     let _span = perf_span!("kernel_launch", lanes = 1024);
///     // ... timed work ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::perf::PerfSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _span = tracing::debug_span!("perf", name = $name, $($field = $value),+).entered();
        $crate::perf::PerfSpan::new($name, None)
    }};
}

/// Run a block and return `(result, duration_us)`, logging the timing.
///
/// ```
/// use arclight_tracing::timed_block;
///
/// let (sum, duration_us) = timed_block!("sum", { (1..=100).sum::<i32>() });
/// assert_eq!(sum, 5050);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(operation = $name, duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_perf_span_macro() {
        let _plain = perf_span!("plain");
        let _with_fields = perf_span!("fields", size = 64);
    }

    #[test]
    fn test_timed_block_returns_result() {
        let (value, _duration_us) = timed_block!("block", { 6 * 7 });
        assert_eq!(value, 42);
    }
}
