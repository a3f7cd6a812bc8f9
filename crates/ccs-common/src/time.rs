//! ---
//! ccs_section: "01-control-kernel"
//! ccs_subsection: "module"
//! ccs_type: "source"
//! ccs_scope: "code"
//! ccs_description: "Shared primitives and utilities for the supervisor runtime."
//! ccs_version: "v0.1.0"
//! ccs_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

/// Capture an instant suitable for tick-deadline comparisons.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// Signed deviation of an observed interval from the expected period, in
/// microseconds.
pub fn jitter_us(actual: Duration, expected: Duration) -> i64 {
    let actual_us = actual.as_secs_f64() * 1_000_000.0;
    let expected_us = expected.as_secs_f64() * 1_000_000.0;
    (actual_us - expected_us).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_signed() {
        assert_eq!(
            jitter_us(Duration::from_millis(2100), Duration::from_secs(2)),
            100_000
        );
        assert_eq!(
            jitter_us(Duration::from_millis(1900), Duration::from_secs(2)),
            -100_000
        );
    }
}
