//! Exponential backoff calculation for failing keys.
//!
//! A key that keeps producing errors should rest for progressively longer
//! intervals before being handed out again, while still being guaranteed an
//! eventual retry. This module is pure arithmetic: the error reporter feeds
//! it the post-increment consecutive error count and applies the returned
//! delay to `available_at`.

/// Compute the cooldown, in seconds, to apply after an error report.
///
/// # Formula
///
/// `min(base_cooldown_seconds * 2^consecutive_errors, cap_seconds)`
///
/// With the default base of 30 seconds and a 4-hour cap:
///
/// | consecutive_errors | delay |
/// |--------------------|-------|
/// | 1                  | 60 s  |
/// | 2                  | 120 s |
/// | 5                  | 960 s |
/// | 10                 | 4 h (capped) |
///
/// # Arguments
///
/// * `consecutive_errors` - Error count **after** incrementing for the
///   current report; the first report therefore passes 1, never 0
/// * `base_cooldown_seconds` - The key's default cooldown
/// * `cap_seconds` - Upper bound on the delay, bounding worst-case staleness
///
/// The multiplication saturates, so pathological counters cannot overflow
/// past the cap.
pub fn backoff_delay_seconds(
    consecutive_errors: i32,
    base_cooldown_seconds: i32,
    cap_seconds: i64,
) -> i64 {
    let base = i64::from(base_cooldown_seconds.max(1));
    let exponent = consecutive_errors.max(0).min(62) as u32;
    let delay = base.saturating_mul(1_i64.checked_shl(exponent).unwrap_or(i64::MAX));
    delay.min(cap_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: i64 = 14_400;

    #[test]
    fn first_error_doubles_the_base_cooldown() {
        // A single failure must rest the key longer than a normal dispense
        assert_eq!(backoff_delay_seconds(1, 30, CAP), 60);
        assert!(backoff_delay_seconds(1, 30, CAP) > 30);
    }

    #[test]
    fn delay_is_strictly_increasing_below_the_cap() {
        let mut previous = 0;
        for errors in 1..=8 {
            let delay = backoff_delay_seconds(errors, 30, CAP);
            assert!(delay > previous, "delay must grow at {errors} errors");
            previous = delay;
        }
    }

    #[test]
    fn delay_is_capped_and_non_decreasing_once_capped() {
        // 30 * 2^9 = 15360 > 14400
        assert_eq!(backoff_delay_seconds(9, 30, CAP), CAP);
        assert_eq!(backoff_delay_seconds(10, 30, CAP), CAP);
        assert_eq!(backoff_delay_seconds(1000, 30, CAP), CAP);
    }

    #[test]
    fn large_counters_do_not_overflow() {
        assert_eq!(backoff_delay_seconds(i32::MAX, i32::MAX, CAP), CAP);
    }

    #[test]
    fn degenerate_inputs_are_clamped() {
        // Zero or negative counts behave like a plain base cooldown
        assert_eq!(backoff_delay_seconds(0, 30, CAP), 30);
        assert_eq!(backoff_delay_seconds(-5, 30, CAP), 30);
        // A nonsensical base of zero still yields a positive delay
        assert_eq!(backoff_delay_seconds(1, 0, CAP), 2);
    }
}
