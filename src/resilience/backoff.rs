//! Exponential backoff with jitter between export attempts.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `retry` (1-based).
///
/// Doubles from `base` up to `max`, then adds up to 25% jitter so exporters
/// restarted together do not retry in lockstep. The jittered delay may exceed
/// `max` by the jitter amount.
pub fn export_backoff(retry: u32, base: Duration, max: Duration) -> Duration {
    if retry == 0 || base.is_zero() {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(retry - 1);
    let capped = base.saturating_mul(factor).min(max);

    let jitter_range = capped.as_millis() as u64 / 4;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    capped + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);

        assert_eq!(export_backoff(0, base, max), Duration::ZERO);

        let first = export_backoff(1, base, max);
        assert!(first >= base && first < Duration::from_millis(125));

        let second = export_backoff(2, base, max);
        assert!(second >= Duration::from_millis(200));

        let capped = export_backoff(20, base, max);
        assert!(capped >= max && capped < Duration::from_millis(1250));
    }

    #[test]
    fn test_zero_base_never_waits() {
        assert_eq!(export_backoff(3, Duration::ZERO, Duration::from_secs(1)), Duration::ZERO);
    }
}
