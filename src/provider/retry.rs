//! Exponential backoff shared by the Provider Client's retry loop and the
//! Job Queue's `retry()` operation:
//! `min(base * 2^(n-1), cap)`, with a small jitter to avoid thundering
//! herds across workers retrying the same failure class simultaneously.

use std::time::Duration;

use rand::Rng;

pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let scaled = base.as_millis().saturating_mul(1u128 << exp);
    let capped = scaled.min(cap.as_millis());
    let jittered = rand::thread_rng().gen_range(0..=(capped / 10).max(1));
    Duration::from_millis((capped + jittered) as u64)
}

/// Honor a `Retry-After` response hint on `429` responses (seconds or
/// HTTP-date — only the seconds form is handled).
pub fn retry_after_delay(header_value: &str) -> Option<Duration> {
    header_value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_respects_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert!(backoff_delay(1, base, cap).as_millis() < 1_200);
        assert!(backoff_delay(2, base, cap).as_millis() >= 2_000);
        assert!(backoff_delay(10, base, cap).as_millis() <= 33_000);
    }

    #[test]
    fn retry_after_parses_seconds() {
        assert_eq!(retry_after_delay("5"), Some(Duration::from_secs(5)));
        assert_eq!(retry_after_delay("not-a-number"), None);
    }
}
