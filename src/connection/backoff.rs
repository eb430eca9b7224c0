//! Reconnect delay schedule.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

/// Exponential backoff with symmetric jitter.
///
/// Attempt `n` (1-based) waits `min(base * factor^(n-1), cap)` scaled by a
/// random factor in `[1 - jitter, 1 + jitter]`, and never more than `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            factor,
            cap,
            jitter,
        }
    }

    /// Delay before attempt `n` without jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        let cap = self.cap.as_secs_f64();
        Duration::from_secs_f64(if secs.is_finite() { secs.min(cap) } else { cap })
    }

    /// Delay before attempt `n`, with `unit` in `[0, 1)` selecting the
    /// jitter offset (0.5 means none).
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let unit = unit.clamp(0.0, 1.0);
        let scale = 1.0 + self.jitter * (2.0 * unit - 1.0);
        let secs = (self.nominal(attempt).as_secs_f64() * scale)
            .min(self.cap.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(secs)
    }

    /// Delay before attempt `n` with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, jitter_unit())
    }
}

/// A uniformly distributed value in `[0, 1)`.
///
/// `RandomState` is seeded from the OS per instance, which is plenty for
/// spreading reconnects out.
fn jitter_unit() -> f64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default(),
    );
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(actual: Duration, expected_secs: f64) -> bool {
        let actual = actual.as_secs_f64();
        actual >= expected_secs * 0.8 - 1e-9 && actual <= expected_secs * 1.2 + 1e-9
    }

    #[test]
    fn test_first_four_attempts() {
        let backoff = Backoff::default();
        for (attempt, expected) in [(1, 1.0), (2, 2.0), (3, 4.0), (4, 8.0)] {
            assert_eq!(backoff.nominal(attempt).as_secs_f64(), expected);
            for _ in 0..20 {
                let delay = backoff.delay(attempt);
                assert!(approx(delay, expected), "attempt {} gave {:?}", attempt, delay);
            }
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let backoff = Backoff::default();
        let close = |d: Duration, secs: f64| (d.as_secs_f64() - secs).abs() < 1e-6;
        assert!(close(backoff.delay_with(3, 0.0), 3.2));
        assert!(close(backoff.delay_with(3, 0.5), 4.0));
        assert!(close(backoff.delay_with(3, 1.0), 4.8));
    }

    #[test]
    fn test_never_exceeds_cap() {
        let backoff = Backoff::default();
        for attempt in 1..100 {
            assert!(backoff.delay_with(attempt, 1.0) <= Duration::from_secs(30));
            assert!(backoff.delay(attempt) <= Duration::from_secs(30));
        }
        assert_eq!(backoff.nominal(6), Duration::from_secs(30));
        assert_eq!(backoff.nominal(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_unit_range() {
        for _ in 0..1000 {
            let unit = jitter_unit();
            assert!((0.0..1.0).contains(&unit));
        }
    }
}
