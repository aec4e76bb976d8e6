//! Reconnect delay schedule.
//!
//! After a disconnection the manager waits before retrying discovery and
//! connection. The delay follows a fixed ramp and then stays at the cap;
//! the attempt counter resets only after a completed registration, so a
//! coordinator that accepts the socket but rejects REGISTER does not get
//! hammered at the ramp's start.

use std::time::Duration;

/// The default ramp: 5s, 10s, 20s, 30s, then the cap for good.
const DEFAULT_STEPS: [Duration; 4] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(30),
];

/// Default cap for every attempt past the ramp.
const DEFAULT_CAP: Duration = Duration::from_secs(60);

/// Default jitter fraction added on top of the base delay.
const DEFAULT_JITTER: f64 = 0.1;

/// Controls how the manager reconnects after a connection drop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay ramp, indexed by attempt number (1-based attempt 1 maps to
    /// the first step).
    pub steps: Vec<Duration>,
    /// Delay for every attempt past the ramp.
    pub cap: Duration,
    /// Fraction of the base delay added as jitter, to spread a fleet's
    /// reconnect storm after a coordinator restart.
    pub jitter_fraction: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS.to_vec(),
            cap: DEFAULT_CAP,
            jitter_fraction: DEFAULT_JITTER,
        }
    }
}

impl ReconnectBackoff {
    /// The un-jittered delay for a 1-based attempt number.
    ///
    /// Attempt 0 is treated as 1 (callers increment before waiting).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let index = attempt.max(1) as usize - 1;
        self.steps.get(index).copied().unwrap_or(self.cap)
    }

    /// The delay to wait before the given attempt, jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms =
            base.as_millis() as f64 * self.jitter_fraction * pseudo_random_fraction(attempt);
        base + Duration::from_millis(jitter_ms as u64)
    }
}

/// Cheap deterministic fraction in [0, 1) from the attempt number.
/// Not cryptographic; just enough to spread reconnect storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    f64::from(hash as u32 >> 8) / f64::from(1u32 << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_matches_protocol_contract() {
        let backoff = ReconnectBackoff::default();
        let expected = [5u64, 10, 20, 30, 60, 60];
        for (i, secs) in expected.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(
                backoff.base_delay(attempt),
                Duration::from_secs(*secs),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn test_cap_holds_forever() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.base_delay(100), Duration::from_secs(60));
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_fraction() {
        let backoff = ReconnectBackoff::default();
        for attempt in 1..50 {
            let base = backoff.base_delay(attempt);
            let jittered = backoff.delay_for_attempt(attempt);
            assert!(jittered >= base);
            let max = base + Duration::from_millis((base.as_millis() as f64 * 0.1) as u64 + 1);
            assert!(jittered <= max, "attempt {attempt}: {jittered:?} > {max:?}");
        }
    }

    #[test]
    fn test_zero_attempt_uses_first_step() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.base_delay(0), Duration::from_secs(5));
    }

    #[test]
    fn test_custom_schedule() {
        let backoff = ReconnectBackoff {
            steps: vec![Duration::from_millis(50)],
            cap: Duration::from_millis(100),
            jitter_fraction: 0.0,
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(100));
    }
}
