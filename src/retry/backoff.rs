use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Computes the delay before a retry attempt
pub trait Backoff: Send + Sync {
    /// Delay to wait after the given (1-based) failed attempt
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with symmetric jitter, capped at `max_delay`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self::builder()
            .initial_delay(initial_delay)
            .max_delay(max_delay)
            .build()
    }

    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.max_delay.as_millis() as f64;
        let base_ms =
            (self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent)).min(max_ms);

        let spread = base_ms * self.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let delay_ms = (base_ms + jitter).clamp(0.0, max_ms);

        trace!(
            attempt = attempt,
            base_delay_ms = base_ms,
            jitter_ms = jitter,
            delay_ms = delay_ms,
            "Calculated backoff delay"
        );

        Duration::from_millis(delay_ms as u64)
    }
}

#[derive(Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoffBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_until_capped() {
        let max_delay = Duration::from_secs(1);
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(max_delay)
            .jitter_factor(0.0)
            .build();

        assert_eq!(backoff.next_delay(1), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(30), max_delay);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter_factor(0.5)
            .build();

        let delays: Vec<Duration> = (0..100).map(|_| backoff.next_delay(2)).collect();
        let unique: std::collections::HashSet<_> = delays.iter().collect();
        assert!(unique.len() > 1);

        for delay in delays {
            let ms = delay.as_millis() as f64;
            assert!((100.0..=300.0).contains(&ms), "delay {}ms out of range", ms);
        }
    }

    #[test]
    fn test_builder_clamps_jitter() {
        assert_eq!(ExponentialBackoff::builder().jitter_factor(1.5).build().jitter_factor, 1.0);
        assert_eq!(ExponentialBackoff::builder().jitter_factor(-0.5).build().jitter_factor, 0.0);
    }
}
