//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Namespace for local records (`namespace:key`).
    pub namespace: String,
    /// Backend key holding the pending queue.
    pub queue_key: String,
    /// Backend key holding per-operation retry state.
    pub retry_key: String,
    /// Backend key holding dead-lettered operations.
    pub dead_letter_key: String,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Interval for periodic resync while online.
    pub sync_interval: Option<Duration>,
    /// Upper bound on a single backend call.
    pub operation_timeout: Option<Duration>,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration for the given local namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            queue_key: "sync_queue".into(),
            retry_key: "sync_queue_retry".into(),
            dead_letter_key: "sync_dead_letters".into(),
            retry: RetryConfig::default(),
            sync_interval: None,
            operation_timeout: None,
            event_capacity: 64,
        }
    }

    /// Sets the key holding the pending queue.
    pub fn with_queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval for periodic resync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets a timeout for each backend call.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("ledgersync")
    }
}

/// Configuration for retry behavior of failed operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which an operation is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    ///
    /// Failed operations are retried on the next pass unless an initial
    /// delay is set with [`RetryConfig::with_initial_delay`]. Operations
    /// still waiting out a delay are skipped, so later operations may sync
    /// before them.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries on the very next pass.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 are raised to 1.0.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the wait after the given number of failed attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        // Below 1.0 (or NaN) means no growth.
        let multiplier = self.backoff_multiplier.max(1.0);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        let delay_secs = if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% extra
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("shop")
            .with_queue_key("pending")
            .with_sync_interval(Duration::from_secs(60))
            .with_operation_timeout(Duration::from_secs(10))
            .with_event_capacity(0);

        assert_eq!(config.namespace, "shop");
        assert_eq!(config.queue_key, "pending");
        assert_eq!(config.retry_key, "sync_queue_retry");
        assert_eq!(config.sync_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.queue_key, "sync_queue");
        assert_eq!(config.sync_interval, None);
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.initial_delay, Duration::ZERO);
        assert_eq!(config.retry.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn immediate_retry_has_no_delay() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(5), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        // Jitter makes exact values unpredictable, but bounds hold
        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_secs(2))
            .with_backoff_multiplier(-2.0)
            .with_jitter(false);
        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));

        // Set directly, bypassing the builder.
        let mut raw = config.clone();
        raw.backoff_multiplier = -3.0;
        assert_eq!(raw.delay_for_attempt(2), Duration::from_secs(2));
        raw.backoff_multiplier = f64::NAN;
        assert_eq!(raw.delay_for_attempt(4), Duration::from_secs(2));
        raw.add_jitter = true;
        assert!(raw.delay_for_attempt(3) >= Duration::from_secs(2));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }
}
