//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound for each dispatched remote call.
    pub dispatch_timeout: Duration,
    /// Minimum time between successful refreshes of one scope.
    pub refresh_interval: Duration,
    /// Period of the refresh timer while a scope is active.
    pub refresh_tick: Duration,
    /// Reference collections pulled into the cache.
    pub refresh_collections: Vec<String>,
    /// Remote field holding the scope partition key.
    pub scope_field: String,
    /// Maximum rows fetched per collection and refresh.
    pub refresh_limit: usize,
    /// Backoff for automatic re-drains after a pass left failures.
    pub retry: RetryConfig,
    /// Capacity of the coordinator's command channel.
    pub command_buffer: usize,
    /// Whether enqueuing while online triggers a drain.
    pub drain_on_enqueue: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(15 * 60),
            refresh_tick: Duration::from_secs(15 * 60),
            refresh_collections: vec!["products".to_string(), "stock".to_string()],
            scope_field: "business_id".to_string(),
            refresh_limit: 1000,
            retry: RetryConfig::default(),
            command_buffer: 64,
            drain_on_enqueue: false,
        }
    }

    /// Sets the per-call dispatch timeout.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Sets the refresh rate limit.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the refresh timer period.
    pub fn with_refresh_tick(mut self, tick: Duration) -> Self {
        self.refresh_tick = tick;
        self
    }

    /// Sets the collections pulled on refresh.
    pub fn with_refresh_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refresh_collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the scope field name.
    pub fn with_scope_field(mut self, field: impl Into<String>) -> Self {
        self.scope_field = field.into();
        self
    }

    /// Sets the per-collection row limit for refreshes.
    pub fn with_refresh_limit(mut self, limit: usize) -> Self {
        self.refresh_limit = limit;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the command channel capacity.
    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity.max(1);
        self
    }

    /// Enables or disables draining right after an online enqueue.
    pub fn with_drain_on_enqueue(mut self, enabled: bool) -> Self {
        self.drain_on_enqueue = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first pass included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
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

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Whether another attempt is allowed after `attempt` (1-indexed) failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Cheap pseudo-random value in `[0, 1)` taken from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
