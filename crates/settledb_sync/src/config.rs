//! Scheduler and retry configuration.

use rand::Rng;
use std::time::Duration;

/// Configuration for the autosync scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between timer-driven passes.
    pub interval: Duration,
    /// Backoff applied to remotes that cannot be opened.
    pub retry: RetryConfig,
    /// Whether each pass asks the legacy locator to redetect products.
    pub redetect: bool,
    /// Whether each pass reconciles with the admin database.
    pub sync_admin: bool,
    /// Whether a pass runs as soon as the scheduler starts.
    pub run_on_start: bool,
    /// Quiet period requested from the change monitor.
    pub watch_silence: Duration,
}

impl SchedulerConfig {
    /// Creates a configuration with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            retry: RetryConfig::default(),
            redetect: true,
            sync_admin: true,
            run_on_start: true,
            watch_silence: Duration::from_secs(2),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables redetection.
    pub fn with_redetect(mut self, redetect: bool) -> Self {
        self.redetect = redetect;
        self
    }

    /// Enables or disables admin reconciliation.
    pub fn with_sync_admin(mut self, sync_admin: bool) -> Self {
        self.sync_admin = sync_admin;
        self
    }

    /// Enables or disables the initial pass.
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Sets the change-monitor quiet period.
    pub fn with_watch_silence(mut self, silence: Duration) -> Self {
        self.watch_silence = silence;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

/// Configuration for retry behavior.
///
/// `max_attempts` bounds how far the backoff grows; an unreachable remote is
/// never dropped, it keeps being retried at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after which the delay stops growing.
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
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries on every pass.
    pub fn no_backoff() -> Self {
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
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.min(self.max_attempts.max(1)).saturating_sub(1);
        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(exponent as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64((delay_secs + jitter).min(self.max_delay.as_secs_f64()))
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(8)
    }
}
