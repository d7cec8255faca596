// crates/resilience/src/retry.rs
//! Retry policies and backoff schedules

use std::time::Duration;

/// Upper bound for request-level retries
pub const MAX_RETRIES_LIMIT: u32 = 5;
/// Upper bound for connection-level retries
pub const MAX_CONNECTION_RETRIES_LIMIT: u32 = 5;
/// Smallest allowed backoff seed
pub const MIN_DELAY_FLOOR: Duration = Duration::from_millis(100);
/// Largest allowed backoff seed
pub const MIN_DELAY_CEILING: Duration = Duration::from_secs(5);

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(180);

/// Retry policy configuration
///
/// Values handed to the setters are clamped into their allowed ranges
/// rather than rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    max_retries: u32,
    /// Seed for exponential backoff
    min_delay: Duration,
    /// Whole-call retries done by connection supervision
    max_connection_retries: u32,
    /// Cap on a single computed backoff
    max_delay: Duration,
    /// Backoff multiplier
    multiplier: f64,
    /// Whether to use jitter
    use_jitter: bool,
}

impl RetryPolicy {
    /// Creates a new retry policy
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES_LIMIT),
            min_delay: DEFAULT_MIN_DELAY,
            max_connection_retries: MAX_CONNECTION_RETRIES_LIMIT,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: 2.0,
            use_jitter: false,
        }
    }

    /// Sets the number of request-level retries, clamped to 0..=5
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.min(MAX_RETRIES_LIMIT);
        self
    }

    /// Sets the backoff seed, clamped to [100ms, 5s]
    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay.clamp(MIN_DELAY_FLOOR, MIN_DELAY_CEILING);
        self
    }

    /// Sets the number of connection-level retries, clamped to 0..=5
    pub fn with_max_connection_retries(mut self, retries: u32) -> Self {
        self.max_connection_retries = retries.min(MAX_CONNECTION_RETRIES_LIMIT);
        self
    }

    /// Sets the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets whether to use jitter
    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Calculates the exponential delay before retry number `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let base_delay = self.min_delay.as_millis() as f64
            * self.multiplier.powi((attempt - 1) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.use_jitter {
            // Up to 25% below the computed delay
            let jitter_factor = 0.75 + (attempt as f64 * 0.1 % 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Request-level retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff seed
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Connection-level retries
    pub fn max_connection_retries(&self) -> u32 {
        self.max_connection_retries
    }

    /// Exponential schedule used by the request pipeline
    pub fn backoff(&self) -> Backoff {
        Backoff::Exponential {
            base: self.min_delay,
            multiplier: self.multiplier,
            max: self.max_delay,
        }
    }

    /// Linear schedule used by reconnecting readers
    pub fn linear_backoff(&self) -> Backoff {
        Backoff::Linear {
            step: self.min_delay,
        }
    }

    /// Fixed schedule used by connection supervision
    pub fn connection_backoff(&self) -> Backoff {
        Backoff::Fixed(self.min_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Delay schedules keyed by 1-based attempt number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// `attempt * step`
    Linear { step: Duration },
    /// The same delay every time
    Fixed(Duration),
}

impl Backoff {
    /// Delay before retry number `attempt`; zero for attempt 0
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match *self {
            Backoff::Exponential {
                base,
                multiplier,
                max,
            } => {
                let millis = base.as_millis() as f64 * multiplier.powi((attempt - 1) as i32);
                Duration::from_millis(millis.min(max.as_millis() as f64) as u64)
            }
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Fixed(delay) => delay,
        }
    }
}
