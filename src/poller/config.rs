use std::time::Duration;

use crate::client::ReceiveRequest;
use crate::errors::SqsPollerError;

/// SQS accepts at most this many messages per receive call.
pub const MAX_MESSAGES_PER_RECEIVE: i32 = 10;
/// SQS caps long polling at 20 seconds.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;
/// SQS caps the visibility timeout at 12 hours.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;

/// What the poller does with a message no consumer is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedMessagePolicy {
    /// Log and leave the message for redelivery, so it eventually reaches the
    /// dead-letter queue instead of being silently dropped.
    #[default]
    Retain,
    /// Log and delete the message.
    Delete,
}

/// Delay applied between receive attempts after consecutive receive failures.
///
/// The n-th consecutive failure waits `initial_delay * multiplier^(n-1)`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        BackoffSchedule {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

impl BackoffSchedule {
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        BackoffSchedule {
            initial_delay,
            max_delay,
            multiplier: 2,
        }
    }

    /// The same delay after every failure.
    pub fn constant(delay: Duration) -> Self {
        BackoffSchedule {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1,
        }
    }

    /// Delay before the next receive after `consecutive_failures` failures in a row.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        // 2^16 already exceeds any sensible cap
        let exponent = (consecutive_failures - 1).min(16);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Configuration for the SQS poller.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sqs_poller::poller::SqsPollerConfig;
///
/// let config = SqsPollerConfig::new("https://sqs.us-east-1.amazonaws.com/123456789012/orders")
///     .with_concurrency_limit(4)
///     .with_dead_letter_queue("https://sqs.us-east-1.amazonaws.com/123456789012/orders-dlq", 5)
///     .with_drain_timeout(Duration::from_secs(10));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsPollerConfig {
    /// The queue being polled. Used for logging; the queue client is bound to it.
    pub queue_url: String,

    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: i32,

    /// The wait time for long polling, in seconds.
    pub wait_time_seconds: i32,

    /// Maximum number of messages processed at the same time.
    pub concurrency_limit: usize,

    /// Visibility timeout requested on receive. `None` keeps the queue's default.
    pub visibility_timeout_seconds: Option<i32>,

    /// Deliveries above this receive count go to the dead-letter queue.
    pub max_receive_count_before_dead_letter: Option<u32>,

    /// Destination for messages over the receive-count threshold.
    pub dead_letter_queue_url: Option<String>,

    /// Delay schedule after failed receive calls.
    pub backoff: BackoffSchedule,

    /// How long `stop` waits for in-flight messages before abandoning them.
    pub drain_timeout: Duration,

    pub unresolved_policy: UnresolvedMessagePolicy,
}

impl Default for SqsPollerConfig {
    fn default() -> Self {
        SqsPollerConfig {
            queue_url: String::new(),
            max_number_of_messages: MAX_MESSAGES_PER_RECEIVE,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            concurrency_limit: 10,
            visibility_timeout_seconds: None,
            max_receive_count_before_dead_letter: None,
            dead_letter_queue_url: None,
            backoff: BackoffSchedule::default(),
            drain_timeout: Duration::from_secs(30),
            unresolved_policy: UnresolvedMessagePolicy::default(),
        }
    }
}

impl SqsPollerConfig {
    pub fn new(queue_url: &str) -> Self {
        SqsPollerConfig {
            queue_url: queue_url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_max_number_of_messages(mut self, max: i32) -> Self {
        self.max_number_of_messages = max;
        self
    }

    pub fn with_wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_visibility_timeout_seconds(mut self, seconds: i32) -> Self {
        self.visibility_timeout_seconds = Some(seconds);
        self
    }

    /// Routes deliveries whose receive count exceeds `max_receive_count` to `queue_url`.
    pub fn with_dead_letter_queue(mut self, queue_url: &str, max_receive_count: u32) -> Self {
        self.dead_letter_queue_url = Some(queue_url.to_string());
        self.max_receive_count_before_dead_letter = Some(max_receive_count);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_unresolved_policy(mut self, policy: UnresolvedMessagePolicy) -> Self {
        self.unresolved_policy = policy;
        self
    }

    /// The receive call issued on every poll iteration.
    pub fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_number_of_messages: self.max_number_of_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
        }
    }

    /// The dead-letter queue url and threshold, when dead-lettering is enabled.
    pub fn dead_letter(&self) -> Option<(&str, u32)> {
        match (&self.dead_letter_queue_url, self.max_receive_count_before_dead_letter) {
            (Some(url), Some(max)) => Some((url.as_str(), max)),
            _ => None,
        }
    }

    /// Checks the configuration against SQS limits.
    pub fn validate(&self) -> Result<(), SqsPollerError> {
        fn invalid(reason: String) -> Result<(), SqsPollerError> {
            Err(SqsPollerError::ConfigurationError(reason))
        }

        if self.queue_url.trim().is_empty() {
            return invalid("queue_url must not be empty".to_string());
        }
        if !(1..=MAX_MESSAGES_PER_RECEIVE).contains(&self.max_number_of_messages) {
            return invalid(format!(
                "max_number_of_messages must be between 1 and {MAX_MESSAGES_PER_RECEIVE}, got {}",
                self.max_number_of_messages
            ));
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return invalid(format!(
                "wait_time_seconds must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {}",
                self.wait_time_seconds
            ));
        }
        if self.concurrency_limit == 0 {
            return invalid("concurrency_limit must be at least 1".to_string());
        }
        if let Some(seconds) = self.visibility_timeout_seconds {
            if !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&seconds) {
                return invalid(format!(
                    "visibility_timeout_seconds must be between 0 and {MAX_VISIBILITY_TIMEOUT_SECONDS}, got {seconds}"
                ));
            }
        }
        match (&self.dead_letter_queue_url, self.max_receive_count_before_dead_letter) {
            (Some(url), Some(max)) => {
                if url.trim().is_empty() {
                    return invalid("dead_letter_queue_url must not be empty".to_string());
                }
                if max == 0 {
                    return invalid(
                        "max_receive_count_before_dead_letter must be at least 1".to_string(),
                    );
                }
            }
            (None, None) => {}
            _ => {
                return invalid(
                    "dead_letter_queue_url and max_receive_count_before_dead_letter must be set together"
                        .to_string(),
                );
            }
        }
        if self.backoff.multiplier == 0 {
            return invalid("backoff multiplier must be at least 1".to_string());
        }
        if self.backoff.initial_delay > self.backoff.max_delay {
            return invalid("backoff initial_delay must not exceed max_delay".to_string());
        }
        Ok(())
    }
}
