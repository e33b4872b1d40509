use thiserror::Error;

/// Boxed error returned by a [`Consumer`](crate::consumer::Consumer) when it
/// fails to process a message.
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for SQS poller operations.
///
/// Only [`SqsPollerError::ConfigurationError`], [`SqsPollerError::DuplicateConsumerType`]
/// and [`SqsPollerError::InvalidState`] ever reach the host. Every per-message and
/// per-batch error is recovered inside the poll loop and reported through `tracing`.
#[derive(Debug, Error)]
pub enum SqsPollerError {
    /// Error that occurs during AWS SQS client initialization.
    ///
    /// This error typically happens when there are issues with AWS credentials,
    /// region configuration, or network connectivity during client setup.
    #[error("failed to initialize AWS SQS client: {0}")]
    InitializationError(String),

    /// The poller configuration is invalid. Fatal at startup.
    #[error("invalid poller configuration: {0}")]
    ConfigurationError(String),

    /// Two consumers declared the same message type. Fatal at construction.
    #[error("a consumer for message type '{0}' is already registered")]
    DuplicateConsumerType(String),

    /// Network, throttling or service error on a queue operation.
    #[error("transient queue error: {0}")]
    TransientQueueError(String),

    /// No consumer is registered for the message's type.
    #[error("no consumer registered for message {message_id} (type: {})", .message_type.as_deref().unwrap_or("<missing>"))]
    UnresolvedConsumerError {
        message_id: String,
        message_type: Option<String>,
    },

    /// A consumer reported failure (or panicked) while processing a message.
    #[error("consumer for '{message_type}' failed to process message {message_id}: {source}")]
    ConsumerProcessingError {
        message_id: String,
        message_type: String,
        #[source]
        source: ConsumerError,
    },

    /// A lifecycle call was made in a state that does not allow it.
    #[error("poller is {actual}, expected {expected}")]
    InvalidState {
        expected: crate::poller::RunState,
        actual: crate::poller::RunState,
    },
}

impl SqsPollerError {
    /// Whether the error is recovered locally by the poll loop rather than
    /// surfaced to the host.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SqsPollerError::TransientQueueError(_)
                | SqsPollerError::UnresolvedConsumerError { .. }
                | SqsPollerError::ConsumerProcessingError { .. }
        )
    }
}

impl<E, R> From<aws_sdk_sqs::error::SdkError<E, R>> for SqsPollerError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    fn from(error: aws_sdk_sqs::error::SdkError<E, R>) -> Self {
        SqsPollerError::TransientQueueError(
            aws_sdk_sqs::error::DisplayErrorContext(&error).to_string(),
        )
    }
}
