use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::QueueClient;
use crate::errors::{ConsumerError, SqsPollerError};
use crate::message::Message;

/// A handler for messages of one declared type.
///
/// Consumers are supplied by the host application and registered explicitly in a
/// [`ConsumerRegistry`](crate::registry::ConsumerRegistry). The poller may invoke
/// `process` concurrently for distinct messages, and a message may be delivered
/// more than once, so implementations must be idempotent.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use sqs_poller::consumer::{Consumer, ProcessContext};
/// use sqs_poller::errors::ConsumerError;
/// use sqs_poller::message::Message;
///
/// struct OrderPlacedConsumer;
///
/// #[async_trait]
/// impl Consumer for OrderPlacedConsumer {
///     fn message_type(&self) -> &str {
///         "OrderPlaced"
///     }
///
///     async fn process(&self, message: &Message, _context: &ProcessContext) -> Result<(), ConsumerError> {
///         println!("order placed: {}", message.body());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer: Send + Sync {
    /// The message type this consumer handles.
    fn message_type(&self) -> &str;

    /// Processes a single message.
    ///
    /// Returning `Ok(())` deletes the message from the queue. Returning an error
    /// (or panicking) leaves it for redelivery after the visibility timeout.
    async fn process(&self, message: &Message, context: &ProcessContext) -> Result<(), ConsumerError>;
}

/// Per-delivery context handed to [`Consumer::process`].
///
/// Cloning is cheap, so closure consumers built with [`consumer_fn`] receive an
/// owned copy they can move into their future.
#[derive(Clone)]
pub struct ProcessContext {
    client: Arc<dyn QueueClient>,
    receipt_handle: String,
    cancellation: CancellationToken,
}

impl ProcessContext {
    pub(crate) fn new(
        client: Arc<dyn QueueClient>,
        receipt_handle: String,
        cancellation: CancellationToken,
    ) -> Self {
        ProcessContext {
            client,
            receipt_handle,
            cancellation,
        }
    }

    /// Whether the poller has been asked to stop.
    ///
    /// Cancellation is advisory. Long-running consumers should check it and
    /// return early; the poller never force-terminates a consumer until the
    /// drain timeout expires.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the poller is asked to stop.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Extends the visibility timeout of the message being processed.
    pub async fn extend_visibility(&self, visibility_timeout_seconds: i32) -> Result<(), SqsPollerError> {
        self.client
            .change_visibility(&self.receipt_handle, visibility_timeout_seconds)
            .await
    }
}

/// A [`Consumer`] built from an async function and shared resources.
///
/// # Type Parameters
///
/// * `F` - The message handler function type
/// * `TShared` - The type of shared resources passed to the handler
pub struct ConsumerFn<F, TShared> {
    message_type: String,
    rv_fn: F,
    shared_resources: TShared,
}

impl<F, Fut, TShared> ConsumerFn<F, TShared>
where
    F: Fn(Message, TShared, ProcessContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    /// Creates a consumer for `message_type` that calls `rv_fn` with each message,
    /// a clone of `shared_resources` and the delivery's [`ProcessContext`].
    pub fn new(message_type: &str, shared_resources: TShared, rv_fn: F) -> Self {
        ConsumerFn {
            message_type: message_type.to_string(),
            rv_fn,
            shared_resources,
        }
    }
}

#[async_trait]
impl<F, Fut, TShared> Consumer for ConsumerFn<F, TShared>
where
    F: Fn(Message, TShared, ProcessContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    fn message_type(&self) -> &str {
        &self.message_type
    }

    async fn process(&self, message: &Message, context: &ProcessContext) -> Result<(), ConsumerError> {
        (self.rv_fn)(message.clone(), self.shared_resources.clone(), context.clone()).await
    }
}

/// Shorthand for [`ConsumerFn::new`] returning a shareable consumer.
///
/// ```rust
/// use sqs_poller::consumer::{Consumer, consumer_fn};
///
/// let consumer = consumer_fn("OrderPlaced", (), |message, _shared, context| async move {
///     if context.is_cancelled() {
///         return Err("shutting down".into());
///     }
///     println!("order placed: {}", message.body());
///     Ok(())
/// });
/// assert_eq!(consumer.message_type(), "OrderPlaced");
/// ```
pub fn consumer_fn<F, Fut, TShared>(
    message_type: &str,
    shared_resources: TShared,
    rv_fn: F,
) -> Arc<dyn Consumer>
where
    F: Fn(Message, TShared, ProcessContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ConsumerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    Arc::new(ConsumerFn::new(message_type, shared_resources, rv_fn))
}
