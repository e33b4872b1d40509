use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::client::QueueClient;
use crate::consumer::ProcessContext;
use crate::errors::SqsPollerError;
use crate::message::Message;
use crate::poller::config::{SqsPollerConfig, UnresolvedMessagePolicy};
use crate::registry::ConsumerRegistry;

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// Processed and deleted.
    Acknowledged,
    /// Processed, but the delete failed; the message will be redelivered.
    AcknowledgeFailed,
    /// The consumer failed or panicked; the message was left for redelivery.
    Failed,
    /// No consumer matched and the message was left for redelivery.
    Unresolved,
    /// No consumer matched and the message was deleted per policy.
    UnresolvedDeleted,
    /// Moved to the dead-letter queue.
    DeadLettered,
    /// The dead-letter move failed; the message was left for redelivery.
    DeadLetterFailed,
}

/// Routes one message to its consumer and settles it with the queue.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    client: Arc<dyn QueueClient>,
    registry: Arc<ConsumerRegistry>,
    dead_letter: Option<(String, u32)>,
    unresolved_policy: UnresolvedMessagePolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        client: Arc<dyn QueueClient>,
        registry: Arc<ConsumerRegistry>,
        config: &SqsPollerConfig,
    ) -> Self {
        Dispatcher {
            client,
            registry,
            dead_letter: config
                .dead_letter()
                .map(|(url, max)| (url.to_string(), max)),
            unresolved_policy: config.unresolved_policy,
        }
    }

    pub(crate) async fn dispatch(
        &self,
        message: Message,
        cancellation: CancellationToken,
    ) -> DispatchOutcome {
        if let Some((queue_url, max_receive_count)) = &self.dead_letter {
            if message.receive_count() > *max_receive_count {
                return self.move_to_dead_letter(&message, queue_url).await;
            }
        }

        let consumer = match self.registry.resolve(&message) {
            Ok(consumer) => consumer,
            Err(error) => return self.unresolved(&message, error).await,
        };

        let context = ProcessContext::new(
            Arc::clone(&self.client),
            message.receipt_handle().to_string(),
            cancellation,
        );

        let result = AssertUnwindSafe(consumer.process(&message, &context))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_message(panic).into()));

        match result {
            Ok(()) => self.acknowledge(&message).await,
            Err(source) => {
                let error = SqsPollerError::ConsumerProcessingError {
                    message_id: message.message_id().to_string(),
                    message_type: consumer.message_type().to_string(),
                    source,
                };
                tracing::error!(
                    message_id = message.message_id(),
                    message_type = consumer.message_type(),
                    receive_count = message.receive_count(),
                    error = %error,
                    "failed to process message, leaving it for redelivery"
                );
                DispatchOutcome::Failed
            }
        }
    }

    async fn acknowledge(&self, message: &Message) -> DispatchOutcome {
        match self.client.delete(message.receipt_handle()).await {
            Ok(()) => {
                tracing::debug!(message_id = message.message_id(), "message processed and deleted");
                DispatchOutcome::Acknowledged
            }
            Err(error) => {
                tracing::warn!(
                    message_id = message.message_id(),
                    error = %error,
                    "failed to delete processed message, it may be delivered again"
                );
                DispatchOutcome::AcknowledgeFailed
            }
        }
    }

    async fn unresolved(&self, message: &Message, error: SqsPollerError) -> DispatchOutcome {
        match self.unresolved_policy {
            UnresolvedMessagePolicy::Retain => {
                tracing::warn!(
                    message_id = message.message_id(),
                    message_type = message.message_type(),
                    receive_count = message.receive_count(),
                    error = %error,
                    "no consumer for message, leaving it for redelivery"
                );
                DispatchOutcome::Unresolved
            }
            UnresolvedMessagePolicy::Delete => {
                tracing::warn!(
                    message_id = message.message_id(),
                    message_type = message.message_type(),
                    error = %error,
                    "no consumer for message, deleting it"
                );
                match self.client.delete(message.receipt_handle()).await {
                    Ok(()) => DispatchOutcome::UnresolvedDeleted,
                    Err(error) => {
                        tracing::warn!(
                            message_id = message.message_id(),
                            error = %error,
                            "failed to delete unresolved message"
                        );
                        DispatchOutcome::Unresolved
                    }
                }
            }
        }
    }

    async fn move_to_dead_letter(&self, message: &Message, queue_url: &str) -> DispatchOutcome {
        if let Err(error) = self.client.forward(queue_url, message).await {
            tracing::error!(
                message_id = message.message_id(),
                dead_letter_queue_url = queue_url,
                error = %error,
                "failed to move message to dead-letter queue"
            );
            return DispatchOutcome::DeadLetterFailed;
        }

        if let Err(error) = self.client.delete(message.receipt_handle()).await {
            // The copy already landed, so a redelivery would only dead-letter it again.
            tracing::warn!(
                message_id = message.message_id(),
                error = %error,
                "moved message to dead-letter queue but failed to delete the original"
            );
        }

        tracing::warn!(
            message_id = message.message_id(),
            message_type = message.message_type(),
            receive_count = message.receive_count(),
            dead_letter_queue_url = queue_url,
            "message exceeded max receive count, moved to dead-letter queue"
        );
        DispatchOutcome::DeadLettered
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    format!("consumer panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReceiveRequest;
    use crate::client::memory::InMemoryQueueClient;
    use crate::consumer::{Consumer, consumer_fn};
    use crate::errors::ConsumerError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct PanickingConsumer;

    #[async_trait]
    impl Consumer for PanickingConsumer {
        fn message_type(&self) -> &str {
            "Panics"
        }

        async fn process(&self, _message: &Message, _context: &ProcessContext) -> Result<(), ConsumerError> {
            panic!("boom")
        }
    }

    fn registry() -> Arc<ConsumerRegistry> {
        Arc::new(
            ConsumerRegistry::from_consumers(vec![
                consumer_fn("Ok", (), |_message, _, _| async { Ok(()) }),
                consumer_fn("Fails", (), |_message, _, _| async {
                    Err::<(), ConsumerError>("rejected".into())
                }),
                Arc::new(PanickingConsumer) as Arc<dyn Consumer>,
            ])
            .unwrap(),
        )
    }

    async fn receive_one(client: &InMemoryQueueClient, message_type: &str) -> Message {
        client.send_message(message_type, "{}");
        client
            .receive(&ReceiveRequest::new(1, 0))
            .await
            .unwrap()
            .remove(0)
    }

    fn dispatcher(client: &Arc<InMemoryQueueClient>, config: &SqsPollerConfig) -> Dispatcher {
        Dispatcher::new(client.clone(), registry(), config)
    }

    fn config() -> SqsPollerConfig {
        SqsPollerConfig::new("https://queue")
    }

    #[tokio::test]
    async fn success_deletes_the_delivery() {
        let client = Arc::new(InMemoryQueueClient::new());
        let message = receive_one(&client, "Ok").await;

        let outcome = dispatcher(&client, &config())
            .dispatch(message.clone(), CancellationToken::new())
            .await;

        assert_eq!(outcome, DispatchOutcome::Acknowledged);
        assert_eq!(
            client.deleted_receipt_handles(),
            vec![message.receipt_handle().to_string()]
        );
    }

    #[tokio::test]
    async fn failure_and_panic_leave_the_message() {
        let client = Arc::new(InMemoryQueueClient::new());
        let dispatcher = dispatcher(&client, &config());

        let failing = receive_one(&client, "Fails").await;
        let panicking = receive_one(&client, "Panics").await;

        assert_eq!(
            dispatcher.dispatch(failing, CancellationToken::new()).await,
            DispatchOutcome::Failed
        );
        assert_eq!(
            dispatcher.dispatch(panicking, CancellationToken::new()).await,
            DispatchOutcome::Failed
        );
        assert!(client.deleted_receipt_handles().is_empty());
        assert_eq!(client.len(), 2);
    }

    #[tokio::test]
    async fn unresolved_follows_policy() {
        let client = Arc::new(InMemoryQueueClient::new());

        let retained = receive_one(&client, "Unknown").await;
        let outcome = dispatcher(&client, &config())
            .dispatch(retained, CancellationToken::new())
            .await;
        assert_eq!(outcome, DispatchOutcome::Unresolved);
        assert_eq!(client.len(), 1);

        let deleted = receive_one(&client, "Unknown").await;
        let outcome = dispatcher(
            &client,
            &config().with_unresolved_policy(UnresolvedMessagePolicy::Delete),
        )
        .dispatch(deleted, CancellationToken::new())
        .await;
        assert_eq!(outcome, DispatchOutcome::UnresolvedDeleted);
        assert_eq!(client.len(), 1);
    }

    #[tokio::test]
    async fn delete_failure_is_reported_not_raised() {
        let client = Arc::new(InMemoryQueueClient::new());
        let message = receive_one(&client, "Ok").await;
        client.set_fail_deletes(true);

        let outcome = dispatcher(&client, &config())
            .dispatch(message, CancellationToken::new())
            .await;

        assert_eq!(outcome, DispatchOutcome::AcknowledgeFailed);
        assert_eq!(client.len(), 1);
    }

    #[tokio::test]
    async fn over_threshold_goes_to_dead_letter_queue_without_processing() {
        let client = Arc::new(InMemoryQueueClient::with_default_visibility_timeout(
            Duration::ZERO,
        ));
        let config = config().with_dead_letter_queue("https://dlq", 2);
        let dispatcher = dispatcher(&client, &config);

        let first = receive_one(&client, "Fails").await;
        assert_eq!(first.receive_count(), 1);
        assert_eq!(
            dispatcher.dispatch(first, CancellationToken::new()).await,
            DispatchOutcome::Failed
        );

        let request = ReceiveRequest::new(1, 0);
        let second = client.receive(&request).await.unwrap().remove(0);
        assert_eq!(
            dispatcher.dispatch(second, CancellationToken::new()).await,
            DispatchOutcome::Failed
        );

        let third = client.receive(&request).await.unwrap().remove(0);
        assert_eq!(third.receive_count(), 3);
        assert_eq!(
            dispatcher.dispatch(third.clone(), CancellationToken::new()).await,
            DispatchOutcome::DeadLettered
        );

        let forwarded = client.forwarded();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, "https://dlq");
        assert_eq!(forwarded[0].1.message_id(), third.message_id());
        assert!(client.is_empty());
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(Box::new("static")), "consumer panicked: static");
        assert_eq!(
            panic_message(Box::new("owned".to_string())),
            "consumer panicked: owned"
        );
        assert_eq!(panic_message(Box::new(7_u8)), "consumer panicked: unknown panic");
    }
}
