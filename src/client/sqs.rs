use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};

use crate::client::{QueueClient, ReceiveRequest};
use crate::errors::SqsPollerError;
use crate::message::Message;

/// [`QueueClient`] backed by an `aws_sdk_sqs::Client` and bound to one queue.
#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    /// The AWS SQS client used to interact with the SQS service.
    sqs_client: aws_sdk_sqs::Client,

    queue_url: String,
}

impl SqsQueueClient {
    pub fn new(sqs_client: aws_sdk_sqs::Client, queue_url: &str) -> Self {
        SqsQueueClient {
            sqs_client,
            queue_url: queue_url.to_string(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<Message>, SqsPollerError> {
        let output = self
            .sqs_client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(request.max_number_of_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .set_visibility_timeout(request.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All")
            .send()
            .await?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| {
                let converted = Message::from_sqs(message);
                if converted.is_none() {
                    tracing::warn!(
                        message_id = message.message_id().unwrap_or("unknown"),
                        "received a message without a receipt handle, skipping"
                    );
                }
                converted
            })
            .collect();

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), SqsPollerError> {
        self.sqs_client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        visibility_timeout_seconds: i32,
    ) -> Result<(), SqsPollerError> {
        self.sqs_client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(visibility_timeout_seconds)
            .send()
            .await?;
        Ok(())
    }

    async fn forward(&self, queue_url: &str, message: &Message) -> Result<(), SqsPollerError> {
        let attributes = forwarded_attributes(message)?;

        self.sqs_client
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body())
            .set_message_attributes(Some(attributes).filter(|attrs| !attrs.is_empty()))
            .send()
            .await?;
        Ok(())
    }
}

/// The string attributes sent along with a forwarded copy of `message`.
fn forwarded_attributes(
    message: &Message,
) -> Result<HashMap<String, MessageAttributeValue>, SqsPollerError> {
    let mut attributes = HashMap::with_capacity(message.attributes().len());
    for (name, value) in message.attributes() {
        let value = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(|e| SqsPollerError::TransientQueueError(e.to_string()))?;
        attributes.insert(name.clone(), value);
    }
    Ok(attributes)
}
