use std::collections::HashMap;

use aws_sdk_sqs::types::MessageSystemAttributeName;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Name of the message attribute carrying the message type used for consumer resolution.
pub const MESSAGE_TYPE_ATTRIBUTE: &str = "MessageType";

/// A message received from the queue.
///
/// Messages are immutable once received. The poller owns each message until it
/// is either deleted after successful processing or abandoned for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_id: String,
    body: String,
    message_type: Option<String>,
    receipt_handle: String,
    receive_count: u32,
    attributes: HashMap<String, String>,
}

impl Message {
    /// Creates a message with a body and receipt handle, received once and without a type.
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Message {
            message_id: message_id.into(),
            body: body.into(),
            message_type: None,
            receipt_handle: receipt_handle.into(),
            receive_count: 1,
            attributes: HashMap::new(),
        }
    }

    /// Sets the message type, also recording it as the `MessageType` attribute.
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        let message_type = message_type.into();
        self.attributes
            .insert(MESSAGE_TYPE_ATTRIBUTE.to_string(), message_type.clone());
        self.message_type = Some(message_type);
        self
    }

    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name == MESSAGE_TYPE_ATTRIBUTE {
            self.message_type = Some(value.clone());
        }
        self.attributes.insert(name, value);
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The declared message type, if the message carries one.
    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    /// The receipt handle identifying this particular delivery.
    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    /// How many times the queue has delivered this message, including this delivery.
    pub fn receive_count(&self) -> u32 {
        self.receive_count
    }

    /// String-valued message attributes.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Deserializes the message body as JSON.
    pub fn body_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    /// Converts an SQS message into a [`Message`].
    ///
    /// Returns `None` when the message has no receipt handle, since such a
    /// delivery can never be acknowledged. A missing body becomes an empty body.
    ///
    /// The type comes from the `MessageType` attribute. When it is absent and
    /// the body is an SNS notification envelope, the envelope's `MessageType`
    /// attribute is used and the body is replaced by the inner notification message.
    pub fn from_sqs(message: &aws_sdk_sqs::types::Message) -> Option<Self> {
        let receipt_handle = message.receipt_handle()?.to_string();

        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse::<u32>().ok())
            .unwrap_or(1);

        let mut attributes: HashMap<String, String> = message
            .message_attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .string_value()
                            .map(|value| (name.clone(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut body = message.body().unwrap_or_default().to_string();
        let mut message_type = attributes.get(MESSAGE_TYPE_ATTRIBUTE).cloned();

        if message_type.is_none() {
            if let Some(notification) = SnsNotification::parse(&body) {
                message_type = notification.message_type();
                if let Some(message_type) = &message_type {
                    // Keeps the type on copies sent elsewhere, which carry the unwrapped body.
                    attributes.insert(MESSAGE_TYPE_ATTRIBUTE.to_string(), message_type.clone());
                }
                body = notification.message;
            }
        }

        Some(Message {
            message_id: message.message_id().unwrap_or_default().to_string(),
            body,
            message_type,
            receipt_handle,
            receive_count,
            attributes,
        })
    }
}

/// The JSON envelope SNS wraps around messages delivered to an SQS subscription
/// without raw message delivery.
#[derive(Debug, Deserialize)]
struct SnsNotification {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "MessageAttributes", default)]
    message_attributes: HashMap<String, SnsMessageAttribute>,
}

#[derive(Debug, Deserialize)]
struct SnsMessageAttribute {
    #[serde(rename = "Value")]
    value: String,
}

impl SnsNotification {
    fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<SnsNotification>(body)
            .ok()
            .filter(|notification| notification.kind == "Notification")
    }

    fn message_type(&self) -> Option<String> {
        self.message_attributes
            .get(MESSAGE_TYPE_ATTRIBUTE)
            .map(|attribute| attribute.value.clone())
    }
}
