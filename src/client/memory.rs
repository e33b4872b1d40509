//! An in-memory [`QueueClient`] with SQS-like visibility semantics.
//!
//! Received messages stay hidden for the visibility timeout and are redelivered
//! with an incremented receive count unless deleted first. Every call is
//! recorded, and receive/delete failures can be injected, which makes the
//! client suitable for tests and local runs without AWS.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::client::{QueueClient, ReceiveRequest};
use crate::errors::SqsPollerError;
use crate::message::Message;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct StoredMessage {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    messages: Vec<StoredMessage>,
    next_message_id: u64,
    next_receipt: u64,
    pending_receive_failures: usize,
    fail_deletes: bool,
    receive_requests: Vec<ReceiveRequest>,
    deleted_receipt_handles: Vec<String>,
    deleted_message_ids: Vec<String>,
    forwarded: Vec<(String, Message)>,
    visibility_changes: Vec<(String, i32)>,
}

/// In-memory queue implementing [`QueueClient`].
pub struct InMemoryQueueClient {
    state: Mutex<MemoryState>,
    arrivals: Notify,
    default_visibility_timeout: Duration,
}

impl Default for InMemoryQueueClient {
    fn default() -> Self {
        Self::with_default_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue whose receives use `timeout` when the request does not set one.
    pub fn with_default_visibility_timeout(timeout: Duration) -> Self {
        InMemoryQueueClient {
            state: Mutex::new(MemoryState::default()),
            arrivals: Notify::new(),
            default_visibility_timeout: timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a message. Its receipt handle and receive count are ignored.
    pub fn send(&self, message: Message) {
        {
            let mut state = self.state();
            state.messages.push(StoredMessage {
                message_id: message.message_id().to_string(),
                body: message.body().to_string(),
                attributes: message.attributes().clone(),
                receive_count: 0,
                visible_at: Instant::now(),
                receipt_handle: None,
            });
        }
        self.arrivals.notify_waiters();
    }

    /// Enqueues a typed message with a generated id, returning the id.
    pub fn send_message(&self, message_type: &str, body: &str) -> String {
        let message_id = {
            let mut state = self.state();
            state.next_message_id += 1;
            format!("msg-{}", state.next_message_id)
        };
        self.send(Message::new(message_id.clone(), body, "").with_message_type(message_type));
        message_id
    }

    /// Makes the next `count` receive calls fail with a transient error.
    pub fn fail_next_receives(&self, count: usize) {
        self.state().pending_receive_failures = count;
    }

    /// Makes every delete fail while `fail` is set.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    /// Every receive request issued so far, including failed ones.
    pub fn receive_requests(&self) -> Vec<ReceiveRequest> {
        self.state().receive_requests.clone()
    }

    pub fn receive_calls(&self) -> usize {
        self.state().receive_requests.len()
    }

    pub fn deleted_receipt_handles(&self) -> Vec<String> {
        self.state().deleted_receipt_handles.clone()
    }

    pub fn deleted_message_ids(&self) -> Vec<String> {
        self.state().deleted_message_ids.clone()
    }

    /// Messages sent to other queues, with the destination queue url.
    pub fn forwarded(&self) -> Vec<(String, Message)> {
        self.state().forwarded.clone()
    }

    pub fn visibility_changes(&self) -> Vec<(String, i32)> {
        self.state().visibility_changes.clone()
    }

    /// Number of messages still in the queue, visible or not.
    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the messages still in the queue.
    pub fn remaining_message_ids(&self) -> Vec<String> {
        self.state()
            .messages
            .iter()
            .map(|stored| stored.message_id.clone())
            .collect()
    }

    /// Takes up to `request.max_number_of_messages` visible messages and hides them.
    /// Otherwise returns the instant the next hidden message becomes visible, if any.
    fn take_visible(&self, request: &ReceiveRequest) -> Result<Vec<Message>, Option<Instant>> {
        let now = Instant::now();
        let visibility = request
            .visibility_timeout_seconds
            .map(|seconds| Duration::from_secs(seconds.max(0) as u64))
            .unwrap_or(self.default_visibility_timeout);
        let max = request.max_number_of_messages.max(0) as usize;

        let mut state = self.state();
        let mut batch = Vec::new();
        let mut receipt = state.next_receipt;
        for stored in state.messages.iter_mut() {
            if batch.len() >= max {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            receipt += 1;
            let receipt_handle = format!("{}-receipt-{}", stored.message_id, receipt);
            stored.receive_count += 1;
            stored.visible_at = now + visibility;
            stored.receipt_handle = Some(receipt_handle.clone());

            let message = stored.attributes.iter().fold(
                Message::new(stored.message_id.clone(), stored.body.clone(), receipt_handle)
                    .with_receive_count(stored.receive_count),
                |message, (name, value)| message.with_attribute(name.clone(), value.clone()),
            );
            batch.push(message);
        }
        state.next_receipt = receipt;

        if batch.is_empty() {
            Err(state.messages.iter().map(|stored| stored.visible_at).min())
        } else {
            Ok(batch)
        }
    }

    fn position_of(state: &MemoryState, receipt_handle: &str) -> Option<usize> {
        state
            .messages
            .iter()
            .position(|stored| stored.receipt_handle.as_deref() == Some(receipt_handle))
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<Message>, SqsPollerError> {
        {
            let mut state = self.state();
            state.receive_requests.push(*request);
            if state.pending_receive_failures > 0 {
                state.pending_receive_failures -= 1;
                return Err(SqsPollerError::TransientQueueError(
                    "injected receive failure".to_string(),
                ));
            }
        }

        let deadline = Instant::now() + Duration::from_secs(request.wait_time_seconds.max(0) as u64);
        loop {
            let arrival = self.arrivals.notified();
            let next_visible = match self.take_visible(request) {
                Ok(batch) => return Ok(batch),
                Err(next_visible) => next_visible,
            };

            if Instant::now() >= deadline {
                // Even a zero-wait receive gives other tasks a chance to run.
                tokio::task::yield_now().await;
                return Ok(Vec::new());
            }

            let wake_at = next_visible
                .filter(|at| *at < deadline)
                .unwrap_or(deadline);
            tokio::select! {
                _ = arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), SqsPollerError> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(SqsPollerError::TransientQueueError(
                "injected delete failure".to_string(),
            ));
        }
        let position = Self::position_of(&state, receipt_handle).ok_or_else(|| {
            SqsPollerError::TransientQueueError(format!(
                "receipt handle {receipt_handle} is invalid"
            ))
        })?;
        let removed = state.messages.remove(position);
        state.deleted_receipt_handles.push(receipt_handle.to_string());
        state.deleted_message_ids.push(removed.message_id);
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &str,
        visibility_timeout_seconds: i32,
    ) -> Result<(), SqsPollerError> {
        let mut state = self.state();
        let position = Self::position_of(&state, receipt_handle).ok_or_else(|| {
            SqsPollerError::TransientQueueError(format!(
                "receipt handle {receipt_handle} is invalid"
            ))
        })?;
        state.messages[position].visible_at =
            Instant::now() + Duration::from_secs(visibility_timeout_seconds.max(0) as u64);
        state
            .visibility_changes
            .push((receipt_handle.to_string(), visibility_timeout_seconds));
        drop(state);
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn forward(&self, queue_url: &str, message: &Message) -> Result<(), SqsPollerError> {
        self.state()
            .forwarded
            .push((queue_url.to_string(), message.clone()));
        Ok(())
    }
}
