//! Tests against a real SQS queue.
//!
//! Run with `TEST_SQS_QUEUE_URL` set (a `.env` file works) and `--ignored`.

use aws_sdk_sqs::types::MessageAttributeValue;
use sqs_poller::client::{self, SqsQueueClient};
use sqs_poller::consumer::consumer_fn;
use sqs_poller::message::MESSAGE_TYPE_ATTRIBUTE;
use sqs_poller::poller::{RunState, SqsPoller, SqsPollerConfig};
use sqs_poller::registry::ConsumerRegistry;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Clone)]
struct SharedCounter {
    count: Arc<Mutex<i32>>,
}

impl SharedCounter {
    fn new() -> Self {
        Self {
            count: Arc::new(Mutex::new(0)),
        }
    }

    async fn increment(&self) {
        let mut count = self.count.lock().await;
        *count += 1;
    }

    async fn get_count(&self) -> i32 {
        *self.count.lock().await
    }
}

fn queue_url() -> String {
    dotenvy::dotenv().ok();
    env::var("TEST_SQS_QUEUE_URL").expect("TEST_SQS_QUEUE_URL must be set")
}

fn message_type(value: &str) -> MessageAttributeValue {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .expect("valid message attribute")
}

#[tokio::test]
#[ignore = "requires a real SQS queue"]
async fn test_sqs_poller_processes_typed_messages() {
    let queue_url = queue_url();
    let sqs_client = client::create_sqs_client_from_env().await;

    for i in 0..2 {
        sqs_client
            .send_message()
            .queue_url(&queue_url)
            .message_body(format!("Test message {i}"))
            .message_attributes(MESSAGE_TYPE_ATTRIBUTE, message_type("IntegrationTest"))
            .send()
            .await
            .expect("Failed to send test message");
    }

    let shared_counter = SharedCounter::new();
    let registry = ConsumerRegistry::from_consumers(vec![consumer_fn(
        "IntegrationTest",
        shared_counter.clone(),
        |message, shared: SharedCounter, _context| async move {
            println!("Received message: {}", message.body());
            shared.increment().await;
            Ok(())
        },
    )])
    .expect("unique consumer types");

    let config = SqsPollerConfig::new(&queue_url).with_wait_time_seconds(5);
    let poller = SqsPoller::new(
        Arc::new(SqsQueueClient::new(sqs_client.clone(), &queue_url)),
        registry,
        config,
    );
    poller.start().await.expect("poller should start");

    let timeout_result = timeout(Duration::from_secs(30), async {
        loop {
            if shared_counter.get_count().await >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await;

    poller.stop().await;
    assert_eq!(poller.state(), RunState::Stopped);

    match timeout_result {
        Ok(_) => {
            let final_count = shared_counter.get_count().await;
            assert!(final_count >= 2, "Should have processed at least 2 messages");
        }
        Err(_) => {
            let final_count = shared_counter.get_count().await;
            panic!("Test timed out. Only processed {} messages", final_count);
        }
    }
}

#[tokio::test]
#[ignore = "requires a real SQS queue"]
async fn test_sqs_poller_with_shutdown() {
    let queue_url = queue_url();
    let sqs_client = client::create_sqs_client_from_env().await;

    sqs_client
        .send_message()
        .queue_url(&queue_url)
        .message_body("Shutdown test message")
        .message_attributes(MESSAGE_TYPE_ATTRIBUTE, message_type("IntegrationTest"))
        .send()
        .await
        .expect("Failed to send test message");

    let shared_counter = SharedCounter::new();
    let registry = ConsumerRegistry::from_consumers(vec![consumer_fn(
        "IntegrationTest",
        shared_counter.clone(),
        |message, shared: SharedCounter, _context| async move {
            println!("Shutdown test handler received: {}", message.body());
            shared.increment().await;
            Ok(())
        },
    )])
    .expect("unique consumer types");

    let poller = SqsPoller::new(
        Arc::new(SqsQueueClient::new(sqs_client.clone(), &queue_url)),
        registry,
        SqsPollerConfig::new(&queue_url),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let receive_task = tokio::spawn(async move {
        poller
            .run_until(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    tokio::time::sleep(Duration::from_secs(5)).await;

    println!("Sending shutdown signal...");
    let _ = shutdown_tx.send(());

    // Stop interrupts the 20 second long poll, so shutdown is prompt.
    let shutdown_result = timeout(Duration::from_secs(10), receive_task)
        .await
        .expect("Shutdown test timed out - poller did not shut down gracefully");
    assert!(shutdown_result.expect("poller task panicked").is_ok());

    let final_count = shared_counter.get_count().await;
    assert!(
        final_count >= 1,
        "Should have processed at least 1 message before shutdown"
    );
}
