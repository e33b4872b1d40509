//! # SQS Poller
//!
//! A background AWS SQS poller that long-polls a queue and routes every message
//! to the one consumer registered for its type.
//!
//! ## Features
//!
//! - Explicit consumer registration keyed by the `MessageType` message attribute
//!   (SNS notification envelopes are unwrapped)
//! - Bounded concurrent processing with a configurable worker limit
//! - Messages deleted only after their consumer succeeds (at-least-once delivery)
//! - Exponential backoff on failed receive calls
//! - Optional dead-lettering once a message exceeds a receive count
//! - Explicit `start`/`stop` lifecycle with a bounded drain on shutdown
//! - Structured logging through `tracing`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqs_poller::{
//!     client::{SqsQueueClient, create_sqs_client_from_env},
//!     consumer::consumer_fn,
//!     poller::{SqsPoller, SqsPollerConfig},
//!     registry::ConsumerRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue_url = "https://sqs.region.amazonaws.com/account/queue-name";
//!     let client = SqsQueueClient::new(create_sqs_client_from_env().await, queue_url);
//!     let shared_data = "shared state".to_string();
//!
//!     let registry = ConsumerRegistry::from_consumers(vec![consumer_fn(
//!         "OrderPlaced",
//!         shared_data,
//!         |message, shared, _context| async move {
//!             println!("Processing message: {} with shared: {}", message.body(), shared);
//!             Ok(())
//!         },
//!     )])?;
//!
//!     let poller = SqsPoller::new(Arc::new(client), registry, SqsPollerConfig::new(queue_url));
//!     poller.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     poller.stop().await;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod consumer;
pub mod errors;
pub mod message;
pub mod poller;
pub mod registry;

pub use client::{QueueClient, ReceiveRequest, SqsQueueClient};
pub use consumer::{Consumer, ConsumerFn, ProcessContext, consumer_fn};
pub use errors::{ConsumerError, SqsPollerError};
pub use message::Message;
pub use poller::{RunState, SqsPoller, SqsPollerConfig};
pub use registry::ConsumerRegistry;
