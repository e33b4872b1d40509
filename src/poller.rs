use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::client::QueueClient;
use crate::errors::SqsPollerError;
use crate::registry::ConsumerRegistry;

mod config;
mod dispatch;
mod state;

pub use config::{
    BackoffSchedule, MAX_MESSAGES_PER_RECEIVE, MAX_VISIBILITY_TIMEOUT_SECONDS,
    MAX_WAIT_TIME_SECONDS, SqsPollerConfig, UnresolvedMessagePolicy,
};
pub use state::RunState;

use dispatch::{DispatchOutcome, Dispatcher};

/// Polls a queue and routes every message to the consumer registered for its type.
///
/// The poller owns one background loop that long-polls the queue, dispatches
/// each message onto a worker pool bounded by
/// [`concurrency_limit`](SqsPollerConfig::concurrency_limit), deletes messages
/// whose consumer succeeds, and leaves everything else for redelivery.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sqs_poller::client::{SqsQueueClient, create_sqs_client_from_env};
/// use sqs_poller::consumer::consumer_fn;
/// use sqs_poller::poller::{SqsPoller, SqsPollerConfig};
/// use sqs_poller::registry::ConsumerRegistry;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let queue_url = "https://sqs.us-east-1.amazonaws.com/123456789012/orders";
///     let client = SqsQueueClient::new(create_sqs_client_from_env().await, queue_url);
///
///     let registry = ConsumerRegistry::from_consumers(vec![
///         consumer_fn("OrderPlaced", (), |message, _, _context| async move {
///             println!("order placed: {}", message.body());
///             Ok(())
///         }),
///     ])?;
///
///     let poller = SqsPoller::new(Arc::new(client), registry, SqsPollerConfig::new(queue_url));
///     poller.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
///     Ok(())
/// }
/// ```
pub struct SqsPoller {
    client: Arc<dyn QueueClient>,
    registry: Arc<ConsumerRegistry>,
    config: SqsPollerConfig,
    state: Arc<watch::Sender<RunState>>,
    run: Mutex<Option<RunHandle>>,
}

struct RunHandle {
    cancellation: CancellationToken,
    task: JoinHandle<()>,
}

impl SqsPoller {
    pub fn new(
        client: Arc<dyn QueueClient>,
        registry: ConsumerRegistry,
        config: SqsPollerConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Stopped);
        SqsPoller {
            client,
            registry: Arc::new(registry),
            config,
            state: Arc::new(state),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watches lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SqsPollerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    /// Validates the configuration and starts the poll loop.
    ///
    /// Returns once the poller is [`RunState::Polling`]. Fails with
    /// [`SqsPollerError::ConfigurationError`] (leaving the poller stopped) or
    /// with [`SqsPollerError::InvalidState`] if the poller is already running.
    pub async fn start(&self) -> Result<(), SqsPollerError> {
        let mut run = self.run.lock().await;
        let current = self.state();
        if run.is_some() || current != RunState::Stopped {
            return Err(SqsPollerError::InvalidState {
                expected: RunState::Stopped,
                actual: current,
            });
        }

        self.state.send_replace(RunState::Starting);
        if let Err(error) = self.config.validate() {
            tracing::error!(queue_url = %self.config.queue_url, error = %error, "refusing to start poller");
            self.state.send_replace(RunState::Stopped);
            return Err(error);
        }
        if self.registry.is_empty() {
            tracing::warn!(
                queue_url = %self.config.queue_url,
                "no consumers registered, every message will be unresolved"
            );
        }

        let cancellation = CancellationToken::new();
        let poll_loop = PollLoop {
            client: Arc::clone(&self.client),
            dispatcher: Dispatcher::new(
                Arc::clone(&self.client),
                Arc::clone(&self.registry),
                &self.config,
            ),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            cancellation: cancellation.clone(),
        };

        self.state.send_replace(RunState::Polling);
        let task = tokio::spawn(poll_loop.run());

        tracing::info!(
            queue_url = %self.config.queue_url,
            message_types = ?self.registry.message_types(),
            concurrency_limit = self.config.concurrency_limit,
            max_number_of_messages = self.config.max_number_of_messages,
            wait_time_seconds = self.config.wait_time_seconds,
            "sqs poller started"
        );

        *run = Some(RunHandle { cancellation, task });
        Ok(())
    }

    /// Stops the poll loop.
    ///
    /// No receive is issued after the signal. Returns once every in-flight
    /// message has settled or the drain timeout has elapsed, whichever comes
    /// first. Stopping a stopped poller does nothing.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(RunHandle { cancellation, task }) = run.take() else {
            return;
        };

        tracing::info!(queue_url = %self.config.queue_url, "stopping sqs poller");
        cancellation.cancel();
        if let Err(error) = task.await {
            tracing::error!(queue_url = %self.config.queue_url, error = %error, "poll loop terminated abnormally");
        }

        self.state.send_replace(RunState::Stopped);
        tracing::info!(queue_url = %self.config.queue_url, "sqs poller stopped");
    }

    /// Starts the poller, waits for `shutdown` to complete, then stops it.
    ///
    /// ```rust,no_run
    /// # async fn example(poller: sqs_poller::poller::SqsPoller) -> Result<(), sqs_poller::errors::SqsPollerError> {
    /// let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    /// # drop(shutdown_tx);
    /// poller.run_until(async { shutdown_rx.await.ok(); }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), SqsPollerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        tracing::info!(queue_url = %self.config.queue_url, "shutdown signal received");
        self.stop().await;
        Ok(())
    }
}

impl Drop for SqsPoller {
    fn drop(&mut self) {
        // The detached loop still drains within the drain timeout.
        if let Some(run) = self.run.get_mut().take() {
            run.cancellation.cancel();
        }
    }
}

struct PollLoop {
    client: Arc<dyn QueueClient>,
    dispatcher: Dispatcher,
    config: SqsPollerConfig,
    state: Arc<watch::Sender<RunState>>,
    cancellation: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let mut inflight: JoinSet<DispatchOutcome> = JoinSet::new();
        let request = self.config.receive_request();
        let mut consecutive_failures: u32 = 0;

        'polling: loop {
            while let Some(result) = inflight.try_join_next() {
                self.settled(result);
            }

            let received = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break,
                result = self.client.receive(&request) => result,
            };

            let messages = match received {
                Ok(messages) => {
                    if consecutive_failures > 0 {
                        tracing::info!(
                            queue_url = %self.config.queue_url,
                            previous_failures = consecutive_failures,
                            "receive recovered after consecutive failures"
                        );
                    }
                    consecutive_failures = 0;
                    messages
                }
                Err(error) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self.config.backoff.delay_for(consecutive_failures);
                    if error.is_recoverable() {
                        tracing::warn!(
                            queue_url = %self.config.queue_url,
                            error = %error,
                            consecutive_failures,
                            backoff_ms = delay.as_millis() as u64,
                            "failed to receive messages, backing off"
                        );
                    } else {
                        // Only custom queue clients return these.
                        tracing::error!(
                            queue_url = %self.config.queue_url,
                            error = %error,
                            consecutive_failures,
                            backoff_ms = delay.as_millis() as u64,
                            "queue client returned a non-transient error on receive, backing off"
                        );
                    }
                    tokio::select! {
                        biased;
                        _ = self.cancellation.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if messages.is_empty() {
                tracing::trace!(queue_url = %self.config.queue_url, "no messages received");
                continue;
            }
            tracing::debug!(
                queue_url = %self.config.queue_url,
                message_count = messages.len(),
                "received messages"
            );

            let mut pending = messages.into_iter();
            while let Some(message) = pending.next() {
                let permit = tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => {
                        tracing::info!(
                            queue_url = %self.config.queue_url,
                            undispatched = pending.len() + 1,
                            "stop requested while waiting for a free worker, leaving undispatched messages for redelivery"
                        );
                        break 'polling;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'polling,
                    },
                };

                let dispatcher = self.dispatcher.clone();
                let cancellation = self.cancellation.clone();
                inflight.spawn(async move {
                    let _permit = permit;
                    dispatcher.dispatch(message, cancellation).await
                });
            }
        }

        self.drain(inflight).await;
    }

    /// Waits up to the drain timeout for in-flight messages, then abandons the rest.
    async fn drain(&self, mut inflight: JoinSet<DispatchOutcome>) {
        self.state.send_replace(RunState::Draining);
        tracing::info!(
            queue_url = %self.config.queue_url,
            in_flight = inflight.len(),
            drain_timeout_ms = self.config.drain_timeout.as_millis() as u64,
            "draining in-flight messages"
        );

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(result) = inflight.join_next().await {
                self.settled(result);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                queue_url = %self.config.queue_url,
                abandoned = inflight.len(),
                "drain timeout elapsed, abandoning in-flight messages for redelivery"
            );
            inflight.shutdown().await;
        }
    }

    fn settled(&self, result: Result<DispatchOutcome, JoinError>) {
        match result {
            Ok(outcome) => {
                tracing::trace!(queue_url = %self.config.queue_url, ?outcome, "message settled");
            }
            Err(error) if error.is_cancelled() => {}
            Err(error) => {
                tracing::error!(queue_url = %self.config.queue_url, error = %error, "dispatch task failed");
            }
        }
    }
}
