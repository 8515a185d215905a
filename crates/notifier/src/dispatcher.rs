//! Bounded worker pool consuming the dispatch queue.
//!
//! A permit is taken before the next message is pulled, so when every worker
//! is busy the backlog stays in the queue rather than in memory. Shutdown
//! stops consuming and waits for in-flight messages to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use herald_common::config::AppConfig;
use herald_common::queue::{Delivery, DispatchQueue, QueueError};
use herald_common::types::DispatchMessage;

use crate::processor::{DispatchProcessor, Disposition};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Maximum messages processed at once.
    pub concurrency: usize,
    /// How long one queue poll blocks before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Pause before a requeue, and after a failed queue poll.
    pub requeue_delay: Duration,
}

impl DispatcherConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            requeue_delay: Duration::from_millis(config.requeue_delay_ms),
            ..Self::default()
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            poll_timeout: Duration::from_secs(1),
            requeue_delay: Duration::from_secs(1),
        }
    }
}

pub struct Dispatcher {
    queue: Arc<dyn DispatchQueue>,
    processor: Arc<DispatchProcessor>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        processor: Arc<DispatchProcessor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Consume until `shutdown` is cancelled, then drain in-flight work.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        tracing::info!(concurrency, "Dispatcher started");

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit?,
            };

            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }

            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.queue.next_delivery(self.config.poll_timeout) => polled,
            };

            let delivery = match polled {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Queue poll failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.requeue_delay) => continue,
                    }
                }
            };

            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let requeue_delay = self.config.requeue_delay;

            tasks.spawn(async move {
                let _permit = permit;
                handle_delivery(queue.as_ref(), &processor, delivery, requeue_delay).await;
            });
        }

        tracing::info!(
            in_flight = tasks.len(),
            "Dispatcher stopping, draining in-flight messages"
        );
        while let Some(joined) = tasks.join_next().await {
            log_join_error(joined);
        }
        tracing::info!("Dispatcher stopped");

        Ok(())
    }
}

async fn handle_delivery(
    queue: &dyn DispatchQueue,
    processor: &DispatchProcessor,
    delivery: Delivery,
    requeue_delay: Duration,
) {
    let outcome = processor.process(&delivery.payload).await;
    tracing::debug!(tag = delivery.tag(), outcome = ?outcome, "Delivery processed");

    let disposition = outcome.disposition();
    if disposition == Disposition::Requeue {
        tokio::time::sleep(requeue_delay).await;
    }

    let Err(e) = settle(queue, &delivery, disposition).await else {
        return;
    };
    tracing::warn!(tag = delivery.tag(), error = %e, "Failed to settle delivery, retrying once");
    tokio::time::sleep(requeue_delay).await;

    if let Err(e) = settle(queue, &delivery, disposition).await {
        // Stuck in this consumer's processing list until the next recover().
        let log_id = DispatchMessage::decode(&delivery.payload)
            .ok()
            .map(|m| m.notification_log_id);
        tracing::error!(
            tag = delivery.tag(),
            log_id = ?log_id,
            disposition = ?disposition,
            error = %e,
            "Delivery left unsettled until consumer restart"
        );
    }
}

async fn settle(
    queue: &dyn DispatchQueue,
    delivery: &Delivery,
    disposition: Disposition,
) -> Result<(), QueueError> {
    match disposition {
        Disposition::Ack => queue.ack(delivery).await,
        Disposition::Discard => queue.nack(delivery, false).await,
        Disposition::Requeue => queue.nack(delivery, true).await,
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Dispatch task panicked");
    }
}
