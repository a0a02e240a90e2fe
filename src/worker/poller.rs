//! Queue poller — feeds queued ticket messages to the batch consumer.
//!
//! Timer-based loop:
//! 1. `receive()` up to `batch_size` deliveries
//! 2. `BatchConsumer::handle_batch()`
//! 3. `ack()` processed deliveries, `release()` failed ones
//! 4. Dead-lettered deliveries mark their ticket `FAILED`
//!
//! A delivery whose ack or release fails stays in flight and is handed out
//! again once `visibility_timeout` has passed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::DatabaseError;
use crate::pipeline::consumer::{BatchConsumer, BatchReport};
use crate::pipeline::updater::TicketStateUpdater;
use crate::store::traits::{ReleaseOutcome, TicketQueue};

/// Everything one poll cycle needs.
pub struct QueueWorker {
    queue: Arc<dyn TicketQueue>,
    consumer: Arc<BatchConsumer>,
    updater: Arc<TicketStateUpdater>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn TicketQueue>,
        consumer: Arc<BatchConsumer>,
        updater: Arc<TicketStateUpdater>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            consumer,
            updater,
            config,
        }
    }

    /// Run one receive → process → settle cycle.
    ///
    /// Returns `None` when the queue was empty.
    pub async fn process_once(&self) -> Result<Option<BatchReport>, DatabaseError> {
        let batch = self
            .queue
            .receive(self.config.batch_size, self.config.visibility_timeout)
            .await?;
        if batch.is_empty() {
            return Ok(None);
        }

        let report = self.consumer.handle_batch(batch).await;
        self.settle(&report).await;
        Ok(Some(report))
    }

    /// Acknowledge successes and hand failures back to the queue.
    async fn settle(&self, report: &BatchReport) {
        for message_id in &report.processed {
            if let Err(e) = self.queue.ack(message_id).await {
                // Redelivered after the visibility timeout; the update is idempotent.
                warn!(message_id = %message_id, error = %e, "Failed to acknowledge message");
            }
        }

        for failure in &report.failures {
            let outcome = match self
                .queue
                .release(&failure.message_id, &failure.error, self.config.max_receive_count)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        message_id = %failure.message_id,
                        error = %e,
                        "Failed to release message; it stays in flight until the visibility timeout"
                    );
                    continue;
                }
            };

            match (outcome, &failure.ticket_id) {
                (ReleaseOutcome::Requeued, _) => {
                    debug!(message_id = %failure.message_id, stage = %failure.stage, "Message requeued");
                }
                (ReleaseOutcome::DeadLettered, Some(ticket_id)) => {
                    if let Err(e) = self.updater.mark_failed(ticket_id).await {
                        error!(ticket_id = %ticket_id, error = %e, "Failed to mark ticket FAILED");
                    }
                }
                (ReleaseOutcome::DeadLettered, None) => {
                    warn!(message_id = %failure.message_id, "Undecodable message dead-lettered");
                }
            }
        }
    }
}

/// Spawn a background task that drains the queue on a timer.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_queue_worker(worker: Arc<QueueWorker>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let interval = worker.config.poll_interval;

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            batch_size = worker.config.batch_size,
            "Queue worker started"
        );

        let mut tick = tokio::time::interval(interval);

        // First tick fires immediately
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Queue worker shutting down");
                return;
            }

            // Keep draining while full batches come back.
            loop {
                match worker.process_once().await {
                    Ok(Some(report)) if report.total() >= worker.config.batch_size => continue,
                    Ok(_) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to receive queue messages");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_flag)
}
