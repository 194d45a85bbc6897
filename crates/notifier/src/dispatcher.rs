//! Dispatcher pool: drains the intake queue into the bounded worker channel.
//!
//! A full channel blocks the dispatcher, which in turn stops popping. That is
//! the only backpressure between the queue and the workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_common::queue::IntakeQueue;

pub struct Dispatcher {
    id: usize,
    intake: Arc<dyn IntakeQueue>,
    tx: mpsc::Sender<String>,
    pop_timeout: Duration,
    error_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        id: usize,
        intake: Arc<dyn IntakeQueue>,
        tx: mpsc::Sender<String>,
        pop_timeout: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            id,
            intake,
            tx,
            pop_timeout,
            error_backoff,
        }
    }

    /// Pop and forward until cancelled.
    ///
    /// Cancellation is only observed between pops: dropping a pop that the
    /// queue has already served would lose the entry. Shutdown therefore
    /// waits at most one `pop_timeout`.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::debug!(dispatcher_id = self.id, "Dispatcher started");
        while !cancel.is_cancelled() {
            match self.intake.blocking_pop(self.pop_timeout).await {
                Ok(Some(raw)) => self.forward(raw, &cancel).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(dispatcher_id = self.id, error = %e, "Intake pop failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }
        tracing::debug!(dispatcher_id = self.id, "Dispatcher stopped");
    }

    async fn forward(&self, raw: String, cancel: &CancellationToken) {
        tokio::select! {
            permit = self.tx.reserve() => match permit {
                Ok(permit) => permit.send(raw),
                Err(_) => self.return_to_intake(raw, "channel closed").await,
            },
            _ = cancel.cancelled() => self.return_to_intake(raw, "shutting down").await,
        }
    }

    async fn return_to_intake(&self, raw: String, cause: &str) {
        match self.intake.push(&raw).await {
            Ok(()) => tracing::info!(dispatcher_id = self.id, cause, "Returned entry to intake queue"),
            Err(e) => tracing::error!(
                dispatcher_id = self.id,
                cause,
                error = %e,
                payload = %raw,
                "Failed to return entry to intake queue"
            ),
        }
    }
}
