//! Retry scheduler: moves due entries from the delay store back to intake.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use beacon_common::queue::{DelayStore, IntakeQueue};

pub struct RetryScheduler {
    delay: Arc<dyn DelayStore>,
    intake: Arc<dyn IntakeQueue>,
    batch_size: usize,
    tick: Duration,
}

impl RetryScheduler {
    pub fn new(
        delay: Arc<dyn DelayStore>,
        intake: Arc<dyn IntakeQueue>,
        batch_size: usize,
        tick: Duration,
    ) -> Self {
        Self {
            delay,
            intake,
            batch_size,
            tick,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.promote_due(Utc::now().timestamp()).await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Retry scheduler stopped");
                    return;
                }
            }
        }
    }

    /// Promote up to one batch of entries due at or before `now`.
    ///
    /// Only entries that reached the intake queue are removed from the delay
    /// store; a failed push leaves the entry for the next tick. Returns the
    /// number promoted.
    pub async fn promote_due(&self, now: i64) -> usize {
        let due = match self.delay.range_by_score(0, now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read delay store");
                return 0;
            }
        };
        if due.is_empty() {
            return 0;
        }

        let mut promoted = Vec::with_capacity(due.len());
        for raw in due {
            match self.intake.push(&raw).await {
                Ok(()) => promoted.push(raw),
                Err(e) => tracing::error!(error = %e, "Failed to promote delayed entry"),
            }
        }

        if !promoted.is_empty() {
            match self.delay.remove(&promoted).await {
                Ok(removed) => tracing::info!(
                    promoted = promoted.len(),
                    removed,
                    "Promoted delayed entries"
                ),
                // Entries stay in the delay store and will be promoted again.
                Err(e) => tracing::error!(
                    error = %e,
                    promoted = promoted.len(),
                    "Failed to remove promoted entries from delay store"
                ),
            }
        }
        promoted.len()
    }
}
